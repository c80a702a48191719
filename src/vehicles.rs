//! Vehicle-Equivalent Emissions
//!
//! Vehicle losses are not inventoried, so their count is either given directly or
//! scaled from the number of materially destroyed structures (consumption > 0.5).

use crate::emissions::EmissionsResult;
use crate::error::ConfigError;
use crate::factors::{EmissionFactorTable, POLLUTANT_COLUMN, VEHICLE_FIRE_COLUMN, VEHICLE_GKG_COLUMN};
use crate::rounding::round_to_decimals;
use crate::schema::CONSUMPTION_FACTOR;
use anyhow::{Context, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Vehicles per materially destroyed structure (CARB default)
pub const DEFAULT_VEHICLE_RATIO: f64 = 1.44;

/// Consumption above which a structure counts as materially destroyed
pub const MATERIALLY_DESTROYED_THRESHOLD: f64 = 0.5;

const GRAMS_PER_KG: f64 = 1000.0;
const KG_PER_SHORT_TON: f64 = 907.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VehicleMode {
    /// The value is the vehicle count
    Count,
    /// The value is vehicles per materially destroyed structure
    #[default]
    Ratio,
}

impl FromStr for VehicleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "COUNT" => Ok(VehicleMode::Count),
            "RATIO" => Ok(VehicleMode::Ratio),
            _ => Err(ConfigError::UnknownPreset {
                kind: "vehicle mode",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for VehicleMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VehicleMode> for String {
    fn from(mode: VehicleMode) -> Self {
        match mode {
            VehicleMode::Count => "COUNT".to_string(),
            VehicleMode::Ratio => "RATIO".to_string(),
        }
    }
}

/// Vehicle emissions for one pollutant
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleEmission {
    pub pollutant: String,
    /// g per vehicle fire
    pub factor: f64,
    pub gkg: Option<f64>,
    pub kilograms: f64,
    pub tons: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleEstimate {
    pub vehicles: f64,
    pub emissions: Vec<VehicleEmission>,
}

impl VehicleEstimate {
    /// Report table: one row per pollutant
    pub fn to_frame(&self) -> Result<DataFrame> {
        let pollutants: Vec<&str> = self.emissions.iter().map(|e| e.pollutant.as_str()).collect();
        let gfire: Vec<f64> = self.emissions.iter().map(|e| e.factor).collect();
        let gkg: Vec<Option<f64>> = self.emissions.iter().map(|e| e.gkg).collect();
        let vehicles: Vec<f64> = vec![self.vehicles; self.emissions.len()];
        let kg: Vec<f64> = self.emissions.iter().map(|e| e.kilograms).collect();
        let tn: Vec<f64> = self.emissions.iter().map(|e| e.tons).collect();

        df![
            POLLUTANT_COLUMN => pollutants,
            VEHICLE_FIRE_COLUMN => gfire,
            VEHICLE_GKG_COLUMN => gkg,
            "VEHICLES" => vehicles,
            "TOTAL_VEHICLE_EMISSIONS_KG" => kg,
            "TOTAL_VEHICLE_EMISSIONS_TN" => tn,
        ]
        .context("Failed to build vehicle emissions table")
    }

    pub fn get(&self, pollutant: &str) -> Option<&VehicleEmission> {
        let id = pollutant.trim().to_uppercase();
        self.emissions.iter().find(|e| e.pollutant == id)
    }
}

/// Structures whose consumption exceeds the material-destruction threshold
pub fn materially_destroyed(result: &EmissionsResult) -> Result<usize> {
    let cf = result
        .table()
        .column(CONSUMPTION_FACTOR)
        .with_context(|| format!("Emissions table has no '{}' column", CONSUMPTION_FACTOR))?
        .f64()?;
    Ok(cf
        .into_iter()
        .flatten()
        .filter(|&v| v > MATERIALLY_DESTROYED_THRESHOLD)
        .count())
}

/// Number of vehicles for the mode
pub fn vehicle_count(result: &EmissionsResult, mode: VehicleMode, value: f64) -> Result<f64> {
    match mode {
        VehicleMode::Count => Ok(value),
        VehicleMode::Ratio => {
            let destroyed = materially_destroyed(result)?;
            info!(
                "{} materially destroyed structures x {} vehicles each",
                destroyed, value
            );
            Ok(value * destroyed as f64)
        }
    }
}

/// Vehicle emissions per pollutant
///
/// `factors` must be resolved as vehicle factors (g per vehicle fire).
pub fn estimate_vehicles(
    result: &EmissionsResult,
    mode: VehicleMode,
    value: f64,
    factors: &EmissionFactorTable,
) -> Result<VehicleEstimate> {
    let vehicles = vehicle_count(result, mode, value)?;
    info!("Estimated vehicles burned: {}", vehicles);

    let emissions = factors
        .factors()
        .iter()
        .map(|f| {
            let kilograms = round_to_decimals(f.factor * vehicles / GRAMS_PER_KG, 2);
            VehicleEmission {
                pollutant: f.pollutant.clone(),
                factor: f.factor,
                gkg: f.gkg,
                kilograms,
                tons: round_to_decimals(kilograms / KG_PER_SHORT_TON, 2),
            }
        })
        .collect();

    Ok(VehicleEstimate {
        vehicles,
        emissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumption::ConsumptionModel;
    use crate::data::StructureTable;
    use crate::emissions::EmissionsCalculator;
    use crate::factors::{FactorChoice, PollutantFactor};
    use crate::schema::{DAMAGE, FLOOR_AREA};
    use approx::assert_relative_eq;

    /// 40 records at 0.9 consumption and 60 at 0.2
    fn hundred_structures() -> EmissionsResult {
        let mut damage = vec!["Destroyed (>50%)"; 40];
        damage.extend(vec!["Affected (1-9%)"; 60]);
        let df = df![
            DAMAGE => damage,
            FLOOR_AREA => vec![1000.0; 100],
        ]
        .unwrap();
        let model = ConsumptionModel::custom([0.0, 0.2, 0.2, 0.5, 0.9]).unwrap();
        EmissionsCalculator::new(model, FactorChoice::Holder, FactorChoice::Holder)
            .estimate(
                &StructureTable::without_geometry(df).unwrap(),
                &EmissionFactorTable::default(),
            )
            .unwrap()
    }

    fn vehicle_factors() -> EmissionFactorTable {
        EmissionFactorTable::new(vec![PollutantFactor {
            pollutant: "CO".into(),
            factor: 4610.0,
            gkg: Some(10.0),
        }])
    }

    #[test]
    fn test_ratio_counts_materially_destroyed() {
        let result = hundred_structures();
        assert_eq!(materially_destroyed(&result).unwrap(), 40);

        let vehicles = vehicle_count(&result, VehicleMode::Ratio, DEFAULT_VEHICLE_RATIO).unwrap();
        assert_relative_eq!(vehicles, 57.6, epsilon = 1e-9);
    }

    #[test]
    fn test_ratio_emissions() {
        let estimate = estimate_vehicles(
            &hundred_structures(),
            VehicleMode::Ratio,
            DEFAULT_VEHICLE_RATIO,
            &vehicle_factors(),
        )
        .unwrap();

        let co = estimate.get("co").unwrap();
        // 4610 g × 57.6 / 1000
        assert_relative_eq!(co.kilograms, 265.54, epsilon = 1e-9);
        assert_relative_eq!(co.tons, 0.29, epsilon = 1e-9);
    }

    #[test]
    fn test_count_mode_uses_value_directly() {
        let estimate = estimate_vehicles(
            &hundred_structures(),
            VehicleMode::Count,
            10.0,
            &vehicle_factors(),
        )
        .unwrap();
        assert_relative_eq!(estimate.vehicles, 10.0);
        assert_relative_eq!(estimate.emissions[0].kilograms, 46.1, epsilon = 1e-9);
    }

    #[test]
    fn test_report_frame_columns() {
        let frame = estimate_vehicles(
            &hundred_structures(),
            VehicleMode::Count,
            1.0,
            &vehicle_factors(),
        )
        .unwrap()
        .to_frame()
        .unwrap();

        let names: Vec<String> = frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "POLLUTANT",
                "VEHICLE_GFIRE",
                "VEHICLE_GKG",
                "VEHICLES",
                "TOTAL_VEHICLE_EMISSIONS_KG",
                "TOTAL_VEHICLE_EMISSIONS_TN",
            ]
        );
        assert_eq!(frame.height(), 1);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("ratio".parse::<VehicleMode>().unwrap(), VehicleMode::Ratio);
        assert!("PER_ACRE".parse::<VehicleMode>().is_err());
    }
}
