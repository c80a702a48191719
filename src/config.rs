//! Run Configuration
//!
//! `EstimatorConfig` is the serialized form (JSON). `plan()` validates it into a
//! `RunPlan` of typed values, so every configuration error surfaces before any
//! inventory or factor file is read.

use crate::aggregate::AggregationKey;
use crate::consumption::{ConsumptionModel, ConsumptionPreset};
use crate::error::ConfigError;
use crate::factors::{EmissionFactorSource, FactorChoice, PollutantSelector};
use crate::filter::{AutomatedFilter, DateRange, FilterField, FilterMode, FilterRequest, SpatialFilter};
use crate::geometry::{Crs, PolygonSet};
use crate::vehicles::{VehicleMode, DEFAULT_VEHICLE_RATIO};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use geo::{LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_FACTOR_DIR: &str = "data/emission_factors";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorConfig {
    pub consumption: ConsumptionPreset,
    /// Overrides `consumption` when set (No Damage → Destroyed)
    pub custom_consumption: Option<[f64; 5]>,
    pub frame_factor: FactorChoice,
    pub contents_factor: FactorChoice,
    pub emission_factors: EmissionFactorSource,
    pub vehicle_emission_factors: EmissionFactorSource,
    pub factor_dir: PathBuf,
    /// `None` picks the default list, or `ALL` for a custom factor file
    pub pollutants: Option<PollutantSelector>,
    pub vehicle_pollutants: Option<PollutantSelector>,
    pub vehicle_mode: VehicleMode,
    pub vehicle_value: f64,
    pub aggregate_fields: Option<Vec<String>>,
    pub floor_area_column: Option<String>,
    pub filter: FilterConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            consumption: ConsumptionPreset::Dins3,
            custom_consumption: None,
            frame_factor: FactorChoice::Holder,
            contents_factor: FactorChoice::Holder,
            emission_factors: EmissionFactorSource::Holder,
            vehicle_emission_factors: EmissionFactorSource::Carb,
            factor_dir: PathBuf::from(DEFAULT_FACTOR_DIR),
            pollutants: None,
            vehicle_pollutants: None,
            vehicle_mode: VehicleMode::Ratio,
            vehicle_value: DEFAULT_VEHICLE_RATIO,
            aggregate_fields: None,
            floor_area_column: None,
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub mode: FilterMode,
    /// Field nickname, e.g. "Wildfire Name"
    pub field: Option<String>,
    pub values: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub polygon: Option<PolygonConfig>,
}

/// Polygons as exterior rings of `[x, y]` pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonConfig {
    #[serde(default = "default_polygon_crs")]
    pub crs: Crs,
    pub rings: Vec<Vec<[f64; 2]>>,
}

fn default_polygon_crs() -> Crs {
    Crs::Epsg4326
}

impl PolygonConfig {
    pub fn to_polygon_set(&self) -> PolygonSet {
        let polygons = self
            .rings
            .iter()
            .filter(|ring| ring.len() >= 3)
            .map(|ring| {
                let exterior: LineString<f64> = ring.iter().map(|&[x, y]| (x, y)).collect();
                Polygon::new(exterior, vec![])
            })
            .collect();
        PolygonSet::new(MultiPolygon::new(polygons), self.crs)
    }
}

/// Which pipeline a run drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Observed damage inventory
    Estimator,
    /// Synthetic inventory from AOI structure points
    Predictor,
}

/// Validated, typed run configuration
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub kind: RunKind,
    pub consumption: ConsumptionModel,
    pub frame_factor: FactorChoice,
    pub contents_factor: FactorChoice,
    pub emission_factors: EmissionFactorSource,
    pub vehicle_emission_factors: EmissionFactorSource,
    pub factor_dir: PathBuf,
    pub pollutants: PollutantSelector,
    pub vehicle_pollutants: PollutantSelector,
    pub vehicle_mode: VehicleMode,
    pub vehicle_value: f64,
    pub aggregation: AggregationKey,
    pub filter: FilterRequest,
    pub floor_area_column: Option<String>,
}

impl EstimatorConfig {
    /// Load from a JSON file; absent keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate into a run plan
    ///
    /// # Errors
    /// The first configuration error found; nothing has been read from disk.
    pub fn plan(&self, kind: RunKind) -> Result<RunPlan, ConfigError> {
        let consumption = match self.custom_consumption {
            Some(fractions) => ConsumptionModel::custom(fractions)?,
            None => ConsumptionModel::preset(self.consumption),
        };

        let pollutants = self.pollutants.clone().unwrap_or_else(|| {
            if self.emission_factors.is_custom() {
                PollutantSelector::AllAvailable
            } else {
                PollutantSelector::structure_default()
            }
        });
        let vehicle_pollutants = self.vehicle_pollutants.clone().unwrap_or_else(|| {
            if self.vehicle_emission_factors.is_custom() {
                PollutantSelector::AllAvailable
            } else {
                PollutantSelector::vehicle_default()
            }
        });

        if !self.vehicle_value.is_finite() || self.vehicle_value < 0.0 {
            return Err(ConfigError::InvalidVehicleValue(self.vehicle_value));
        }

        let aggregation = match &self.aggregate_fields {
            Some(fields) if !fields.is_empty() => AggregationKey::parse(fields)?,
            _ => match kind {
                RunKind::Estimator => AggregationKey::estimator_default(),
                RunKind::Predictor => AggregationKey::predictor_default(),
            },
        };

        Ok(RunPlan {
            kind,
            consumption,
            frame_factor: self.frame_factor,
            contents_factor: self.contents_factor,
            emission_factors: self.emission_factors.clone(),
            vehicle_emission_factors: self.vehicle_emission_factors.clone(),
            factor_dir: self.factor_dir.clone(),
            pollutants,
            vehicle_pollutants,
            vehicle_mode: self.vehicle_mode,
            vehicle_value: self.vehicle_value,
            aggregation,
            filter: self.filter.request()?,
            floor_area_column: self.floor_area_column.clone(),
        })
    }
}

impl EstimatorConfig {
    /// Check the configuration for both run kinds
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan(RunKind::Estimator)?;
        self.plan(RunKind::Predictor).map(|_| ())
    }
}

impl FilterConfig {
    pub fn request(&self) -> Result<FilterRequest, ConfigError> {
        let date_range = DateRange::from_bounds(self.start_date, self.end_date)?;
        match self.mode {
            FilterMode::Interactive => Ok(FilterRequest::Interactive),
            FilterMode::Spatial => {
                let polygons = self
                    .polygon
                    .as_ref()
                    .map(PolygonConfig::to_polygon_set)
                    .ok_or(ConfigError::MissingPolygon)?;
                Ok(FilterRequest::Spatial(SpatialFilter::new(polygons, date_range)?))
            }
            FilterMode::Automated => {
                let field = self
                    .field
                    .as_deref()
                    .map(str::parse::<FilterField>)
                    .transpose()?;
                let filter = AutomatedFilter {
                    date_range,
                    field,
                    values: self.values.clone(),
                    year: self.year,
                };
                filter.validate()?;
                Ok(FilterRequest::Automated(filter))
            }
        }
    }
}
