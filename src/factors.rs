//! Factor Resolution
//!
//! Resolves the three kinds of factors the calculation needs:
//!   - frame fuel load (mass per floor area), preset or numeric
//!   - contents fuel load, preset (optionally category-conditional) or numeric
//!   - emission factors per pollutant, from a preset file or a caller table
//!
//! Factor tables are read before computation starts; resolution itself never does I/O.

use crate::error::{ConfigError, ResolutionError};
use crate::schema::{with_column_names, CATEGORY};
use anyhow::{Context, Result};
use polars::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const HOLDER_FRAME_FACTOR: f64 = 31.07;
pub const CARB_FRAME_FACTOR: f64 = 13.34;
pub const HOLDER_CONTENTS_FACTOR: f64 = 5.87;
pub const CARB_CONTENTS_FACTOR: f64 = 7.909;
pub const CARB_COMMERCIAL_CONTENTS_FACTOR: f64 = 8.636;

/// Structure categories that carry the commercial CARB contents load
pub const CARB_COMMERCIAL_CATEGORIES: &[&str] = &["COMMS", "COMSS", "SCH", "HP"];

/// Average combustible mass of one vehicle (kg), for g/kg → g/vehicle conversion
pub const VEHICLE_MASS_KG: f64 = 461.0;

pub const POLLUTANT_COLUMN: &str = "POLLUTANT";
pub const STRUCTURE_FACTOR_COLUMN: &str = "STRUCTURE_GKG";
pub const VEHICLE_FIRE_COLUMN: &str = "VEHICLE_GFIRE";
pub const VEHICLE_GKG_COLUMN: &str = "VEHICLE_GKG";

/// Frame or contents load: named preset or explicit value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FactorRepr", into = "FactorRepr")]
pub enum FactorChoice {
    Holder,
    Carb,
    Value(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FactorRepr {
    Value(f64),
    Preset(String),
}

impl TryFrom<FactorRepr> for FactorChoice {
    type Error = ConfigError;

    fn try_from(repr: FactorRepr) -> Result<Self, Self::Error> {
        match repr {
            FactorRepr::Value(v) => Ok(FactorChoice::Value(v)),
            FactorRepr::Preset(name) => match name.trim().to_uppercase().as_str() {
                "HOLDER" => Ok(FactorChoice::Holder),
                "CARB" => Ok(FactorChoice::Carb),
                _ => name
                    .trim()
                    .parse::<f64>()
                    .map(FactorChoice::Value)
                    .map_err(|_| ConfigError::UnknownPreset {
                        kind: "fuel load",
                        value: name,
                    }),
            },
        }
    }
}

impl From<FactorChoice> for FactorRepr {
    fn from(choice: FactorChoice) -> Self {
        match choice {
            FactorChoice::Holder => FactorRepr::Preset("HOLDER".to_string()),
            FactorChoice::Carb => FactorRepr::Preset("CARB".to_string()),
            FactorChoice::Value(v) => FactorRepr::Value(v),
        }
    }
}

impl fmt::Display for FactorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorChoice::Holder => f.write_str("HOLDER"),
            FactorChoice::Carb => f.write_str("CARB"),
            FactorChoice::Value(v) => write!(f, "{}", v),
        }
    }
}

/// Constant frame load for the choice
pub fn frame_factor(choice: FactorChoice) -> f64 {
    match choice {
        FactorChoice::Holder => HOLDER_FRAME_FACTOR,
        FactorChoice::Carb => CARB_FRAME_FACTOR,
        FactorChoice::Value(v) => v,
    }
}

/// Per-record frame load expression
pub fn frame_factor_expr(choice: FactorChoice) -> Expr {
    lit(frame_factor(choice))
}

/// Per-record contents load expression
///
/// CARB contents vary by structure category: commercial, school and hospital
/// categories use the higher load; everything else (including missing categories)
/// uses the residential load.
pub fn contents_factor_expr(choice: FactorChoice) -> Expr {
    match choice {
        FactorChoice::Holder => lit(HOLDER_CONTENTS_FACTOR),
        FactorChoice::Value(v) => lit(v),
        FactorChoice::Carb => {
            let is_commercial = CARB_COMMERCIAL_CATEGORIES
                .iter()
                .map(|c| col(CATEGORY).eq(lit(*c)))
                .reduce(|a, b| a.or(b))
                .unwrap_or_else(|| lit(false));
            when(is_commercial.fill_null(lit(false)))
                .then(lit(CARB_COMMERCIAL_CONTENTS_FACTOR))
                .otherwise(lit(CARB_CONTENTS_FACTOR))
        }
    }
}

/// Contents load for a single category
pub fn contents_factor(choice: FactorChoice, category: Option<&str>) -> f64 {
    match choice {
        FactorChoice::Holder => HOLDER_CONTENTS_FACTOR,
        FactorChoice::Value(v) => v,
        FactorChoice::Carb => match category {
            Some(c) if CARB_COMMERCIAL_CATEGORIES.contains(&c) => CARB_COMMERCIAL_CONTENTS_FACTOR,
            _ => CARB_CONTENTS_FACTOR,
        },
    }
}

/// Which pollutants to compute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "SelectorRepr")]
pub enum PollutantSelector {
    AllAvailable,
    Explicit(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Sentinel(String),
    List(Vec<String>),
}

impl TryFrom<SelectorRepr> for PollutantSelector {
    type Error = ConfigError;

    fn try_from(repr: SelectorRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            SelectorRepr::Sentinel(s) if s.trim().eq_ignore_ascii_case("ALL") => {
                PollutantSelector::AllAvailable
            }
            SelectorRepr::Sentinel(s) => PollutantSelector::explicit(s.split(',')),
            SelectorRepr::List(list) => PollutantSelector::explicit(list),
        })
    }
}

impl From<PollutantSelector> for SelectorRepr {
    fn from(selector: PollutantSelector) -> Self {
        match selector {
            PollutantSelector::AllAvailable => SelectorRepr::Sentinel("ALL".to_string()),
            PollutantSelector::Explicit(list) => SelectorRepr::List(list),
        }
    }
}

impl PollutantSelector {
    /// Explicit list with normalized (trimmed, upper-case, de-duplicated) ids
    pub fn explicit<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = FxHashSet::default();
        let list = ids
            .into_iter()
            .map(|s| normalize_pollutant(s.as_ref()))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        PollutantSelector::Explicit(list)
    }

    /// Default structure pollutants
    pub fn structure_default() -> Self {
        Self::explicit(["CO", "NOx", "SOx", "PM", "TOG"])
    }

    /// Default vehicle pollutants
    pub fn vehicle_default() -> Self {
        Self::explicit(["CO", "NOx", "SOx", "PM"])
    }
}

/// Canonical pollutant id
pub fn normalize_pollutant(id: &str) -> String {
    id.trim().to_uppercase()
}

/// Where an emission-factor table comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmissionFactorSource {
    Holder,
    Carb,
    #[serde(rename = "OTHER")]
    Custom(PathBuf),
}

impl EmissionFactorSource {
    /// Path of the table inside the factor directory
    pub fn path(&self, factor_dir: &Path) -> PathBuf {
        match self {
            EmissionFactorSource::Holder => factor_dir.join("Holder_EFs.csv"),
            EmissionFactorSource::Carb => factor_dir.join("CARB_EFs.csv"),
            EmissionFactorSource::Custom(path) => path.clone(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EmissionFactorSource::Custom(_))
    }

    pub fn name(&self) -> String {
        match self {
            EmissionFactorSource::Holder => "HOLDER".to_string(),
            EmissionFactorSource::Carb => "CARB".to_string(),
            EmissionFactorSource::Custom(path) => format!("OTHER ({})", path.display()),
        }
    }
}

/// Read an emission-factor CSV and upper-case its column names
///
/// # Errors
/// `ResolutionError::MissingFile` if the file does not exist; CSV parse errors
/// propagate with context.
pub fn load_factor_table(source: &EmissionFactorSource, factor_dir: &Path) -> Result<DataFrame> {
    let path = source.path(factor_dir);
    if !path.exists() {
        return Err(ResolutionError::MissingFile(path).into());
    }
    info!("{} emission factors from: {}", source.name(), path.display());

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.clone()))
        .with_context(|| format!("Failed to create CSV reader: {}", path.display()))?
        .finish()
        .with_context(|| format!("Failed to load emission factors: {}", path.display()))?;

    uppercase_columns(df)
}

fn uppercase_columns(df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_uppercase())
        .collect();
    if names
        .iter()
        .zip(df.get_column_names())
        .all(|(upper, name)| upper == name.as_str())
    {
        return Ok(df);
    }
    with_column_names(df, names).context("Failed to upper-case factor table columns")
}

/// Which factor column an emission-factor table is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    /// g/kg of structure material
    Structure,
    /// g per vehicle fire (derived from g/kg when needed)
    Vehicle,
}

/// One resolved pollutant factor
#[derive(Debug, Clone, PartialEq)]
pub struct PollutantFactor {
    pub pollutant: String,
    pub factor: f64,
    /// Source g/kg value when the vehicle factor was derived from it
    pub gkg: Option<f64>,
}

/// Resolved emission factors, in table order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmissionFactorTable {
    factors: Vec<PollutantFactor>,
}

impl EmissionFactorTable {
    pub fn new(factors: Vec<PollutantFactor>) -> Self {
        Self { factors }
    }

    /// Resolve a raw factor table against a pollutant selector
    ///
    /// Steps:
    /// 1. Upper-case column names and pollutant ids
    /// 2. Pick the factor column (`STRUCTURE_GKG`, or `VEHICLE_GFIRE` with a
    ///    `VEHICLE_GKG × 461` fallback)
    /// 3. Keep requested pollutants (all for `AllAvailable`)
    /// 4. Drop rows without a factor
    /// 5. Reject duplicate ids
    ///
    /// Requested pollutants missing from the table are logged and omitted.
    pub fn resolve(
        raw: &DataFrame,
        kind: FactorKind,
        selector: &PollutantSelector,
        table_name: &str,
    ) -> Result<Self> {
        let df = uppercase_columns(raw.clone())?;
        let available: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let missing = |column: &str| ResolutionError::MissingColumn {
            table: table_name.to_string(),
            column: column.to_string(),
            available: available.clone(),
        };

        if !available.iter().any(|c| c == POLLUTANT_COLUMN) {
            return Err(missing(POLLUTANT_COLUMN).into());
        }
        let pollutants = df
            .column(POLLUTANT_COLUMN)?
            .cast(&DataType::String)
            .with_context(|| format!("{}: pollutant column is not text", table_name))?;
        let pollutants = pollutants.str()?;

        let float_column = |name: &str| -> Result<Option<Float64Chunked>> {
            match df.column(name) {
                Ok(c) => Ok(Some(
                    c.cast(&DataType::Float64)
                        .with_context(|| format!("{}: column '{}' is not numeric", table_name, name))?
                        .f64()?
                        .clone(),
                )),
                Err(_) => Ok(None),
            }
        };

        // (factor, source g/kg) per row
        let values: Vec<(Option<f64>, Option<f64>)> = match kind {
            FactorKind::Structure => {
                let gkg = float_column(STRUCTURE_FACTOR_COLUMN)?
                    .ok_or_else(|| missing(STRUCTURE_FACTOR_COLUMN))?;
                gkg.into_iter().map(|v| (v, None)).collect()
            }
            FactorKind::Vehicle => {
                let gkg = float_column(VEHICLE_GKG_COLUMN)?;
                match (float_column(VEHICLE_FIRE_COLUMN)?, gkg) {
                    (Some(gfire), gkg) => gfire
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (v, gkg.as_ref().and_then(|g| g.get(i))))
                        .collect(),
                    (None, Some(gkg)) => {
                        info!(
                            "{}: deriving {} from {} x {}",
                            table_name, VEHICLE_FIRE_COLUMN, VEHICLE_GKG_COLUMN, VEHICLE_MASS_KG
                        );
                        gkg.into_iter()
                            .map(|v| (v.map(|g| g * VEHICLE_MASS_KG), v))
                            .collect()
                    }
                    (None, None) => return Err(missing(VEHICLE_FIRE_COLUMN).into()),
                }
            }
        };

        let requested: Option<FxHashSet<&str>> = match selector {
            PollutantSelector::AllAvailable => None,
            PollutantSelector::Explicit(ids) => Some(ids.iter().map(|s| s.as_str()).collect()),
        };

        let mut factors = Vec::new();
        let mut seen = FxHashSet::default();
        for (idx, (factor, gkg)) in values.into_iter().enumerate() {
            let Some(id) = pollutants.get(idx).map(normalize_pollutant) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            if let Some(requested) = &requested {
                if !requested.contains(id.as_str()) {
                    continue;
                }
            }
            let Some(factor) = factor.filter(|f| !f.is_nan()) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                return Err(ResolutionError::DuplicatePollutant {
                    table: table_name.to_string(),
                    pollutant: id,
                }
                .into());
            }
            factors.push(PollutantFactor {
                pollutant: id,
                factor,
                gkg,
            });
        }

        if let PollutantSelector::Explicit(ids) = selector {
            let absent: Vec<&String> = ids.iter().filter(|id| !seen.contains(*id)).collect();
            if !absent.is_empty() {
                warn!(
                    "{}: requested pollutants not available and skipped: {:?}",
                    table_name, absent
                );
            }
        }

        info!(
            "{}: returned pollutants {:?}",
            table_name,
            factors.iter().map(|f| f.pollutant.as_str()).collect::<Vec<_>>()
        );

        Ok(Self { factors })
    }

    pub fn factors(&self) -> &[PollutantFactor] {
        &self.factors
    }

    pub fn pollutants(&self) -> Vec<&str> {
        self.factors.iter().map(|f| f.pollutant.as_str()).collect()
    }

    pub fn get(&self, pollutant: &str) -> Option<f64> {
        let id = normalize_pollutant(pollutant);
        self.factors.iter().find(|f| f.pollutant == id).map(|f| f.factor)
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use approx::assert_relative_eq;

    fn structure_table() -> DataFrame {
        df![
            "Pollutant" => &["CO", "NOx", "SOx", "PM", "HCl"],
            "Structure_gkg" => &[Some(60.0), Some(2.5), None, Some(8.0), Some(1.0)],
        ]
        .unwrap()
    }

    #[test]
    fn test_resolve_all_skips_missing_factors() {
        let table = EmissionFactorTable::resolve(
            &structure_table(),
            FactorKind::Structure,
            &PollutantSelector::AllAvailable,
            "test",
        )
        .unwrap();

        assert_eq!(table.pollutants(), vec!["CO", "NOX", "PM", "HCL"]);
    }

    #[test]
    fn test_resolve_explicit_is_case_insensitive() {
        let selector = PollutantSelector::explicit(["co", "NOX", "TOG"]);
        let table = EmissionFactorTable::resolve(
            &structure_table(),
            FactorKind::Structure,
            &selector,
            "test",
        )
        .unwrap();

        assert_eq!(table.pollutants(), vec!["CO", "NOX"]);
        assert_relative_eq!(table.get("nox").unwrap(), 2.5);
    }

    #[test]
    fn test_duplicate_pollutants_rejected() {
        let df = df![
            "POLLUTANT" => &["CO", "co"],
            "STRUCTURE_GKG" => &[1.0, 2.0],
        ]
        .unwrap();

        let err = EmissionFactorTable::resolve(
            &df,
            FactorKind::Structure,
            &PollutantSelector::AllAvailable,
            "test",
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ResolutionError>(),
            Some(ResolutionError::DuplicatePollutant { .. })
        ));
    }

    #[test]
    fn test_missing_factor_column_is_resolution_error() {
        let df = df!["POLLUTANT" => &["CO"], "OTHER" => &[1.0]].unwrap();
        let err = EmissionFactorTable::resolve(
            &df,
            FactorKind::Structure,
            &PollutantSelector::AllAvailable,
            "test",
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ResolutionError>(),
            Some(ResolutionError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_vehicle_factor_derived_from_gkg() {
        let df = df![
            "POLLUTANT" => &["CO", "PM"],
            "VEHICLE_GKG" => &[10.0, 2.0],
        ]
        .unwrap();

        let table = EmissionFactorTable::resolve(
            &df,
            FactorKind::Vehicle,
            &PollutantSelector::AllAvailable,
            "test",
        )
        .unwrap();

        assert_relative_eq!(table.get("CO").unwrap(), 4610.0);
        assert_eq!(table.factors()[1].gkg, Some(2.0));
    }

    #[test]
    fn test_vehicle_fire_column_preferred() {
        let df = df![
            "POLLUTANT" => &["CO"],
            "VEHICLE_GFIRE" => &[1234.0],
            "VEHICLE_GKG" => &[10.0],
        ]
        .unwrap();

        let table = EmissionFactorTable::resolve(
            &df,
            FactorKind::Vehicle,
            &PollutantSelector::AllAvailable,
            "test",
        )
        .unwrap();

        assert_relative_eq!(table.get("CO").unwrap(), 1234.0);
    }

    #[test]
    fn test_carb_contents_by_category() {
        assert_relative_eq!(contents_factor(FactorChoice::Carb, Some("SCH")), 8.636);
        assert_relative_eq!(contents_factor(FactorChoice::Carb, Some("SFSS")), 7.909);
        assert_relative_eq!(contents_factor(FactorChoice::Carb, None), 7.909);
        assert_relative_eq!(contents_factor(FactorChoice::Value(3.0), Some("SCH")), 3.0);
    }

    #[test]
    fn test_contents_expr_matches_scalar_rule() {
        let df = df![CATEGORY => &[Some("COMMS"), Some("MOB"), None]].unwrap();
        let out = df
            .lazy()
            .with_column(contents_factor_expr(FactorChoice::Carb).alias("C"))
            .collect()
            .unwrap();
        let c = out.column("C").unwrap().f64().unwrap();
        assert_eq!(c.get(0), Some(8.636));
        assert_eq!(c.get(1), Some(7.909));
        assert_eq!(c.get(2), Some(7.909));
    }

    #[test]
    fn test_factor_choice_deserializes_presets_and_numbers() {
        let holder: FactorChoice = serde_json::from_str("\"holder\"").unwrap();
        let value: FactorChoice = serde_json::from_str("12.5").unwrap();
        assert_eq!(holder, FactorChoice::Holder);
        assert_eq!(value, FactorChoice::Value(12.5));
        assert!(serde_json::from_str::<FactorChoice>("\"WOOD\"").is_err());
    }

    #[test]
    fn test_selector_deserializes_sentinel_and_list() {
        let all: PollutantSelector = serde_json::from_str("\"all\"").unwrap();
        let list: PollutantSelector = serde_json::from_str("[\"co\", \"PM\", \"CO\"]").unwrap();
        assert_eq!(all, PollutantSelector::AllAvailable);
        assert_eq!(list, PollutantSelector::Explicit(vec!["CO".into(), "PM".into()]));
    }
}
