//! Canonical Inventory Schema
//!
//! Column names are normalized once, when an inventory enters the crate. Every stage
//! after ingestion reads the canonical upper-case names defined here.

use anyhow::{anyhow, Context, Result};
use polars::prelude::*;
use std::collections::HashSet;
use std::fmt;

pub const INCIDENT_NAME: &str = "INCIDENTNAME";
pub const INCIDENT_NUMBER: &str = "INCIDENTNUM";
pub const START_DATE: &str = "START_DATE";
pub const GLOBAL_ID: &str = "GLOBALID_DINS";
pub const DAMAGE: &str = "DAMAGE";
pub const STRUCTURE_TYPE: &str = "STRUCTURETYPE";
pub const STRUCTURE_CATEGORY: &str = "STRUCTURECATEGORY";
pub const CATEGORY: &str = "CAT";
pub const FLOOR_AREA: &str = "SQFT";
pub const FLOOR_AREA_SOURCE: &str = "SQFT_SOURCE";
pub const COUNTY: &str = "COUNTY";
pub const AIR_BASIN: &str = "AIR_BASIN";
pub const AIR_DISTRICT: &str = "AIR_DISTRICT";
pub const DISTRICT_CODE: &str = "COABDIS";
pub const DISTRICT_ID: &str = "DISA_ID";
pub const AOI_INDEX: &str = "AOI_INDEX";

pub const CONSUMPTION_FACTOR: &str = "CONSUMPTION_FACTOR";
pub const FRAME_FACTOR: &str = "FRAME_FACTOR";
pub const CONTENTS_FACTOR: &str = "CONTENTS_FACTOR";

pub const YEAR: &str = "YEAR";
pub const MONTH: &str = "MONTH";
pub const DAMAGED_STRUCTURES: &str = "DAMAGED_STRUCTURES";

/// Prefix and suffix of per-pollutant ton columns (`E_CO_TN`)
pub const EMISSION_PREFIX: &str = "E_";
pub const EMISSION_SUFFIX: &str = "_TN";

/// Source names that map onto canonical names at ingestion
const INGEST_RENAMES: &[(&str, &str)] = &[
    ("CLEAN_DATE", START_DATE),
    ("BASIN_NAME", AIR_BASIN),
    ("DIS_NAME", AIR_DISTRICT),
    ("GLOBALID", GLOBAL_ID),
    ("CO_NAME", COUNTY),
    ("COABDIS_ID", DISTRICT_CODE),
];

/// Emission column name for a normalized pollutant id
pub fn emission_column(pollutant: &str) -> String {
    format!("{}{}{}", EMISSION_PREFIX, pollutant, EMISSION_SUFFIX)
}

/// True for `E_<POLLUTANT>_TN` columns
pub fn is_emission_column(name: &str) -> bool {
    name.starts_with(EMISSION_PREFIX) && name.ends_with(EMISSION_SUFFIX)
}

/// DINS damage category, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DamageCategory {
    NoDamage,
    Affected,
    Minor,
    Major,
    Destroyed,
}

impl DamageCategory {
    pub const ALL: [DamageCategory; 5] = [
        DamageCategory::NoDamage,
        DamageCategory::Affected,
        DamageCategory::Minor,
        DamageCategory::Major,
        DamageCategory::Destroyed,
    ];

    /// Inventory label, exactly as recorded by damage inspectors
    pub fn label(self) -> &'static str {
        match self {
            DamageCategory::NoDamage => "No Damage",
            DamageCategory::Affected => "Affected (1-9%)",
            DamageCategory::Minor => "Minor (10-25%)",
            DamageCategory::Major => "Major (26-50%)",
            DamageCategory::Destroyed => "Destroyed (>50%)",
        }
    }

    /// Severity ordinal (0 = no damage)
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Exact label match; anything else (including padded labels) is unrecognized
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

impl fmt::Display for DamageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalize an inventory to the canonical schema
///
/// 1. Upper-case every column name
/// 2. Rename source jurisdiction/date/id columns to canonical names (an existing
///    canonical column wins over its source alias)
/// 3. Parse `START_DATE` to a `Date` column
pub fn normalize_columns(df: DataFrame) -> Result<DataFrame> {
    let original: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut names: Vec<String> = original
        .iter()
        .map(|name| {
            let upper = name.to_uppercase();
            if upper != *name && original.contains(&upper) {
                name.clone()
            } else {
                upper
            }
        })
        .collect();

    for (source, canonical) in INGEST_RENAMES {
        if names.iter().any(|n| n == canonical) {
            continue;
        }
        if let Some(slot) = names.iter_mut().find(|n| n.as_str() == *source) {
            *slot = canonical.to_string();
        }
    }

    let df = if names == original {
        df
    } else {
        with_column_names(df, names)?
    };
    parse_start_date(df)
}

/// Rebuild a frame with new column names, one per existing column
///
/// `DataFrame::rename` leaves the cached schema on the old names, so lazy plans built
/// from the frame afterwards cannot see the renamed columns.
pub(crate) fn with_column_names(df: DataFrame, names: Vec<String>) -> Result<DataFrame> {
    if names.len() != df.width() {
        return Err(anyhow!(
            "Expected {} column names, got {}",
            df.width(),
            names.len()
        ));
    }
    let columns: Vec<Column> = df
        .take_columns()
        .into_iter()
        .zip(names)
        .map(|(mut column, name)| {
            column.rename(name.into());
            column
        })
        .collect();
    DataFrame::new(columns).context("Failed to rebuild frame with renamed columns")
}

/// Coerce `START_DATE` to `Date`; unparseable values become null
fn parse_start_date(df: DataFrame) -> Result<DataFrame> {
    let dtype = match df.column(START_DATE) {
        Ok(column) => column.dtype().clone(),
        Err(_) => return Ok(df),
    };

    let expr = match dtype {
        DataType::Date => return Ok(df),
        DataType::String => col(START_DATE).str().to_date(StrptimeOptions {
            strict: false,
            ..Default::default()
        }),
        DataType::Datetime(_, _) => col(START_DATE).cast(DataType::Date),
        other => {
            return Err(anyhow!(
                "Column '{}' has unsupported type {:?}; expected a date or string",
                START_DATE,
                other
            ))
        }
    };

    df.lazy()
        .with_column(expr)
        .collect()
        .with_context(|| format!("Failed to parse '{}' as a date", START_DATE))
}

/// Validate that all required columns are present
///
/// # Errors
/// Names the first missing column together with what is available.
pub fn require_columns(df: &DataFrame, columns: &[&str], context: &str) -> Result<()> {
    let actual: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for &expected in columns {
        if !actual.contains(expected) {
            return Err(anyhow!(
                "{}: Missing expected column '{}'. Available columns: {:?}",
                context,
                expected,
                actual
            ));
        }
    }

    Ok(())
}

/// Names of every `E_<POLLUTANT>_TN` column, in table order
pub fn emission_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .filter(|name| is_emission_column(name))
        .map(|name| name.to_string())
        .collect()
}
