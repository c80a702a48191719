//! Record Filtering
//!
//! Three front ends (automated, interactive, spatial) over one predicate core:
//!   - inclusive start-date range
//!   - start-date year equality
//!   - case-insensitive field/value membership
//!   - polygon intersection in EPSG:3310
//!
//! Every predicate produces a boolean mask that is applied to the frame and the
//! geometry together.

pub mod automated;
pub mod interactive;
pub mod spatial;

pub use automated::AutomatedFilter;
pub use interactive::{InteractiveFilter, InteractiveState, Prompter, StdioPrompter};
pub use spatial::SpatialFilter;

use crate::data::StructureTable;
use crate::error::ConfigError;
use crate::schema::{
    AIR_BASIN, AIR_DISTRICT, COUNTY, DISTRICT_CODE, INCIDENT_NAME, INCIDENT_NUMBER, START_DATE,
};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

const MASK: &str = "__mask";

/// How records are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterMode {
    Interactive,
    #[default]
    Automated,
    Spatial,
}

impl FilterMode {
    pub fn name(self) -> &'static str {
        match self {
            FilterMode::Interactive => "interactive",
            FilterMode::Automated => "automated",
            FilterMode::Spatial => "spatial",
        }
    }
}

impl FromStr for FilterMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interactive" => Ok(FilterMode::Interactive),
            "automated" => Ok(FilterMode::Automated),
            "spatial" => Ok(FilterMode::Spatial),
            _ => Err(ConfigError::UnknownFilterMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for FilterMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterMode> for String {
    fn from(mode: FilterMode) -> Self {
        mode.name().to_string()
    }
}

/// Filterable inventory fields, by user-facing nickname
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    WildfireName,
    IncidentNumber,
    County,
    AirBasin,
    AirDistrict,
    DistrictCode,
}

impl FilterField {
    pub const ALL: [FilterField; 6] = [
        FilterField::WildfireName,
        FilterField::IncidentNumber,
        FilterField::County,
        FilterField::AirBasin,
        FilterField::AirDistrict,
        FilterField::DistrictCode,
    ];

    pub fn nickname(self) -> &'static str {
        match self {
            FilterField::WildfireName => "Wildfire Name",
            FilterField::IncidentNumber => "Incident Number",
            FilterField::County => "County",
            FilterField::AirBasin => "Air Basin",
            FilterField::AirDistrict => "Air District",
            FilterField::DistrictCode => "CoAbDis Code",
        }
    }

    /// Canonical inventory column
    pub fn column(self) -> &'static str {
        match self {
            FilterField::WildfireName => INCIDENT_NAME,
            FilterField::IncidentNumber => INCIDENT_NUMBER,
            FilterField::County => COUNTY,
            FilterField::AirBasin => AIR_BASIN,
            FilterField::AirDistrict => AIR_DISTRICT,
            FilterField::DistrictCode => DISTRICT_CODE,
        }
    }

    fn nicknames() -> String {
        Self::ALL
            .iter()
            .map(|f| f.nickname())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for FilterField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.nickname().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownFilterField(s.to_string(), Self::nicknames()))
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nickname())
    }
}

/// Inclusive start-date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvertedDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Both bounds or neither
    pub fn from_bounds(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, ConfigError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteDateRange),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Selection request for one run
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRequest {
    Automated(AutomatedFilter),
    Spatial(SpatialFilter),
    Interactive,
}

impl FilterRequest {
    pub fn mode(&self) -> FilterMode {
        match self {
            FilterRequest::Automated(_) => FilterMode::Automated,
            FilterRequest::Spatial(_) => FilterMode::Spatial,
            FilterRequest::Interactive => FilterMode::Interactive,
        }
    }
}

/// Terminal result of a filtering session
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    Filtered(StructureTable),
    Exited,
}

/// Run the requested filter
///
/// The prompter is only consulted in interactive mode.
pub fn filter_structures(
    table: &StructureTable,
    request: &FilterRequest,
    prompter: &mut dyn Prompter,
) -> Result<FilterOutcome> {
    info!(
        "Filtering {} records ({} mode)",
        table.height(),
        request.mode().name()
    );
    let outcome = match request {
        FilterRequest::Automated(filter) => FilterOutcome::Filtered(filter.apply(table)?),
        FilterRequest::Spatial(filter) => FilterOutcome::Filtered(filter.apply(table)?),
        FilterRequest::Interactive => InteractiveFilter::new(table.clone(), prompter).run()?,
    };

    if let FilterOutcome::Filtered(filtered) = &outcome {
        info!("{} records remain after filtering", filtered.height());
    }
    Ok(outcome)
}

/// Evaluate a boolean expression against the table's frame
pub(crate) fn expr_mask(table: &StructureTable, predicate: Expr) -> Result<BooleanChunked> {
    let out = table
        .frame()
        .clone()
        .lazy()
        .select([predicate.alias(MASK)])
        .collect()
        .context("Failed to evaluate filter predicate")?;
    Ok(out.column(MASK)?.bool()?.clone())
}

fn require_column(table: &StructureTable, column: &str) -> Result<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(anyhow!("Cannot filter: inventory has no '{}' column", column))
    }
}

/// Keep records whose start date falls within the range (inclusive)
pub fn apply_date_range(table: &StructureTable, range: &DateRange) -> Result<StructureTable> {
    require_column(table, START_DATE)?;
    let predicate = col(START_DATE)
        .gt_eq(lit(range.start).cast(DataType::Date))
        .and(col(START_DATE).lt_eq(lit(range.end).cast(DataType::Date)));
    let mask = expr_mask(table, predicate)?;
    let filtered = table.filter(&mask)?;
    info!("Date range {}: {} records", range, filtered.height());
    Ok(filtered)
}

/// Keep records whose start date falls in `year`
pub fn apply_year(table: &StructureTable, year: i32) -> Result<StructureTable> {
    require_column(table, START_DATE)?;
    let mask = expr_mask(table, col(START_DATE).dt().year().eq(lit(year)))?;
    let filtered = table.filter(&mask)?;
    info!("Year {}: {} records", year, filtered.height());
    Ok(filtered)
}

/// Keep records whose field value matches one of `values`, ignoring case
///
/// An empty `values` list leaves the table unfiltered.
pub fn apply_field_values<S: AsRef<str>>(
    table: &StructureTable,
    field: FilterField,
    values: &[S],
) -> Result<StructureTable> {
    if values.is_empty() {
        warn!("No values given for {}; records left unfiltered", field);
        return Ok(table.clone());
    }
    let column = field.column();
    require_column(table, column)?;

    let wanted: FxHashSet<String> = values
        .iter()
        .map(|v| v.as_ref().trim().to_uppercase())
        .collect();
    let as_text = table
        .frame()
        .column(column)?
        .cast(&DataType::String)
        .with_context(|| format!("Column '{}' cannot be read as text", column))?;
    let mask: BooleanChunked = as_text
        .str()?
        .into_iter()
        .map(|v| Some(v.is_some_and(|v| wanted.contains(&v.trim().to_uppercase()))))
        .collect();

    let filtered = table.filter(&mask.with_name(MASK.into()))?;
    info!(
        "{} in {:?}: {} records",
        field,
        values.iter().map(|v| v.as_ref()).collect::<Vec<_>>(),
        filtered.height()
    );
    Ok(filtered)
}


#[cfg(test)]
mod tests {
    use super::test_support::inventory;
    use super::*;
    use crate::schema::COUNTY;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_date_range_bounds() {
        assert_eq!(DateRange::from_bounds(None, None), Ok(None));
        assert_eq!(
            DateRange::from_bounds(Some(date("2018-01-01")), None),
            Err(ConfigError::IncompleteDateRange)
        );
        assert!(matches!(
            DateRange::from_bounds(Some(date("2019-01-01")), Some(date("2018-01-01"))),
            Err(ConfigError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let range = DateRange::new(date("2018-11-08"), date("2018-11-09")).unwrap();
        let filtered = apply_date_range(&inventory(), &range).unwrap();
        assert_eq!(filtered.height(), 2);
        assert_eq!(filtered.geometry().len(), 2);
    }

    #[test]
    fn test_year_filter() {
        let filtered = apply_year(&inventory(), 2018).unwrap();
        assert_eq!(filtered.height(), 4);
    }

    #[test]
    fn test_field_values_ignore_case() {
        let filtered = apply_field_values(&inventory(), FilterField::County, &["butte"]).unwrap();
        assert_eq!(filtered.height(), 3);

        let counties = filtered.frame().column(COUNTY).unwrap().str().unwrap().clone();
        assert!(counties.into_iter().all(|c| c.unwrap().eq_ignore_ascii_case("BUTTE")));
    }

    #[test]
    fn test_empty_values_leave_table_unfiltered() {
        let values: Vec<String> = Vec::new();
        let filtered = apply_field_values(&inventory(), FilterField::County, &values).unwrap();
        assert_eq!(filtered.height(), 5);
    }

    #[test]
    fn test_field_nickname_lookup() {
        assert_eq!("wildfire name".parse::<FilterField>().unwrap(), FilterField::WildfireName);
        assert_eq!("CoAbDis Code".parse::<FilterField>().unwrap().column(), "COABDIS");
        assert!(matches!(
            "Zip Code".parse::<FilterField>(),
            Err(ConfigError::UnknownFilterField(_, _))
        ));
    }

    #[test]
    fn test_missing_column_is_error() {
        let result = apply_field_values(&inventory(), FilterField::AirDistrict, &["BUTTE"]);
        assert!(result.is_err());
    }
}
