//! Grouped Aggregation
//!
//! Sums every `E_` column over an ordered dimension set and counts damaged structures
//! (consumption > 0) per group. Groups with no damaged structures are dropped.
//!
//! Grouping columns always come out in a fixed priority order, so the same dimension
//! set requested in any order produces the same table.

use crate::emissions::EmissionsResult;
use crate::error::ConfigError;
use crate::rounding::round_expr;
use crate::schema::*;
use anyhow::{Context, Result};
use polars::prelude::*;
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// One grouping dimension; declaration order is output column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregationDimension {
    AirBasin,
    AirDistrict,
    AirDistrictId,
    County,
    CoAbDis,
    Year,
    Month,
    Incident,
    AoiIndex,
}

impl AggregationDimension {
    pub const ALL: [AggregationDimension; 9] = [
        AggregationDimension::AirBasin,
        AggregationDimension::AirDistrict,
        AggregationDimension::AirDistrictId,
        AggregationDimension::County,
        AggregationDimension::CoAbDis,
        AggregationDimension::Year,
        AggregationDimension::Month,
        AggregationDimension::Incident,
        AggregationDimension::AoiIndex,
    ];

    /// User-facing name
    pub fn name(self) -> &'static str {
        match self {
            AggregationDimension::AirBasin => "AIR BASIN",
            AggregationDimension::AirDistrict => "AIR DISTRICT",
            AggregationDimension::AirDistrictId => "AIR DISTRICT ID",
            AggregationDimension::County => "COUNTY",
            AggregationDimension::CoAbDis => "COABDIS",
            AggregationDimension::Year => "YEAR",
            AggregationDimension::Month => "MONTH",
            AggregationDimension::Incident => "INCIDENT",
            AggregationDimension::AoiIndex => "AOI_INDEX",
        }
    }

    /// Emissions column the dimension groups on
    pub fn column(self) -> &'static str {
        match self {
            AggregationDimension::AirBasin => AIR_BASIN,
            AggregationDimension::AirDistrict => AIR_DISTRICT,
            AggregationDimension::AirDistrictId => DISTRICT_ID,
            AggregationDimension::County => COUNTY,
            AggregationDimension::CoAbDis => DISTRICT_CODE,
            AggregationDimension::Year => YEAR,
            AggregationDimension::Month => MONTH,
            AggregationDimension::Incident => INCIDENT_NAME,
            AggregationDimension::AoiIndex => AOI_INDEX,
        }
    }

    fn is_temporal(self) -> bool {
        matches!(self, AggregationDimension::Year | AggregationDimension::Month)
    }
}

impl FromStr for AggregationDimension {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase().replace('_', " ");
        Self::ALL
            .into_iter()
            .find(|d| d.name().replace('_', " ") == wanted)
            .ok_or_else(|| {
                let names = Self::ALL.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ");
                ConfigError::UnknownDimension(s.to_string(), names)
            })
    }
}

impl fmt::Display for AggregationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical (sorted, de-duplicated) dimension set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationKey {
    dimensions: SmallVec<[AggregationDimension; 4]>,
}

impl AggregationKey {
    /// Canonicalize: MONTH implies YEAR, duplicates collapse, priority order
    pub fn new<I: IntoIterator<Item = AggregationDimension>>(dimensions: I) -> Self {
        let mut dims: SmallVec<[AggregationDimension; 4]> = dimensions.into_iter().collect();
        if dims.contains(&AggregationDimension::Month) {
            dims.push(AggregationDimension::Year);
        }
        dims.sort_unstable();
        dims.dedup();
        Self { dimensions: dims }
    }

    /// Parse user-facing names
    ///
    /// # Errors
    /// `ConfigError::UnknownDimension` on the first unrecognized name.
    pub fn parse<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dims = names
            .into_iter()
            .map(|n| n.as_ref().parse::<AggregationDimension>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(dims))
    }

    /// Observed-inventory default: by year and incident
    pub fn estimator_default() -> Self {
        Self::new([AggregationDimension::Year, AggregationDimension::Incident])
    }

    /// Predictor default: by area of interest
    pub fn predictor_default() -> Self {
        Self::new([AggregationDimension::AoiIndex])
    }

    pub fn dimensions(&self) -> &[AggregationDimension] {
        &self.dimensions
    }

    pub fn columns(&self) -> Vec<&'static str> {
        self.dimensions.iter().map(|d| d.column()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// Aggregate emissions by the key's dimensions
///
/// Steps:
/// 1. Derive YEAR/MONTH from START_DATE when requested
/// 2. Drop rows with a null grouping value
/// 3. Sum every `E_` column per group
/// 4. Count rows with consumption > 0 per group, left-merge (missing → 0)
/// 5. Drop groups with zero damaged structures
/// 6. Round sums to 2 decimals and sort by the grouping columns
pub fn aggregate(result: &EmissionsResult, key: &AggregationKey) -> Result<DataFrame> {
    let keys = key.columns();
    let emissions = emission_columns(result.table());

    let mut needed: Vec<&str> = keys
        .iter()
        .zip(key.dimensions())
        .filter(|(_, d)| !d.is_temporal())
        .map(|(c, _)| *c)
        .collect();
    needed.push(CONSUMPTION_FACTOR);
    if key.dimensions().iter().any(|d| d.is_temporal()) {
        needed.push(START_DATE);
    }
    require_columns(result.table(), &needed, "Aggregation")?;

    let mut lf = result.table().clone().lazy();
    if key.dimensions().contains(&AggregationDimension::Year) {
        lf = lf.with_column(col(START_DATE).dt().year().alias(YEAR));
    }
    if key.dimensions().contains(&AggregationDimension::Month) {
        lf = lf.with_column(col(START_DATE).dt().month().alias(MONTH));
    }

    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    if let Some(all_present) = key_exprs
        .iter()
        .map(|k| k.clone().is_not_null())
        .reduce(|a, b| a.and(b))
    {
        lf = lf.filter(all_present);
    }

    const ROWS: &str = "__rows";
    let mut sums: Vec<Expr> = emissions.iter().map(|c| col(c.as_str()).sum()).collect();
    sums.push(len().alias(ROWS));

    let summed = lf.clone().group_by(key_exprs.clone()).agg(sums);
    let damaged = lf
        .filter(col(CONSUMPTION_FACTOR).gt(lit(0.0)))
        .group_by(key_exprs.clone())
        .agg([len().alias(DAMAGED_STRUCTURES)]);

    let mut output: Vec<Expr> = key_exprs.clone();
    output.extend(emissions.iter().map(|c| round_expr(col(c.as_str()), 2)));
    output.push(col(DAMAGED_STRUCTURES));

    let summary = summed
        .join(
            damaged,
            key_exprs.clone(),
            key_exprs,
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(DAMAGED_STRUCTURES).fill_null(lit(0u32)))
        .filter(col(DAMAGED_STRUCTURES).gt(lit(0u32)))
        .sort(keys.clone(), Default::default())
        .select(output)
        .collect()
        .context("Failed to aggregate emissions")?;

    info!(
        "Aggregated {} records into {} groups by {:?}",
        result.height(),
        summary.height(),
        keys
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumption::{ConsumptionModel, ConsumptionPreset};
    use crate::data::StructureTable;
    use crate::emissions::EmissionsCalculator;
    use crate::factors::{EmissionFactorTable, FactorChoice, PollutantFactor};
    use crate::rounding::round_to_decimals;
    use approx::assert_relative_eq;

    fn emissions() -> EmissionsResult {
        let df = df![
            INCIDENT_NAME => &["Camp", "Camp", "Carr", "Carr", "Carr", "Dixie"],
            START_DATE => &["2018-11-08", "2018-11-09", "2018-07-23", "2018-08-02", "2018-08-03", "2021-07-13"],
            AIR_BASIN => &[Some("SACRAMENTO VALLEY"), Some("SACRAMENTO VALLEY"), Some("SACRAMENTO VALLEY"), Some("NORTHEAST PLATEAU"), None, Some("NORTHEAST PLATEAU")],
            DAMAGE => &["Destroyed (>50%)", "Major (26-50%)", "Destroyed (>50%)", "Destroyed (>50%)", "Destroyed (>50%)", "No Damage"],
            FLOOR_AREA => &[2000.0, 1000.0, 1500.0, 1200.0, 900.0, 3000.0],
        ]
        .unwrap();
        let factors = EmissionFactorTable::new(vec![
            PollutantFactor { pollutant: "CO".into(), factor: 60.0, gkg: None },
            PollutantFactor { pollutant: "PM".into(), factor: 8.0, gkg: None },
        ]);
        EmissionsCalculator::new(
            ConsumptionModel::preset(ConsumptionPreset::Dins3),
            FactorChoice::Holder,
            FactorChoice::Holder,
        )
        .estimate(&StructureTable::without_geometry(df).unwrap(), &factors)
        .unwrap()
    }

    #[test]
    fn test_key_canonical_order() {
        let a = AggregationKey::parse(["INCIDENT", "AIR BASIN"]).unwrap();
        let b = AggregationKey::parse(["air basin", "incident", "INCIDENT"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.columns(), vec![AIR_BASIN, INCIDENT_NAME]);
    }

    #[test]
    fn test_month_implies_year() {
        let key = AggregationKey::parse(["MONTH"]).unwrap();
        assert_eq!(key.columns(), vec![YEAR, MONTH]);
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let err = AggregationKey::parse(["YEAR", "ZIP"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDimension(ref name, _) if name == "ZIP"));
    }

    #[test]
    fn test_request_order_does_not_matter() {
        let result = emissions();
        let a = aggregate(&result, &AggregationKey::parse(["INCIDENT", "AIR BASIN"]).unwrap()).unwrap();
        let b = aggregate(&result, &AggregationKey::parse(["AIR BASIN", "INCIDENT"]).unwrap()).unwrap();
        assert!(a.equals_missing(&b));
    }

    #[test]
    fn test_groups_without_damage_are_dropped() {
        let summary = aggregate(&emissions(), &AggregationKey::estimator_default()).unwrap();

        // Dixie has only an undamaged record
        let incidents: Vec<Option<&str>> = summary
            .column(INCIDENT_NAME)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(incidents, vec![Some("Camp"), Some("Carr")]);

        let damaged = summary.column(DAMAGED_STRUCTURES).unwrap().u32().unwrap();
        assert_eq!(damaged.get(0), Some(2));
        assert_eq!(damaged.get(1), Some(3));
    }

    #[test]
    fn test_sums_match_retained_rows() {
        let result = emissions();
        let summary = aggregate(&result, &AggregationKey::estimator_default()).unwrap();

        let per_row = result.table().column("E_CO_TN").unwrap().f64().unwrap().clone();
        let camp: f64 = per_row.get(0).unwrap() + per_row.get(1).unwrap();
        let sums = summary.column("E_CO_TN").unwrap().f64().unwrap();
        assert_relative_eq!(sums.get(0).unwrap(), round_to_decimals(camp, 2), epsilon = 1e-9);
    }

    #[test]
    fn test_null_group_values_are_dropped() {
        let summary = aggregate(&emissions(), &AggregationKey::parse(["AIR BASIN"]).unwrap()).unwrap();
        assert_eq!(summary.height(), 2);
        let damaged: u32 = summary
            .column(DAMAGED_STRUCTURES)
            .unwrap()
            .u32()
            .unwrap()
            .into_iter()
            .flatten()
            .sum();
        // five damaged records, one without a basin
        assert_eq!(damaged, 4);
    }

    #[test]
    fn test_month_aggregation_columns() {
        let summary = aggregate(&emissions(), &AggregationKey::parse(["MONTH"]).unwrap()).unwrap();
        let names: Vec<String> = summary
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec![YEAR, MONTH, "E_CO_TN", "E_PM_TN", DAMAGED_STRUCTURES]);
        // 2018-07, 2018-08, 2018-11
        assert_eq!(summary.height(), 3);
    }
}
