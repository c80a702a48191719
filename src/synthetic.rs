//! Synthetic Inventory Preparation
//!
//! Turns structure points inside areas of interest into a damage inventory for the
//! predictor path. Damage is generated only when the input carries none: a fixed
//! share of structures, chosen at random, is marked destroyed.

use crate::data::StructureTable;
use crate::schema::{DamageCategory, DAMAGE, FLOOR_AREA, FLOOR_AREA_SOURCE, INCIDENT_NAME, START_DATE};
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use polars::prelude::*;
use rand::seq::index;
use rand::Rng;
use tracing::{info, warn};

/// Floor-area provenance recorded for synthetic records
pub const PARCEL_SOURCE: &str = "PARCEL";

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticInventory {
    pub run_name: String,
    pub run_date: NaiveDate,
    /// Share of structures marked `Destroyed (>50%)`, in [0, 1]
    pub ratio_destroyed: f64,
}

impl SyntheticInventory {
    /// Run named after the current time, dated today
    pub fn new(ratio_destroyed: f64) -> Self {
        let now = Local::now();
        Self {
            run_name: format!("PREDICTOR_{}", now.format("%Y%m%d%H%M")),
            run_date: now.date_naive(),
            ratio_destroyed,
        }
    }

    /// Build the inventory
    ///
    /// Steps:
    /// 1. Drop structures with missing or non-positive floor area
    /// 2. Stamp every record with the run date; fill incident name and floor-area
    ///    source when absent
    /// 3. Generate damage labels when absent
    pub fn prepare<R: Rng + ?Sized>(&self, table: &StructureTable, rng: &mut R) -> Result<StructureTable> {
        if !(0.0..=1.0).contains(&self.ratio_destroyed) {
            return Err(anyhow!(
                "ratio_destroyed must be within [0, 1], got {}",
                self.ratio_destroyed
            ));
        }
        if !table.has_column(FLOOR_AREA) {
            return Err(anyhow!("Structure points have no '{}' column", FLOOR_AREA));
        }

        let mask = crate::filter::expr_mask(
            table,
            col(FLOOR_AREA)
                .cast(DataType::Float64)
                .gt(lit(0.0))
                .fill_null(lit(false)),
        )?;
        let table = table.filter(&mask)?;
        let dropped = mask.len() - table.height();
        if dropped > 0 {
            warn!("Dropped {} structures without a usable floor area", dropped);
        }

        let mut fills: Vec<Expr> =
            vec![lit(self.run_date).cast(DataType::Date).alias(START_DATE)];
        if !table.has_column(INCIDENT_NAME) {
            fills.push(lit(self.run_name.clone()).alias(INCIDENT_NAME));
        }
        if !table.has_column(FLOOR_AREA_SOURCE) {
            fills.push(lit(PARCEL_SOURCE).alias(FLOOR_AREA_SOURCE));
        }

        let mut frame = table
            .frame()
            .clone()
            .lazy()
            .with_columns(fills)
            .collect()
            .context("Failed to fill synthetic inventory defaults")?;

        if !table.has_column(DAMAGE) {
            let labels = self.damage_labels(frame.height(), rng);
            frame
                .with_column(Column::new(DAMAGE.into(), labels))
                .context("Failed to add synthetic damage")?;
        }

        info!(
            "Synthetic inventory '{}': {} structures",
            self.run_name,
            frame.height()
        );
        table.with_frame(frame)
    }

    /// `floor(ratio × n)` random positions destroyed, the rest undamaged
    fn damage_labels<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<&'static str> {
        let destroyed = ((self.ratio_destroyed * n as f64).floor() as usize).min(n);
        let mut labels = vec![DamageCategory::NoDamage.label(); n];
        for i in index::sample(rng, n, destroyed).iter() {
            labels[i] = DamageCategory::Destroyed.label();
        }
        info!("Marked {} of {} structures destroyed", destroyed, n);
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AOI_INDEX;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn points() -> StructureTable {
        let df = df![
            AOI_INDEX => &[0, 0, 1, 1, 1, 2],
            FLOOR_AREA => &[Some(1200.0), None, Some(0.0), Some(900.0), Some(1500.0), Some(2200.0)],
        ]
        .unwrap();
        StructureTable::without_geometry(df).unwrap()
    }

    fn inventory(ratio: f64) -> SyntheticInventory {
        SyntheticInventory {
            run_name: "SWEEP_TEST".into(),
            run_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            ratio_destroyed: ratio,
        }
    }

    #[test]
    fn test_drops_unusable_floor_area() {
        let mut rng = StdRng::seed_from_u64(7);
        let prepared = inventory(0.5).prepare(&points(), &mut rng).unwrap();
        assert_eq!(prepared.height(), 4);
        assert_eq!(prepared.geometry().len(), 4);
    }

    #[test]
    fn test_destroyed_share() {
        let mut rng = StdRng::seed_from_u64(7);
        let prepared = inventory(0.5).prepare(&points(), &mut rng).unwrap();
        let damage = prepared.frame().column(DAMAGE).unwrap().str().unwrap().clone();

        let destroyed = damage
            .into_iter()
            .filter(|d| *d == Some(DamageCategory::Destroyed.label()))
            .count();
        assert_eq!(destroyed, 2);
    }

    #[test]
    fn test_defaults_filled() {
        let mut rng = StdRng::seed_from_u64(1);
        let prepared = inventory(0.0).prepare(&points(), &mut rng).unwrap();
        let frame = prepared.frame();

        assert_eq!(
            frame.column(INCIDENT_NAME).unwrap().str().unwrap().get(0),
            Some("SWEEP_TEST")
        );
        assert_eq!(frame.column(START_DATE).unwrap().dtype(), &DataType::Date);
        assert_eq!(
            frame.column(FLOOR_AREA_SOURCE).unwrap().str().unwrap().get(0),
            Some(PARCEL_SOURCE)
        );
    }

    #[test]
    fn test_run_date_replaces_existing_dates() {
        let df = df![
            FLOOR_AREA => &[1000.0, 2000.0],
            "CLEAN_DATE" => &["2017-10-09", "2018-11-08"],
        ]
        .unwrap();
        let table = StructureTable::without_geometry(df).unwrap();
        let prepared = inventory(0.0)
            .prepare(&table, &mut StdRng::seed_from_u64(5))
            .unwrap();

        let dates: Vec<Option<NaiveDate>> = prepared
            .frame()
            .column(START_DATE)
            .unwrap()
            .as_materialized_series()
            .date()
            .unwrap()
            .as_date_iter()
            .collect();
        let run_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert_eq!(dates, vec![run_date, run_date]);
    }

    #[test]
    fn test_same_seed_same_damage() {
        let a = inventory(0.5)
            .prepare(&points(), &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = inventory(0.5)
            .prepare(&points(), &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert!(a.frame().equals_missing(b.frame()));
    }

    #[test]
    fn test_existing_damage_kept() {
        let df = df![
            FLOOR_AREA => &[1000.0, 2000.0],
            DAMAGE => &["Minor (10-25%)", "No Damage"],
        ]
        .unwrap();
        let table = StructureTable::without_geometry(df).unwrap();
        let prepared = inventory(1.0)
            .prepare(&table, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let damage = prepared.frame().column(DAMAGE).unwrap().str().unwrap().get(0);
        assert_eq!(damage, Some("Minor (10-25%)"));
    }

    #[test]
    fn test_ratio_out_of_range() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(inventory(1.5).prepare(&points(), &mut rng).is_err());
    }
}
