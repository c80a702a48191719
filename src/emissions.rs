//! Emissions Calculator
//!
//! Per-structure emissions for a resolved pollutant set:
//!
//! ```text
//! pounds = ((area × frame + area × contents) / 2000) × consumption × (gkg × 2)
//! tons   = round(pounds / 2000, 3)   (ties to even)
//! ```
//!
//! Consumption, frame and contents factors are table-wide expressions; only the ton
//! columns are kept. Records whose damage label is unrecognized keep a null
//! consumption factor and therefore null emissions.

use crate::consumption::ConsumptionModel;
use crate::data::StructureTable;
use crate::factors::{
    contents_factor, contents_factor_expr, frame_factor_expr, EmissionFactorTable, FactorChoice,
};
use crate::geometry::Crs;
use crate::rounding::round_expr;
use crate::schema::*;
use anyhow::{anyhow, Context, Result};
use geo::Geometry;
use polars::prelude::*;
use tracing::{info, warn};

/// Identity, jurisdiction and factor columns kept in the result (when present),
/// followed by one `E_<POLLUTANT>_TN` column per pollutant
pub const OUTPUT_COLUMNS: &[&str] = &[
    INCIDENT_NAME,
    INCIDENT_NUMBER,
    START_DATE,
    GLOBAL_ID,
    DAMAGE,
    STRUCTURE_TYPE,
    STRUCTURE_CATEGORY,
    CATEGORY,
    FLOOR_AREA,
    FLOOR_AREA_SOURCE,
    COUNTY,
    AIR_BASIN,
    AIR_DISTRICT,
    DISTRICT_CODE,
    DISTRICT_ID,
    AOI_INDEX,
    CONSUMPTION_FACTOR,
    FRAME_FACTOR,
    CONTENTS_FACTOR,
];

const POUNDS_PER_TON: f64 = 2000.0;

/// Computes per-record emissions with a fixed model and factor choice
#[derive(Debug, Clone)]
pub struct EmissionsCalculator {
    consumption: ConsumptionModel,
    frame: FactorChoice,
    contents: FactorChoice,
    floor_area_column: Option<String>,
}

impl EmissionsCalculator {
    pub fn new(consumption: ConsumptionModel, frame: FactorChoice, contents: FactorChoice) -> Self {
        Self {
            consumption,
            frame,
            contents,
            floor_area_column: None,
        }
    }

    /// Take floor area from another column instead of `SQFT`
    pub fn with_floor_area_column(mut self, column: Option<String>) -> Self {
        self.floor_area_column = column.map(|c| c.trim().to_uppercase());
        self
    }

    pub fn consumption(&self) -> &ConsumptionModel {
        &self.consumption
    }

    /// Estimate emissions for every record
    ///
    /// # Errors
    /// Missing `DAMAGE` or floor-area column, or a floor area that is not numeric.
    pub fn estimate(
        &self,
        records: &StructureTable,
        factors: &EmissionFactorTable,
    ) -> Result<EmissionsResult> {
        let area_source = self.floor_area_column.as_deref().unwrap_or(FLOOR_AREA);
        require_columns(records.frame(), &[DAMAGE, area_source], "Emissions")?;
        if factors.is_empty() {
            warn!("No pollutants resolved; emissions table will have no E_ columns");
        }

        info!(
            "Estimating emissions for {} records (consumption {}, frame {}, contents {})",
            records.height(),
            self.consumption.name(),
            self.frame,
            self.contents
        );

        let contents = if records.has_column(CATEGORY) {
            contents_factor_expr(self.contents)
        } else {
            lit(contents_factor(self.contents, None))
        };

        let area = || col(FLOOR_AREA);
        let emission_exprs: Vec<Expr> = factors
            .factors()
            .iter()
            .map(|f| {
                let pounds = ((area() * col(FRAME_FACTOR) + area() * col(CONTENTS_FACTOR))
                    / lit(POUNDS_PER_TON))
                    * col(CONSUMPTION_FACTOR)
                    * lit(f.factor * 2.0);
                round_expr(pounds / lit(POUNDS_PER_TON), 3).alias(emission_column(&f.pollutant))
            })
            .collect();

        let computed = records
            .frame()
            .clone()
            .lazy()
            .with_columns([
                col(area_source).cast(DataType::Float64).alias(FLOOR_AREA),
                self.consumption.expr(),
                frame_factor_expr(self.frame).alias(FRAME_FACTOR),
                contents.alias(CONTENTS_FACTOR),
            ])
            .with_columns(emission_exprs)
            .collect()
            .context("Failed to compute emissions")?;

        let unrecognized = count_unrecognized_damage(&computed)?;
        if unrecognized.unknown > 0 {
            warn!(
                "{} records have an unrecognized damage label; their emissions are null",
                unrecognized.unknown
            );
        }
        if unrecognized.missing > 0 {
            warn!(
                "{} records have no damage label; their emissions are null",
                unrecognized.missing
            );
        }

        let pollutants: Vec<String> = factors
            .factors()
            .iter()
            .map(|f| f.pollutant.clone())
            .collect();
        let table = project(&computed, &pollutants)?;
        info!(
            "Computed {} emission columns for {} records",
            pollutants.len(),
            table.height()
        );

        Ok(EmissionsResult {
            table,
            geometry: records.geometry().to_vec(),
            crs: records.crs(),
            pollutants,
            unrecognized_damage: unrecognized.unknown,
        })
    }
}

struct DamageAudit {
    unknown: usize,
    missing: usize,
}

fn count_unrecognized_damage(df: &DataFrame) -> Result<DamageAudit> {
    let damage = df.column(DAMAGE)?.cast(&DataType::String)?;
    let damage = damage.str()?;
    let factor = df.column(CONSUMPTION_FACTOR)?.f64()?;

    let mut audit = DamageAudit {
        unknown: 0,
        missing: 0,
    };
    for (label, cf) in damage.into_iter().zip(factor) {
        match (label, cf) {
            (None, _) => audit.missing += 1,
            (Some(_), None) => audit.unknown += 1,
            _ => {}
        }
    }
    Ok(audit)
}

fn project(df: &DataFrame, pollutants: &[String]) -> Result<DataFrame> {
    let mut columns: Vec<String> = OUTPUT_COLUMNS
        .iter()
        .filter(|c| df.column(c).is_ok())
        .map(|c| c.to_string())
        .collect();
    columns.extend(pollutants.iter().map(|p| emission_column(p)));

    df.select(columns)
        .context("Failed to project emissions output columns")
}

/// Per-record emissions, immutable once computed
#[derive(Debug, Clone)]
pub struct EmissionsResult {
    table: DataFrame,
    geometry: Vec<Option<Geometry<f64>>>,
    crs: Crs,
    pollutants: Vec<String>,
    unrecognized_damage: usize,
}

impl EmissionsResult {
    pub fn table(&self) -> &DataFrame {
        &self.table
    }

    pub fn geometry(&self) -> &[Option<Geometry<f64>>] {
        &self.geometry
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Pollutants with an `E_` column, in factor-table order
    pub fn pollutants(&self) -> &[String] {
        &self.pollutants
    }

    /// Records whose damage label matched no category
    pub fn unrecognized_damage(&self) -> usize {
        self.unrecognized_damage
    }

    pub fn height(&self) -> usize {
        self.table.height()
    }

    /// Sum of one pollutant's tons across all records
    pub fn total_tons(&self, pollutant: &str) -> Result<f64> {
        let name = emission_column(&pollutant.trim().to_uppercase());
        let column = self
            .table
            .column(&name)
            .map_err(|_| anyhow!("No emissions computed for '{}'", pollutant))?;
        Ok(column.f64()?.sum().unwrap_or(0.0))
    }
}
