//! Pipeline Driver
//!
//! validate → resolve factor tables → filter → emissions → aggregate → vehicles.
//!
//! Factor tables are resolved before any record is touched, so resolution errors stop
//! the run early. An empty filter result ends the run with `NoMatchingRecords`.

use crate::aggregate::aggregate;
use crate::config::RunPlan;
use crate::data::StructureTable;
use crate::emissions::{EmissionsCalculator, EmissionsResult};
use crate::factors::{load_factor_table, EmissionFactorTable, FactorKind};
use crate::filter::{filter_structures, FilterOutcome, Prompter};
use crate::synthetic::SyntheticInventory;
use crate::vehicles::{estimate_vehicles, VehicleEstimate};
use anyhow::Result;
use polars::prelude::*;
use rand::Rng;
use tracing::{info, warn};

/// Resolved structure and vehicle emission factors
#[derive(Debug, Clone)]
pub struct FactorTables {
    pub structure: EmissionFactorTable,
    pub vehicle: EmissionFactorTable,
}

impl FactorTables {
    /// Read both factor files named by the plan and resolve them
    pub fn load(plan: &RunPlan) -> Result<Self> {
        let structure = load_factor_table(&plan.emission_factors, &plan.factor_dir)?;
        let vehicle = load_factor_table(&plan.vehicle_emission_factors, &plan.factor_dir)?;
        Self::resolve(plan, &structure, &vehicle)
    }

    /// Resolve already-loaded factor tables
    pub fn resolve(plan: &RunPlan, structure: &DataFrame, vehicle: &DataFrame) -> Result<Self> {
        Ok(Self {
            structure: EmissionFactorTable::resolve(
                structure,
                FactorKind::Structure,
                &plan.pollutants,
                &format!("Structure EFs ({})", plan.emission_factors.name()),
            )?,
            vehicle: EmissionFactorTable::resolve(
                vehicle,
                FactorKind::Vehicle,
                &plan.vehicle_pollutants,
                &format!("Vehicle EFs ({})", plan.vehicle_emission_factors.name()),
            )?,
        })
    }
}

/// The three report tables of a completed run
#[derive(Debug, Clone)]
pub struct EmissionsReport {
    pub emissions: EmissionsResult,
    pub summary: DataFrame,
    pub vehicles: VehicleEstimate,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(EmissionsReport),
    /// Filtering left no records
    NoMatchingRecords,
    /// The interactive session was exited
    Cancelled,
}

impl PipelineOutcome {
    pub fn report(&self) -> Option<&EmissionsReport> {
        match self {
            PipelineOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

pub struct EmissionsPipeline {
    plan: RunPlan,
    factors: FactorTables,
    calculator: EmissionsCalculator,
}

impl EmissionsPipeline {
    pub fn new(plan: RunPlan, factors: FactorTables) -> Self {
        let calculator = EmissionsCalculator::new(
            plan.consumption.clone(),
            plan.frame_factor,
            plan.contents_factor,
        )
        .with_floor_area_column(plan.floor_area_column.clone());
        Self {
            plan,
            factors,
            calculator,
        }
    }

    /// Build a pipeline, reading the plan's factor files
    pub fn from_plan(plan: RunPlan) -> Result<Self> {
        let factors = FactorTables::load(&plan)?;
        Ok(Self::new(plan, factors))
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn factors(&self) -> &FactorTables {
        &self.factors
    }

    /// Observed-inventory run: filter, then compute
    pub fn run(&self, inventory: &StructureTable, prompter: &mut dyn Prompter) -> Result<PipelineOutcome> {
        match filter_structures(inventory, &self.plan.filter, prompter)? {
            FilterOutcome::Exited => Ok(PipelineOutcome::Cancelled),
            FilterOutcome::Filtered(records) if records.is_empty() => {
                warn!("No records match the filters; nothing to estimate");
                Ok(PipelineOutcome::NoMatchingRecords)
            }
            FilterOutcome::Filtered(records) => self.compute(&records).map(PipelineOutcome::Completed),
        }
    }

    /// Predictor run over structure points inside areas of interest
    pub fn run_predictor<R: Rng + ?Sized>(
        &self,
        points: &StructureTable,
        synthetic: &SyntheticInventory,
        rng: &mut R,
    ) -> Result<PipelineOutcome> {
        let records = synthetic.prepare(points, rng)?;
        if records.is_empty() {
            warn!("No structures with a usable floor area; nothing to estimate");
            return Ok(PipelineOutcome::NoMatchingRecords);
        }
        self.compute(&records).map(PipelineOutcome::Completed)
    }

    /// Emissions, summary and vehicle tables for already-selected records
    pub fn compute(&self, records: &StructureTable) -> Result<EmissionsReport> {
        let emissions = self.calculator.estimate(records, &self.factors.structure)?;
        let summary = aggregate(&emissions, &self.plan.aggregation)?;
        let vehicles = estimate_vehicles(
            &emissions,
            self.plan.vehicle_mode,
            self.plan.vehicle_value,
            &self.factors.vehicle,
        )?;

        info!(
            "Run complete: {} records, {} summary groups, {} vehicle pollutants",
            emissions.height(),
            summary.height(),
            vehicles.emissions.len()
        );
        Ok(EmissionsReport {
            emissions,
            summary,
            vehicles,
        })
    }
}
