//! Structure Fire Emissions Estimator
//!
//! Estimates pollutant emissions from fire-damaged structures and the vehicles lost
//! with them, then rolls the per-structure estimates up into summary reports.
//!
//! Pipeline stages:
//! - `filter/`: date, field and spatial record selection (automated, interactive, spatial)
//! - `consumption`: damage category → consumed fraction
//! - `factors`: fuel loads and emission-factor tables
//! - `emissions`: per-structure emissions
//! - `aggregate`: grouped summaries
//! - `vehicles`: vehicle-equivalent emissions
//!
//! `pipeline` strings the stages together from a validated `config::RunPlan`.

pub mod aggregate;
pub mod config;
pub mod consumption;
pub mod data;
pub mod emissions;
pub mod error;
pub mod factors;
pub mod filter;
pub mod geometry;
pub mod pipeline;
pub mod rounding;
pub mod schema;
pub mod synthetic;
pub mod vehicles;

// Re-export commonly used types
pub use aggregate::{aggregate, AggregationDimension, AggregationKey};
pub use config::{EstimatorConfig, RunKind, RunPlan};
pub use consumption::{ConsumptionModel, ConsumptionPreset};
pub use data::StructureTable;
pub use emissions::{EmissionsCalculator, EmissionsResult};
pub use error::{ConfigError, ResolutionError};
pub use factors::{EmissionFactorSource, EmissionFactorTable, FactorChoice, FactorKind, PollutantSelector};
pub use filter::{filter_structures, FilterField, FilterMode, FilterOutcome, FilterRequest, Prompter};
pub use geometry::{Crs, PolygonSet};
pub use pipeline::{EmissionsPipeline, EmissionsReport, FactorTables, PipelineOutcome};
pub use schema::DamageCategory;
pub use synthetic::SyntheticInventory;
pub use vehicles::{estimate_vehicles, VehicleEstimate, VehicleMode};
