//! Error taxonomy
//!
//! Configuration problems and factor-table resolution problems are fatal and carry
//! their own types so callers can `downcast_ref` them out of an `anyhow::Error`.
//! Data-quality conditions (unknown damage labels, absent pollutants, empty filter
//! results) are not errors: they are logged and handled by omission.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid run configuration, detected before any computation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown aggregation dimension '{0}'. Must be one of: {1}")]
    UnknownDimension(String, String),

    #[error("Unknown filter field '{0}'. Must be one of: {1}")]
    UnknownFilterField(String, String),

    #[error("start_date and end_date must be provided together")]
    IncompleteDateRange,

    #[error("start_date {start} is after end_date {end}")]
    InvertedDateRange { start: String, end: String },

    #[error("A year must be provided for Wildfire Name filtering without a date range")]
    MissingYear,

    #[error("Unknown {kind} preset '{value}'")]
    UnknownPreset { kind: &'static str, value: String },

    #[error("Spatial filtering requires at least one polygon")]
    MissingPolygon,

    #[error("Unknown filter mode '{0}'. Choose 'interactive', 'automated', or 'spatial'")]
    UnknownFilterMode(String),

    #[error("Invalid consumption mapping: {0}")]
    InvalidConsumptionMapping(String),

    #[error("Vehicle value must be a non-negative number, got {0}")]
    InvalidVehicleValue(f64),
}

/// Factor table could not be turned into usable factors
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Emission factor file not found: {0:?}")]
    MissingFile(PathBuf),

    #[error("{table}: missing required column '{column}'. Available columns: {available:?}")]
    MissingColumn {
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("{table}: pollutant '{pollutant}' appears more than once")]
    DuplicatePollutant { table: String, pollutant: String },
}
