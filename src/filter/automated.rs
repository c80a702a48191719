//! Automated (configuration-driven) filtering

use super::{apply_date_range, apply_field_values, apply_year, DateRange, FilterField};
use crate::data::StructureTable;
use crate::error::ConfigError;
use anyhow::Result;
use tracing::info;

/// Non-interactive filter: date range, year, and one field/value pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutomatedFilter {
    pub date_range: Option<DateRange>,
    pub field: Option<FilterField>,
    /// `None` means no value filter; an empty list warns and keeps everything
    pub values: Option<Vec<String>>,
    /// Only used for Wildfire Name filtering without a date range
    pub year: Option<i32>,
}

impl AutomatedFilter {
    /// Check the request before any data is touched
    ///
    /// Incident names repeat across years, so a name filter needs either a date
    /// range or a year.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.needs_year() && self.year.is_none() {
            return Err(ConfigError::MissingYear);
        }
        Ok(())
    }

    fn needs_year(&self) -> bool {
        self.field == Some(FilterField::WildfireName) && self.date_range.is_none()
    }

    pub fn apply(&self, table: &StructureTable) -> Result<StructureTable> {
        self.validate()?;
        let mut current = table.clone();

        match &self.date_range {
            Some(range) => current = apply_date_range(&current, range)?,
            None => info!("No date filter applied"),
        }

        if self.needs_year() {
            if let Some(year) = self.year {
                current = apply_year(&current, year)?;
            }
        }

        match (self.field, &self.values) {
            (Some(field), Some(values)) => apply_field_values(&current, field, values),
            _ => {
                info!("No field filter applied");
                Ok(current)
            }
        }
    }
}
