//! Inventory Loading and Management
//!
//! A structure inventory is a Polars DataFrame in the canonical schema plus one
//! optional geometry per row. Geometries live beside the frame rather than in it, so
//! every row filter applies one boolean mask to both.

use crate::geometry::Crs;
use crate::schema::normalize_columns;
use anyhow::{anyhow, Context, Result};
use geo::{Geometry, Point};
use polars::prelude::*;
use std::path::Path;
use tracing::{info, warn};

/// Point column pairs recognized in flat inventory files
const POINT_COLUMNS: &[(&str, &str)] = &[("LONGITUDE", "LATITUDE"), ("X", "Y")];

/// Damage inventory in the canonical schema
#[derive(Debug, Clone)]
pub struct StructureTable {
    frame: DataFrame,
    geometry: Vec<Option<Geometry<f64>>>,
    crs: Crs,
}

impl StructureTable {
    /// Build a table from an inventory frame and its geometries
    ///
    /// Column names are normalized here; no later stage renames anything.
    pub fn new(frame: DataFrame, geometry: Vec<Option<Geometry<f64>>>, crs: Crs) -> Result<Self> {
        if geometry.len() != frame.height() {
            return Err(anyhow!(
                "Geometry count {} does not match record count {}",
                geometry.len(),
                frame.height()
            ));
        }
        Ok(Self {
            frame: normalize_columns(frame)?,
            geometry,
            crs,
        })
    }

    /// Inventory with no geometry (spatial filtering keeps nothing)
    pub fn without_geometry(frame: DataFrame) -> Result<Self> {
        let geometry = vec![None; frame.height()];
        Self::new(frame, geometry, Crs::Epsg4326)
    }

    /// Build point geometries from coordinate columns
    ///
    /// Recognizes `LONGITUDE`/`LATITUDE` and `X`/`Y` (case-insensitive). A frame with
    /// neither pair gets no geometry. `crs` of `None` is assumed to be EPSG:4326.
    pub fn from_frame(frame: DataFrame, crs: Option<Crs>) -> Result<Self> {
        let crs = crs.unwrap_or_else(|| {
            warn!("Inventory CRS not provided; assuming {}", Crs::Epsg4326);
            Crs::Epsg4326
        });
        let frame = normalize_columns(frame)?;

        let names: Vec<String> = frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let pair = POINT_COLUMNS
            .iter()
            .find(|(x, y)| names.iter().any(|n| n == x) && names.iter().any(|n| n == y));

        let geometry = match pair {
            Some((x, y)) => point_geometry(&frame, x, y)?,
            None => {
                warn!("No point columns found; records carry no geometry");
                vec![None; frame.height()]
            }
        };

        Ok(Self {
            frame,
            geometry,
            crs,
        })
    }

    /// Load a CSV or Parquet inventory (by extension)
    pub fn load(path: &Path, crs: Option<Crs>) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let frame = match extension.as_str() {
            "parquet" => LazyFrame::scan_parquet(path, Default::default())
                .with_context(|| format!("Failed to scan parquet: {}", path.display()))?
                .collect()
                .with_context(|| format!("Failed to load inventory parquet: {}", path.display()))?,
            "csv" => CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))
                .with_context(|| format!("Failed to create CSV reader: {}", path.display()))?
                .finish()
                .with_context(|| format!("Failed to load inventory CSV: {}", path.display()))?,
            other => {
                return Err(anyhow!(
                    "Unsupported inventory format '{}' for {}; expected .csv or .parquet",
                    other,
                    path.display()
                ))
            }
        };

        info!("Loaded {} structure records from {}", frame.height(), path.display());
        Self::from_frame(frame, crs)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn geometry(&self) -> &[Option<Geometry<f64>>] {
        &self.geometry
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Keep rows where `mask` is true (null counts as false)
    pub fn filter(&self, mask: &BooleanChunked) -> Result<Self> {
        let frame = self
            .frame
            .filter(mask)
            .context("Failed to apply record mask")?;
        let geometry = mask
            .into_iter()
            .zip(&self.geometry)
            .filter(|(keep, _)| *keep == Some(true))
            .map(|(_, g)| g.clone())
            .collect();

        Ok(Self {
            frame,
            geometry,
            crs: self.crs,
        })
    }

    /// Swap the frame for one derived row-for-row from it
    pub(crate) fn with_frame(&self, frame: DataFrame) -> Result<Self> {
        if frame.height() != self.frame.height() {
            return Err(anyhow!(
                "Derived frame has {} rows, expected {}",
                frame.height(),
                self.frame.height()
            ));
        }
        Ok(Self {
            frame,
            geometry: self.geometry.clone(),
            crs: self.crs,
        })
    }

    pub fn into_parts(self) -> (DataFrame, Vec<Option<Geometry<f64>>>, Crs) {
        (self.frame, self.geometry, self.crs)
    }
}

fn point_geometry(frame: &DataFrame, x: &str, y: &str) -> Result<Vec<Option<Geometry<f64>>>> {
    let xs = frame
        .column(x)?
        .cast(&DataType::Float64)
        .with_context(|| format!("Point column '{}' is not numeric", x))?;
    let ys = frame
        .column(y)?
        .cast(&DataType::Float64)
        .with_context(|| format!("Point column '{}' is not numeric", y))?;

    Ok(xs
        .f64()?
        .into_iter()
        .zip(ys.f64()?)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(Geometry::Point(Point::new(x, y))),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{COUNTY, DAMAGE};

    #[test]
    fn test_from_frame_builds_points() {
        let df = df![
            "damage" => &["No Damage", "Destroyed (>50%)", "Minor (10-25%)"],
            "longitude" => &[Some(-121.6), None, Some(-121.5)],
            "latitude" => &[Some(39.7), Some(39.8), Some(39.75)],
        ]
        .unwrap();

        let table = StructureTable::from_frame(df, Some(Crs::Epsg4326)).unwrap();

        assert!(table.has_column(DAMAGE));
        assert_eq!(table.geometry().len(), 3);
        assert!(table.geometry()[0].is_some());
        assert!(table.geometry()[1].is_none());
    }

    #[test]
    fn test_filter_keeps_geometry_aligned() {
        let df = df![
            COUNTY => &["BUTTE", "NAPA", "BUTTE"],
            "X" => &[1.0, 2.0, 3.0],
            "Y" => &[1.0, 2.0, 3.0],
        ]
        .unwrap();
        let table = StructureTable::from_frame(df, Some(Crs::Epsg3310)).unwrap();

        let mask = BooleanChunked::from_slice("mask".into(), &[true, false, true]);
        let filtered = table.filter(&mask).unwrap();

        assert_eq!(filtered.height(), 2);
        let xs: Vec<f64> = filtered
            .geometry()
            .iter()
            .map(|g| match g {
                Some(Geometry::Point(p)) => p.x(),
                _ => f64::NAN,
            })
            .collect();
        assert_eq!(xs, vec![1.0, 3.0]);
    }

    #[test]
    fn test_new_rejects_misaligned_geometry() {
        let df = df![COUNTY => &["BUTTE", "NAPA"]].unwrap();
        assert!(StructureTable::new(df, vec![None], Crs::Epsg4326).is_err());
    }
}
