//! Spatial filtering
//!
//! Records and polygons are both brought into EPSG:3310, then each record geometry is
//! tested against the polygon union in parallel. Records without geometry are dropped.

use super::{apply_date_range, DateRange};
use crate::data::StructureTable;
use crate::error::ConfigError;
use crate::geometry::{to_california_albers, CaliforniaAlbers, PolygonSet};
use anyhow::Result;
use geo::Intersects;
use polars::prelude::*;
use rayon::prelude::*;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    pub date_range: Option<DateRange>,
    pub polygons: PolygonSet,
}

impl SpatialFilter {
    pub fn new(polygons: PolygonSet, date_range: Option<DateRange>) -> Result<Self, ConfigError> {
        if polygons.is_empty() {
            return Err(ConfigError::MissingPolygon);
        }
        Ok(Self {
            date_range,
            polygons,
        })
    }

    pub fn apply(&self, table: &StructureTable) -> Result<StructureTable> {
        if self.polygons.is_empty() {
            return Err(ConfigError::MissingPolygon.into());
        }

        let current = match &self.date_range {
            Some(range) => apply_date_range(table, range)?,
            None => table.clone(),
        };

        let albers = CaliforniaAlbers::new();
        let area = self.polygons.to_california_albers(&albers);
        let crs = current.crs();

        let keep: Vec<bool> = current
            .geometry()
            .par_iter()
            .map(|g| {
                g.as_ref()
                    .is_some_and(|g| to_california_albers(g, crs, &albers).intersects(&area))
            })
            .collect();

        let mask = BooleanChunked::from_slice("__mask".into(), &keep);
        let filtered = current.filter(&mask)?;
        info!(
            "Spatial filter ({} polygons): {} of {} records intersect",
            area.0.len(),
            filtered.height(),
            current.height()
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::inventory;
    use super::*;
    use crate::geometry::Crs;
    use crate::schema::{COUNTY, START_DATE};
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon};

    fn square(min: f64, max: f64) -> geo::Polygon<f64> {
        polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
            (x: min, y: min),
        ]
    }

    #[test]
    fn test_keeps_points_inside_union() {
        let polygons = PolygonSet::new(
            MultiPolygon::new(vec![square(-1.0, 15.0), square(35.0, 45.0)]),
            Crs::Epsg3310,
        );
        let filter = SpatialFilter::new(polygons, None).unwrap();
        let filtered = filter.apply(&inventory()).unwrap();

        // points at 0, 10 and 40 fall inside
        assert_eq!(filtered.height(), 3);
    }

    #[test]
    fn test_date_range_runs_first() {
        let polygons = PolygonSet::new(MultiPolygon::new(vec![square(-1.0, 100.0)]), Crs::Epsg3310);
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2019, 12, 31).unwrap(),
        )
        .unwrap();
        let filtered = SpatialFilter::new(polygons, Some(range))
            .unwrap()
            .apply(&inventory())
            .unwrap();

        assert_eq!(filtered.height(), 1);
        assert!(filtered.frame().column(START_DATE).is_ok());
    }

    #[test]
    fn test_geographic_points_are_reprojected() {
        let df = df![
            COUNTY => &["BUTTE", "LOS ANGELES"],
            "LONGITUDE" => &[-121.6, -118.2],
            "LATITUDE" => &[39.76, 34.05],
        ]
        .unwrap();
        let table = StructureTable::from_frame(df, Some(Crs::Epsg4326)).unwrap();

        // lon/lat box around Paradise, CA
        let lonlat_box = polygon![
            (x: -121.8, y: 39.6),
            (x: -121.4, y: 39.6),
            (x: -121.4, y: 39.9),
            (x: -121.8, y: 39.9),
            (x: -121.8, y: 39.6),
        ];
        let polygons = PolygonSet::new(MultiPolygon::new(vec![lonlat_box]), Crs::Epsg4326);
        let filtered = SpatialFilter::new(polygons, None)
            .unwrap()
            .apply(&table)
            .unwrap();

        assert_eq!(filtered.height(), 1);
        let county = filtered.frame().column(COUNTY).unwrap().str().unwrap().get(0);
        assert_eq!(county, Some("BUTTE"));
    }

    #[test]
    fn test_empty_polygon_set_rejected() {
        let polygons = PolygonSet::new(MultiPolygon::new(vec![]), Crs::Epsg3310);
        assert_eq!(
            SpatialFilter::new(polygons, None).unwrap_err(),
            ConfigError::MissingPolygon
        );
    }
}
