//! Coordinate Reference Systems
//!
//! Spatial filtering happens in California Albers (EPSG:3310). Inventories and
//! polygons arrive either in geographic lon/lat (EPSG:4326 or EPSG:4269) or already
//! in EPSG:3310. NAD83 and WGS84 lon/lat are treated as the same datum.

use crate::error::ConfigError;
use geo::{Coord, Geometry, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported coordinate reference systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// WGS84 lon/lat
    Epsg4326,
    /// NAD83 lon/lat
    Epsg4269,
    /// NAD83 / California Albers (metres)
    Epsg3310,
}

impl Crs {
    pub fn code(self) -> &'static str {
        match self {
            Crs::Epsg4326 => "EPSG:4326",
            Crs::Epsg4269 => "EPSG:4269",
            Crs::Epsg3310 => "EPSG:3310",
        }
    }

    pub fn is_geographic(self) -> bool {
        !matches!(self, Crs::Epsg3310)
    }
}

impl FromStr for Crs {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let code = upper.strip_prefix("EPSG:").unwrap_or(&upper);
        match code {
            "4326" => Ok(Crs::Epsg4326),
            "4269" => Ok(Crs::Epsg4269),
            "3310" => Ok(Crs::Epsg3310),
            _ => Err(ConfigError::UnknownPreset {
                kind: "coordinate reference system",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.code().to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// GRS80 ellipsoid
const SEMI_MAJOR: f64 = 6_378_137.0;
const INV_FLATTENING: f64 = 298.257_222_101;

// EPSG:3310 parameters
const STANDARD_PARALLEL_1: f64 = 34.0;
const STANDARD_PARALLEL_2: f64 = 40.5;
const ORIGIN_LATITUDE: f64 = 0.0;
const CENTRAL_MERIDIAN: f64 = -120.0;
const FALSE_EASTING: f64 = 0.0;
const FALSE_NORTHING: f64 = -4_000_000.0;

/// Ellipsoidal Albers equal-area conic forward projection (Snyder 1987, eq. 14-1..14-4)
#[derive(Debug, Clone, Copy)]
pub struct CaliforniaAlbers {
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl Default for CaliforniaAlbers {
    fn default() -> Self {
        Self::new()
    }
}

impl CaliforniaAlbers {
    pub fn new() -> Self {
        let f = 1.0 / INV_FLATTENING;
        let e2 = 2.0 * f - f * f;
        let e = e2.sqrt();

        let m = |phi: f64| phi.cos() / (1.0 - e2 * phi.sin().powi(2)).sqrt();
        let phi1 = STANDARD_PARALLEL_1.to_radians();
        let phi2 = STANDARD_PARALLEL_2.to_radians();
        let (m1, m2) = (m(phi1), m(phi2));
        let (q1, q2) = (q(phi1, e, e2), q(phi2, e, e2));
        let q0 = q(ORIGIN_LATITUDE.to_radians(), e, e2);

        let n = (m1 * m1 - m2 * m2) / (q2 - q1);
        let c = m1 * m1 + n * q1;
        let rho0 = SEMI_MAJOR * (c - n * q0).sqrt() / n;

        Self { e, e2, n, c, rho0 }
    }

    /// Project lon/lat degrees to EPSG:3310 metres
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let q = q(lat.to_radians(), self.e, self.e2);
        let rho = SEMI_MAJOR * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * (lon - CENTRAL_MERIDIAN).to_radians();
        let x = FALSE_EASTING + rho * theta.sin();
        let y = FALSE_NORTHING + self.rho0 - rho * theta.cos();
        (x, y)
    }

    fn project_coord(&self, c: Coord<f64>) -> Coord<f64> {
        let (x, y) = self.project(c.x, c.y);
        Coord { x, y }
    }
}

fn q(phi: f64, e: f64, e2: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

/// Reproject a geometry from `from` to EPSG:3310
pub fn to_california_albers(geometry: &Geometry<f64>, from: Crs, albers: &CaliforniaAlbers) -> Geometry<f64> {
    if from.is_geographic() {
        geometry.map_coords(|c| albers.project_coord(c))
    } else {
        geometry.clone()
    }
}

/// Polygons used for spatial filtering, with their CRS
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonSet {
    pub polygons: MultiPolygon<f64>,
    pub crs: Crs,
}

impl PolygonSet {
    pub fn new(polygons: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { polygons, crs }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }

    /// The set in EPSG:3310
    pub fn to_california_albers(&self, albers: &CaliforniaAlbers) -> MultiPolygon<f64> {
        if self.crs.is_geographic() {
            self.polygons.map_coords(|c| albers.project_coord(c))
        } else {
            self.polygons.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_origin_maps_to_false_northing() {
        let albers = CaliforniaAlbers::new();
        let (x, y) = albers.project(CENTRAL_MERIDIAN, ORIGIN_LATITUDE);
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, FALSE_NORTHING, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_orientation() {
        let albers = CaliforniaAlbers::new();
        let (x_center, y_center) = albers.project(-120.0, 37.0);
        let (x_east, _) = albers.project(-119.0, 37.0);
        let (_, y_north) = albers.project(-120.0, 38.0);

        assert_relative_eq!(x_center, 0.0, epsilon = 1e-6);
        assert!(x_east > 80_000.0 && x_east < 100_000.0);
        // one degree of latitude is roughly 111 km
        assert!((y_north - y_center - 111_000.0).abs() < 1_000.0);
    }

    #[test]
    fn test_crs_parsing() {
        assert_eq!("epsg:3310".parse::<Crs>().unwrap(), Crs::Epsg3310);
        assert_eq!("4326".parse::<Crs>().unwrap(), Crs::Epsg4326);
        assert!("EPSG:2227".parse::<Crs>().is_err());
    }
}
