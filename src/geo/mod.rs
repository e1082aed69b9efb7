use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters (spherical model).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Coordinate validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidCoordinate {
    NotFinite,
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidCoordinate::NotFinite => write!(f, "coordinate must be finite"),
            InvalidCoordinate::LatitudeOutOfRange(lat) => {
                write!(f, "latitude {} out of range [-90, 90]", lat)
            }
            InvalidCoordinate::LongitudeOutOfRange(lon) => {
                write!(f, "longitude {} out of range [-180, 180]", lon)
            }
        }
    }
}

impl std::error::Error for InvalidCoordinate {}

impl Coordinate {
    /// Build a validated coordinate.
    ///
    /// Rejects non-finite values and out-of-range latitude/longitude.
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidCoordinate> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(InvalidCoordinate::NotFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(InvalidCoordinate::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(InvalidCoordinate::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Validate an already-constructed coordinate (e.g. deserialized from JSON).
    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        Self::new(self.lat, self.lon).map(|_| ())
    }
}

/// Great-circle distance between two coordinates in meters.
///
/// Haversine on a sphere of mean Earth radius. Accurate to ~0.5% which is
/// far below the coarsest proximity band.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}
