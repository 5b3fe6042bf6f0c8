//! Great-circle distance and coordinate validation.

use crate::error::EngineError;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, EngineError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::InvalidInput(format!(
                "latitude out of range: {lat}"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(EngineError::InvalidInput(format!(
                "longitude out of range: {lng}"
            )));
        }
        Ok(Self { lat, lng })
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn haversine_distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
