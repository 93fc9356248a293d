use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Returns `None` for non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self { latitude, longitude })
    }

    /// Build a point from nullable storage columns. A half-set or invalid
    /// pair is treated as "no location".
    pub fn from_columns(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => None,
        }
    }

    /// Great-circle distance in metres (Haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// Lat/lon rectangle that contains every point within a radius of a centre.
///
/// Only an upper bound: corners of the box lie outside the circle, so hits
/// must still be confirmed with [`GeoPoint::distance_m`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let lat_delta = (radius_m / EARTH_RADIUS_M).to_degrees();
        let min_lat = (center.latitude - lat_delta).max(-90.0);
        let max_lat = (center.latitude + lat_delta).min(90.0);

        // Near the poles or across the antimeridian fall back to every longitude.
        let cos_lat = center.latitude.to_radians().cos();
        let lon_delta = if cos_lat > 1e-6 {
            lat_delta / cos_lat
        } else {
            180.0
        };
        let (min_lon, max_lon) = if center.longitude - lon_delta < -180.0
            || center.longitude + lon_delta > 180.0
        {
            (-180.0, 180.0)
        } else {
            (center.longitude - lon_delta, center.longitude + lon_delta)
        };

        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}
