//! Geographic estimates used by the offline map service

use crate::types::{Coordinates, TravelDistance};

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Average speed in km/h for travel time estimation
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimate road travel between two points.
///
/// Identical points always cost zero.
pub fn estimate_travel(
    from: &Coordinates,
    to: &Coordinates,
    road_coefficient: f64,
    average_speed_kmh: f64,
) -> TravelDistance {
    if from == to {
        return TravelDistance::default();
    }
    let road_km = haversine_distance(from, to) * road_coefficient;
    TravelDistance {
        length_meters: (road_km * 1000.0).round() as i64,
        duration_sec: (road_km / average_speed_kmh * 3600.0).round() as i64,
    }
}
