//! Location types

use serde::{Deserialize, Serialize};

use super::LocationId;

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Stored location, coordinates in micro-degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    pub latitude_e6: i32,
    pub longitude_e6: i32,
}

impl Location {
    pub fn new(id: impl Into<LocationId>, latitude_e6: i32, longitude_e6: i32) -> Self {
        Self {
            id: id.into(),
            latitude_e6,
            longitude_e6,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: f64::from(self.latitude_e6) / 1e6,
            lng: f64::from(self.longitude_e6) / 1e6,
        }
    }
}
