//! Distance types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DistanceSourceId, LocationId};

/// Ordered (from, to) location pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPair {
    pub from: LocationId,
    pub to: LocationId,
}

impl LocationPair {
    pub fn new(from: impl Into<LocationId>, to: impl Into<LocationId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Travel cost returned by a map provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelDistance {
    pub duration_sec: i64,
    pub length_meters: i64,
}

/// Distance row as persisted; rows are append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredDistance {
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub source_id: DistanceSourceId,
    pub distance_meters: i64,
    pub duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

impl StoredDistance {
    pub fn pair(&self) -> LocationPair {
        LocationPair {
            from: self.from_location_id,
            to: self.to_location_id,
        }
    }
}

/// Distance about to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewDistance {
    pub pair: LocationPair,
    pub source_id: DistanceSourceId,
    pub distance: TravelDistance,
}

/// Matrix entry handed to the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpDistance {
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub length_meters: i64,
    pub duration_sec: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceMatrix {
    pub distances: Vec<VrpDistance>,
}

impl DistanceMatrix {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn get(&self, pair: LocationPair) -> Option<&VrpDistance> {
        self.distances
            .iter()
            .find(|d| d.from_location_id == pair.from && d.to_location_id == pair.to)
    }
}

/// Creation-time window of the distances a matrix was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Persisted failure record of one map provider, shared by every run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub source_id: DistanceSourceId,
    /// Consecutive failures since the last success
    pub failure_count: i64,
    pub last_failure_at: Option<DateTime<Utc>>,
}
