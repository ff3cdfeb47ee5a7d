//! Distance persistence seam

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{
    DistanceSourceId, Location, LocationId, LocationPair, NewDistance, ProviderHealth, StoredDistance,
};

/// Append-only distance store plus the location lookup the planner needs
#[async_trait]
pub trait DistanceStore: Send + Sync {
    /// Latest row per pair for `source_id` created strictly after `after`.
    /// Pairs with no such row are absent from the result.
    async fn latest_distances(
        &self,
        pairs: &[LocationPair],
        source_id: DistanceSourceId,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredDistance>>;

    async fn add_distances(&self, distances: &[NewDistance]) -> Result<()>;

    /// Unknown ids are silently absent from the result
    async fn locations_by_ids(&self, ids: &[LocationId]) -> Result<Vec<Location>>;

    /// Failure record of a provider; `None` if it never reported an outcome
    async fn provider_health(&self, source_id: DistanceSourceId) -> Result<Option<ProviderHealth>>;

    /// A success clears the failure count, a failure bumps it and stamps `at`
    async fn record_provider_outcome(
        &self,
        source_id: DistanceSourceId,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// In-process store for tests and offline `plan` runs
#[derive(Default)]
pub struct InMemoryDistanceStore {
    distances: RwLock<Vec<StoredDistance>>,
    locations: RwLock<HashMap<LocationId, Location>>,
    provider_health: RwLock<HashMap<DistanceSourceId, ProviderHealth>>,
    add_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl InMemoryDistanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let store = Self::new();
        store.insert_locations(locations);
        store
    }

    pub fn insert_locations(&self, locations: impl IntoIterator<Item = Location>) {
        let mut map = self.locations.write();
        for location in locations {
            map.insert(location.id, location);
        }
    }

    /// Seeds a row with an explicit creation time
    pub fn insert_distance(&self, distance: StoredDistance) {
        self.distances.write().push(distance);
    }

    /// Every row ever written, oldest first
    pub fn rows(&self) -> Vec<StoredDistance> {
        self.distances.read().clone()
    }

    pub fn rows_for_source(&self, source_id: DistanceSourceId) -> Vec<StoredDistance> {
        self.distances
            .read()
            .iter()
            .filter(|d| d.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::Relaxed)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DistanceStore for InMemoryDistanceStore {
    async fn latest_distances(
        &self,
        pairs: &[LocationPair],
        source_id: DistanceSourceId,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredDistance>> {
        self.latest_calls.fetch_add(1, Ordering::Relaxed);

        let rows = self.distances.read();
        let mut latest: HashMap<LocationPair, &StoredDistance> = HashMap::new();
        for row in rows
            .iter()
            .filter(|d| d.source_id == source_id && d.created_at > after)
        {
            match latest.get(&row.pair()) {
                Some(existing) if existing.created_at > row.created_at => {}
                _ => {
                    latest.insert(row.pair(), row);
                }
            }
        }

        Ok(pairs
            .iter()
            .filter_map(|pair| latest.get(pair).map(|d| (*d).clone()))
            .collect())
    }

    async fn add_distances(&self, distances: &[NewDistance]) -> Result<()> {
        self.add_calls.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut rows = self.distances.write();
        rows.extend(distances.iter().map(|d| StoredDistance {
            from_location_id: d.pair.from,
            to_location_id: d.pair.to,
            source_id: d.source_id,
            distance_meters: d.distance.length_meters,
            duration_seconds: d.distance.duration_sec,
            created_at: now,
        }));
        Ok(())
    }

    async fn locations_by_ids(&self, ids: &[LocationId]) -> Result<Vec<Location>> {
        let map = self.locations.read();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn provider_health(&self, source_id: DistanceSourceId) -> Result<Option<ProviderHealth>> {
        Ok(self.provider_health.read().get(&source_id).copied())
    }

    async fn record_provider_outcome(
        &self,
        source_id: DistanceSourceId,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut health = self.provider_health.write();
        let entry = health.entry(source_id).or_insert(ProviderHealth {
            source_id,
            ..Default::default()
        });
        if succeeded {
            entry.failure_count = 0;
        } else {
            entry.failure_count += 1;
            entry.last_failure_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TravelDistance;
    use chrono::Duration;

    fn row(from: i64, to: i64, meters: i64, created_at: DateTime<Utc>) -> StoredDistance {
        StoredDistance {
            from_location_id: LocationId(from),
            to_location_id: LocationId(to),
            source_id: DistanceSourceId(1),
            distance_meters: meters,
            duration_seconds: meters / 10,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_latest_row_wins() {
        let store = InMemoryDistanceStore::new();
        let now = Utc::now();
        store.insert_distance(row(1, 2, 100, now - Duration::hours(2)));
        store.insert_distance(row(1, 2, 200, now - Duration::hours(1)));

        let rows = store
            .latest_distances(&[LocationPair::new(1, 2)], DistanceSourceId(1), now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].distance_meters, 200);
    }

    #[tokio::test]
    async fn test_rows_at_or_before_cutoff_are_stale() {
        let store = InMemoryDistanceStore::new();
        let cutoff = Utc::now() - Duration::days(1);
        store.insert_distance(row(1, 2, 100, cutoff));

        let rows = store
            .latest_distances(&[LocationPair::new(1, 2)], DistanceSourceId(1), cutoff)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_other_source_is_invisible() {
        let store = InMemoryDistanceStore::new();
        store
            .add_distances(&[NewDistance {
                pair: LocationPair::new(1, 2),
                source_id: DistanceSourceId(2),
                distance: TravelDistance { duration_sec: 1, length_meters: 1 },
            }])
            .await
            .unwrap();

        let rows = store
            .latest_distances(&[LocationPair::new(1, 2)], DistanceSourceId(1), Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.rows_for_source(DistanceSourceId(2)).len(), 1);
        assert_eq!(store.add_calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_outcomes_accumulate_until_success() {
        let store = InMemoryDistanceStore::new();
        let source = DistanceSourceId(2);
        let at = Utc::now();
        assert_eq!(store.provider_health(source).await.unwrap(), None);

        store.record_provider_outcome(source, false, at - Duration::minutes(1)).await.unwrap();
        store.record_provider_outcome(source, false, at).await.unwrap();
        let health = store.provider_health(source).await.unwrap().unwrap();
        assert_eq!(health.failure_count, 2);
        assert_eq!(health.last_failure_at, Some(at));

        store.record_provider_outcome(source, true, at).await.unwrap();
        let health = store.provider_health(source).await.unwrap().unwrap();
        assert_eq!(health.failure_count, 0);
        assert_eq!(store.provider_health(DistanceSourceId(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_locations_are_absent() {
        let store = InMemoryDistanceStore::with_locations([Location::new(1, 50_000_000, 14_000_000)]);
        let found = store
            .locations_by_ids(&[LocationId(1), LocationId(2)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, LocationId(1));
    }
}
