//! Distance matrix planner
//!
//! Serves every wanted pair from storage when it can. Missing pairs are
//! grouped into as few provider requests as possible, fetched from the
//! primary map service, persisted, and then read back from storage so the
//! matrix only ever contains stored rows.
//!
//! Secondary map services get the same requests on a detached, best-effort
//! fan-out whose results are persisted under their own source ids and never
//! used by the current run. Each provider's health is read from and written
//! back to the store, so a provider that failed in an earlier process stays
//! skipped until its circuit recovers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::decompose::missing_requests;
use super::request::{DistanceMatrixRequest, OrderedSet, PairSet};
use super::store::DistanceStore;
use crate::error::PlanningError;
use crate::services::routing::{CircuitBreaker, MapService, MapsTags};
use crate::types::{
    Coordinates, CoverageWindow, DistanceMatrix, DistanceSourceId, LocationId, LocationPair,
    NewDistance, PlanningSettings, ProviderHealth, StoredDistance, VrpDistance,
};

/// Inputs of one matrix computation
pub struct DistanceMatrixParams<'a> {
    pub requests: &'a [DistanceMatrixRequest],
    /// Only distances created strictly after this instant are used
    pub after_created_at: DateTime<Utc>,
    pub tags: MapsTags,
    pub settings: &'a PlanningSettings,
}

/// Matrix plus the creation window of the rows it was built from.
/// The window is `None` when nothing was wanted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistanceMatrixResult {
    pub matrix: DistanceMatrix,
    pub window: Option<CoverageWindow>,
}

/// Missing request with coordinates already attached
struct ResolvedRequest {
    kind: ResolvedKind,
}

enum ResolvedKind {
    Path {
        ids: Vec<LocationId>,
        coords: Vec<Coordinates>,
    },
    Rect {
        from: Vec<LocationId>,
        from_coords: Vec<Coordinates>,
        to: Vec<LocationId>,
        to_coords: Vec<Coordinates>,
    },
}

impl ResolvedRequest {
    fn new(
        request: &DistanceMatrixRequest,
        coords: &HashMap<LocationId, Coordinates>,
    ) -> Result<Self> {
        let lookup = |ids: &[LocationId]| -> Result<Vec<Coordinates>> {
            ids.iter()
                .map(|id| {
                    coords
                        .get(id)
                        .copied()
                        .with_context(|| format!("No coordinates for location {}", id))
                })
                .collect()
        };

        let kind = match request {
            DistanceMatrixRequest::Path(ids) => ResolvedKind::Path {
                coords: lookup(ids)?,
                ids: ids.clone(),
            },
            DistanceMatrixRequest::Rect { from, to } => ResolvedKind::Rect {
                from_coords: lookup(from)?,
                to_coords: lookup(to)?,
                from: from.clone(),
                to: to.clone(),
            },
        };
        Ok(Self { kind })
    }
}

/// Runs one resolved request against `service` and persists the result
/// under the service's source id.
async fn fetch_and_store(
    service: &dyn MapService,
    store: &dyn DistanceStore,
    request: &ResolvedRequest,
    tags: &MapsTags,
) -> Result<usize> {
    let source_id = service.distance_source_id();

    let records: Vec<NewDistance> = match &request.kind {
        ResolvedKind::Path { ids, coords } => {
            let legs = service.path_distances(tags, coords).await?;
            if legs.len() + 1 != ids.len() {
                anyhow::bail!(
                    "{} returned {} legs for a path of {} locations",
                    service.name(),
                    legs.len(),
                    ids.len()
                );
            }
            ids.windows(2)
                .zip(legs)
                .map(|(w, distance)| NewDistance {
                    pair: LocationPair { from: w[0], to: w[1] },
                    source_id,
                    distance,
                })
                .collect()
        }
        ResolvedKind::Rect {
            from,
            from_coords,
            to,
            to_coords,
        } => {
            let rows = service.distance_matrix(tags, from_coords, to_coords).await?;
            if rows.len() != from.len() || rows.iter().any(|row| row.len() != to.len()) {
                anyhow::bail!(
                    "{} returned a malformed {}x{} matrix",
                    service.name(),
                    from.len(),
                    to.len()
                );
            }
            from.iter()
                .zip(rows)
                .flat_map(|(&f, row)| {
                    to.iter().zip(row).map(move |(&t, distance)| NewDistance {
                        pair: LocationPair { from: f, to: t },
                        source_id,
                        distance,
                    })
                })
                .collect()
        }
    };

    store
        .add_distances(&records)
        .await
        .with_context(|| format!("Failed to store distances from {}", service.name()))?;
    Ok(records.len())
}

pub struct DistanceMatrixPlanner {
    store: Arc<dyn DistanceStore>,
    primary: Arc<dyn MapService>,
    secondaries: Vec<Arc<dyn MapService>>,
    breaker: CircuitBreaker,
    /// Parent of every secondary fan-out; independent of callers
    background: CancellationToken,
    tasks: TaskTracker,
}

impl DistanceMatrixPlanner {
    pub fn new(store: Arc<dyn DistanceStore>, primary: Arc<dyn MapService>) -> Self {
        Self {
            store,
            primary,
            secondaries: Vec::new(),
            breaker: CircuitBreaker::default(),
            background: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_secondaries(mut self, services: Vec<Arc<dyn MapService>>) -> Self {
        self.secondaries = services;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn primary_source_id(&self) -> DistanceSourceId {
        self.primary.distance_source_id()
    }

    /// Stops any secondary fan-out still in flight
    pub fn shutdown(&self) {
        self.background.cancel();
    }

    /// Waits up to `budget` for the secondary fetches spawned so far.
    /// Returns `false` when some were still running at the deadline.
    pub async fn wait_for_secondaries(&self, budget: Duration) -> bool {
        self.tasks.close();
        let done = tokio::time::timeout(budget, self.tasks.wait()).await.is_ok();
        self.tasks.reopen();
        done
    }

    /// Computes the matrix for `params.requests`.
    ///
    /// Cancelling `cancel` aborts the primary fetch with
    /// [`PlanningError::Cancelled`]; secondary fetches already started keep
    /// running until their own budget runs out.
    pub async fn get_distance_matrix(
        &self,
        params: DistanceMatrixParams<'_>,
        cancel: &CancellationToken,
    ) -> Result<DistanceMatrixResult> {
        let requests: Vec<&DistanceMatrixRequest> =
            params.requests.iter().filter(|r| !r.is_empty()).collect();
        if requests.is_empty() {
            return Ok(DistanceMatrixResult::default());
        }

        let wanted_by_request: Vec<PairSet> = requests.iter().map(|r| r.pair_set()).collect();
        let mut want = PairSet::default();
        for pairs in &wanted_by_request {
            want.extend(pairs.iter().copied());
        }

        let source_id = self.primary.distance_source_id();
        let batch_size = params.settings.latest_distances_batch_size;

        let stored = self
            .latest_distances(&want, source_id, params.after_created_at, batch_size)
            .await?;
        if stored.len() == want.len() {
            debug!(
                service_region_id = %params.tags.service_region_id,
                "All {} distances served from storage",
                want.len()
            );
            return Ok(Self::assemble(&want, stored));
        }

        let mut has: HashSet<LocationPair> = stored.keys().copied().collect();
        let mut missing = Vec::new();
        for (request, wanted) in requests.iter().zip(&wanted_by_request) {
            missing.extend(missing_requests(wanted, &has, request));
            has.extend(wanted.iter().copied());
        }

        info!(
            service_region_id = %params.tags.service_region_id,
            map_service = self.primary.name(),
            "{} of {} distances missing, issuing {} map requests",
            want.len() - stored.len(),
            want.len(),
            missing.len()
        );

        let coords = self.coordinates(&want).await?;
        self.add_missing_distances(&missing, &coords, &params, cancel)
            .await?;

        let stored = self
            .latest_distances(&want, source_id, params.after_created_at, batch_size)
            .await?;
        if stored.len() != want.len() {
            return Err(PlanningError::NotEnoughDistances {
                service_region_id: params.tags.service_region_id,
                num_distances: stored.len(),
                wanted: want.len(),
                num_missing_requests: missing.len(),
                map_service: self.primary.name().to_string(),
            }
            .into());
        }

        Ok(Self::assemble(&want, stored))
    }

    /// Latest stored row per wanted pair, first row wins on duplicates
    async fn latest_distances(
        &self,
        want: &PairSet,
        source_id: DistanceSourceId,
        after: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<HashMap<LocationPair, StoredDistance>> {
        let batch_size = if batch_size == 0 { want.len().max(1) } else { batch_size };

        let mut found = HashMap::with_capacity(want.len());
        for batch in want.as_slice().chunks(batch_size) {
            let rows = self
                .store
                .latest_distances(batch, source_id, after)
                .await
                .context("Failed to load latest distances")?;
            for row in rows {
                if want.contains(&row.pair()) {
                    found.entry(row.pair()).or_insert(row);
                }
            }
        }
        Ok(found)
    }

    async fn coordinates(&self, want: &PairSet) -> Result<HashMap<LocationId, Coordinates>> {
        let ids: OrderedSet<LocationId> = want.iter().flat_map(|p| [p.from, p.to]).collect();
        let locations = self
            .store
            .locations_by_ids(ids.as_slice())
            .await
            .context("Failed to load locations")?;

        if locations.len() != ids.len() {
            return Err(PlanningError::NotAllLocationsFound {
                found: locations.iter().map(|l| l.id).collect(),
                wanted: ids.to_vec(),
            }
            .into());
        }

        Ok(locations.iter().map(|l| (l.id, l.coordinates())).collect())
    }

    async fn add_missing_distances(
        &self,
        missing: &[DistanceMatrixRequest],
        coords: &HashMap<LocationId, Coordinates>,
        params: &DistanceMatrixParams<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }

        let resolved: Vec<ResolvedRequest> = missing
            .iter()
            .map(|r| ResolvedRequest::new(r, coords))
            .collect::<Result<_>>()?;
        let resolved = Arc::new(resolved);

        if params.settings.secondary_fetch_enabled() {
            let budget = Duration::from_millis(
                params.settings.fetch_other_map_service_distances_timeout_ms,
            );
            self.spawn_secondary_fan_out(resolved.clone(), params.tags.research(), budget);
        }

        let primary = try_join_all(resolved.iter().map(|request| {
            fetch_and_store(self.primary.as_ref(), self.store.as_ref(), request, &params.tags)
        }));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PlanningError::Cancelled.into()),
            result = primary => {
                let written: usize = result?.into_iter().sum();
                debug!(map_service = self.primary.name(), "Stored {} new distances", written);
                Ok(())
            }
        }
    }

    fn spawn_secondary_fan_out(
        &self,
        requests: Arc<Vec<ResolvedRequest>>,
        tags: MapsTags,
        budget: Duration,
    ) {
        for service in &self.secondaries {
            let service = service.clone();
            let breaker = self.breaker;
            let store = self.store.clone();
            let requests = requests.clone();
            let tags = tags.clone();
            let token = self.background.child_token();

            self.tasks.spawn(async move {
                let source_id = service.distance_source_id();
                let health = match store.provider_health(source_id).await {
                    Ok(health) => health.unwrap_or_default(),
                    Err(e) => {
                        warn!(map_service = service.name(), "Failed to load provider health: {:#}", e);
                        ProviderHealth::default()
                    }
                };
                if breaker.is_open(&health, Utc::now()) {
                    debug!(
                        map_service = service.name(),
                        failures = health.failure_count,
                        "Skipping secondary map service, circuit open"
                    );
                    return;
                }

                let work = try_join_all(requests.iter().map(|request| {
                    fetch_and_store(service.as_ref(), store.as_ref(), request, &tags)
                }));

                let succeeded = tokio::select! {
                    _ = token.cancelled() => {
                        debug!(map_service = service.name(), "Secondary distance fetch cancelled");
                        return;
                    }
                    result = tokio::time::timeout(budget, work) => match result {
                        Ok(Ok(written)) => {
                            debug!(
                                map_service = service.name(),
                                "Stored {} secondary distances",
                                written.iter().sum::<usize>()
                            );
                            true
                        }
                        Ok(Err(e)) => {
                            warn!(map_service = service.name(), "Secondary distance fetch failed: {:#}", e);
                            false
                        }
                        Err(_) => {
                            warn!(
                                map_service = service.name(),
                                "Secondary distance fetch timed out after {:?}",
                                budget
                            );
                            false
                        }
                    },
                };

                if let Err(e) = store.record_provider_outcome(source_id, succeeded, Utc::now()).await {
                    warn!(map_service = service.name(), "Failed to record provider health: {:#}", e);
                }
            });
        }
    }

    fn assemble(
        want: &PairSet,
        mut stored: HashMap<LocationPair, StoredDistance>,
    ) -> DistanceMatrixResult {
        let mut distances = Vec::with_capacity(want.len());
        let mut window: Option<CoverageWindow> = None;

        for pair in want.iter() {
            let Some(row) = stored.remove(pair) else {
                continue;
            };
            window = Some(match window {
                None => CoverageWindow {
                    start: row.created_at,
                    end: row.created_at,
                },
                Some(w) => CoverageWindow {
                    start: w.start.min(row.created_at),
                    end: w.end.max(row.created_at),
                },
            });
            distances.push(VrpDistance {
                from_location_id: row.from_location_id,
                to_location_id: row.to_location_id,
                length_meters: row.distance_meters,
                duration_sec: row.duration_seconds,
            });
        }

        DistanceMatrixResult {
            matrix: DistanceMatrix { distances },
            window,
        }
    }
}

impl Drop for DistanceMatrixPlanner {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
