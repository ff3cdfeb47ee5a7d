//! Observed per-stop timestamps
//!
//! Actuals are recorded per (shift team, stop). A stop belongs to route
//! history once it has an en-route, arrival or completion time; a stop with
//! only a committed time is an upcoming commitment.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::{
    CareRequestId, CareRequestPhaseRow, PhaseStatusRow, PhaseTypeId, PhaseTypeRow,
    PhaseTypeTable, RestBreakId, ShiftTeamId, VisitPhase, VisitPhaseRow, VisitSnapshotId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Actuals {
    pub committed: Option<DateTime<Utc>>,
    /// Set only while the team is currently en route to this stop
    pub currently_en_route: Option<DateTime<Utc>>,
    /// On-scene for visits, start for rest breaks
    pub arrival: Option<DateTime<Utc>>,
    pub completion: Option<DateTime<Utc>>,
}

impl Actuals {
    pub fn is_route_history_stop(&self) -> bool {
        self.currently_en_route.is_some() || self.arrival.is_some() || self.completion.is_some()
    }

    /// Latest of en-route, arrival and completion; orders route history
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        [self.currently_en_route, self.arrival, self.completion]
            .into_iter()
            .flatten()
            .max()
    }
}

/// Actuals of one shift team, by stop kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTypeActuals {
    pub care_requests: HashMap<CareRequestId, Actuals>,
    pub rest_breaks: HashMap<RestBreakId, Actuals>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityIdPair {
    pub shift_team_id: ShiftTeamId,
    pub care_request_id: CareRequestId,
}

/// Write-many, read-rarely store of actuals keyed by shift team.
///
/// Readers always get an owned copy, so nothing handed out can observe or
/// cause a later write.
#[derive(Debug, Default)]
pub struct ShiftTeamActuals {
    data: RwLock<HashMap<ShiftTeamId, StopTypeActuals>>,
}

impl ShiftTeamActuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ShiftTeamId) -> Option<StopTypeActuals> {
        self.data.read().get(&id).cloned()
    }

    /// Replaces whatever was recorded for this rest break
    pub fn add_rest_break(&self, shift_team_id: ShiftTeamId, rest_break_id: RestBreakId, actuals: Actuals) {
        self.data
            .write()
            .entry(shift_team_id)
            .or_default()
            .rest_breaks
            .insert(rest_break_id, actuals);
    }

    pub fn add_committed(&self, pair: EntityIdPair, at: DateTime<Utc>) {
        self.update(pair, |a| a.committed = Some(at));
    }

    pub fn add_currently_en_route(&self, pair: EntityIdPair, at: DateTime<Utc>) {
        self.update(pair, |a| a.currently_en_route = Some(at));
    }

    pub fn add_arrival(&self, pair: EntityIdPair, at: DateTime<Utc>) {
        self.update(pair, |a| a.arrival = Some(at));
    }

    pub fn add_completion(&self, pair: EntityIdPair, at: DateTime<Utc>) {
        self.update(pair, |a| a.completion = Some(at));
    }

    fn update(&self, pair: EntityIdPair, apply: impl FnOnce(&mut Actuals)) {
        let mut data = self.data.write();
        let actuals = data
            .entry(pair.shift_team_id)
            .or_default()
            .care_requests
            .entry(pair.care_request_id)
            .or_default();
        apply(actuals);
    }
}

/// Actual timestamps for the care requests of one planning run
#[derive(Debug, Default)]
pub struct CareRequestActuals {
    /// On-scene transitions, for on-scene and completed care requests
    pub arrival_times: HashMap<CareRequestId, DateTime<Utc>>,
    /// Only for care requests currently completed
    pub completion_times: HashMap<CareRequestId, DateTime<Utc>>,
    /// Only for care requests currently en route
    pub currently_en_route_times: HashMap<CareRequestId, DateTime<Utc>>,
    pub shift_team_actuals: ShiftTeamActuals,
}

/// Read side of the visit phase history
#[async_trait]
pub trait ActualsSource: Send + Sync {
    async fn phase_types(&self) -> Result<Vec<PhaseTypeRow>>;

    /// Latest phase of each given visit snapshot, with its care request
    async fn visit_phases(&self, visit_ids: &[VisitSnapshotId]) -> Result<Vec<VisitPhaseRow>>;

    /// Latest phase of each care request behind `visit_ids`, across all of
    /// the care request's visit snapshots
    async fn latest_care_request_phases(
        &self,
        visit_ids: &[VisitSnapshotId],
    ) -> Result<Vec<CareRequestPhaseRow>>;

    /// Latest transition into `phase_type_id` at or before `as_of`, per care
    /// request
    async fn latest_status_times(
        &self,
        care_request_ids: &[CareRequestId],
        phase_type_id: PhaseTypeId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PhaseStatusRow>>;
}

/// Loads actuals for `care_request_ids`, trusting each kind of timestamp
/// only for care requests whose latest phase makes it meaningful.
pub async fn load_care_request_actuals(
    source: &dyn ActualsSource,
    phases: &PhaseTypeTable,
    visit_ids: &[VisitSnapshotId],
    care_request_ids: &[CareRequestId],
    latest_snapshot_time: DateTime<Utc>,
) -> Result<CareRequestActuals> {
    let latest_phase_rows = source
        .latest_care_request_phases(visit_ids)
        .await
        .context("Failed to load latest care request phases")?;

    let mut current_phase = HashMap::with_capacity(latest_phase_rows.len());
    for row in &latest_phase_rows {
        current_phase.insert(row.care_request_id, phases.phase(row.phase_type_id)?);
    }

    let in_phase = |wanted: &[VisitPhase]| -> Vec<CareRequestId> {
        care_request_ids
            .iter()
            .copied()
            .filter(|id| current_phase.get(id).is_some_and(|p| wanted.contains(p)))
            .collect()
    };

    let mut actuals = CareRequestActuals::default();

    // arrivals are kept for completed care requests too
    let rows = status_times(
        source,
        phases,
        &in_phase(&[VisitPhase::OnScene, VisitPhase::Completed]),
        VisitPhase::OnScene,
        latest_snapshot_time,
    )
    .await?;
    for row in rows {
        actuals.arrival_times.insert(row.care_request_id, row.status_created_at);
        if let Some(pair) = entity_pair(&row, VisitPhase::OnScene) {
            actuals.shift_team_actuals.add_arrival(pair, row.status_created_at);
        }
    }

    let rows = status_times(
        source,
        phases,
        &in_phase(&[VisitPhase::Completed]),
        VisitPhase::Completed,
        latest_snapshot_time,
    )
    .await?;
    for row in rows {
        actuals.completion_times.insert(row.care_request_id, row.status_created_at);
        if let Some(pair) = entity_pair(&row, VisitPhase::Completed) {
            actuals.shift_team_actuals.add_completion(pair, row.status_created_at);
        }
    }

    let rows = status_times(
        source,
        phases,
        &in_phase(&[VisitPhase::EnRoute]),
        VisitPhase::EnRoute,
        latest_snapshot_time,
    )
    .await?;
    for row in rows {
        actuals
            .currently_en_route_times
            .insert(row.care_request_id, row.status_created_at);
        if let Some(pair) = entity_pair(&row, VisitPhase::EnRoute) {
            actuals
                .shift_team_actuals
                .add_currently_en_route(pair, row.status_created_at);
        }
    }

    let rows = status_times(
        source,
        phases,
        &in_phase(&[VisitPhase::Committed]),
        VisitPhase::Committed,
        latest_snapshot_time,
    )
    .await?;
    for row in rows {
        if let Some(pair) = entity_pair(&row, VisitPhase::Committed) {
            actuals.shift_team_actuals.add_committed(pair, row.status_created_at);
        }
    }

    debug!(
        arrivals = actuals.arrival_times.len(),
        completions = actuals.completion_times.len(),
        en_route = actuals.currently_en_route_times.len(),
        "Loaded care request actuals"
    );
    Ok(actuals)
}

async fn status_times(
    source: &dyn ActualsSource,
    phases: &PhaseTypeTable,
    care_request_ids: &[CareRequestId],
    phase: VisitPhase,
    as_of: DateTime<Utc>,
) -> Result<Vec<PhaseStatusRow>> {
    if care_request_ids.is_empty() {
        return Ok(Vec::new());
    }
    source
        .latest_status_times(care_request_ids, phases.id(phase), as_of)
        .await
        .with_context(|| format!("Failed to load latest {} status times", phase))
}

fn entity_pair(row: &PhaseStatusRow, phase: VisitPhase) -> Option<EntityIdPair> {
    match row.shift_team_id {
        Some(shift_team_id) => Some(EntityIdPair {
            shift_team_id,
            care_request_id: row.care_request_id,
        }),
        None => {
            warn!(
                phase = %phase,
                care_request_id = %row.care_request_id,
                "Status row has no shift team, not attributing actuals"
            );
            None
        }
    }
}

/// One recorded phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSnapshot {
    pub visit_snapshot_id: VisitSnapshotId,
    pub care_request_id: CareRequestId,
    pub phase_type_id: PhaseTypeId,
    pub shift_team_id: Option<ShiftTeamId>,
    pub created_at: DateTime<Utc>,
}

/// In-process phase history for tests and offline `plan` runs
#[derive(Debug, Default)]
pub struct InMemoryActualsSource {
    phase_types: Vec<PhaseTypeRow>,
    snapshots: RwLock<Vec<PhaseSnapshot>>,
}

impl InMemoryActualsSource {
    /// Uses the standard phase type ids
    pub fn new() -> Self {
        let table = PhaseTypeTable::standard();
        Self {
            phase_types: VisitPhase::ALL
                .into_iter()
                .map(|phase| PhaseTypeRow {
                    id: table.id(phase),
                    short_name: phase.as_str().to_string(),
                })
                .collect(),
            snapshots: RwLock::new(Vec::new()),
        }
    }

    pub fn with_phase_types(rows: Vec<PhaseTypeRow>) -> Self {
        Self {
            phase_types: rows,
            snapshots: RwLock::new(Vec::new()),
        }
    }

    pub fn record(&self, snapshot: PhaseSnapshot) {
        self.snapshots.write().push(snapshot);
    }

    fn latest_by<K: std::hash::Hash + Eq>(
        snapshots: impl Iterator<Item = PhaseSnapshot>,
        key: impl Fn(&PhaseSnapshot) -> K,
    ) -> HashMap<K, PhaseSnapshot> {
        let mut latest: HashMap<K, PhaseSnapshot> = HashMap::new();
        for snapshot in snapshots {
            match latest.get(&key(&snapshot)) {
                Some(existing) if existing.created_at > snapshot.created_at => {}
                _ => {
                    latest.insert(key(&snapshot), snapshot);
                }
            }
        }
        latest
    }
}

#[async_trait]
impl ActualsSource for InMemoryActualsSource {
    async fn phase_types(&self) -> Result<Vec<PhaseTypeRow>> {
        Ok(self.phase_types.clone())
    }

    async fn visit_phases(&self, visit_ids: &[VisitSnapshotId]) -> Result<Vec<VisitPhaseRow>> {
        let snapshots = self.snapshots.read();
        let latest = Self::latest_by(
            snapshots.iter().copied().filter(|s| visit_ids.contains(&s.visit_snapshot_id)),
            |s| s.visit_snapshot_id,
        );
        Ok(visit_ids
            .iter()
            .filter_map(|id| latest.get(id))
            .map(|s| VisitPhaseRow {
                visit_snapshot_id: s.visit_snapshot_id,
                care_request_id: s.care_request_id,
                phase_type_id: s.phase_type_id,
            })
            .collect())
    }

    async fn latest_care_request_phases(
        &self,
        visit_ids: &[VisitSnapshotId],
    ) -> Result<Vec<CareRequestPhaseRow>> {
        let snapshots = self.snapshots.read();
        let care_requests: Vec<CareRequestId> = snapshots
            .iter()
            .filter(|s| visit_ids.contains(&s.visit_snapshot_id))
            .map(|s| s.care_request_id)
            .collect();
        let latest = Self::latest_by(
            snapshots.iter().copied().filter(|s| care_requests.contains(&s.care_request_id)),
            |s| s.care_request_id,
        );
        Ok(latest
            .values()
            .map(|s| CareRequestPhaseRow {
                care_request_id: s.care_request_id,
                phase_type_id: s.phase_type_id,
            })
            .collect())
    }

    async fn latest_status_times(
        &self,
        care_request_ids: &[CareRequestId],
        phase_type_id: PhaseTypeId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PhaseStatusRow>> {
        let snapshots = self.snapshots.read();
        let latest = Self::latest_by(
            snapshots.iter().copied().filter(|s| {
                s.phase_type_id == phase_type_id
                    && s.created_at <= as_of
                    && care_request_ids.contains(&s.care_request_id)
            }),
            |s| s.care_request_id,
        );
        Ok(care_request_ids
            .iter()
            .filter_map(|id| latest.get(id))
            .map(|s| PhaseStatusRow {
                care_request_id: s.care_request_id,
                shift_team_id: s.shift_team_id,
                status_created_at: s.created_at,
            })
            .collect())
    }
}
