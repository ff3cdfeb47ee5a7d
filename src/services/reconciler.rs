//! Snapshot id reconciliation
//!
//! Every capture of operational state mints new snapshot ids. The
//! reconciler ties them back to care requests, knows the current (canonical)
//! visit of each care request and its phase, and owns the actuals of the
//! run. It is built once per planning run and only read afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{PlanningError, ReconcilerError};
use crate::services::actuals::{load_care_request_actuals, ActualsSource, CareRequestActuals, StopTypeActuals};
use crate::services::distance_matrix::OrderedSet;
use crate::services::rest_breaks::{rest_break_actuals, RestBreak};
use crate::types::{
    CareRequestId, Commitment, CurrentPosition, LocationId, PhaseTypeTable, RestBreakId,
    RouteStop, ShiftTeamId, ShiftTeamSnapshotId, Stop, StopRef, UnassignedVisit, VisitPhase,
    VisitPhaseRow, VisitSnapshotId, VrpShiftTeam, VrpVisit,
};

/// Location lookup for every stop of the run
#[derive(Debug, Clone, Default)]
pub struct StopLocations {
    visit_locations: HashMap<VisitSnapshotId, LocationId>,
    rest_break_locations: HashMap<RestBreakId, LocationId>,
    visits: Vec<VrpVisit>,
    rest_breaks: Vec<RestBreak>,
}

impl StopLocations {
    pub fn new(visits: &[VrpVisit], rest_breaks: &[RestBreak]) -> Self {
        Self {
            visit_locations: visits.iter().map(|v| (v.id, v.location_id)).collect(),
            rest_break_locations: rest_breaks
                .iter()
                .map(|rb| (rb.id(), rb.basis.location_id.unwrap_or_default()))
                .collect(),
            visits: visits.to_vec(),
            rest_breaks: rest_breaks.to_vec(),
        }
    }

    pub fn visits(&self) -> &[VrpVisit] {
        &self.visits
    }

    pub fn rest_breaks(&self) -> &[RestBreak] {
        &self.rest_breaks
    }

    /// Location of a stop, zero when unknown
    fn location_or_zero(&self, stop: &Stop) -> LocationId {
        match stop {
            Stop::Visit(v) => self.visit_locations.get(&v.visit_id).copied(),
            Stop::RestBreak(rb) => self.rest_break_locations.get(&rb.rest_break_id).copied(),
        }
        .unwrap_or_default()
    }

    pub fn location_for_stop(
        &self,
        shift_team_id: ShiftTeamSnapshotId,
        stop: &Stop,
    ) -> Result<LocationId, PlanningError> {
        let location = match stop {
            Stop::Visit(v) => self.visit_locations.get(&v.visit_id),
            Stop::RestBreak(rb) => self.rest_break_locations.get(&rb.rest_break_id),
        };
        Self::checked(shift_team_id, stop.stop_ref(), location.copied())
    }

    pub fn location_for_commitment(
        &self,
        shift_team_id: ShiftTeamSnapshotId,
        commitment: &Commitment,
    ) -> Result<LocationId, PlanningError> {
        Self::checked(
            shift_team_id,
            StopRef::Commitment(commitment.visit_id),
            self.visit_locations.get(&commitment.visit_id).copied(),
        )
    }

    fn checked(
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
        location: Option<LocationId>,
    ) -> Result<LocationId, PlanningError> {
        match location {
            None => Err(PlanningError::UnknownStopLocation { shift_team_id, stop }),
            Some(id) if id.is_zero() => Err(PlanningError::ZeroStopLocation { shift_team_id, stop }),
            Some(id) => Ok(id),
        }
    }
}

/// Maps snapshot ids to business identity and resolves current positions
#[derive(Debug)]
pub struct SnapshotIdReconciler {
    latest_snapshot_time: DateTime<Utc>,
    visit_to_care_request: HashMap<VisitSnapshotId, CareRequestId>,
    /// Ordered so validation reports the same first error every run
    current_visits: BTreeMap<CareRequestId, VisitSnapshotId>,
    visit_phases: HashMap<VisitSnapshotId, VisitPhase>,
    actuals: CareRequestActuals,
    stop_locations: StopLocations,
}

impl SnapshotIdReconciler {
    /// Builds and validates a reconciler. `visit_rows` cover current and
    /// previously unassigned visits; `current_visits` are the visits of
    /// this run.
    pub fn new(
        visit_rows: &[VisitPhaseRow],
        phases: &PhaseTypeTable,
        current_visits: &[VrpVisit],
        rest_breaks: &[RestBreak],
        actuals: CareRequestActuals,
        latest_snapshot_time: DateTime<Utc>,
    ) -> Result<Self, PlanningError> {
        let mut visit_to_care_request = HashMap::with_capacity(visit_rows.len());
        let mut visit_phases = HashMap::with_capacity(visit_rows.len());
        for row in visit_rows {
            visit_phases.insert(row.visit_snapshot_id, phases.phase(row.phase_type_id)?);
            visit_to_care_request.insert(row.visit_snapshot_id, row.care_request_id);
        }

        // feasibility-check visits have no care request and share the zero id
        let current = current_visits
            .iter()
            .map(|visit| {
                let care_request_id = visit_to_care_request.get(&visit.id).copied().unwrap_or_default();
                (care_request_id, visit.id)
            })
            .collect();

        for rest_break in rest_breaks {
            actuals.shift_team_actuals.add_rest_break(
                rest_break.shift_team_id,
                rest_break.id(),
                rest_break_actuals(rest_break, latest_snapshot_time),
            );
        }

        let reconciler = Self {
            latest_snapshot_time,
            visit_to_care_request,
            current_visits: current,
            visit_phases,
            actuals,
            stop_locations: StopLocations::new(current_visits, rest_breaks),
        };
        reconciler.validate()?;
        Ok(reconciler)
    }

    /// Loads visit phases and actuals for this run, then builds the reconciler
    pub async fn load(
        source: &dyn ActualsSource,
        phases: &PhaseTypeTable,
        visits: &[VrpVisit],
        unassigned_visits: &[UnassignedVisit],
        rest_breaks: &[RestBreak],
        latest_snapshot_time: DateTime<Utc>,
    ) -> Result<Self> {
        let mut visit_ids = OrderedSet::with_capacity(visits.len() + unassigned_visits.len());
        visit_ids.extend(visits.iter().map(|v| v.id));
        visit_ids.extend(unassigned_visits.iter().map(|uv| uv.visit_id));

        let visit_rows = source
            .visit_phases(visit_ids.as_slice())
            .await
            .context("Failed to load care requests and phases for visits")?;

        let care_request_ids: OrderedSet<CareRequestId> =
            visit_rows.iter().map(|row| row.care_request_id).collect();

        let actuals = load_care_request_actuals(
            source,
            phases,
            visit_ids.as_slice(),
            care_request_ids.as_slice(),
            latest_snapshot_time,
        )
        .await?;

        debug!(
            visits = visit_ids.len(),
            care_requests = care_request_ids.len(),
            "Loaded reconciler inputs"
        );
        Ok(Self::new(&visit_rows, phases, visits, rest_breaks, actuals, latest_snapshot_time)?)
    }

    /// Checks that every current visit can be placed: it has a phase, and
    /// when en route it resolves to its own care request and has a recorded
    /// en-route time.
    pub fn validate(&self) -> Result<(), ReconcilerError> {
        for (&care_request_id, &visit_id) in &self.current_visits {
            if visit_id.is_check_feasibility() {
                continue;
            }
            if visit_id.is_zero() {
                return Err(ReconcilerError::MissingVisitId(care_request_id));
            }
            let phase = self
                .visit_phases
                .get(&visit_id)
                .ok_or(ReconcilerError::MissingPhase { visit_id, care_request_id })?;
            if *phase != VisitPhase::EnRoute {
                continue;
            }
            let mapped = self
                .visit_to_care_request
                .get(&visit_id)
                .copied()
                .ok_or(ReconcilerError::MissingCareRequest(visit_id))?;
            if mapped != care_request_id {
                return Err(ReconcilerError::InconsistentCareRequest {
                    visit_id,
                    expected: care_request_id,
                    actual: mapped,
                });
            }
            if !self.actuals.currently_en_route_times.contains_key(&care_request_id) {
                return Err(ReconcilerError::MissingEnRouteTime { visit_id, care_request_id });
            }
        }
        Ok(())
    }

    pub fn latest_snapshot_time(&self) -> DateTime<Utc> {
        self.latest_snapshot_time
    }

    pub fn care_request_for_visit(&self, visit_id: VisitSnapshotId) -> Option<CareRequestId> {
        self.visit_to_care_request.get(&visit_id).copied()
    }

    pub fn current_visit(&self, care_request_id: CareRequestId) -> Option<VisitSnapshotId> {
        self.current_visits.get(&care_request_id).copied()
    }

    pub fn visit_phase(&self, visit_id: VisitSnapshotId) -> Option<VisitPhase> {
        self.visit_phases.get(&visit_id).copied()
    }

    pub fn shift_team_actuals(&self, shift_team_id: ShiftTeamId) -> Option<StopTypeActuals> {
        self.actuals.shift_team_actuals.get(shift_team_id)
    }

    pub fn actuals(&self) -> &CareRequestActuals {
        &self.actuals
    }

    pub fn stop_locations(&self) -> &StopLocations {
        &self.stop_locations
    }

    /// Visit to care request pairs known to this run
    pub fn care_request_mappings(&self) -> HashMap<VisitSnapshotId, CareRequestId> {
        self.visit_to_care_request.clone()
    }

    /// Moves a previous run's unassigned visits onto current visit ids.
    ///
    /// Entries whose care request is gone are dropped, as are entries that
    /// have since been scheduled into some team's history or commitments.
    /// Input order is kept, first occurrence wins.
    pub fn reconcile_unassigned_visits(
        &self,
        unassigned: &[UnassignedVisit],
        shift_teams: &[VrpShiftTeam],
    ) -> Vec<UnassignedVisit> {
        let scheduled: HashSet<VisitSnapshotId> = shift_teams
            .iter()
            .flat_map(|st| {
                st.route_history
                    .stops
                    .iter()
                    .filter_map(|stop| stop.stop.visit_id())
                    .chain(st.upcoming_commitments.iter().map(|c| c.visit_id))
            })
            .collect();

        let mut seen = HashSet::new();
        unassigned
            .iter()
            .filter_map(|uv| {
                let care_request_id = self.care_request_for_visit(uv.visit_id)?;
                let visit_id = self.current_visit(care_request_id)?;
                Some(UnassignedVisit { visit_id, pinned: uv.pinned })
            })
            .filter(|uv| !scheduled.contains(&uv.visit_id))
            .filter(|uv| seen.insert(uv.visit_id))
            .collect()
    }

    fn now_at(&self, location_id: LocationId) -> CurrentPosition {
        CurrentPosition {
            location_id,
            known_timestamp_sec: self.latest_snapshot_time.timestamp(),
        }
    }

    /// Position of a shift team from its ordered route history.
    ///
    /// The latest stop with an actual start or completion anchors the
    /// position. A started stop keeps ticking at its location. After a
    /// completed stop the team either waits there, or has left for the next
    /// stop if that is a visit currently en route; the departure time is
    /// then the en-route transition. With no anchored stop the team is at
    /// its depot.
    pub fn current_position(&self, shift_team: &VrpShiftTeam) -> Result<CurrentPosition, ReconcilerError> {
        let stops = &shift_team.route_history.stops;
        for (i, stop) in stops.iter().enumerate().rev() {
            if stop.actual_start_timestamp_sec.is_none() && stop.actual_completion_timestamp_sec.is_none() {
                continue;
            }
            let location_id = self.stop_locations.location_or_zero(&stop.stop);
            if stop.actual_completion_timestamp_sec.is_some() {
                return self.position_after(location_id, stops.get(i + 1));
            }
            let started = stop.actual_start_timestamp_sec.unwrap_or_default();
            return Ok(CurrentPosition {
                location_id,
                known_timestamp_sec: started.max(self.latest_snapshot_time.timestamp()),
            });
        }

        match stops.first() {
            None => Ok(self.now_at(shift_team.depot_location_id)),
            Some(first) => self.position_after(shift_team.depot_location_id, Some(first)),
        }
    }

    fn position_after(
        &self,
        location_id: LocationId,
        next: Option<&RouteStop>,
    ) -> Result<CurrentPosition, ReconcilerError> {
        let Some(next) = next else {
            return Ok(self.now_at(location_id));
        };
        match next.stop {
            Stop::RestBreak(_) => Ok(self.now_at(location_id)),
            Stop::Visit(visit) => {
                if self.visit_phase(visit.visit_id) != Some(VisitPhase::EnRoute) {
                    return Ok(self.now_at(location_id));
                }
                let care_request_id = self.care_request_for_visit(visit.visit_id).unwrap_or_default();
                let en_route_at = self
                    .actuals
                    .currently_en_route_times
                    .get(&care_request_id)
                    .ok_or(ReconcilerError::MissingEnRouteTime {
                        visit_id: visit.visit_id,
                        care_request_id,
                    })?;
                Ok(CurrentPosition {
                    location_id,
                    known_timestamp_sec: en_route_at.timestamp(),
                })
            }
        }
    }

    /// Sets the current position of every shift team
    pub fn annotate_current_positions(&self, shift_teams: &mut [VrpShiftTeam]) -> Result<(), ReconcilerError> {
        for shift_team in shift_teams.iter_mut() {
            let position = self.current_position(shift_team)?;
            shift_team.route_history.current_position = Some(position);
        }
        Ok(())
    }
}
