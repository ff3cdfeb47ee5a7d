//! Route history of each shift team
//!
//! The pinned part of a route is fixed by reality:
//!
//! ```text
//!   depot -> history stops ... -> current position -> commitments ...
//! ```
//!
//! When the last history stop is en route (no actual start) the team is
//! travelling towards it, so the current position goes in front of it:
//!
//! ```text
//!   depot -> history stops ... -> current position -> en-route stop -> commitments ...
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::PlanningError;
use crate::services::actuals::{Actuals, StopTypeActuals};
use crate::services::distance_matrix::{DistanceMatrixRequest, OrderedSet};
use crate::services::reconciler::SnapshotIdReconciler;
use crate::types::{
    CareRequestId, Commitment, LocationId, RestBreakId, RestBreakStop, RouteHistory, RouteStop,
    ShiftTeamAttribute, ShiftTeamId, ShiftTeamSnapshot, ShiftTeamSnapshotId, Stop, StopRef,
    VisitPhase, VisitSnapshotId, VisitStop, VrpShiftTeam, VrpTimeWindow,
};

pub struct RouteHistorian<'a> {
    reconciler: &'a SnapshotIdReconciler,
    shift_start_buffer_sec: i64,
}

/// Route-history paths, one per shift team, and the location each ends at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteHistoryPaths {
    pub paths: Vec<DistanceMatrixRequest>,
    pub tails: Vec<LocationId>,
}

fn unix(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(|t| t.timestamp())
}

impl<'a> RouteHistorian<'a> {
    pub fn new(reconciler: &'a SnapshotIdReconciler, shift_start_buffer_sec: i64) -> Self {
        Self {
            reconciler,
            shift_start_buffer_sec,
        }
    }

    /// Shift teams with route history, commitments and current position.
    /// Also returns the snapshot to shift team id mapping of the run.
    pub fn vrp_shift_teams(
        &self,
        snapshots: &[ShiftTeamSnapshot],
        attributes: &[ShiftTeamAttribute],
    ) -> Result<(Vec<VrpShiftTeam>, HashMap<ShiftTeamSnapshotId, ShiftTeamId>), PlanningError> {
        let mut snapshot_attributes: HashMap<ShiftTeamSnapshotId, Vec<String>> = HashMap::new();
        for attribute in attributes {
            snapshot_attributes
                .entry(attribute.shift_team_snapshot_id)
                .or_default()
                .push(attribute.name.clone());
        }

        let mapping: HashMap<_, _> = snapshots.iter().map(|s| (s.id, s.shift_team_id)).collect();
        let mut shift_teams: Vec<VrpShiftTeam> = snapshots
            .iter()
            .map(|snapshot| VrpShiftTeam {
                id: snapshot.id,
                depot_location_id: snapshot.base_location_id,
                available_time_window: VrpTimeWindow {
                    start_timestamp_sec: (snapshot.start_timestamp_sec + self.shift_start_buffer_sec)
                        .min(snapshot.end_timestamp_sec),
                    end_timestamp_sec: snapshot.end_timestamp_sec,
                },
                attributes: snapshot_attributes.remove(&snapshot.id).unwrap_or_default(),
                route_history: RouteHistory::default(),
                upcoming_commitments: Vec::new(),
                num_app_members: snapshot.num_app_members,
                num_dhmt_members: snapshot.num_dhmt_members,
            })
            .collect();

        for shift_team in &mut shift_teams {
            let shift_team_id = mapping
                .get(&shift_team.id)
                .copied()
                .ok_or(PlanningError::UnknownShiftTeamSnapshot(shift_team.id))?;
            // no actuals: nothing pinned yet
            let Some(actuals) = self.reconciler.shift_team_actuals(shift_team_id) else {
                continue;
            };
            shift_team.route_history.stops = self.route_history_stops(shift_team.id, &actuals);
            shift_team.upcoming_commitments = self.upcoming_commitments(&actuals);
        }

        self.reconciler.annotate_current_positions(&mut shift_teams)?;
        Ok((shift_teams, mapping))
    }

    /// History stops ordered by their latest actual, then stop id. Stops
    /// with only a commit time are commitments and left out.
    pub fn route_history_stops(
        &self,
        shift_team_id: ShiftTeamSnapshotId,
        actuals: &StopTypeActuals,
    ) -> Vec<RouteStop> {
        let mut stops: Vec<(Actuals, RouteStop)> = Vec::new();

        for (care_request_id, actual) in &actuals.care_requests {
            if !actual.is_route_history_stop() {
                continue;
            }
            let Some(visit_id) = self.reconciler.current_visit(*care_request_id) else {
                warn!(
                    shift_team_id = %shift_team_id,
                    care_request_id = %care_request_id,
                    "Actuals for a care request without a current visit, leaving out of route history"
                );
                continue;
            };
            stops.push((*actual, visit_route_stop(visit_id, actual)));
        }

        for (rest_break_id, actual) in &actuals.rest_breaks {
            if !actual.is_route_history_stop() {
                continue;
            }
            stops.push((*actual, rest_break_route_stop(*rest_break_id, actual)));
        }

        stops.sort_by_key(|(actual, stop)| {
            let kind = match stop.stop {
                Stop::Visit(_) => 0,
                Stop::RestBreak(_) => 1,
            };
            (actual.latest(), stop.stop.raw_id(), kind)
        });
        stops.into_iter().map(|(_, stop)| stop).collect()
    }

    /// Care requests of this team whose current visit is committed, in commit
    /// order, then visit id
    pub fn upcoming_commitments(&self, actuals: &StopTypeActuals) -> Vec<Commitment> {
        let mut commitments: Vec<(Option<DateTime<Utc>>, VisitSnapshotId)> = actuals
            .care_requests
            .iter()
            .filter_map(|(care_request_id, actual)| {
                let visit_id = self.committed_visit(*care_request_id)?;
                Some((actual.committed, visit_id))
            })
            .collect();
        commitments.sort();
        commitments
            .into_iter()
            .map(|(_, visit_id)| Commitment { visit_id })
            .collect()
    }

    fn committed_visit(&self, care_request_id: CareRequestId) -> Option<VisitSnapshotId> {
        let visit_id = self.reconciler.current_visit(care_request_id)?;
        (self.reconciler.visit_phase(visit_id) == Some(VisitPhase::Committed)).then_some(visit_id)
    }

    /// One path per shift team through its pinned route, plus where each
    /// path ends.
    ///
    /// Only a trailing en-route stop moves the current position; any other
    /// en-route stop is left for the validators to report.
    pub fn path_requests_and_tails(&self, shift_teams: &[VrpShiftTeam]) -> Result<RouteHistoryPaths, PlanningError> {
        let stop_locations = self.reconciler.stop_locations();
        let mut result = RouteHistoryPaths {
            paths: Vec::with_capacity(shift_teams.len()),
            tails: Vec::with_capacity(shift_teams.len()),
        };

        for shift_team in shift_teams {
            let current_position = shift_team
                .route_history
                .current_position
                .map(|p| p.location_id)
                .unwrap_or_default();
            if current_position.is_zero() {
                return Err(PlanningError::ZeroShiftTeamLocation {
                    shift_team_id: shift_team.id,
                    field: "current_position",
                });
            }
            if shift_team.depot_location_id.is_zero() {
                return Err(PlanningError::ZeroShiftTeamLocation {
                    shift_team_id: shift_team.id,
                    field: "depot",
                });
            }

            let stops = &shift_team.route_history.stops;
            let mut path = Vec::with_capacity(stops.len() + shift_team.upcoming_commitments.len() + 2);
            path.push(shift_team.depot_location_id);

            let mut last_is_en_route = false;
            for (i, stop) in stops.iter().enumerate() {
                let location_id = stop_locations.location_for_stop(shift_team.id, &stop.stop)?;
                last_is_en_route = i + 1 == stops.len() && stop.is_en_route();
                if last_is_en_route {
                    path.push(current_position);
                }
                path.push(location_id);
            }
            if !last_is_en_route {
                path.push(current_position);
            }

            for commitment in &shift_team.upcoming_commitments {
                path.push(stop_locations.location_for_commitment(shift_team.id, commitment)?);
            }

            // path always holds at least depot and current position
            result.tails.push(path[path.len() - 1]);
            result.paths.push(DistanceMatrixRequest::Path(path));
        }

        Ok(result)
    }

    /// Locations of visits and rest breaks not yet in any team's history or
    /// commitments. Unrequested breaks without a location are skipped.
    pub fn planning_stop_location_ids(&self, shift_teams: &[VrpShiftTeam]) -> Result<Vec<LocationId>, PlanningError> {
        let mut observed_visits: HashSet<VisitSnapshotId> = HashSet::new();
        let mut observed_rest_breaks: HashSet<RestBreakId> = HashSet::new();
        for shift_team in shift_teams {
            for stop in &shift_team.route_history.stops {
                match stop.stop {
                    Stop::Visit(v) => observed_visits.insert(v.visit_id),
                    Stop::RestBreak(rb) => observed_rest_breaks.insert(rb.rest_break_id),
                };
            }
            observed_visits.extend(shift_team.upcoming_commitments.iter().map(|c| c.visit_id));
        }

        let stop_locations = self.reconciler.stop_locations();
        let mut location_ids = OrderedSet::default();
        for visit in stop_locations.visits() {
            if observed_visits.contains(&visit.id) {
                continue;
            }
            if visit.location_id.is_zero() {
                return Err(PlanningError::ZeroPlanningLocation(StopRef::Visit(visit.id)));
            }
            location_ids.insert(visit.location_id);
        }
        for rest_break in stop_locations.rest_breaks() {
            if observed_rest_breaks.contains(&rest_break.id()) {
                continue;
            }
            match rest_break.basis.location_id {
                None if rest_break.is_unrequested() => continue,
                Some(id) if rest_break.is_unrequested() && id.is_zero() => continue,
                Some(id) if !id.is_zero() => {
                    location_ids.insert(id);
                }
                _ => return Err(PlanningError::ZeroPlanningLocation(StopRef::RestBreak(rest_break.id()))),
            }
        }
        Ok(location_ids.to_vec())
    }
}

fn visit_route_stop(visit_id: VisitSnapshotId, actual: &Actuals) -> RouteStop {
    RouteStop {
        stop: Stop::Visit(VisitStop {
            visit_id,
            arrival_timestamp_sec: unix(actual.arrival),
        }),
        pinned: true,
        actual_start_timestamp_sec: unix(actual.arrival),
        actual_completion_timestamp_sec: unix(actual.completion),
    }
}

fn rest_break_route_stop(rest_break_id: RestBreakId, actual: &Actuals) -> RouteStop {
    RouteStop {
        stop: Stop::RestBreak(RestBreakStop {
            rest_break_id,
            start_timestamp_sec: unix(actual.arrival),
        }),
        pinned: true,
        actual_start_timestamp_sec: unix(actual.arrival),
        actual_completion_timestamp_sec: unix(actual.completion),
    }
}
