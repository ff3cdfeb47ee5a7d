//! VRP description types
//!
//! This is what a planning run hands to the optimizer request serializer.
//! Timestamps are Unix seconds, matching the optimizer's wire format.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    CareRequestId, DistanceMatrix, Location, LocationId, RestBreakId, ShiftTeamId,
    ShiftTeamSnapshotId, VisitSnapshotId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpTimeWindow {
    pub start_timestamp_sec: i64,
    pub end_timestamp_sec: i64,
}

/// Visit as seen by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpVisit {
    pub id: VisitSnapshotId,
    pub location_id: LocationId,
    pub arrival_time_window: Option<VrpTimeWindow>,
    pub service_duration_sec: i64,
    #[serde(default)]
    pub extra_setup_duration_sec: i64,
    #[serde(default)]
    pub required_attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpRestBreak {
    pub id: RestBreakId,
    /// Snapshot id of the owning shift team
    pub shift_team_id: ShiftTeamSnapshotId,
    /// Unrequested breaks may have no location
    pub location_id: Option<LocationId>,
    pub start_timestamp_sec: Option<i64>,
    pub duration_sec: i64,
    #[serde(default)]
    pub unrequested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitStop {
    pub visit_id: VisitSnapshotId,
    pub arrival_timestamp_sec: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestBreakStop {
    pub rest_break_id: RestBreakId,
    pub start_timestamp_sec: Option<i64>,
}

/// A route-history stop. Closed: adding a variant must break every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stop {
    Visit(VisitStop),
    RestBreak(RestBreakStop),
}

impl Stop {
    pub fn stop_ref(&self) -> StopRef {
        match self {
            Stop::Visit(v) => StopRef::Visit(v.visit_id),
            Stop::RestBreak(rb) => StopRef::RestBreak(rb.rest_break_id),
        }
    }

    /// Raw id used for deterministic tie-breaking
    pub fn raw_id(&self) -> i64 {
        match self {
            Stop::Visit(v) => v.visit_id.get(),
            Stop::RestBreak(rb) => rb.rest_break_id.get(),
        }
    }

    pub fn visit_id(&self) -> Option<VisitSnapshotId> {
        match self {
            Stop::Visit(v) => Some(v.visit_id),
            Stop::RestBreak(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub stop: Stop,
    pub pinned: bool,
    pub actual_start_timestamp_sec: Option<i64>,
    pub actual_completion_timestamp_sec: Option<i64>,
}

impl RouteStop {
    /// En route: in history but not yet started
    pub fn is_en_route(&self) -> bool {
        self.actual_start_timestamp_sec.is_none()
    }
}

/// Anchor for all forward travel-time computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPosition {
    pub location_id: LocationId,
    pub known_timestamp_sec: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHistory {
    pub stops: Vec<RouteStop>,
    pub current_position: Option<CurrentPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub visit_id: VisitSnapshotId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpShiftTeam {
    pub id: ShiftTeamSnapshotId,
    pub depot_location_id: LocationId,
    pub available_time_window: VrpTimeWindow,
    pub attributes: Vec<String>,
    pub route_history: RouteHistory,
    pub upcoming_commitments: Vec<Commitment>,
    pub num_app_members: i32,
    pub num_dhmt_members: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedVisit {
    pub visit_id: VisitSnapshotId,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrpDescription {
    pub shift_teams: Vec<VrpShiftTeam>,
    pub visits: Vec<VrpVisit>,
    pub rest_breaks: Vec<VrpRestBreak>,
    pub locations: Vec<Location>,
    pub distance_matrix: DistanceMatrix,
    pub unassigned_visits: Vec<UnassignedVisit>,
    pub current_timestamp_sec: i64,
}

/// Names a stop in error messages and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRef {
    Visit(VisitSnapshotId),
    RestBreak(RestBreakId),
    Commitment(VisitSnapshotId),
}

impl fmt::Display for StopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRef::Visit(id) => write!(f, "visit {}", id),
            StopRef::RestBreak(id) => write!(f, "rest break {}", id),
            StopRef::Commitment(id) => write!(f, "upcoming commitment visit {}", id),
        }
    }
}

/// Snapshot id to business id maps for one planning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMappings {
    pub care_requests: HashMap<VisitSnapshotId, CareRequestId>,
    pub shift_teams: HashMap<ShiftTeamSnapshotId, ShiftTeamId>,
}

impl EntityMappings {
    pub fn care_request_for_visit(&self, visit_id: VisitSnapshotId) -> Option<CareRequestId> {
        self.care_requests.get(&visit_id).copied()
    }

    pub fn shift_team_for_snapshot(&self, id: ShiftTeamSnapshotId) -> Option<ShiftTeamId> {
        self.shift_teams.get(&id).copied()
    }

    /// All visit snapshots of this run that belong to `care_request_id`, ascending.
    pub fn visits_for_care_request(&self, care_request_id: CareRequestId) -> Vec<VisitSnapshotId> {
        let mut ids: Vec<_> = self
            .care_requests
            .iter()
            .filter(|(_, cr)| **cr == care_request_id)
            .map(|(visit_id, _)| *visit_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshots_for_shift_team(&self, shift_team_id: ShiftTeamId) -> Vec<ShiftTeamSnapshotId> {
        let mut ids: Vec<_> = self
            .shift_teams
            .iter()
            .filter(|(_, st)| **st == shift_team_id)
            .map(|(snapshot_id, _)| *snapshot_id)
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_serializes_with_type_tag() {
        let stop = Stop::RestBreak(RestBreakStop {
            rest_break_id: RestBreakId(4),
            start_timestamp_sec: Some(100),
        });
        let json = serde_json::to_value(stop).unwrap();
        assert_eq!(json["type"], "rest_break");
        assert_eq!(json["restBreakId"], 4);
    }

    #[test]
    fn test_stop_ref_display() {
        assert_eq!(StopRef::Visit(VisitSnapshotId(2)).to_string(), "visit 2");
        assert_eq!(StopRef::RestBreak(RestBreakId(3)).to_string(), "rest break 3");
    }

    #[test]
    fn test_entity_mappings_reverse_lookup() {
        let mut mappings = EntityMappings::default();
        mappings.care_requests.insert(VisitSnapshotId(1), CareRequestId(10));
        mappings.care_requests.insert(VisitSnapshotId(3), CareRequestId(10));
        mappings.care_requests.insert(VisitSnapshotId(2), CareRequestId(20));
        mappings.shift_teams.insert(ShiftTeamSnapshotId(7), ShiftTeamId(70));

        assert_eq!(
            mappings.visits_for_care_request(CareRequestId(10)),
            vec![VisitSnapshotId(1), VisitSnapshotId(3)]
        );
        assert_eq!(
            mappings.snapshots_for_shift_team(ShiftTeamId(70)),
            vec![ShiftTeamSnapshotId(7)]
        );
        assert_eq!(
            mappings.care_request_for_visit(VisitSnapshotId(2)),
            Some(CareRequestId(20))
        );
        assert_eq!(mappings.shift_team_for_snapshot(ShiftTeamSnapshotId(8)), None);
    }
}
