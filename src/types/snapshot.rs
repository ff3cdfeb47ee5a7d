//! Snapshot inputs of a planning run

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CareRequestId, LocationId, PhaseTypeId, RestBreakId, ServiceRegionId, ShiftTeamId,
    ShiftTeamSnapshotId, UnassignedVisit, VisitSnapshotId, VrpVisit,
};

/// Latest-as-of shift team snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTeamSnapshot {
    pub id: ShiftTeamSnapshotId,
    pub shift_team_id: ShiftTeamId,
    pub base_location_id: LocationId,
    pub start_timestamp_sec: i64,
    pub end_timestamp_sec: i64,
    #[serde(default)]
    pub num_app_members: i32,
    #[serde(default)]
    pub num_dhmt_members: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTeamAttribute {
    pub shift_team_snapshot_id: ShiftTeamSnapshotId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestBreakRequest {
    pub id: RestBreakId,
    pub shift_team_id: ShiftTeamId,
    pub start_timestamp_sec: i64,
    pub duration_sec: i64,
    pub location_id: LocationId,
}

/// Visit snapshot with its care request and phase at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VisitPhaseRow {
    pub visit_snapshot_id: VisitSnapshotId,
    pub care_request_id: CareRequestId,
    pub phase_type_id: PhaseTypeId,
}

/// Latest phase of a care request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CareRequestPhaseRow {
    pub care_request_id: CareRequestId,
    pub phase_type_id: PhaseTypeId,
}

/// Latest time a care request entered a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStatusRow {
    pub care_request_id: CareRequestId,
    pub shift_team_id: Option<ShiftTeamId>,
    pub status_created_at: DateTime<Utc>,
}

/// Time-bounded read of operational state for one region and date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBundle {
    pub service_region_id: ServiceRegionId,
    pub service_date: NaiveDate,
    pub latest_snapshot_time: DateTime<Utc>,
    pub shift_teams: Vec<ShiftTeamSnapshot>,
    #[serde(default)]
    pub shift_team_attributes: Vec<ShiftTeamAttribute>,
    pub visits: Vec<VrpVisit>,
    #[serde(default)]
    pub rest_break_requests: Vec<RestBreakRequest>,
    /// Unassigned visits reported by the previous run
    #[serde(default)]
    pub unassigned_visits: Vec<UnassignedVisit>,
}
