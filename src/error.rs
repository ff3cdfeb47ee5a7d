//! Typed planning errors
//!
//! Storage and provider failures travel as `anyhow::Error` with context.
//! The variants here are the domain failures callers may want to match on
//! (`err.downcast_ref::<PlanningError>()`).

use thiserror::Error;

use crate::types::{
    CareRequestId, LocationId, PhaseTypeId, ServiceRegionId, ShiftTeamSnapshotId, StopRef,
    VisitSnapshotId,
};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("not all location IDs found: found: {found:?}, wanted: {wanted:?}")]
    NotAllLocationsFound {
        found: Vec<LocationId>,
        wanted: Vec<LocationId>,
    },

    #[error(
        "not enough distances, after adding missing distances: service_region_id({service_region_id}), \
         num_distances({num_distances}), wanted({wanted}), num_missing_loc_reqs({num_missing_requests}), \
         map_service({map_service})"
    )]
    NotEnoughDistances {
        service_region_id: ServiceRegionId,
        num_distances: usize,
        wanted: usize,
        num_missing_requests: usize,
        map_service: String,
    },

    #[error("unknown location for {stop} on shift team snapshot {shift_team_id}")]
    UnknownStopLocation {
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
    },

    #[error("0 location ID for {stop} on shift team snapshot {shift_team_id}")]
    ZeroStopLocation {
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
    },

    #[error("0 location ID for {field} on shift team snapshot {shift_team_id}")]
    ZeroShiftTeamLocation {
        shift_team_id: ShiftTeamSnapshotId,
        field: &'static str,
    },

    #[error("0 location ID for planning {0}")]
    ZeroPlanningLocation(StopRef),

    #[error("invalid visit phase short name: {0:?}")]
    UnknownVisitPhase(String),

    #[error("unknown visit phase type id: {0}")]
    UnknownPhaseTypeId(PhaseTypeId),

    #[error("visit phase type table has no entry for {0}")]
    MissingPhaseType(&'static str),

    #[error("unknown shift team for snapshot id {0}")]
    UnknownShiftTeamSnapshot(ShiftTeamSnapshotId),

    #[error("nothing to plan for service region {0}: no shift teams")]
    EmptyDescription(ServiceRegionId),

    #[error("distance matrix computation cancelled")]
    Cancelled,

    #[error("{count} recoverable validation errors with fail_on_recoverable_errors set, first: {first}")]
    StrictValidation { count: usize, first: String },

    #[error(transparent)]
    Reconciler(#[from] ReconcilerError),
}

/// Inconsistent reconciler state. These point at a bug in how the run was
/// prepared rather than at bad operational data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcilerError {
    #[error("invalid no Id for current visit for care_request_id {0}")]
    MissingVisitId(CareRequestId),

    #[error("invalid missing visit phase for visit_snapshot_id {visit_id}, care_request_id {care_request_id}")]
    MissingPhase {
        visit_id: VisitSnapshotId,
        care_request_id: CareRequestId,
    },

    #[error("no care request ID found for en route visit ID: {0}")]
    MissingCareRequest(VisitSnapshotId),

    #[error("inconsistent care request IDs for visit_snapshot_id {visit_id}: {expected} {actual}")]
    InconsistentCareRequest {
        visit_id: VisitSnapshotId,
        expected: CareRequestId,
        actual: CareRequestId,
    },

    #[error("no en route time found for care request ID({care_request_id}) for visit ID({visit_id})")]
    MissingEnRouteTime {
        visit_id: VisitSnapshotId,
        care_request_id: CareRequestId,
    },
}
