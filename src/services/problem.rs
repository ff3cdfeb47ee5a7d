//! VRP problem assembly
//!
//! Composes one planning run: snapshots go through the reconciler and the
//! historian, their paths and planning stops become distance requests, and
//! the finished description is validated.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PlanningError;
use crate::services::actuals::ActualsSource;
use crate::services::distance_matrix::{
    build_distance_matrix_reqs, DistanceMatrixParams, DistanceMatrixPlanner, DistanceStore, OrderedSet,
};
use crate::services::historian::RouteHistorian;
use crate::services::reconciler::SnapshotIdReconciler;
use crate::services::rest_breaks::{rest_breaks_for_requests, to_vrp_rest_breaks};
use crate::services::routing::MapsTags;
use crate::services::validation::{RecoverableError, Validator};
use crate::types::{
    CoverageWindow, EntityMappings, LocationId, PhaseTypeTable, PlanningSettings, SnapshotBundle,
    VrpDescription, VrpVisit,
};

/// Collaborators of a build
#[derive(Clone)]
pub struct ProblemDeps {
    pub store: Arc<dyn DistanceStore>,
    pub actuals: Arc<dyn ActualsSource>,
    pub planner: Arc<DistanceMatrixPlanner>,
}

/// Result of one planning run
#[derive(Debug)]
pub struct VrpProblem {
    pub run_id: Uuid,
    pub description: VrpDescription,
    pub entity_mappings: EntityMappings,
    /// Creation window of the distances in the matrix
    pub distance_window: Option<CoverageWindow>,
    /// Anomalies found and corrected by the validators
    pub recoverable_errors: Vec<RecoverableError>,
}

/// Builds the problem of one run at most once.
///
/// Concurrent `build` calls share the same in-flight computation; a failed
/// build is not cached and may be retried.
pub struct VrpProblemBuilder {
    run_id: Uuid,
    bundle: SnapshotBundle,
    settings: PlanningSettings,
    deps: ProblemDeps,
    problem: OnceCell<Arc<VrpProblem>>,
}

impl VrpProblemBuilder {
    pub fn new(bundle: SnapshotBundle, settings: PlanningSettings, deps: ProblemDeps) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            bundle,
            settings,
            deps,
            problem: OnceCell::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn build(&self, cancel: &CancellationToken) -> Result<Arc<VrpProblem>> {
        self.problem
            .get_or_try_init(|| async { self.compute(cancel).await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn compute(&self, cancel: &CancellationToken) -> Result<VrpProblem> {
        let started_at = Instant::now();
        let bundle = &self.bundle;
        let settings = &self.settings;

        info!(
            run_id = %self.run_id,
            service_region_id = %bundle.service_region_id,
            service_date = %bundle.service_date,
            shift_teams = bundle.shift_teams.len(),
            visits = bundle.visits.len(),
            "Building VRP problem"
        );

        if bundle.shift_teams.is_empty() {
            return Err(PlanningError::EmptyDescription(bundle.service_region_id).into());
        }

        let now_sec = bundle.latest_snapshot_time.timestamp();
        let visits: Vec<VrpVisit> = bundle
            .visits
            .iter()
            .cloned()
            .map(|visit| VrpVisit {
                extra_setup_duration_sec: settings.visit_extra_setup_duration_sec,
                ..visit
            })
            .collect();

        let rest_breaks = rest_breaks_for_requests(
            &bundle.rest_break_requests,
            &bundle.shift_teams,
            &settings.unrequested_rest_break,
            now_sec,
        );

        let phase_rows = self
            .deps
            .actuals
            .phase_types()
            .await
            .context("Failed to load visit phase types")?;
        let phases = PhaseTypeTable::from_rows(&phase_rows)?;

        let reconciler = SnapshotIdReconciler::load(
            self.deps.actuals.as_ref(),
            &phases,
            &visits,
            &bundle.unassigned_visits,
            &rest_breaks,
            bundle.latest_snapshot_time,
        )
        .await?;

        let historian = RouteHistorian::new(&reconciler, settings.shift_start_buffer_sec);
        let (shift_teams, shift_team_mappings) =
            historian.vrp_shift_teams(&bundle.shift_teams, &bundle.shift_team_attributes)?;

        let planning = historian.planning_stop_location_ids(&shift_teams)?;
        let history = historian.path_requests_and_tails(&shift_teams)?;
        let depots: OrderedSet<LocationId> = shift_teams.iter().map(|st| st.depot_location_id).collect();
        debug!(
            run_id = %self.run_id,
            planning_stops = planning.len(),
            depots = depots.len(),
            "Resolved route history paths"
        );

        let requests = build_distance_matrix_reqs(history.paths, &history.tails, &planning, depots.as_slice());
        let matrix = self
            .deps
            .planner
            .get_distance_matrix(
                DistanceMatrixParams {
                    requests: &requests,
                    after_created_at: Utc::now() - Duration::seconds(settings.distance_validity_sec),
                    tags: MapsTags::new(bundle.service_region_id, bundle.service_date),
                    settings,
                },
                cancel,
            )
            .await?;

        let location_ids: OrderedSet<LocationId> =
            requests.iter().flat_map(|r| r.location_ids().to_vec()).collect();
        let locations = self
            .deps
            .store
            .locations_by_ids(location_ids.as_slice())
            .await
            .context("Failed to load locations for description")?;
        if locations.len() != location_ids.len() {
            return Err(PlanningError::NotAllLocationsFound {
                found: locations.iter().map(|l| l.id).collect(),
                wanted: location_ids.to_vec(),
            }
            .into());
        }

        let unassigned_visits = reconciler.reconcile_unassigned_visits(&bundle.unassigned_visits, &shift_teams);

        let mut description = VrpDescription {
            shift_teams,
            visits,
            rest_breaks: to_vrp_rest_breaks(&rest_breaks),
            locations,
            distance_matrix: matrix.matrix,
            unassigned_visits,
            current_timestamp_sec: now_sec,
        };

        let recoverable_errors =
            Validator::with_defaults(settings.fail_on_recoverable_errors).validate(&mut description)?;

        info!(
            run_id = %self.run_id,
            service_region_id = %bundle.service_region_id,
            distances = description.distance_matrix.len(),
            recoverable_errors = recoverable_errors.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "VRP problem built"
        );

        Ok(VrpProblem {
            run_id: self.run_id,
            description,
            entity_mappings: EntityMappings {
                care_requests: reconciler.care_request_mappings(),
                shift_teams: shift_team_mappings,
            },
            distance_window: matrix.window,
            recoverable_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::actuals::{InMemoryActualsSource, PhaseSnapshot};
    use crate::services::distance_matrix::InMemoryDistanceStore;
    use crate::services::routing::{MapService, MockMapService};
    use crate::types::{
        CareRequestId, Location, LocationPair, RestBreakId, RestBreakRequest, ServiceRegionId,
        ShiftTeamId, ShiftTeamSnapshot, ShiftTeamSnapshotId, UnassignedVisit, VisitPhase,
        VisitSnapshotId,
    };
    use chrono::{DateTime, NaiveDate, TimeZone};

    const NOW: i64 = 1_800_000_000;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(sec, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryDistanceStore>,
        actuals: Arc<InMemoryActualsSource>,
    }

    impl Fixture {
        fn new() -> Self {
            let locations = [1, 2, 101, 102, 103, 104, 150]
                .into_iter()
                .map(|id| Location::new(id, 50_000_000 + id as i32 * 1_000, 14_000_000 + id as i32 * 1_000));
            Self {
                store: Arc::new(InMemoryDistanceStore::with_locations(locations)),
                actuals: Arc::new(InMemoryActualsSource::new()),
            }
        }

        fn record(&self, visit: i64, cr: i64, phase: VisitPhase, team: i64, sec: i64) {
            self.actuals.record(PhaseSnapshot {
                visit_snapshot_id: VisitSnapshotId(visit),
                care_request_id: CareRequestId(cr),
                phase_type_id: PhaseTypeTable::standard().id(phase),
                shift_team_id: Some(ShiftTeamId(team)),
                created_at: at(sec),
            });
        }

        fn builder(&self, bundle: SnapshotBundle, settings: PlanningSettings) -> VrpProblemBuilder {
            let map: Arc<dyn MapService> = Arc::new(MockMapService::new());
            let planner = DistanceMatrixPlanner::new(self.store.clone(), map);
            VrpProblemBuilder::new(
                bundle,
                settings,
                ProblemDeps {
                    store: self.store.clone(),
                    actuals: self.actuals.clone(),
                    planner: Arc::new(planner),
                },
            )
        }
    }

    fn visit(id: i64, location: i64) -> VrpVisit {
        VrpVisit {
            id: VisitSnapshotId(id),
            location_id: LocationId(location),
            arrival_time_window: None,
            service_duration_sec: 1800,
            extra_setup_duration_sec: 0,
            required_attributes: Vec::new(),
        }
    }

    fn team(snapshot: i64, team: i64, depot: i64) -> ShiftTeamSnapshot {
        ShiftTeamSnapshot {
            id: ShiftTeamSnapshotId(snapshot),
            shift_team_id: ShiftTeamId(team),
            base_location_id: LocationId(depot),
            start_timestamp_sec: NOW - 4 * 3600,
            end_timestamp_sec: NOW + 4 * 3600,
            num_app_members: 1,
            num_dhmt_members: 1,
        }
    }

    /// Team 1 finished visit 1 and is on scene at visit 2 with visit 3
    /// committed. Team 2 took a break at location 150. Visit 4 is open; the
    /// previous run left visit 40, an older snapshot of visit 4's care
    /// request, unassigned.
    fn bundle() -> SnapshotBundle {
        SnapshotBundle {
            service_region_id: ServiceRegionId(7),
            service_date: NaiveDate::from_ymd_opt(2027, 1, 15).unwrap(),
            latest_snapshot_time: at(NOW),
            shift_teams: vec![team(21, 1, 1), team(22, 2, 2)],
            shift_team_attributes: Vec::new(),
            visits: vec![visit(1, 101), visit(2, 102), visit(3, 103), visit(4, 104)],
            rest_break_requests: vec![RestBreakRequest {
                id: RestBreakId(9),
                shift_team_id: ShiftTeamId(2),
                start_timestamp_sec: NOW - 1800,
                duration_sec: 900,
                location_id: LocationId(150),
            }],
            unassigned_visits: vec![UnassignedVisit { visit_id: VisitSnapshotId(40), pinned: false }],
        }
    }

    fn seed(fixture: &Fixture) {
        fixture.record(1, 11, VisitPhase::Committed, 1, NOW - 3 * 3600);
        fixture.record(1, 11, VisitPhase::EnRoute, 1, NOW - 3 * 3600 + 60);
        fixture.record(1, 11, VisitPhase::OnScene, 1, NOW - 2 * 3600);
        fixture.record(1, 11, VisitPhase::Completed, 1, NOW - 3600);
        fixture.record(2, 12, VisitPhase::OnScene, 1, NOW - 600);
        fixture.record(3, 13, VisitPhase::Committed, 1, NOW - 300);
        fixture.record(40, 14, VisitPhase::Requested, 1, NOW - 5000);
        fixture.record(4, 14, VisitPhase::Requested, 1, NOW - 100);
    }

    #[tokio::test]
    async fn test_build_assembles_full_description() {
        let fixture = Fixture::new();
        seed(&fixture);
        let settings = PlanningSettings {
            visit_extra_setup_duration_sec: 120,
            ..Default::default()
        };
        let problem = fixture
            .builder(bundle(), settings)
            .build(&CancellationToken::new())
            .await
            .unwrap();
        let desc = &problem.description;

        let team1 = &desc.shift_teams[0];
        let history: Vec<_> = team1.route_history.stops.iter().filter_map(|s| s.stop.visit_id()).collect();
        assert_eq!(history, vec![VisitSnapshotId(1), VisitSnapshotId(2)]);
        assert_eq!(team1.upcoming_commitments.len(), 1);
        assert_eq!(team1.route_history.current_position.unwrap().location_id, LocationId(102));

        // every leg the optimizer may take has a distance
        for (from, to) in [(1, 101), (101, 102), (102, 102), (102, 103), (103, 104), (104, 104), (104, 2), (2, 1)] {
            assert!(desc.distance_matrix.get(LocationPair::new(from, to)).is_some(), "{from}->{to}");
        }
        assert!(desc.visits.iter().all(|v| v.extra_setup_duration_sec == 120));
        assert_eq!(desc.rest_breaks.len(), 1);
        assert_eq!(desc.locations.len(), 7);
        assert_eq!(desc.current_timestamp_sec, NOW);
        assert_eq!(
            desc.unassigned_visits,
            vec![UnassignedVisit { visit_id: VisitSnapshotId(4), pinned: false }]
        );
        assert!(problem.distance_window.is_some());
        assert!(problem.recoverable_errors.is_empty());
        assert_eq!(
            problem.entity_mappings.visits_for_care_request(CareRequestId(14)),
            vec![VisitSnapshotId(4), VisitSnapshotId(40)]
        );
        assert_eq!(
            problem.entity_mappings.shift_team_for_snapshot(ShiftTeamSnapshotId(22)),
            Some(ShiftTeamId(2))
        );
    }

    #[tokio::test]
    async fn test_build_runs_once() {
        let fixture = Fixture::new();
        seed(&fixture);
        let builder = fixture.builder(bundle(), PlanningSettings::default());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(builder.build(&cancel), builder.build(&cancel));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.run_id, builder.run_id());

        let writes = fixture.store.add_calls();
        let c = builder.build(&cancel).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(fixture.store.add_calls(), writes);
    }

    #[tokio::test]
    async fn test_no_shift_teams_is_empty_description() {
        let fixture = Fixture::new();
        let mut empty = bundle();
        empty.shift_teams.clear();

        let err = fixture
            .builder(empty, PlanningSettings::default())
            .build(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::EmptyDescription(ServiceRegionId(7)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_cached() {
        let fixture = Fixture::new();
        seed(&fixture);
        let builder = fixture.builder(bundle(), PlanningSettings::default());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = builder.build(&cancelled).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PlanningError>(), Some(PlanningError::Cancelled)));

        assert!(builder.build(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_completed_without_arrival_is_filled_or_fails_strict() {
        let fixture = Fixture::new();
        // completed with no on-scene transition on record
        fixture.record(1, 11, VisitPhase::Completed, 1, NOW - 3600);

        let mut only_done = bundle();
        only_done.visits = vec![visit(1, 101)];
        only_done.unassigned_visits.clear();

        let problem = fixture
            .builder(only_done.clone(), PlanningSettings::default())
            .build(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(problem.recoverable_errors.len(), 1);
        let stop = problem.description.shift_teams[0].route_history.stops[0];
        assert_eq!(stop.actual_start_timestamp_sec, Some(NOW - 3600));

        let err = fixture
            .builder(only_done, PlanningSettings::strict())
            .build(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::StrictValidation { count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_location_fails_run() {
        let fixture = Fixture::new();
        seed(&fixture);
        let mut bad = bundle();
        bad.visits.push(visit(5, 999));

        let err = fixture
            .builder(bad, PlanningSettings::default())
            .build(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::NotAllLocationsFound { .. })
        ));
    }
}
