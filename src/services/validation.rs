//! Data-quality checks on an assembled description
//!
//! Validators never fail a run by themselves. They fix what they can in
//! place and report every anomaly as a [`RecoverableError`]; only strict
//! mode turns a non-empty report into a failure.

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PlanningError;
use crate::types::{RouteStop, ShiftTeamSnapshotId, Stop, StopRef, VrpDescription};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoverableError {
    #[error("{stop} on shift team snapshot {shift_team_id} completed without an arrival, filled from completion")]
    MissingArrival {
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
        completion_timestamp_sec: i64,
    },

    #[error("{stop} on shift team snapshot {shift_team_id} starts at {start_timestamp_sec} after completing at {completion_timestamp_sec}")]
    StartAfterCompletion {
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
        start_timestamp_sec: i64,
        completion_timestamp_sec: i64,
    },

    #[error("shift team snapshot {shift_team_id} has {count} en route stops")]
    MultipleEnRouteStops {
        shift_team_id: ShiftTeamSnapshotId,
        count: usize,
    },

    #[error("en route {stop} is not the last route history stop of shift team snapshot {shift_team_id}")]
    EnRouteStopNotLast {
        shift_team_id: ShiftTeamSnapshotId,
        stop: StopRef,
    },
}

impl RecoverableError {
    pub fn shift_team_id(&self) -> ShiftTeamSnapshotId {
        match self {
            RecoverableError::MissingArrival { shift_team_id, .. }
            | RecoverableError::StartAfterCompletion { shift_team_id, .. }
            | RecoverableError::MultipleEnRouteStops { shift_team_id, .. }
            | RecoverableError::EnRouteStopNotLast { shift_team_id, .. } => *shift_team_id,
        }
    }

    fn stop(&self) -> Option<StopRef> {
        match self {
            RecoverableError::MissingArrival { stop, .. }
            | RecoverableError::StartAfterCompletion { stop, .. }
            | RecoverableError::EnRouteStopNotLast { stop, .. } => Some(*stop),
            RecoverableError::MultipleEnRouteStops { .. } => None,
        }
    }

    fn log(&self, validator: &str) {
        let stop = self.stop();
        let visit_id = match stop {
            Some(StopRef::Visit(id) | StopRef::Commitment(id)) => Some(id.get()),
            _ => None,
        };
        let rest_break_id = match stop {
            Some(StopRef::RestBreak(id)) => Some(id.get()),
            _ => None,
        };
        warn!(
            validator,
            shift_team_id = self.shift_team_id().get(),
            visit_id,
            rest_break_id,
            "{}",
            self
        );
    }
}

/// One pass over a description
pub trait ProblemValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, description: &mut VrpDescription) -> Vec<RecoverableError>;
}

fn set_start(stop: &mut RouteStop, timestamp_sec: i64) {
    stop.actual_start_timestamp_sec = Some(timestamp_sec);
    match &mut stop.stop {
        Stop::Visit(visit) => visit.arrival_timestamp_sec = Some(timestamp_sec),
        Stop::RestBreak(rest_break) => rest_break.start_timestamp_sec = Some(timestamp_sec),
    }
}

/// A completion implies an arrival; fills the arrival from the completion
pub struct ArrivalForwardFill;

impl ProblemValidator for ArrivalForwardFill {
    fn name(&self) -> &'static str {
        "arrival_forward_fill"
    }

    fn validate(&self, description: &mut VrpDescription) -> Vec<RecoverableError> {
        let mut errors = Vec::new();
        for shift_team in &mut description.shift_teams {
            for stop in &mut shift_team.route_history.stops {
                let (None, Some(completion)) = (stop.actual_start_timestamp_sec, stop.actual_completion_timestamp_sec)
                else {
                    continue;
                };
                set_start(stop, completion);
                errors.push(RecoverableError::MissingArrival {
                    shift_team_id: shift_team.id,
                    stop: stop.stop.stop_ref(),
                    completion_timestamp_sec: completion,
                });
            }
        }
        errors
    }
}

/// Pulls a start that lies after its completion back to the completion
pub struct StartAfterCompletion;

impl ProblemValidator for StartAfterCompletion {
    fn name(&self) -> &'static str {
        "start_after_completion"
    }

    fn validate(&self, description: &mut VrpDescription) -> Vec<RecoverableError> {
        let mut errors = Vec::new();
        for shift_team in &mut description.shift_teams {
            for stop in &mut shift_team.route_history.stops {
                let (Some(start), Some(completion)) = (stop.actual_start_timestamp_sec, stop.actual_completion_timestamp_sec)
                else {
                    continue;
                };
                if start <= completion {
                    continue;
                }
                set_start(stop, completion);
                errors.push(RecoverableError::StartAfterCompletion {
                    shift_team_id: shift_team.id,
                    stop: stop.stop.stop_ref(),
                    start_timestamp_sec: start,
                    completion_timestamp_sec: completion,
                });
            }
        }
        errors
    }
}

/// At most one en-route stop, and only as the last history stop. Reported
/// only: there is no safe correction.
pub struct EnRouteStops;

impl ProblemValidator for EnRouteStops {
    fn name(&self) -> &'static str {
        "en_route_stops"
    }

    fn validate(&self, description: &mut VrpDescription) -> Vec<RecoverableError> {
        let mut errors = Vec::new();
        for shift_team in &description.shift_teams {
            let stops = &shift_team.route_history.stops;
            let en_route: Vec<(usize, &RouteStop)> =
                stops.iter().enumerate().filter(|(_, s)| s.is_en_route()).collect();

            if en_route.len() > 1 {
                errors.push(RecoverableError::MultipleEnRouteStops {
                    shift_team_id: shift_team.id,
                    count: en_route.len(),
                });
            }
            for (i, stop) in en_route {
                if i + 1 != stops.len() {
                    errors.push(RecoverableError::EnRouteStopNotLast {
                        shift_team_id: shift_team.id,
                        stop: stop.stop.stop_ref(),
                    });
                }
            }
        }
        errors
    }
}

/// Fill first, so filled stops are no longer seen as en route
pub fn default_validators() -> Vec<Box<dyn ProblemValidator>> {
    vec![
        Box::new(ArrivalForwardFill),
        Box::new(StartAfterCompletion),
        Box::new(EnRouteStops),
    ]
}

pub struct Validator {
    validators: Vec<Box<dyn ProblemValidator>>,
    fail_on_recoverable: bool,
}

impl Validator {
    pub fn new(validators: Vec<Box<dyn ProblemValidator>>, fail_on_recoverable: bool) -> Self {
        Self {
            validators,
            fail_on_recoverable,
        }
    }

    pub fn with_defaults(fail_on_recoverable: bool) -> Self {
        Self::new(default_validators(), fail_on_recoverable)
    }

    /// Runs every validator in order and returns the combined report
    pub fn validate(&self, description: &mut VrpDescription) -> Result<Vec<RecoverableError>, PlanningError> {
        let mut report = Vec::new();
        for validator in &self.validators {
            let errors = validator.validate(description);
            debug!(validator = validator.name(), errors = errors.len(), "Validator finished");
            for error in &errors {
                error.log(validator.name());
            }
            report.extend(errors);
        }

        if self.fail_on_recoverable {
            if let Some(first) = report.first() {
                return Err(PlanningError::StrictValidation {
                    count: report.len(),
                    first: first.to_string(),
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        LocationId, RestBreakId, RestBreakStop, RouteHistory, VisitSnapshotId, VisitStop,
        VrpShiftTeam, VrpTimeWindow,
    };
    use tokio_test::{assert_err, assert_ok};

    fn visit_stop(id: i64, start: Option<i64>, completion: Option<i64>) -> RouteStop {
        RouteStop {
            stop: Stop::Visit(VisitStop {
                visit_id: VisitSnapshotId(id),
                arrival_timestamp_sec: start,
            }),
            pinned: true,
            actual_start_timestamp_sec: start,
            actual_completion_timestamp_sec: completion,
        }
    }

    fn description(stops: Vec<RouteStop>) -> VrpDescription {
        VrpDescription {
            shift_teams: vec![VrpShiftTeam {
                id: ShiftTeamSnapshotId(3),
                depot_location_id: LocationId(1),
                available_time_window: VrpTimeWindow {
                    start_timestamp_sec: 0,
                    end_timestamp_sec: 10_000,
                },
                attributes: Vec::new(),
                route_history: RouteHistory {
                    stops,
                    current_position: None,
                },
                upcoming_commitments: Vec::new(),
                num_app_members: 1,
                num_dhmt_members: 1,
            }],
            ..Default::default()
        }
    }

    fn stops(desc: &VrpDescription) -> &[RouteStop] {
        &desc.shift_teams[0].route_history.stops
    }

    #[test]
    fn test_forward_fill_missing_arrival() {
        let mut desc = description(vec![visit_stop(1, None, Some(500))]);
        let errors = ArrivalForwardFill.validate(&mut desc);

        assert_eq!(
            errors,
            vec![RecoverableError::MissingArrival {
                shift_team_id: ShiftTeamSnapshotId(3),
                stop: StopRef::Visit(VisitSnapshotId(1)),
                completion_timestamp_sec: 500,
            }]
        );
        assert_eq!(stops(&desc)[0].actual_start_timestamp_sec, Some(500));
        assert_eq!(stops(&desc)[0], visit_stop(1, Some(500), Some(500)));
    }

    #[test]
    fn test_forward_fill_updates_rest_break_start() {
        let mut desc = description(vec![RouteStop {
            stop: Stop::RestBreak(RestBreakStop {
                rest_break_id: RestBreakId(4),
                start_timestamp_sec: None,
            }),
            pinned: true,
            actual_start_timestamp_sec: None,
            actual_completion_timestamp_sec: Some(700),
        }]);
        ArrivalForwardFill.validate(&mut desc);
        assert!(matches!(
            stops(&desc)[0].stop,
            Stop::RestBreak(RestBreakStop { start_timestamp_sec: Some(700), .. })
        ));
    }

    #[test]
    fn test_start_after_completion_is_corrected() {
        let mut desc = description(vec![visit_stop(1, Some(900), Some(600)), visit_stop(2, Some(1000), Some(1200))]);
        let errors = StartAfterCompletion.validate(&mut desc);
        assert_eq!(errors.len(), 1);
        assert_eq!(stops(&desc)[0].actual_start_timestamp_sec, Some(600));
        assert_eq!(stops(&desc)[1].actual_start_timestamp_sec, Some(1000));
    }

    #[test]
    fn test_en_route_checks() {
        let mut ok = description(vec![visit_stop(1, Some(100), Some(200)), visit_stop(2, None, None)]);
        assert!(EnRouteStops.validate(&mut ok).is_empty());

        let mut bad = description(vec![visit_stop(1, None, None), visit_stop(2, None, None)]);
        let errors = EnRouteStops.validate(&mut bad);
        assert_eq!(
            errors,
            vec![
                RecoverableError::MultipleEnRouteStops {
                    shift_team_id: ShiftTeamSnapshotId(3),
                    count: 2,
                },
                RecoverableError::EnRouteStopNotLast {
                    shift_team_id: ShiftTeamSnapshotId(3),
                    stop: StopRef::Visit(VisitSnapshotId(1)),
                },
            ]
        );
        // reported, not changed
        assert_eq!(stops(&bad)[0], visit_stop(1, None, None));
    }

    #[test]
    fn test_fill_runs_before_en_route_check() {
        let mut desc = description(vec![visit_stop(1, None, Some(100)), visit_stop(2, None, None)]);
        let report = assert_ok!(Validator::with_defaults(false).validate(&mut desc));
        assert_eq!(report.len(), 1);
        assert!(matches!(report[0], RecoverableError::MissingArrival { .. }));
    }

    #[test]
    fn test_strict_mode_fails_on_any_anomaly() {
        let mut desc = description(vec![visit_stop(1, None, Some(100))]);
        let err = assert_err!(Validator::with_defaults(true).validate(&mut desc));
        assert!(matches!(err, PlanningError::StrictValidation { count: 1, .. }));
        // corrections are still applied
        assert_eq!(stops(&desc)[0].actual_start_timestamp_sec, Some(100));
    }

    #[test]
    fn test_clean_description_passes_strict_mode() {
        let mut desc = description(vec![visit_stop(1, Some(100), Some(200))]);
        let report = assert_ok!(Validator::with_defaults(true).validate(&mut desc));
        assert!(report.is_empty());
    }
}
