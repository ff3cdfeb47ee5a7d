//! Rest breaks of a planning run
//!
//! Requested breaks come from the snapshot and are seeded into actuals so
//! the historian can place them in route history. Unrequested breaks are
//! injected for teams that never asked for one, have no location and are
//! left for the optimizer to place.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::services::actuals::Actuals;
use crate::types::{
    RestBreakId, RestBreakRequest, ShiftTeamId, ShiftTeamSnapshot, UnrequestedRestBreakConfig,
    VrpRestBreak,
};

/// Rest break plus the stable id of the team that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestBreak {
    pub basis: VrpRestBreak,
    pub shift_team_id: ShiftTeamId,
}

impl RestBreak {
    pub fn id(&self) -> RestBreakId {
        self.basis.id
    }

    pub fn is_unrequested(&self) -> bool {
        self.basis.unrequested
    }
}

pub(crate) fn from_unix(sec: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(sec, 0)
}

/// Whether a break of `duration_sec` still fits into the rest of the shift
pub fn should_add_unrequested(now_sec: i64, shift: &ShiftTeamSnapshot, duration_sec: i64) -> bool {
    now_sec.max(shift.start_timestamp_sec) < shift.end_timestamp_sec - duration_sec
}

/// Resolves rest break requests against the run's shift team snapshots.
///
/// Requests for shift teams not in the run are dropped. Unrequested breaks
/// get the negated shift team snapshot id, so they never collide with a
/// requested break id.
pub fn rest_breaks_for_requests(
    requests: &[RestBreakRequest],
    shift_teams: &[ShiftTeamSnapshot],
    unrequested: &UnrequestedRestBreakConfig,
    now_sec: i64,
) -> Vec<RestBreak> {
    let mut snapshots: HashMap<ShiftTeamId, &ShiftTeamSnapshot> = HashMap::new();
    for snapshot in shift_teams {
        match snapshots.get(&snapshot.shift_team_id) {
            Some(existing) if existing.id > snapshot.id => {}
            _ => {
                snapshots.insert(snapshot.shift_team_id, snapshot);
            }
        }
    }

    let mut rest_breaks = Vec::with_capacity(requests.len());
    let mut requested_teams = HashSet::new();
    for request in requests {
        let Some(snapshot) = snapshots.get(&request.shift_team_id) else {
            warn!(
                rest_break_id = %request.id,
                shift_team_id = %request.shift_team_id,
                "Rest break request for a shift team outside this run, skipping"
            );
            continue;
        };
        requested_teams.insert(request.shift_team_id);
        rest_breaks.push(RestBreak {
            basis: VrpRestBreak {
                id: request.id,
                shift_team_id: snapshot.id,
                location_id: Some(request.location_id),
                start_timestamp_sec: Some(request.start_timestamp_sec),
                duration_sec: request.duration_sec,
                unrequested: false,
            },
            shift_team_id: request.shift_team_id,
        });
    }

    if unrequested.include {
        for snapshot in shift_teams {
            if requested_teams.contains(&snapshot.shift_team_id)
                || snapshots.get(&snapshot.shift_team_id).map(|s| s.id) != Some(snapshot.id)
            {
                continue;
            }
            if !should_add_unrequested(now_sec, snapshot, unrequested.duration_sec) {
                debug!(
                    shift_team_id = %snapshot.shift_team_id,
                    "No room left in shift for an unrequested rest break"
                );
                continue;
            }
            rest_breaks.push(RestBreak {
                basis: VrpRestBreak {
                    id: RestBreakId(-snapshot.id.get()),
                    shift_team_id: snapshot.id,
                    location_id: None,
                    start_timestamp_sec: None,
                    duration_sec: unrequested.duration_sec,
                    unrequested: true,
                },
                shift_team_id: snapshot.shift_team_id,
            });
        }
    }

    rest_breaks
}

/// Actuals implied by a requested break: started at its start time, done
/// once its full duration lies before the latest snapshot. Breaks without a
/// start time get empty actuals.
pub fn rest_break_actuals(rest_break: &RestBreak, latest_snapshot_time: DateTime<Utc>) -> Actuals {
    let mut actuals = Actuals::default();
    let start = rest_break.basis.start_timestamp_sec.unwrap_or_default();
    if start == 0 {
        return actuals;
    }
    actuals.arrival = from_unix(start);
    let end = start
        .checked_add(rest_break.basis.duration_sec)
        .and_then(from_unix);
    if let Some(end) = end {
        if end <= latest_snapshot_time {
            actuals.completion = Some(end);
        }
    }
    actuals
}

pub fn to_vrp_rest_breaks(rest_breaks: &[RestBreak]) -> Vec<VrpRestBreak> {
    rest_breaks.iter().map(|rb| rb.basis.clone()).collect()
}
