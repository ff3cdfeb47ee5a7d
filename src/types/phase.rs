//! Visit phases and the phase type table

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PhaseTypeId;
use crate::error::PlanningError;

/// Lifecycle phase of a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitPhase {
    Requested,
    Uncommitted,
    Committed,
    EnRoute,
    OnScene,
    Completed,
    Cancelled,
}

impl VisitPhase {
    pub const ALL: [VisitPhase; 7] = [
        VisitPhase::Requested,
        VisitPhase::Uncommitted,
        VisitPhase::Committed,
        VisitPhase::EnRoute,
        VisitPhase::OnScene,
        VisitPhase::Completed,
        VisitPhase::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            VisitPhase::Requested => "requested",
            VisitPhase::Uncommitted => "uncommitted",
            VisitPhase::Committed => "committed",
            VisitPhase::EnRoute => "en_route",
            VisitPhase::OnScene => "on_scene",
            VisitPhase::Completed => "completed",
            VisitPhase::Cancelled => "cancelled",
        }
    }

    /// Pinned phases are fixed to a shift team and not open to re-planning.
    pub const fn is_pinned(self) -> bool {
        match self {
            VisitPhase::Requested | VisitPhase::Uncommitted | VisitPhase::Cancelled => false,
            VisitPhase::Committed
            | VisitPhase::EnRoute
            | VisitPhase::OnScene
            | VisitPhase::Completed => true,
        }
    }
}

impl FromStr for VisitPhase {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VisitPhase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PlanningError::UnknownVisitPhase(s.to_string()))
    }
}

impl std::fmt::Display for VisitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the `visit_phase_types` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTypeRow {
    pub id: PhaseTypeId,
    pub short_name: String,
}

/// Immutable mapping between stored phase type ids and [`VisitPhase`].
///
/// Built once per run from storage and handed to whoever needs to translate
/// ids, so nothing depends on process-wide lookup state.
#[derive(Debug, Clone)]
pub struct PhaseTypeTable {
    by_id: HashMap<PhaseTypeId, VisitPhase>,
    by_phase: HashMap<VisitPhase, PhaseTypeId>,
}

impl PhaseTypeTable {
    /// Every known phase must be present exactly once; unknown names fail.
    pub fn from_rows(rows: &[PhaseTypeRow]) -> Result<Self, PlanningError> {
        let mut by_id = HashMap::with_capacity(rows.len());
        let mut by_phase = HashMap::with_capacity(rows.len());
        for row in rows {
            let phase: VisitPhase = row.short_name.parse()?;
            by_id.insert(row.id, phase);
            by_phase.insert(phase, row.id);
        }
        for phase in VisitPhase::ALL {
            if !by_phase.contains_key(&phase) {
                return Err(PlanningError::MissingPhaseType(phase.as_str()));
            }
        }
        Ok(Self { by_id, by_phase })
    }

    /// Ids 1..=7 in declaration order, matching the seed migration.
    pub fn standard() -> Self {
        let mut by_id = HashMap::new();
        let mut by_phase = HashMap::new();
        for (i, phase) in VisitPhase::ALL.into_iter().enumerate() {
            let id = PhaseTypeId(i as i64 + 1);
            by_id.insert(id, phase);
            by_phase.insert(phase, id);
        }
        Self { by_id, by_phase }
    }

    pub fn phase(&self, id: PhaseTypeId) -> Result<VisitPhase, PlanningError> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or(PlanningError::UnknownPhaseTypeId(id))
    }

    pub fn id(&self, phase: VisitPhase) -> PhaseTypeId {
        // from_rows and standard both guarantee every phase is present
        self.by_phase[&phase]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(names: &[(i64, &str)]) -> Vec<PhaseTypeRow> {
        names
            .iter()
            .map(|(id, name)| PhaseTypeRow {
                id: PhaseTypeId(*id),
                short_name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_phase_round_trips_through_short_name() {
        for phase in VisitPhase::ALL {
            assert_eq!(phase.as_str().parse::<VisitPhase>().unwrap(), phase);
        }
        assert!("parked".parse::<VisitPhase>().is_err());
    }

    #[test]
    fn test_pinned_phases() {
        assert!(VisitPhase::Committed.is_pinned());
        assert!(VisitPhase::EnRoute.is_pinned());
        assert!(VisitPhase::OnScene.is_pinned());
        assert!(VisitPhase::Completed.is_pinned());
        assert!(!VisitPhase::Requested.is_pinned());
        assert!(!VisitPhase::Uncommitted.is_pinned());
        assert!(!VisitPhase::Cancelled.is_pinned());
    }

    #[test]
    fn test_table_from_rows_with_custom_ids() {
        let table = PhaseTypeTable::from_rows(&rows(&[
            (10, "requested"),
            (11, "uncommitted"),
            (12, "committed"),
            (13, "en_route"),
            (14, "on_scene"),
            (15, "completed"),
            (16, "cancelled"),
        ]))
        .unwrap();

        assert_eq!(table.phase(PhaseTypeId(13)).unwrap(), VisitPhase::EnRoute);
        assert_eq!(table.id(VisitPhase::Completed), PhaseTypeId(15));
        assert!(matches!(
            table.phase(PhaseTypeId(99)),
            Err(PlanningError::UnknownPhaseTypeId(PhaseTypeId(99)))
        ));
    }

    #[test]
    fn test_table_rejects_missing_phase() {
        let err = PhaseTypeTable::from_rows(&rows(&[(1, "requested")])).unwrap_err();
        assert!(matches!(err, PlanningError::MissingPhaseType("uncommitted")));
    }

    #[test]
    fn test_table_rejects_unknown_name() {
        let err = PhaseTypeTable::from_rows(&rows(&[(1, "teleported")])).unwrap_err();
        assert!(matches!(err, PlanningError::UnknownVisitPhase(_)));
    }

    #[test]
    fn test_standard_table() {
        let table = PhaseTypeTable::standard();
        assert_eq!(table.id(VisitPhase::Requested), PhaseTypeId(1));
        assert_eq!(table.phase(PhaseTypeId(4)).unwrap(), VisitPhase::EnRoute);
    }
}
