//! Strongly typed identifiers
//!
//! Snapshot ids are ephemeral (one per captured state version); business ids
//! are stable across snapshots. Keeping them as distinct types stops a
//! visit snapshot id from being used where a care request id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }

            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identified geocoordinate
    LocationId
);
id_type!(
    /// One captured version of a visit
    VisitSnapshotId
);
id_type!(
    /// Stable identity behind many visit snapshots
    CareRequestId
);
id_type!(
    /// One captured version of a shift team
    ShiftTeamSnapshotId
);
id_type!(
    /// Stable identity behind many shift team snapshots
    ShiftTeamId
);
id_type!(RestBreakId);
id_type!(
    /// Namespaces persisted distances per map provider
    DistanceSourceId
);
id_type!(PhaseTypeId);
id_type!(ServiceRegionId);

impl VisitSnapshotId {
    /// Feasibility-check visits are synthesized with negative ids and never
    /// persisted, so they have no phase or care request.
    pub const fn is_check_feasibility(self) -> bool {
        self.0 < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_feasibility_visit_ids_are_negative() {
        assert!(VisitSnapshotId(-3).is_check_feasibility());
        assert!(!VisitSnapshotId(0).is_check_feasibility());
        assert!(!VisitSnapshotId(42).is_check_feasibility());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&LocationId(17)).unwrap();
        assert_eq!(json, "17");

        let id: CareRequestId = serde_json::from_str("5").unwrap();
        assert_eq!(id, CareRequestId(5));
        assert_eq!(id.to_string(), "5");
    }

    #[test]
    fn test_zero_id() {
        assert!(LocationId::default().is_zero());
        assert!(!LocationId(1).is_zero());
    }
}
