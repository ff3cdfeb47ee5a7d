//! Distance matrix planning
//!
//! ```text
//!   (A) route history paths, one per shift team
//!   (B) tails        -> planning stops
//!   (C) tails        -> depots
//!   (D) planning     -> planning
//!   (E) planning     -> depots
//!   (F) depots       -> depots
//! ```
//!
//! A tail is where a shift team's pinned history ends, i.e. where the
//! optimizer may start extending its route.

mod decompose;
mod planner;
mod request;
mod store;

pub use decompose::{decompose_rect, missing_requests};
pub use planner::{DistanceMatrixParams, DistanceMatrixPlanner, DistanceMatrixResult};
pub use request::{DistanceMatrixRequest, OrderedSet, PairSet};
pub use store::{DistanceStore, InMemoryDistanceStore};

use crate::types::LocationId;

/// Standard request set for one planning run
pub fn build_distance_matrix_reqs(
    route_history_paths: Vec<DistanceMatrixRequest>,
    tails: &[LocationId],
    planning: &[LocationId],
    depots: &[LocationId],
) -> Vec<DistanceMatrixRequest> {
    let rect = |from: &[LocationId], to: &[LocationId]| DistanceMatrixRequest::Rect {
        from: from.to_vec(),
        to: to.to_vec(),
    };

    let mut requests = route_history_paths;
    requests.extend([
        rect(tails, planning),
        rect(tails, depots),
        rect(planning, planning),
        rect(planning, depots),
        rect(depots, depots),
    ]);
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocationPair;

    fn ids(raw: &[i64]) -> Vec<LocationId> {
        raw.iter().copied().map(LocationId).collect()
    }

    #[test]
    fn test_reqs_start_with_history_paths() {
        let paths = vec![
            DistanceMatrixRequest::path([1, 10, 11]),
            DistanceMatrixRequest::path([2, 20]),
        ];
        let reqs = build_distance_matrix_reqs(paths.clone(), &ids(&[11, 20]), &ids(&[30, 31]), &ids(&[1, 2]));

        assert_eq!(reqs.len(), 7);
        assert_eq!(&reqs[..2], &paths[..]);
        assert_eq!(reqs[2], DistanceMatrixRequest::rect([11, 20], [30, 31]));
        assert_eq!(reqs[6], DistanceMatrixRequest::rect([1, 2], [1, 2]));
    }

    #[test]
    fn test_reqs_cover_every_leg_the_optimizer_can_take() {
        let reqs = build_distance_matrix_reqs(
            vec![DistanceMatrixRequest::path([1, 10])],
            &ids(&[10]),
            &ids(&[30]),
            &ids(&[1]),
        );
        let all: PairSet = reqs.iter().flat_map(|r| r.pair_set().to_vec()).collect();

        for (from, to) in [(1, 10), (10, 30), (10, 1), (30, 30), (30, 1), (1, 1)] {
            assert!(all.contains(&LocationPair::new(from, to)), "missing {from}->{to}");
        }
        // planning stops never route back into history
        assert!(!all.contains(&LocationPair::new(30, 10)));
    }

    #[test]
    fn test_no_planning_stops_leaves_empty_rects() {
        let reqs = build_distance_matrix_reqs(Vec::new(), &ids(&[5]), &[], &ids(&[1]));
        assert_eq!(reqs.iter().filter(|r| r.is_empty()).count(), 3);
    }
}
