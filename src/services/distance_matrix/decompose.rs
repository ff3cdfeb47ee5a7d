//! Rectangle decomposition of missing location pairs
//!
//! ```text
//! Missing matrix (1 = missing, 0 = has)
//!
//!      T1 T2 T3 T4                      fT      nfT
//!   F1| 1  1  1  0                    T1 T3   T2 T4
//!   F2| 1  0  1  1      reorder   F3 | a  a    a  a    fF
//!   F3| 1  1  1  1      ------>   F1 | b  b    .  .
//!                                 F2 | b  b    .  .    nfF
//! ```
//!
//! Full rows (`fF`) are requested against every `to` (block a), the other
//! rows against full columns (block b). The leftover block (`.`) is worked
//! on again until no row or column is full, and is then requested whole.

use std::collections::HashSet;

use super::request::{DistanceMatrixRequest, OrderedSet, PairSet};
use crate::types::{LocationId, LocationPair};

/// Requests that cover the pairs of `want` not already in `has`.
///
/// A path with anything missing is re-requested whole: a path call is a
/// single provider round trip no matter how many legs it has.
pub fn missing_requests(
    want: &PairSet,
    has: &HashSet<LocationPair>,
    source: &DistanceMatrixRequest,
) -> Vec<DistanceMatrixRequest> {
    let mut missing = want.clone();
    missing.retain(|pair| !has.contains(pair));
    if missing.is_empty() {
        return Vec::new();
    }

    match source {
        DistanceMatrixRequest::Path(_) => vec![source.clone()],
        DistanceMatrixRequest::Rect { .. } => decompose_rect(missing),
    }
}

/// Covers `missing` with rectangles. Every emitted pair is drawn from the
/// `from` and `to` values of `missing`; the final block may include pairs
/// that are already known.
pub fn decompose_rect(mut missing: PairSet) -> Vec<DistanceMatrixRequest> {
    let mut requests = Vec::new();

    while !missing.is_empty() {
        let mut froms = OrderedSet::<LocationId>::default();
        let mut tos = OrderedSet::<LocationId>::default();
        let mut from_counts = std::collections::HashMap::<LocationId, usize>::new();
        let mut to_counts = std::collections::HashMap::<LocationId, usize>::new();
        for pair in missing.iter() {
            froms.insert(pair.from);
            tos.insert(pair.to);
            *from_counts.entry(pair.from).or_default() += 1;
            *to_counts.entry(pair.to).or_default() += 1;
        }

        let (full_froms, non_full_froms): (Vec<_>, Vec<_>) = froms
            .iter()
            .copied()
            .partition(|id| from_counts[id] == tos.len());
        let full_tos: Vec<_> = tos
            .iter()
            .copied()
            .filter(|id| to_counts[id] == froms.len())
            .collect();

        let mut emitted = Vec::with_capacity(2);
        if !full_froms.is_empty() {
            emitted.push(DistanceMatrixRequest::Rect {
                from: full_froms,
                to: tos.to_vec(),
            });
        }
        if !full_tos.is_empty() && !non_full_froms.is_empty() {
            emitted.push(DistanceMatrixRequest::Rect {
                from: non_full_froms,
                to: full_tos,
            });
        }

        if emitted.is_empty() {
            requests.push(DistanceMatrixRequest::Rect {
                from: froms.to_vec(),
                to: tos.to_vec(),
            });
            break;
        }

        let covered: HashSet<LocationPair> = emitted
            .iter()
            .flat_map(|req| req.pair_set().to_vec())
            .collect();
        missing.retain(|pair| !covered.contains(pair));
        requests.extend(emitted);
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rect(from: &[i64], to: &[i64]) -> DistanceMatrixRequest {
        DistanceMatrixRequest::rect(from.iter().copied(), to.iter().copied())
    }

    fn has(pairs: &[(i64, i64)]) -> HashSet<LocationPair> {
        pairs.iter().map(|(f, t)| LocationPair::new(*f, *t)).collect()
    }

    fn run(src: &DistanceMatrixRequest, has_pairs: &[(i64, i64)]) -> Vec<DistanceMatrixRequest> {
        missing_requests(&src.pair_set(), &has(has_pairs), src)
    }

    #[test]
    fn test_has_nothing_returns_same_rect() {
        let src = rect(&[1, 2, 3], &[1, 2, 3]);
        assert_eq!(run(&src, &[]), vec![src.clone()]);
    }

    #[test]
    fn test_has_everything_returns_nothing() {
        let src = rect(&[1, 2], &[1, 2]);
        assert!(run(&src, &[(1, 1), (1, 2), (2, 1), (2, 2)]).is_empty());
    }

    #[test]
    fn test_2x2_missing_single_corner() {
        let src = rect(&[1, 2], &[1, 2]);
        assert_eq!(run(&src, &[(1, 1), (1, 2), (2, 1)]), vec![rect(&[2], &[2])]);
    }

    #[test]
    fn test_3x3_missing_only_3_3() {
        let src = rect(&[1, 2, 3], &[1, 2, 3]);
        let has_pairs = [(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3), (3, 1), (3, 2)];
        assert_eq!(run(&src, &has_pairs), vec![rect(&[3], &[3])]);
    }

    #[test]
    fn test_3x3_missing_first_row_and_column() {
        let src = rect(&[1, 2, 3], &[1, 2, 3]);
        let has_pairs = [(2, 2), (2, 3), (3, 2), (3, 3)];
        assert_eq!(
            run(&src, &has_pairs),
            vec![rect(&[1], &[1, 2, 3]), rect(&[2, 3], &[1])]
        );
    }

    #[test]
    fn test_3x3_has_only_diagonal_tail() {
        let src = rect(&[1, 2, 3], &[1, 2, 3]);
        assert_eq!(
            run(&src, &[(2, 2), (3, 3)]),
            vec![
                rect(&[1], &[1, 2, 3]),
                rect(&[2, 3], &[1]),
                // to-order follows first appearance among the leftover pairs
                rect(&[2, 3], &[3, 2]),
            ]
        );
    }

    #[test]
    fn test_path_with_any_missing_pair_is_requested_whole() {
        let src = DistanceMatrixRequest::path([1, 2, 3, 4]);
        assert_eq!(run(&src, &[(1, 2), (3, 4)]), vec![src.clone()]);
        assert!(run(&src, &[(1, 2), (2, 3), (3, 4)]).is_empty());
    }

    fn covered_pairs(reqs: &[DistanceMatrixRequest]) -> HashSet<LocationPair> {
        reqs.iter().flat_map(|r| r.pair_set().to_vec()).collect()
    }

    prop_compose! {
        fn rect_and_has()(
            from in prop::collection::vec(1i64..8, 1..6),
            to in prop::collection::vec(1i64..8, 1..6),
            seed in prop::collection::vec(any::<bool>(), 36),
        ) -> (DistanceMatrixRequest, Vec<(i64, i64)>) {
            let src = DistanceMatrixRequest::rect(from.iter().copied(), to.iter().copied());
            let has_pairs = src
                .pair_set()
                .iter()
                .zip(seed.iter())
                .filter(|(_, keep)| **keep)
                .map(|(p, _)| (p.from.get(), p.to.get()))
                .collect();
            (src, has_pairs)
        }
    }

    proptest! {
        #[test]
        fn prop_decomposition_covers_every_missing_pair((src, has_pairs) in rect_and_has()) {
            let has_set = has(&has_pairs);
            let reqs = missing_requests(&src.pair_set(), &has_set, &src);
            let covered = covered_pairs(&reqs);
            let want = src.pair_set();

            for pair in want.iter() {
                if !has_set.contains(pair) {
                    prop_assert!(covered.contains(pair), "missing pair {:?} not covered", pair);
                }
            }
            // nothing outside the source rectangle is ever requested
            for pair in &covered {
                prop_assert!(want.contains(pair));
            }
        }

        #[test]
        fn prop_nothing_requested_when_nothing_missing(
            from in prop::collection::vec(1i64..6, 1..5),
            to in prop::collection::vec(1i64..6, 1..5),
        ) {
            let src = DistanceMatrixRequest::rect(from, to);
            let all: HashSet<_> = src.pair_set().iter().copied().collect();
            prop_assert!(missing_requests(&src.pair_set(), &all, &src).is_empty());
        }
    }
}
