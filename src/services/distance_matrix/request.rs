//! Distance matrix requests and insertion-ordered sets

use std::collections::HashSet;
use std::hash::Hash;

use crate::types::{LocationId, LocationPair};

/// Set that iterates in first-insertion order.
///
/// Request shapes depend on iteration order, so plain `HashSet` iteration
/// would make emitted requests nondeterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedSet<T: Eq + Hash + Copy> {
    items: Vec<T>,
    index: HashSet<T>,
}

impl<T: Eq + Hash + Copy> Default for OrderedSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash + Copy> OrderedSet<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            index: HashSet::with_capacity(capacity),
        }
    }

    /// Returns false if already present
    pub fn insert(&mut self, item: T) -> bool {
        if self.index.insert(item) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let index = &mut self.index;
        self.items.retain(|item| {
            let kept = keep(item);
            if !kept {
                index.remove(item);
            }
            kept
        });
    }
}

impl<T: Eq + Hash + Copy> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

impl<T: Eq + Hash + Copy> Extend<T> for OrderedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

pub type PairSet = OrderedSet<LocationPair>;

/// A group of wanted location pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistanceMatrixRequest {
    /// Ordered chain; only consecutive pairs are wanted
    Path(Vec<LocationId>),
    /// Full cross product of two id lists
    Rect {
        from: Vec<LocationId>,
        to: Vec<LocationId>,
    },
}

impl DistanceMatrixRequest {
    pub fn path(ids: impl IntoIterator<Item = impl Into<LocationId>>) -> Self {
        DistanceMatrixRequest::Path(ids.into_iter().map(Into::into).collect())
    }

    pub fn rect(
        from: impl IntoIterator<Item = impl Into<LocationId>>,
        to: impl IntoIterator<Item = impl Into<LocationId>>,
    ) -> Self {
        DistanceMatrixRequest::Rect {
            from: from.into_iter().map(Into::into).collect(),
            to: to.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DistanceMatrixRequest::Path(ids) => ids.len() <= 1,
            DistanceMatrixRequest::Rect { from, to } => from.is_empty() || to.is_empty(),
        }
    }

    /// Wanted pairs, in request order
    pub fn pair_set(&self) -> PairSet {
        match self {
            DistanceMatrixRequest::Path(ids) => ids
                .windows(2)
                .map(|w| LocationPair { from: w[0], to: w[1] })
                .collect(),
            DistanceMatrixRequest::Rect { from, to } => {
                let mut pairs = PairSet::with_capacity(from.len() * to.len());
                for &f in from {
                    for &t in to {
                        pairs.insert(LocationPair { from: f, to: t });
                    }
                }
                pairs
            }
        }
    }

    /// Every referenced location id, first-seen order
    pub fn location_ids(&self) -> OrderedSet<LocationId> {
        match self {
            DistanceMatrixRequest::Path(ids) => ids.iter().copied().collect(),
            DistanceMatrixRequest::Rect { from, to } => {
                from.iter().chain(to.iter()).copied().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_pairs_are_consecutive() {
        let req = DistanceMatrixRequest::path([1, 2, 3, 2]);
        let pairs: Vec<_> = req.pair_set().to_vec();
        assert_eq!(
            pairs,
            vec![
                LocationPair::new(1, 2),
                LocationPair::new(2, 3),
                LocationPair::new(3, 2),
            ]
        );
    }

    #[test]
    fn test_short_path_is_empty() {
        assert!(DistanceMatrixRequest::path([7]).is_empty());
        assert!(DistanceMatrixRequest::path(Vec::<i64>::new()).is_empty());
        assert!(DistanceMatrixRequest::path([7]).pair_set().is_empty());
        assert!(!DistanceMatrixRequest::path([7, 7]).is_empty());
    }

    #[test]
    fn test_rect_is_cross_product() {
        let req = DistanceMatrixRequest::rect([1, 2], [3, 4, 5]);
        let pairs = req.pair_set();
        assert_eq!(pairs.len(), 6);
        assert_eq!(pairs.as_slice()[0], LocationPair::new(1, 3));
        assert_eq!(pairs.as_slice()[5], LocationPair::new(2, 5));
    }

    #[test]
    fn test_rect_with_empty_side_is_empty() {
        assert!(DistanceMatrixRequest::rect(Vec::<i64>::new(), [1]).is_empty());
        assert!(DistanceMatrixRequest::rect([1], Vec::<i64>::new()).is_empty());
    }

    #[test]
    fn test_ordered_set_keeps_first_insertion_order() {
        let mut set: OrderedSet<i64> = [3, 1, 3, 2, 1].into_iter().collect();
        assert_eq!(set.to_vec(), vec![3, 1, 2]);
        assert!(!set.insert(2));

        set.retain(|v| *v != 1);
        assert_eq!(set.to_vec(), vec![3, 2]);
        assert!(!set.contains(&1));
        assert!(set.insert(1));
        assert_eq!(set.to_vec(), vec![3, 2, 1]);
    }

    #[test]
    fn test_location_ids_dedup() {
        let req = DistanceMatrixRequest::rect([1, 2], [2, 3]);
        let ids: Vec<i64> = req.location_ids().iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
