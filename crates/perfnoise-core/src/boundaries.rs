use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("boundary set is empty")]
    Empty,
    #[error("boundary set must start at 0, starts at {0}")]
    BadStart(usize),
    #[error("boundary set must end at push count {expected}, ends at {actual}")]
    BadEnd { expected: usize, actual: usize },
    #[error("boundary set is not strictly increasing at position {0}")]
    NotIncreasing(usize),
}

/// Push indices separating segments. Always starts at 0, ends at the push
/// count and is strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentBoundarySet(Vec<usize>);

impl SegmentBoundarySet {
    /// Validates boundaries produced elsewhere against `push_count`.
    pub fn new(boundaries: Vec<usize>, push_count: usize) -> Result<Self, BoundaryError> {
        let Some(&first) = boundaries.first() else {
            return Err(BoundaryError::Empty);
        };
        if first != 0 {
            return Err(BoundaryError::BadStart(first));
        }
        if let Some(position) = boundaries
            .windows(2)
            .position(|pair| pair[0] >= pair[1])
        {
            return Err(BoundaryError::NotIncreasing(position + 1));
        }
        let last = boundaries[boundaries.len() - 1];
        if last != push_count {
            return Err(BoundaryError::BadEnd {
                expected: push_count,
                actual: last,
            });
        }

        Ok(Self(boundaries))
    }

    /// Builds `{0} ∪ indices ∪ {push_count}`, sorted and deduplicated.
    /// Indices beyond `push_count` are dropped.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>, push_count: usize) -> Self {
        let mut set: BTreeSet<usize> = indices
            .into_iter()
            .filter(|index| *index <= push_count)
            .collect();
        set.insert(0);
        set.insert(push_count);
        Self(set.into_iter().collect())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.binary_search(&index).is_ok()
    }

    /// `[start, end)` of the final segment, if any segment exists.
    pub fn last_segment(&self) -> Option<(usize, usize)> {
        match self.0.as_slice() {
            [.., start, end] => Some((*start, *end)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_well_formed_boundaries() {
        let set = SegmentBoundarySet::new(vec![0, 3, 5, 10], 10).expect("valid set");
        assert_eq!(set.as_slice(), &[0, 3, 5, 10]);
        assert!(set.contains(5));
        assert!(!set.contains(4));
        assert_eq!(set.last_segment(), Some((5, 10)));
    }

    #[test]
    fn new_rejects_broken_invariants() {
        assert_eq!(SegmentBoundarySet::new(vec![], 0), Err(BoundaryError::Empty));
        assert_eq!(
            SegmentBoundarySet::new(vec![1, 10], 10),
            Err(BoundaryError::BadStart(1))
        );
        assert_eq!(
            SegmentBoundarySet::new(vec![0, 5, 5, 10], 10),
            Err(BoundaryError::NotIncreasing(2))
        );
        assert_eq!(
            SegmentBoundarySet::new(vec![0, 5, 9], 10),
            Err(BoundaryError::BadEnd {
                expected: 10,
                actual: 9
            })
        );
    }

    #[test]
    fn from_indices_sorts_dedupes_and_brackets() {
        let set = SegmentBoundarySet::from_indices([7, 2, 7, 0, 42], 10);
        assert_eq!(set.as_slice(), &[0, 2, 7, 10]);

        let empty = SegmentBoundarySet::from_indices([], 0);
        assert_eq!(empty.as_slice(), &[0]);
        assert_eq!(empty.last_segment(), None);
    }
}
