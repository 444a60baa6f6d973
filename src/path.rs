//! This module defines the `Path` returned by every search.
use bevy::math::IVec3;
use std::collections::VecDeque;

/// The result of a pathfinding operation.
///
/// `P` is the step type: tile positions for tile searches and
/// [`crate::node_group::GroupId`]s for NodeGroup searches. The first step is the start
/// and the last step is the goal that was reached.
#[derive(Debug, Clone)]
pub struct Path<P = IVec3> {
    pub(crate) path: VecDeque<P>,
    cost: u32,
    is_reversed: bool,
}

impl<P: Copy + PartialEq> Path<P> {
    /// Create a new path from a vector of steps
    /// # Arguments
    /// * `path` - The steps from start to goal
    /// * `cost` - The total movement cost of the path
    ///
    pub fn new(path: Vec<P>, cost: u32) -> Self {
        Path {
            path: path.into_iter().collect(),
            cost,
            is_reversed: false,
        }
    }

    /// Create a new path from a slice of steps
    pub fn from_slice(path: &[P], cost: u32) -> Self {
        Path {
            path: path.iter().copied().collect(),
            cost,
            is_reversed: false,
        }
    }

    /// Returns true if the path contains the given step
    pub fn is_position_in_path(&self, step: P) -> bool {
        self.path.contains(&step)
    }

    /// Returns the path as a slice of steps.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bevy::math::IVec3;
    /// use voxel_terrain::prelude::*;
    ///
    /// let path = Path::new(vec![IVec3::new(1, 2, 3), IVec3::new(2, 2, 3)], 1000);
    /// assert_eq!(path.path(), &[IVec3::new(1, 2, 3), IVec3::new(2, 2, 3)]);
    /// ```
    pub fn path(&self) -> &[P] {
        self.path.as_slices().0
    }

    /// Returns the movement cost of the path
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Returns the number of steps, including the start
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn start(&self) -> Option<P> {
        self.path.front().copied()
    }

    pub fn goal(&self) -> Option<P> {
        self.path.back().copied()
    }

    pub fn is_reversed(&self) -> bool {
        self.is_reversed
    }

    /// Reverse the path in place.
    pub fn reverse(&mut self) {
        self.path.make_contiguous().reverse();
        self.is_reversed = !self.is_reversed;
    }

    /// Pops the first step of the path.
    pub fn pop(&mut self) -> Option<P> {
        self.path.pop_front()
    }

    /// Returns the next step without removing it.
    pub fn next(&self) -> Option<P> {
        self.path.front().copied()
    }
}

impl<P: PartialEq> PartialEq for Path<P> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<P: Eq> Eq for Path<P> {}

impl<P> IntoIterator for Path<P> {
    type Item = P;
    type IntoIter = std::collections::vec_deque::IntoIter<P>;

    fn into_iter(self) -> Self::IntoIter {
        self.path.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_ends() {
        let mut path = Path::new(
            vec![IVec3::new(0, 0, 1), IVec3::new(1, 0, 1), IVec3::new(2, 1, 1)],
            2414,
        );

        assert_eq!(path.len(), 3);
        assert_eq!(path.cost(), 2414);
        assert_eq!(path.start(), Some(IVec3::new(0, 0, 1)));
        assert_eq!(path.goal(), Some(IVec3::new(2, 1, 1)));
        assert!(path.is_position_in_path(IVec3::new(1, 0, 1)));

        assert_eq!(path.pop(), Some(IVec3::new(0, 0, 1)));
        assert_eq!(path.next(), Some(IVec3::new(1, 0, 1)));
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_path_reverse() {
        let mut path = Path::new(vec![1usize, 2, 3], 2);
        path.reverse();

        assert!(path.is_reversed());
        assert_eq!(path.path(), &[3, 2, 1]);
        assert_eq!(path.into_iter().collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn test_empty_path() {
        let path: Path = Path::from_slice(&[], 0);
        assert!(path.is_empty());
        assert_eq!(path.start(), None);
    }
}
