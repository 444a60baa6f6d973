//! Lazy iteration over the 26 neighbors of a tile, filtered by path compatibility.
use std::iter::FusedIterator;

use bevy::math::IVec3;

use crate::{terrain::Terrain, unit_path::UnitPath};

const fn adjacent_offsets() -> [IVec3; 26] {
    let mut offsets = [IVec3::ZERO; 26];
    let mut i = 0;
    let mut n = 0;
    while i < 27 {
        // 13 is the center cell.
        if i != 13 {
            offsets[n] = IVec3::new(i % 3 - 1, (i / 3) % 3 - 1, i / 9 - 1);
            n += 1;
        }
        i += 1;
    }
    offsets
}

/// Neighbor offsets in iteration order: `z` outermost, then `y`, then `x`.
pub const ADJACENT_OFFSETS: [IVec3; 26] = adjacent_offsets();

/// Iterator over the in-range neighbors of `pos` whose [`UnitPath`] is compatible with a mask.
///
/// Yields the neighbor position together with the path from `pos` to it. Closed paths
/// are still yielded when the mask allows their shape, callers that need to move
/// should check [`UnitPath::is_open`].
#[derive(Clone)]
pub struct AdjacentIterator<'a> {
    terrain: &'a Terrain,
    pos: IVec3,
    mask: UnitPath,
    next: usize,
}

impl<'a> AdjacentIterator<'a> {
    pub fn new(terrain: &'a Terrain, pos: IVec3, mask: UnitPath) -> Self {
        AdjacentIterator {
            terrain,
            pos,
            mask,
            next: 0,
        }
    }

    pub fn pos(&self) -> IVec3 {
        self.pos
    }
}

impl Iterator for AdjacentIterator<'_> {
    type Item = (IVec3, UnitPath);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(offset) = ADJACENT_OFFSETS.get(self.next) {
            self.next += 1;

            let candidate = self.pos + *offset;
            if !self.terrain.in_range(candidate) {
                continue;
            }

            let path = self.terrain.get_path_type(self.pos, candidate);
            if path.compatible(self.mask) {
                return Some((candidate, path));
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(ADJACENT_OFFSETS.len() - self.next))
    }
}

impl FusedIterator for AdjacentIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::flat_terrain;
    use bevy::math::UVec3;

    #[test]
    fn test_offsets_order_and_uniqueness() {
        assert_eq!(ADJACENT_OFFSETS[0], IVec3::new(-1, -1, -1));
        assert_eq!(ADJACENT_OFFSETS[1], IVec3::new(0, -1, -1));
        assert_eq!(ADJACENT_OFFSETS[3], IVec3::new(-1, 0, -1));
        assert_eq!(ADJACENT_OFFSETS[25], IVec3::new(1, 1, 1));
        assert!(!ADJACENT_OFFSETS.contains(&IVec3::ZERO));

        for (i, a) in ADJACENT_OFFSETS.iter().enumerate() {
            for b in &ADJACENT_OFFSETS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_open_neighbors_on_flat_ground() {
        let terrain = flat_terrain(UVec3::new(16, 16, 16), 8);

        let open: Vec<_> = terrain
            .adjacent(IVec3::new(5, 5, 8), UnitPath::STANDARD)
            .filter(|(_, path)| path.is_open())
            .collect();

        assert_eq!(open.len(), 8);
        assert!(open.iter().all(|(pos, path)| pos.z == 8 && path.is_horizontal()));
    }

    #[test]
    fn test_corner_is_bounded() {
        let terrain = flat_terrain(UVec3::new(16, 16, 16), 8);

        let all: Vec<_> = terrain.adjacent(IVec3::new(0, 0, 0), UnitPath::ALL).collect();
        assert_eq!(all.len(), 7);

        let open = terrain
            .adjacent(IVec3::new(0, 0, 8), UnitPath::STANDARD)
            .filter(|(_, path)| path.is_open())
            .count();
        assert_eq!(open, 3);
    }

    #[test]
    fn test_restartable_by_reconstruction() {
        let terrain = flat_terrain(UVec3::new(16, 16, 16), 8);
        let pos = IVec3::new(3, 4, 8);

        let first: Vec<_> = terrain.adjacent(pos, UnitPath::STANDARD).collect();
        let second: Vec<_> = AdjacentIterator::new(&terrain, pos, UnitPath::STANDARD).collect();

        assert_eq!(first, second);
    }
}
