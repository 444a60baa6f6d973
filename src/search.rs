//! Generic best-first search shared by the tile and NodeGroup levels.
use std::collections::BinaryHeap;
use std::hash::Hash;

use bevy::math::{IVec3, Vec3};
use indexmap::map::Entry::{Occupied, Vacant};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::{
    node_group::GroupId, path::Path, terrain::Terrain, unit_path::UnitPath, FxIndexMap,
    SmallestCostHolder,
};

/// Cost of one orthogonal step, in fixed point thousandths of a tile.
pub const ORTHOGONAL_COST: u32 = 1000;
/// Cost of one diagonal step, √2 in thousandths.
pub const DIAGONAL_COST: u32 = 1414;
/// Cost of one level of vertical displacement.
pub const VERTICAL_COST: u32 = 1000;

/// Octile distance with vertical displacement charged separately.
pub(crate) fn octile(a: IVec3, b: IVec3) -> u32 {
    let d = (a - b).abs().as_uvec3();
    let diagonal = d.x.min(d.y);
    let straight = d.x.max(d.y) - diagonal;

    d.z * VERTICAL_COST + straight * ORTHOGONAL_COST + diagonal * DIAGONAL_COST
}

/// [`octile`] between real valued points, floored.
pub(crate) fn octile_f(a: Vec3, b: Vec3) -> u32 {
    let d = (a - b).abs();
    let diagonal = d.x.min(d.y);
    let straight = d.x.max(d.y) - diagonal;

    (d.z * VERTICAL_COST as f32
        + straight * ORTHOGONAL_COST as f32
        + diagonal * DIAGONAL_COST as f32)
        .floor() as u32
}

/// How the frontier is ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchOrder {
    /// Accumulated movement cost plus the heuristic.
    AStar,
    /// Number of steps taken. The returned path still reports its movement cost.
    BreadthFirst,
}

/// A graph the search can walk.
pub(crate) trait SearchSpace {
    type Node: Copy + Eq + Hash;

    /// Push every node reachable in one step from `node` together with the step's cost.
    fn neighbors(&self, node: Self::Node, out: &mut SmallVec<[(Self::Node, u32); 26]>);

    /// Lower bound on the cost from `node` to `goal`.
    fn heuristic(&self, node: Self::Node, goal: Self::Node) -> u32;
}

/// Best-first search from `start` to the nearest of `goals`.
///
/// Returns the path from `start` to the goal that was reached first.
pub(crate) fn find_path<S: SearchSpace>(
    space: &S,
    start: S::Node,
    goals: &FxHashSet<S::Node>,
    order: SearchOrder,
) -> Option<Path<S::Node>> {
    if goals.is_empty() {
        return None;
    }

    let estimate = |node: S::Node| match order {
        SearchOrder::AStar => goals
            .iter()
            .map(|&goal| space.heuristic(node, goal))
            .min()
            .unwrap_or(0),
        SearchOrder::BreadthFirst => 0,
    };

    let mut to_visit = BinaryHeap::new();
    to_visit.push(SmallestCostHolder {
        estimated_cost: 0,
        cost: 0,
        index: 0,
    });

    // node -> (parent index, rank, movement cost)
    let mut visited: FxIndexMap<S::Node, (usize, u32, u32)> = FxIndexMap::default();
    visited.insert(start, (usize::MAX, 0, 0));

    let mut neighbors = SmallVec::new();

    while let Some(SmallestCostHolder { cost, index, .. }) = to_visit.pop() {
        let Some((&node, &(_, rank, travel))) = visited.get_index(index) else {
            continue;
        };

        if goals.contains(&node) {
            let mut steps = Vec::new();
            let mut current = index;
            while let Some((&step, &(parent, _, _))) = visited.get_index(current) {
                steps.push(step);
                current = parent;
            }
            steps.reverse();
            return Some(Path::new(steps, travel));
        }

        // Stale heap entry.
        if cost > rank {
            continue;
        }

        neighbors.clear();
        space.neighbors(node, &mut neighbors);

        for &(next, step) in neighbors.iter() {
            let new_rank = rank
                + match order {
                    SearchOrder::AStar => step,
                    SearchOrder::BreadthFirst => 1,
                };
            let new_travel = travel + step;

            let n = match visited.entry(next) {
                Vacant(e) => {
                    let n = e.index();
                    e.insert((index, new_rank, new_travel));
                    n
                }
                Occupied(mut e) => {
                    if e.get().1 > new_rank {
                        e.insert((index, new_rank, new_travel));
                        e.index()
                    } else {
                        continue;
                    }
                }
            };

            to_visit.push(SmallestCostHolder {
                estimated_cost: new_rank + estimate(next),
                cost: new_rank,
                index: n,
            });
        }
    }

    None
}

/// Tile level search space. Moves follow open [`UnitPath`]s compatible with `mask`,
/// optionally restricted to a corridor of allowed tiles.
pub(crate) struct TileSpace<'a> {
    terrain: &'a Terrain,
    mask: UnitPath,
    corridor: Option<&'a FxHashSet<IVec3>>,
}

impl<'a> TileSpace<'a> {
    pub(crate) fn new(terrain: &'a Terrain, mask: UnitPath) -> Self {
        TileSpace {
            terrain,
            mask,
            corridor: None,
        }
    }

    pub(crate) fn within(mut self, corridor: &'a FxHashSet<IVec3>) -> Self {
        self.corridor = Some(corridor);
        self
    }
}

impl SearchSpace for TileSpace<'_> {
    type Node = IVec3;

    fn neighbors(&self, node: IVec3, out: &mut SmallVec<[(IVec3, u32); 26]>) {
        for (next, path) in self.terrain.adjacent(node, self.mask) {
            if !path.is_open() {
                continue;
            }
            if let Some(corridor) = self.corridor {
                if !corridor.contains(&next) {
                    continue;
                }
            }
            out.push((next, octile(node, next)));
        }
    }

    fn heuristic(&self, node: IVec3, goal: IVec3) -> u32 {
        octile(node, goal)
    }
}

/// NodeGroup level search space. Steps cost the distance between group centers.
pub(crate) struct GroupSpace<'a> {
    terrain: &'a Terrain,
    mask: UnitPath,
}

impl<'a> GroupSpace<'a> {
    pub(crate) fn new(terrain: &'a Terrain, mask: UnitPath) -> Self {
        GroupSpace { terrain, mask }
    }
}

impl SearchSpace for GroupSpace<'_> {
    type Node = GroupId;

    fn neighbors(&self, node: GroupId, out: &mut SmallVec<[(GroupId, u32); 26]>) {
        let Some(center) = self.terrain.group_center(node) else {
            return;
        };

        for next in self.terrain.get_adjacent_groups(node, self.mask) {
            if let Some(next_center) = self.terrain.group_center(next) {
                out.push((next, octile_f(center, next_center)));
            }
        }
    }

    fn heuristic(&self, node: GroupId, goal: GroupId) -> u32 {
        match (self.terrain.group_center(node), self.terrain.group_center(goal)) {
            (Some(a), Some(b)) => octile_f(a, b),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 2D grid where `#` blocks movement, for exercising the search on its own.
    struct Maze {
        rows: Vec<&'static [u8]>,
    }

    impl Maze {
        fn open(&self, p: IVec3) -> bool {
            p.x >= 0
                && p.y >= 0
                && (p.y as usize) < self.rows.len()
                && (p.x as usize) < self.rows[p.y as usize].len()
                && self.rows[p.y as usize][p.x as usize] != b'#'
        }
    }

    impl SearchSpace for Maze {
        type Node = IVec3;

        fn neighbors(&self, node: IVec3, out: &mut SmallVec<[(IVec3, u32); 26]>) {
            for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let next = node + IVec3::new(dx, dy, 0);
                if self.open(next) {
                    out.push((next, ORTHOGONAL_COST));
                }
            }
        }

        fn heuristic(&self, node: IVec3, goal: IVec3) -> u32 {
            octile(node, goal)
        }
    }

    fn goals(list: &[IVec3]) -> FxHashSet<IVec3> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_octile() {
        assert_eq!(octile(IVec3::ZERO, IVec3::new(3, 0, 0)), 3000);
        assert_eq!(octile(IVec3::ZERO, IVec3::new(2, 2, 0)), 2828);
        assert_eq!(octile(IVec3::ZERO, IVec3::new(3, -1, 2)), 2000 + 1414 + 2000);
        assert_eq!(octile_f(Vec3::ZERO, Vec3::new(0.5, 0.5, 0.0)), 707);
    }

    #[test]
    fn test_astar_around_wall() {
        let maze = Maze {
            rows: vec![b"....", b".##.", b"...."],
        };

        let path = find_path(
            &maze,
            IVec3::new(0, 1, 0),
            &goals(&[IVec3::new(3, 1, 0)]),
            SearchOrder::AStar,
        )
        .unwrap();

        assert_eq!(path.len(), 6);
        assert_eq!(path.cost(), 5000);
        assert_eq!(path.start(), Some(IVec3::new(0, 1, 0)));
        assert_eq!(path.goal(), Some(IVec3::new(3, 1, 0)));
    }

    #[test]
    fn test_unreachable_goal() {
        let maze = Maze {
            rows: vec![b".#.", b".#."],
        };

        let path = find_path(
            &maze,
            IVec3::ZERO,
            &goals(&[IVec3::new(2, 0, 0)]),
            SearchOrder::BreadthFirst,
        );
        assert!(path.is_none());
    }

    #[test]
    fn test_start_is_goal() {
        let maze = Maze { rows: vec![b".."] };

        let path = find_path(&maze, IVec3::ZERO, &goals(&[IVec3::ZERO]), SearchOrder::AStar).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.cost(), 0);
    }

    #[test]
    fn test_breadth_first_nearest_goal() {
        let maze = Maze {
            rows: vec![b"........"],
        };

        let path = find_path(
            &maze,
            IVec3::new(3, 0, 0),
            &goals(&[IVec3::new(0, 0, 0), IVec3::new(7, 0, 0)]),
            SearchOrder::BreadthFirst,
        )
        .unwrap();

        assert_eq!(path.goal(), Some(IVec3::new(0, 0, 0)));
        assert_eq!(path.cost(), 3000);
    }

    #[test]
    fn test_no_goals() {
        let maze = Maze { rows: vec![b".."] };
        assert!(find_path(&maze, IVec3::ZERO, &FxHashSet::default(), SearchOrder::AStar).is_none());
    }
}
