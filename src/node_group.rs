//! NodeGroups and the edge table that links them into the coarse search graph.
use bevy::math::{IVec3, Vec3};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{unit_path::UnitPath, FxIndexSet};

/// Identifier of a NodeGroup: the owning chunk's index and the group's slot in that chunk.
///
/// Ids are stable until the owning chunk rebuilds its groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    pub(crate) chunk: usize,
    pub(crate) local: usize,
}

impl GroupId {
    pub(crate) fn new(chunk: usize, local: usize) -> Self {
        GroupId { chunk, local }
    }

    /// Index of the chunk that owns the group.
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn local(&self) -> usize {
        self.local
    }
}

/// A maximal set of standable tiles inside one chunk that are mutually reachable
/// through open moves without leaving the chunk.
#[derive(Debug, Clone)]
pub struct NodeGroup {
    chunk: IVec3,
    tiles: FxIndexSet<IVec3>,
    center: Vec3,
    path_type: UnitPath,
}

impl NodeGroup {
    /// Create a group for `chunk` holding a single tile.
    pub fn new(chunk: IVec3, first: IVec3) -> Self {
        let mut tiles = FxIndexSet::default();
        tiles.insert(first);

        NodeGroup {
            chunk,
            tiles,
            center: first.as_vec3(),
            path_type: UnitPath::ALL,
        }
    }

    /// Chunk coordinate of the owning chunk.
    pub fn chunk_pos(&self) -> IVec3 {
        self.chunk
    }

    pub fn tiles(&self) -> impl Iterator<Item = &IVec3> {
        self.tiles.iter()
    }

    pub fn contains(&self, pos: IVec3) -> bool {
        self.tiles.contains(&pos)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Mean position of the group's tiles.
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Intersection of every internal path observed while growing the group.
    pub fn path_type(&self) -> UnitPath {
        self.path_type
    }

    /// A representative tile, the first one added.
    pub fn unique_position(&self) -> Option<IVec3> {
        self.tiles.first().copied()
    }

    /// Add a tile, returning false if it was already a member.
    pub fn add_tile(&mut self, pos: IVec3) -> bool {
        if !self.tiles.insert(pos) {
            return false;
        }

        let n = self.tiles.len() as f32;
        self.center = (self.center * (n - 1.0) + pos.as_vec3()) / n;
        true
    }

    pub(crate) fn restrict(&mut self, path: UnitPath) {
        self.path_type &= path;
    }

    /// Absorb `other`. The center becomes the tile weighted mean of both groups.
    pub fn merge(&mut self, other: NodeGroup) {
        let own = self.tiles.len() as f32;
        let theirs = other.tiles.len() as f32;

        let before = self.tiles.len();
        self.tiles.extend(other.tiles);

        if self.tiles.len() > before {
            self.center = (self.center * own + other.center * theirs) / (own + theirs);
        }
        self.path_type &= other.path_type;
    }
}

/// Symmetric adjacency between NodeGroups.
///
/// Each edge carries the union of the open tile paths that cross it, so a mask that
/// admits the edge admits at least one crossing.
#[derive(Debug, Default)]
pub struct EdgeTable {
    adjacency: FxHashMap<GroupId, FxHashMap<GroupId, UnitPath>>,
}

impl EdgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `a` and `b` in both directions. Self links are ignored.
    pub fn link(&mut self, a: GroupId, b: GroupId, path: UnitPath) {
        if a == b {
            return;
        }

        *self
            .adjacency
            .entry(a)
            .or_default()
            .entry(b)
            .or_insert(UnitPath::NONE) |= path;
        *self
            .adjacency
            .entry(b)
            .or_default()
            .entry(a)
            .or_insert(UnitPath::NONE) |= path;
    }

    /// Remove every edge touching `id`, returning the removed edges.
    pub fn unlink_group(&mut self, id: GroupId) -> Option<FxHashMap<GroupId, UnitPath>> {
        let removed = self.adjacency.remove(&id)?;

        for other in removed.keys() {
            if let Some(edges) = self.adjacency.get_mut(other) {
                edges.remove(&id);
                if edges.is_empty() {
                    self.adjacency.remove(other);
                }
            }
        }

        Some(removed)
    }

    /// Move every edge of `absorbed` onto `keep`.
    pub fn merge_into(&mut self, keep: GroupId, absorbed: GroupId) {
        if let Some(edges) = self.unlink_group(absorbed) {
            for (other, path) in edges {
                self.link(keep, other, path);
            }
        }
    }

    pub fn edge(&self, a: GroupId, b: GroupId) -> Option<UnitPath> {
        self.adjacency.get(&a)?.get(&b).copied()
    }

    pub fn edges(&self, id: GroupId) -> impl Iterator<Item = (GroupId, UnitPath)> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flatten()
            .map(|(&other, &path)| (other, path))
    }

    /// Groups linked to `id` by an open edge compatible with `mask`, in ascending id order.
    pub fn neighbors(&self, id: GroupId, mask: UnitPath) -> SmallVec<[GroupId; 8]> {
        let mut neighbors: SmallVec<[GroupId; 8]> = self
            .edges(id)
            .filter(|(_, path)| path.is_open() && path.compatible(mask))
            .map(|(other, _)| other)
            .collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|edges| edges.len()).sum::<usize>() / 2
    }
}
