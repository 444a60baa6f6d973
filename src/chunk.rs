//! This module defines the `Chunk` struct, a 16³ block of tiles that owns its NodeGroups.
use std::collections::VecDeque;
use std::sync::Mutex;

use bevy::math::IVec3;
use ndarray::Array3;
use slab::Slab;

use crate::{
    lock,
    material::{Material, MaterialGroup},
    node_group::{GroupId, NodeGroup},
    terrain::Terrain,
    tile::Tile,
    unit_path::UnitPath,
    ColorId, CHUNK_SIZE,
};

/// A chunk is a cubic region of the terrain.
///
/// Tiles are written only through `&mut Chunk`. The NodeGroups sit behind their own
/// lock so group phases can run while the whole terrain is shared.
#[derive(Debug)]
pub struct Chunk {
    index: usize,
    /// Chunk coordinate, the minimum tile is `pos * CHUNK_SIZE`.
    pos: IVec3,
    tiles: Array3<Tile>,
    groups: Mutex<Slab<NodeGroup>>,
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}

impl Eq for Chunk {}

impl Chunk {
    /// Creates a chunk filled with `fill`.
    pub(crate) fn new(index: usize, pos: IVec3, fill: Tile) -> Self {
        let size = CHUNK_SIZE as usize;

        Chunk {
            index,
            pos,
            tiles: Array3::from_elem((size, size, size), fill),
            groups: Mutex::new(Slab::new()),
        }
    }

    /// Position of this chunk in the terrain's chunk list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pos(&self) -> IVec3 {
        self.pos
    }

    /// Minimum tile coordinate, inclusive.
    pub fn min(&self) -> IVec3 {
        self.pos * CHUNK_SIZE
    }

    /// Maximum tile coordinate, exclusive.
    pub fn max(&self) -> IVec3 {
        self.min() + IVec3::splat(CHUNK_SIZE)
    }

    pub fn contains(&self, pos: IVec3) -> bool {
        pos.cmpge(self.min()).all() && pos.cmplt(self.max()).all()
    }

    pub fn bounds(&self) -> impl Iterator<Item = IVec3> {
        let min = self.min();
        let max = self.max();

        (min.x..max.x).flat_map(move |x| {
            (min.y..max.y).flat_map(move |y| (min.z..max.z).map(move |z| IVec3::new(x, y, z)))
        })
    }

    // Adjusts a position to the local coordinates of the chunk.
    fn to_local(&self, pos: IVec3) -> Option<[usize; 3]> {
        if !self.contains(pos) {
            return None;
        }

        let local = pos - self.min();
        Some([local.x as usize, local.y as usize, local.z as usize])
    }

    /// Tile at a terrain position inside this chunk.
    pub fn tile(&self, pos: IVec3) -> Option<&Tile> {
        self.to_local(pos).and_then(|local| self.tiles.get(local))
    }

    pub(crate) fn tile_mut(&mut self, pos: IVec3) -> Option<&mut Tile> {
        let local = self.to_local(pos)?;
        self.tiles.get_mut(local)
    }

    pub(crate) fn tiles_mut(&mut self) -> &mut Array3<Tile> {
        &mut self.tiles
    }

    /// Set every tile in the local box `start..end` to `material`, skipping tiles outside
    /// the chunk and, if `filter` is given, tiles whose material and color it rejects.
    ///
    /// Returns the number of tiles written.
    pub fn stamp_tile_region(
        &mut self,
        material: &Material,
        color: ColorId,
        filter: Option<&MaterialGroup>,
        start: IVec3,
        end: IVec3,
    ) -> usize {
        let start = start.max(IVec3::ZERO);
        let end = end.min(IVec3::splat(CHUNK_SIZE));
        let mut written = 0;

        for x in start.x..end.x {
            for y in start.y..end.y {
                for z in start.z..end.z {
                    let tile = &mut self.tiles[[x as usize, y as usize, z as usize]];
                    if let Some(filter) = filter {
                        if !filter.material_in(tile.material_id(), tile.color_id()) {
                            continue;
                        }
                    }
                    tile.set_material(material, color);
                    written += 1;
                }
            }
        }

        written
    }

    /// Flood fill this chunk's standable tiles into NodeGroups and register every tile
    /// in the terrain's tile index. Returns the number of groups created.
    ///
    /// Existing groups must have been cleared first.
    pub(crate) fn init_nodegroups(&self, terrain: &Terrain) -> usize {
        let size = CHUNK_SIZE as usize;
        let mut visited = Array3::from_elem((size, size, size), false);
        let mut built = Slab::new();

        for pos in self.bounds() {
            let Some(local) = self.to_local(pos) else {
                continue;
            };
            if visited[local] || !terrain.can_stand_1(pos) {
                continue;
            }

            visited[local] = true;
            let mut group = NodeGroup::new(self.pos, pos);
            let mut queue = VecDeque::from([pos]);

            while let Some(current) = queue.pop_front() {
                for (next, path) in terrain.adjacent(current, UnitPath::ALL) {
                    if !path.is_open() {
                        continue;
                    }
                    let Some(next_local) = self.to_local(next) else {
                        continue;
                    };

                    group.restrict(path);
                    if visited[next_local] || !terrain.can_stand_1(next) {
                        continue;
                    }

                    visited[next_local] = true;
                    group.add_tile(next);
                    queue.push_back(next);
                }
            }

            built.insert(group);
        }

        let count = built.len();
        let entries: Vec<(usize, GroupId)> = built
            .iter()
            .flat_map(|(local, group)| {
                let id = GroupId::new(self.index, local);
                group.tiles().map(move |&pos| (terrain.tile_index(pos), id))
            })
            .collect();

        *lock(&self.groups) = built;
        lock(terrain.node_index()).extend(entries);

        count
    }

    /// Link groups of this chunk to groups in chunks at a positive offset (lexicographic on
    /// `x`, `y`, `z`). Run on every chunk, this links every border exactly once.
    ///
    /// Returns the number of tile crossings found.
    pub(crate) fn add_nodegroup_adjacent(&self, terrain: &Terrain) -> usize {
        self.link_borders(terrain, true)
    }

    /// Link groups of this chunk to groups in every neighboring chunk. Used when only
    /// some chunks were rebuilt, so their neighbors do not run again.
    pub(crate) fn add_nodegroup_adjacent_all(&self, terrain: &Terrain) -> usize {
        self.link_borders(terrain, false)
    }

    fn link_borders(&self, terrain: &Terrain, positive_only: bool) -> usize {
        let last = CHUNK_SIZE - 1;
        let mut crossings = Vec::new();

        for (local, group) in lock(&self.groups).iter() {
            let id = GroupId::new(self.index, local);

            for &pos in group.tiles() {
                let local_pos = pos - self.min();
                let on_upper_face = local_pos.cmpeq(IVec3::splat(last)).any();
                let on_lower_face = local_pos.cmpeq(IVec3::ZERO).any();
                if !(on_upper_face || (!positive_only && on_lower_face)) {
                    continue;
                }

                for (next, path) in terrain.adjacent(pos, UnitPath::STANDARD) {
                    if !path.is_open() || self.contains(next) {
                        continue;
                    }

                    let relative = next.div_euclid(IVec3::splat(CHUNK_SIZE)) - self.pos;
                    if positive_only && relative.x * 4 + relative.y * 2 + relative.z < 0 {
                        continue;
                    }

                    crossings.push((id, next, path));
                }
            }
        }

        let links: Vec<(GroupId, GroupId, UnitPath)> = {
            let index = lock(terrain.node_index());
            crossings
                .into_iter()
                .filter_map(|(id, next, path)| {
                    index
                        .get(&terrain.tile_index(next))
                        .map(|&other| (id, other, path))
                })
                .collect()
        };

        let count = links.len();
        let mut edges = lock(terrain.edges());
        for (a, b, path) in links {
            edges.link(a, b, path);
        }

        count
    }

    /// Merge the group `absorbed` into `keep`, both owned by this chunk. Tiles are
    /// reassigned in the tile index and edges move onto `keep`.
    pub fn merge_nodegroups(&self, terrain: &Terrain, keep: GroupId, absorbed: GroupId) -> bool {
        if keep == absorbed || keep.chunk != self.index || absorbed.chunk != self.index {
            return false;
        }

        let moved: Vec<IVec3> = {
            let mut groups = lock(&self.groups);
            if !groups.contains(keep.local) {
                return false;
            }
            let Some(other) = groups.try_remove(absorbed.local) else {
                return false;
            };

            let moved = other.tiles().copied().collect();
            groups[keep.local].merge(other);
            moved
        };

        {
            let mut index = lock(terrain.node_index());
            for pos in moved {
                index.insert(terrain.tile_index(pos), keep);
            }
        }

        lock(terrain.edges()).merge_into(keep, absorbed);
        true
    }

    /// Remove a group owned by this chunk along with its index entries and edges.
    pub fn delete_nodegroup(&self, terrain: &Terrain, id: GroupId) -> Option<NodeGroup> {
        if id.chunk != self.index {
            return None;
        }

        let group = lock(&self.groups).try_remove(id.local)?;

        {
            let mut index = lock(terrain.node_index());
            for &pos in group.tiles() {
                index.remove(&terrain.tile_index(pos));
            }
        }

        lock(terrain.edges()).unlink_group(id);
        Some(group)
    }

    /// Delete every group of this chunk. Returns how many were removed.
    pub(crate) fn clear_nodegroups(&self, terrain: &Terrain) -> usize {
        let ids = self.node_group_ids();
        for &id in &ids {
            self.delete_nodegroup(terrain, id);
        }

        // Slot keys restart from zero after a rebuild.
        lock(&self.groups).clear();
        ids.len()
    }

    pub fn node_group_ids(&self) -> Vec<GroupId> {
        lock(&self.groups)
            .iter()
            .map(|(local, _)| GroupId::new(self.index, local))
            .collect()
    }

    pub fn num_node_groups(&self) -> usize {
        lock(&self.groups).len()
    }

    /// A copy of one of this chunk's groups.
    pub fn node_group(&self, local: usize) -> Option<NodeGroup> {
        lock(&self.groups).get(local).cloned()
    }

    pub(crate) fn with_node_group<R>(&self, local: usize, f: impl FnOnce(&NodeGroup) -> R) -> Option<R> {
        lock(&self.groups).get(local).map(f)
    }

    /// Call `f` on every group of this chunk in slot order.
    pub(crate) fn for_each_node_group(&self, mut f: impl FnMut(GroupId, &NodeGroup)) {
        for (local, group) in lock(&self.groups).iter() {
            f(GroupId::new(self.index, local), group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{flat_terrain, test_biome, DIRT, STONE};
    use bevy::math::UVec3;

    #[test]
    fn test_chunk_bounds() {
        let chunk = Chunk::new(3, IVec3::new(1, 0, 2), Tile::default());

        assert_eq!(chunk.min(), IVec3::new(16, 0, 32));
        assert_eq!(chunk.max(), IVec3::new(32, 16, 48));
        assert!(chunk.contains(IVec3::new(31, 15, 32)));
        assert!(!chunk.contains(IVec3::new(32, 15, 32)));
        assert_eq!(chunk.bounds().count(), 16 * 16 * 16);
        assert_eq!(chunk.bounds().next(), Some(IVec3::new(16, 0, 32)));
    }

    #[test]
    fn test_stamp_tile_region_clips_and_filters() {
        let biome = test_biome();
        let dirt = biome.material(DIRT).unwrap();
        let stone = biome.material(STONE).unwrap();
        let mut chunk = Chunk::new(0, IVec3::ZERO, Tile::default());

        let written =
            chunk.stamp_tile_region(dirt, 1, None, IVec3::new(-4, 0, 0), IVec3::new(2, 2, 20));
        assert_eq!(written, 2 * 2 * 16);
        assert_eq!(chunk.tile(IVec3::new(1, 1, 15)).unwrap().material_id(), DIRT);
        assert_eq!(chunk.tile(IVec3::new(2, 1, 15)).unwrap().material_id(), 0);

        let filter = MaterialGroup::new().with_material_colors(DIRT, [1]);
        chunk.stamp_tile_region(dirt, 0, None, IVec3::ZERO, IVec3::new(1, 1, 1));
        let written = chunk.stamp_tile_region(
            stone,
            0,
            Some(&filter),
            IVec3::ZERO,
            IVec3::new(2, 2, 2),
        );

        assert_eq!(written, 7);
        assert_eq!(chunk.tile(IVec3::ZERO).unwrap().material_id(), DIRT);
        assert_eq!(chunk.tile(IVec3::new(1, 1, 1)).unwrap().material_id(), STONE);
    }

    #[test]
    fn test_flat_floor_is_one_group() {
        let terrain = flat_terrain(UVec3::new(16, 16, 16), 8);
        let chunk = &terrain.chunks()[0];

        assert_eq!(chunk.num_node_groups(), 1);
        let group = chunk.node_group(0).unwrap();
        assert_eq!(group.len(), 256);
        assert!(group.tiles().all(|pos| pos.z == 8));
        assert!((group.center() - bevy::math::Vec3::new(7.5, 7.5, 8.0)).length() < 1e-3);
    }

    #[test]
    fn test_wall_splits_groups() {
        let mut terrain = flat_terrain(UVec3::new(16, 16, 16), 8);
        let biome = terrain.biome().clone();
        let stone = biome.material(STONE).unwrap();
        terrain.chunks_mut()[0].stamp_tile_region(
            stone,
            0,
            None,
            IVec3::new(7, 0, 8),
            IVec3::new(8, 16, 12),
        );
        terrain.build_nodegroups();

        let chunk = &terrain.chunks()[0];
        assert_eq!(chunk.num_node_groups(), 3);

        let left = terrain.get_node_group(IVec3::new(2, 2, 8)).unwrap();
        let right = terrain.get_node_group(IVec3::new(12, 2, 8)).unwrap();
        let top = terrain.get_node_group(IVec3::new(7, 2, 12)).unwrap();
        assert_ne!(left, right);
        assert_ne!(left, top);
    }

    #[test]
    fn test_merge_and_delete_nodegroups() {
        let mut terrain = flat_terrain(UVec3::new(16, 16, 16), 8);
        let biome = terrain.biome().clone();
        let stone = biome.material(STONE).unwrap();
        terrain.chunks_mut()[0].stamp_tile_region(
            stone,
            0,
            None,
            IVec3::new(7, 0, 8),
            IVec3::new(8, 16, 12),
        );
        terrain.build_nodegroups();

        let left = terrain.get_node_group(IVec3::new(2, 2, 8)).unwrap();
        let right = terrain.get_node_group(IVec3::new(12, 2, 8)).unwrap();
        let chunk = &terrain.chunks()[0];

        assert!(chunk.merge_nodegroups(&terrain, left, right));
        assert_eq!(chunk.num_node_groups(), 2);
        assert_eq!(terrain.get_node_group(IVec3::new(12, 2, 8)), Some(left));
        assert_eq!(chunk.node_group(left.local()).unwrap().len(), 7 * 16 + 8 * 16);

        let removed = chunk.delete_nodegroup(&terrain, left).unwrap();
        assert_eq!(removed.len(), 15 * 16);
        assert_eq!(terrain.get_node_group(IVec3::new(2, 2, 8)), None);
        assert_eq!(chunk.num_node_groups(), 1);
    }

    #[test]
    fn test_border_links_cross_chunks() {
        let terrain = flat_terrain(UVec3::new(32, 16, 16), 8);

        let a = terrain.get_node_group(IVec3::new(15, 4, 8)).unwrap();
        let b = terrain.get_node_group(IVec3::new(16, 4, 8)).unwrap();
        assert_ne!(a.chunk(), b.chunk());

        let edge = terrain.edge(a, b).unwrap();
        assert!(edge.is_open());
        assert!(edge.compatible(UnitPath::STANDARD));
        assert_eq!(terrain.edge(b, a), Some(edge));
    }
}
