//! The `Terrain`: chunked tile storage, NodeGroup construction, queries, edits and pathfinding.
use std::collections::VecDeque;
use std::path::Path as FilePath;
use std::sync::Mutex;
use std::time::Instant;

use bevy::log::{error, info, warn};
use bevy::math::{IVec3, UVec3, Vec3};
use ndarray::Array3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use strum::{Display, EnumString};

use crate::{
    adjacent::AdjacentIterator,
    biome::Biome,
    chunk::Chunk,
    error::{Result, TerrainError},
    generation::{AddToTop, MacroMap, TileStamp},
    lock,
    material::{Material, MaterialGroup},
    node_group::{EdgeTable, GroupId, NodeGroup},
    path::Path,
    qb::{self, VoxelData},
    search::{find_path, GroupSpace, SearchOrder, TileSpace},
    tile::Tile,
    timed,
    unit_path::UnitPath,
    ColorId, ColorInt, MaterialId, CHUNK_SIZE,
};

/// Height of a standing agent in tiles.
const AGENT_HEIGHT: i32 = 3;

/// Colors cycled through by [`Terrain::to_voxels_debug`].
const DEBUG_COLORS: [ColorInt; 8] = [
    0xe6194bff, 0x3cb44bff, 0xffe119ff, 0x4363d8ff, 0xf58231ff, 0x911eb4ff, 0x46f0f0ff,
    0xf032e6ff,
];

/// When NodeGroups are rebuilt after an edit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EditPolicy {
    /// Every edit rebuilds the chunks it touched before returning.
    #[default]
    Eager,
    /// Edits only mark chunks dirty. Call [`Terrain::rebuild_dirty_chunks`] before searching.
    Deferred,
}

/// Dimensions and edit behavior of a [`Terrain`].
#[derive(Debug, Clone)]
pub struct TerrainSettings {
    size: UVec3,
    edit_policy: EditPolicy,
}

impl TerrainSettings {
    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn edit_policy(&self) -> EditPolicy {
        self.edit_policy
    }
}

/// Builder for `TerrainSettings`.
///
/// ```
/// use voxel_terrain::prelude::*;
///
/// let settings = TerrainSettingsBuilder::new(64, 64, 32)
///     .edit_policy(EditPolicy::Deferred)
///     .build();
///
/// assert_eq!(settings.size().z, 32);
/// ```
#[derive(Debug, Clone)]
pub struct TerrainSettingsBuilder {
    size: UVec3,
    edit_policy: EditPolicy,
}

impl TerrainSettingsBuilder {
    /// Terrain of `width × height × depth` tiles. Every dimension must be at least 1.
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        if width < 1 || height < 1 {
            panic!("Width and height must be at least 1");
        }

        if depth < 1 {
            panic!("Depth must be at least 1");
        }

        TerrainSettingsBuilder {
            size: UVec3::new(width, height, depth),
            edit_policy: EditPolicy::default(),
        }
    }

    /// Settings sized to cover every area of `macro_map`.
    pub fn for_macro_map(macro_map: &MacroMap, area_size: u32, depth: u32) -> Self {
        Self::new(
            macro_map.width() * area_size,
            macro_map.height() * area_size,
            depth,
        )
    }

    pub fn edit_policy(mut self, edit_policy: EditPolicy) -> Self {
        self.edit_policy = edit_policy;
        self
    }

    pub fn build(self) -> TerrainSettings {
        TerrainSettings {
            size: self.size,
            edit_policy: self.edit_policy,
        }
    }
}

#[derive(Clone, Copy)]
enum GrowField {
    /// Distance from solid, non-grass walls.
    High,
    /// Distance from open edges.
    Low,
}

impl GrowField {
    fn is_edge(self, tile: &Tile) -> bool {
        match self {
            GrowField::High => tile.is_solid() && !tile.is_grass(),
            GrowField::Low => !tile.is_solid(),
        }
    }

    fn get(self, tile: &Tile) -> i32 {
        match self {
            GrowField::High => tile.grow_high() as i32,
            GrowField::Low => tile.grow_low() as i32,
        }
    }

    fn set(self, tile: &mut Tile, value: i32) {
        match self {
            GrowField::High => tile.set_grow_high(value),
            GrowField::Low => tile.set_grow_low(value),
        }
    }
}

/// A voxel world split into 16³ chunks, with NodeGroups for hierarchical pathfinding.
///
/// Lock order: a chunk's group lock may be held while taking the tile index or the edge
/// table lock, never the other way around. The tile index and edge table locks are never
/// held together.
#[derive(Debug)]
pub struct Terrain {
    size: UVec3,
    chunk_counts: IVec3,
    chunks: Vec<Chunk>,
    biome: Biome,
    /// Tile index to the NodeGroup standing on it.
    node_index: Mutex<FxHashMap<usize, GroupId>>,
    edges: Mutex<EdgeTable>,
    dirty_chunks: FxHashSet<usize>,
    edit_policy: EditPolicy,
    built: bool,
}

impl Terrain {
    /// Create an all air terrain.
    pub fn new(settings: &TerrainSettings, biome: Biome) -> Self {
        let mut terrain = Terrain::allocate(settings, biome);
        terrain.build_nodegroups();
        terrain
    }

    fn allocate(settings: &TerrainSettings, biome: Biome) -> Self {
        let size = settings.size();
        let chunk_counts = (size.as_ivec3() + IVec3::splat(CHUNK_SIZE - 1)) / CHUNK_SIZE;
        let air = Tile::new(biome.air(), 0);

        let mut chunks = Vec::with_capacity(
            (chunk_counts.x * chunk_counts.y * chunk_counts.z) as usize,
        );
        for x in 0..chunk_counts.x {
            for y in 0..chunk_counts.y {
                for z in 0..chunk_counts.z {
                    chunks.push(Chunk::new(chunks.len(), IVec3::new(x, y, z), air));
                }
            }
        }

        Terrain {
            size,
            chunk_counts,
            chunks,
            biome,
            node_index: Mutex::new(FxHashMap::default()),
            edges: Mutex::new(EdgeTable::new()),
            dirty_chunks: FxHashSet::default(),
            edit_policy: settings.edit_policy(),
            built: false,
        }
    }

    /// Generate a terrain from the biome's stamp generators, laid out by `macro_map`.
    ///
    /// Stamps are applied per chunk in parallel, then top layers and grass are added,
    /// then NodeGroups are built.
    ///
    /// # Arguments
    /// * `settings` - Terrain dimensions and edit policy. See [`TerrainSettingsBuilder::for_macro_map`].
    /// * `biome` - Materials, generators, top layers and grass settings.
    /// * `macro_map` - Chooses the generators of each `area_size` square.
    ///
    /// # Returns
    /// * `Result<Terrain>` - The generated terrain, or the error of a stamp or top layer that
    ///   references a material the biome does not define.
    pub fn generate(settings: &TerrainSettings, biome: Biome, macro_map: &MacroMap) -> Result<Self> {
        let mut terrain = Terrain::allocate(settings, biome);

        let start = Instant::now();
        let stamps = terrain.plan_stamps(macro_map);
        let written = terrain.apply_stamps(&stamps).inspect_err(|e| {
            error!("Failed to stamp terrain: {}", e);
        })?;
        info!(
            "Stamped {} regions ({} tiles) in {:?}",
            stamps.len(),
            written,
            start.elapsed()
        );

        let start = Instant::now();
        for layer in terrain.biome.top_layers().to_vec() {
            terrain.add_to_top(&layer)?;
        }
        terrain.init_grass();
        info!("Added top layers and grass in {:?}", start.elapsed());

        terrain.build_nodegroups();
        Ok(terrain)
    }

    fn plan_stamps(&self, macro_map: &MacroMap) -> Vec<TileStamp> {
        let area = self.biome.area_size() as i32;
        let mut stamps = Vec::new();

        for (x, y) in macro_map.areas() {
            let mut rng = macro_map.rng_for(self.biome.seed(), x, y);
            let offset = IVec3::new(x as i32 * area + area / 2, y as i32 * area + area / 2, 0);

            for generator in self.biome.generators_for(macro_map.tile_type(x, y)) {
                stamps.extend(
                    generator
                        .stamps(&mut rng)
                        .into_iter()
                        .map(|stamp| stamp.translated(offset)),
                );
            }
        }

        stamps
    }

    /// Import a voxel grid. Colors are resolved through the biome's color map, unknown
    /// colors become air with a warning.
    ///
    /// # Arguments
    /// * `biome` - Materials whose palettes map voxel colors back to tiles.
    /// * `data` - The voxel grid. Its size becomes the terrain size.
    ///
    /// # Returns
    /// * `Result<Terrain>` - The imported terrain with NodeGroups built, or
    ///   [`TerrainError::EmptyVolume`] if the grid is empty along an axis.
    pub fn from_voxels(biome: Biome, data: &VoxelData) -> Result<Self> {
        let size = data.size();
        if size.cmpeq(UVec3::ZERO).any() {
            error!("Cannot import empty voxel data of size {}", size);
            return Err(TerrainError::EmptyVolume(size));
        }

        let settings = TerrainSettingsBuilder::new(size.x, size.y, size.z).build();
        let mut terrain = Terrain::allocate(&settings, biome);

        let start = Instant::now();
        let biome = &terrain.biome;
        let colors = data.colors();
        let size = size.as_ivec3();

        let unknown: Vec<Vec<ColorInt>> = map_chunks_mut(&mut terrain.chunks, |chunk| {
            let min = chunk.min();
            let end = (size - min).min(IVec3::splat(CHUNK_SIZE));
            let tiles = chunk.tiles_mut();
            let mut unknown = Vec::new();

            for x in 0..end.x {
                for y in 0..end.y {
                    for z in 0..end.z {
                        let pos = min + IVec3::new(x, y, z);
                        let hex = colors[[pos.x as usize, pos.y as usize, pos.z as usize]];
                        if hex == 0 {
                            continue;
                        }

                        match biome.color_map().lookup(hex) {
                            Some((material, color)) => {
                                if let Some(material) = biome.get_material(material) {
                                    tiles[[x as usize, y as usize, z as usize]]
                                        .set_material(material, color);
                                }
                            }
                            None => unknown.push(hex),
                        }
                    }
                }
            }

            unknown
        });

        let mut seen = FxHashSet::default();
        for hex in unknown.into_iter().flatten() {
            if seen.insert(hex) {
                warn!("Unknown voxel color {:#010x}, using air", hex);
            }
        }
        info!("Imported voxels in {:?}", start.elapsed());

        terrain.build_nodegroups();
        Ok(terrain)
    }

    /// Import the first layer of a `.qb` file.
    pub fn from_qb(path: impl AsRef<FilePath>, biome: Biome) -> Result<Self> {
        let data = qb::read_qb(path)?
            .into_iter()
            .next()
            .ok_or_else(|| TerrainError::Format("file has no layers".into()))?;

        Terrain::from_voxels(biome, &data)
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn biome(&self) -> &Biome {
        &self.biome
    }

    pub fn edit_policy(&self) -> EditPolicy {
        self.edit_policy
    }

    pub fn set_edit_policy(&mut self, edit_policy: EditPolicy) {
        self.edit_policy = edit_policy;
    }

    /// Number of chunks along each axis.
    pub fn chunk_counts(&self) -> IVec3 {
        self.chunk_counts
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[cfg(test)]
    pub(crate) fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    pub(crate) fn node_index(&self) -> &Mutex<FxHashMap<usize, GroupId>> {
        &self.node_index
    }

    pub(crate) fn edges(&self) -> &Mutex<EdgeTable> {
        &self.edges
    }

    pub fn in_range(&self, pos: IVec3) -> bool {
        pos.cmpge(IVec3::ZERO).all() && pos.cmplt(self.size.as_ivec3()).all()
    }

    /// Unique index of a tile position, `x` major.
    pub fn tile_index(&self, pos: IVec3) -> usize {
        let size = self.size.as_ivec3();
        ((pos.x * size.y + pos.y) * size.z + pos.z) as usize
    }

    fn chunk_index(&self, chunk_pos: IVec3) -> Option<usize> {
        if chunk_pos.cmplt(IVec3::ZERO).any() || chunk_pos.cmpge(self.chunk_counts).any() {
            return None;
        }

        let counts = self.chunk_counts;
        Some(((chunk_pos.x * counts.y + chunk_pos.y) * counts.z + chunk_pos.z) as usize)
    }

    /// Chunk at a chunk coordinate.
    pub fn chunk(&self, chunk_pos: IVec3) -> Result<&Chunk> {
        self.chunk_index(chunk_pos)
            .and_then(|index| self.chunks.get(index))
            .ok_or(TerrainError::MissingChunk(chunk_pos))
    }

    /// Chunk holding a tile position.
    pub fn chunk_from_tile(&self, pos: IVec3) -> Option<&Chunk> {
        if !self.in_range(pos) {
            return None;
        }

        self.chunk_index(pos.div_euclid(IVec3::splat(CHUNK_SIZE)))
            .and_then(|index| self.chunks.get(index))
    }

    fn chunk_from_tile_mut(&mut self, pos: IVec3) -> Option<&mut Chunk> {
        if !self.in_range(pos) {
            return None;
        }

        let index = self.chunk_index(pos.div_euclid(IVec3::splat(CHUNK_SIZE)))?;
        self.chunks.get_mut(index)
    }

    pub fn tile(&self, pos: IVec3) -> Option<&Tile> {
        self.chunk_from_tile(pos)?.tile(pos)
    }

    pub(crate) fn tile_mut(&mut self, pos: IVec3) -> Option<&mut Tile> {
        self.chunk_from_tile_mut(pos)?.tile_mut(pos)
    }

    /// The tile at `pos`, failing outside the terrain.
    pub fn get_tile(&self, pos: IVec3) -> Result<Tile> {
        self.tile(pos)
            .copied()
            .ok_or(TerrainError::OutOfRange { position: pos })
    }

    /// Packed color of the tile at `pos`, 0 outside the terrain.
    pub fn get_voxel(&self, pos: IVec3) -> ColorInt {
        self.tile(pos)
            .map(|tile| self.biome.hex(tile.material_id(), tile.color_id()))
            .unwrap_or(0)
    }

    /// `material << 8 | color` of the tile at `pos`, 0 for air and outside the terrain.
    pub fn get_voxel_color_id(&self, pos: IVec3) -> u16 {
        self.tile(pos).map(Tile::mat_color_id).unwrap_or(0)
    }

    pub fn get_material(&self, pos: IVec3) -> Option<&Material> {
        self.tile(pos)
            .and_then(|tile| self.biome.get_material(tile.material_id()))
    }

    pub fn is_solid(&self, pos: IVec3) -> bool {
        self.tile(pos).is_some_and(Tile::is_solid)
    }

    pub fn has_tile_material(&self, group: &MaterialGroup, pos: IVec3) -> bool {
        self.tile(pos)
            .is_some_and(|tile| group.material_in(tile.material_id(), tile.color_id()))
    }

    /// True when an agent `height` tiles tall fits at `pos`: the tile below is solid and
    /// `pos` up to `pos + height - 1` are not. Every involved tile must be in range.
    pub fn can_stand(&self, pos: IVec3, height: i32) -> bool {
        let below = pos - IVec3::Z;
        if !self.in_range(below) || !self.in_range(pos + IVec3::Z * (height - 1)) {
            return false;
        }

        self.is_solid(below) && (0..height).all(|dz| !self.is_solid(pos + IVec3::Z * dz))
    }

    /// `pos` is empty and the tile below it is solid.
    pub fn can_stand_1(&self, pos: IVec3) -> bool {
        self.can_stand(pos, 1)
    }

    /// Shape of the move from `start` to its neighbor `end`, with `OPEN` set when an
    /// agent can make it.
    pub fn get_path_type(&self, start: IVec3, end: IVec3) -> UnitPath {
        let offset = end - start;
        let mut path = UnitPath::shape(offset);
        let h = AGENT_HEIGHT;

        // Elbows: the two cells that share a column with one end and a row with the other.
        let elbow_x = |z: i32| IVec3::new(end.x, start.y, z);
        let elbow_y = |z: i32| IVec3::new(start.x, end.y, z);

        let open = if path.is_up_and_diagonal() {
            let (low, high) = if offset.z > 0 { (h + 1, h) } else { (h, h + 1) };

            self.can_stand(start, low)
                && self.can_stand(end, high)
                && (self.can_stand(elbow_x(start.z), low) || self.can_stand(elbow_x(end.z), high))
                && (self.can_stand(elbow_y(start.z), low) || self.can_stand(elbow_y(end.z), high))
        } else if path.is_up_and_over() {
            if offset.z > 0 {
                self.can_stand(start, h + 1) && self.can_stand(end, h)
            } else {
                self.can_stand(start, h) && self.can_stand(end, h + 1)
            }
        } else if path.is_diagonal() {
            self.can_stand(start, h)
                && self.can_stand(end, h)
                && self.can_stand(elbow_y(start.z), h)
                && self.can_stand(elbow_x(end.z), h)
        } else {
            self.can_stand(start, h) && self.can_stand(end, h)
        };

        if open {
            path.open();
        }
        path
    }

    /// Neighbors of `pos` whose path from `pos` is compatible with `mask`.
    pub fn adjacent(&self, pos: IVec3, mask: UnitPath) -> AdjacentIterator<'_> {
        AdjacentIterator::new(self, pos, mask)
    }

    /// Height of the highest solid tile in a column, 0 if there is none.
    pub fn get_z_solid(&self, x: i32, y: i32) -> i32 {
        self.get_z_solid_from(x, y, self.size.z as i32 - 1)
    }

    /// Like [`Terrain::get_z_solid`] but searching down from `z_start`.
    pub fn get_z_solid_from(&self, x: i32, y: i32, z_start: i32) -> i32 {
        (0..=z_start)
            .rev()
            .find(|&z| self.is_solid(IVec3::new(x, y, z)))
            .unwrap_or(0)
    }

    /// First height in column `(x, y)` whose tile is not in `group` while the tile below is,
    /// starting the search from `guess`. Returns the terrain depth if the column is full
    /// and 0 if no tile of the column is in `group`.
    pub fn get_first_not(&self, group: &MaterialGroup, x: i32, y: i32, guess: i32) -> i32 {
        let depth = self.size.z as i32;
        let in_group = |z: i32| self.has_tile_material(group, IVec3::new(x, y, z));

        if depth < 2 {
            return if in_group(0) { depth } else { 0 };
        }

        let guess = guess.clamp(1, depth - 1);

        if in_group(guess - 1) {
            return (guess..depth).find(|&z| !in_group(z)).unwrap_or(depth);
        }

        if guess == 1 {
            return 0;
        }

        (0..guess - 1)
            .rev()
            .find(|&z| in_group(z))
            .map(|z| z + 1)
            .unwrap_or(0)
    }

    /// First and last standable tiles in index order.
    pub fn get_start_end_test(&self) -> Option<(IVec3, IVec3)> {
        let mut standable = self.positions().filter(|&pos| self.can_stand_1(pos));
        let first = standable.next()?;
        let last = standable.last().unwrap_or(first);
        Some((first, last))
    }

    fn positions(&self) -> impl Iterator<Item = IVec3> {
        let size = self.size.as_ivec3();

        (0..size.x).flat_map(move |x| {
            (0..size.y).flat_map(move |y| (0..size.z).map(move |z| IVec3::new(x, y, z)))
        })
    }

    /// The NodeGroup standing on `pos`, if `pos` is standable.
    pub fn get_node_group(&self, pos: IVec3) -> Option<GroupId> {
        if !self.in_range(pos) {
            return None;
        }

        lock(&self.node_index).get(&self.tile_index(pos)).copied()
    }

    /// A copy of a NodeGroup.
    pub fn node_group(&self, id: GroupId) -> Option<NodeGroup> {
        self.chunks.get(id.chunk())?.node_group(id.local())
    }

    pub(crate) fn group_center(&self, id: GroupId) -> Option<Vec3> {
        self.chunks
            .get(id.chunk())?
            .with_node_group(id.local(), NodeGroup::center)
    }

    pub fn all_node_groups(&self) -> Vec<GroupId> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.node_group_ids())
            .collect()
    }

    pub fn num_node_groups(&self) -> usize {
        self.chunks.iter().map(Chunk::num_node_groups).sum()
    }

    /// Groups linked to `id` by an open edge compatible with `mask`.
    pub fn get_adjacent_groups(&self, id: GroupId, mask: UnitPath) -> SmallVec<[GroupId; 8]> {
        lock(&self.edges).neighbors(id, mask)
    }

    /// The path carried by the edge between two groups.
    pub fn edge(&self, a: GroupId, b: GroupId) -> Option<UnitPath> {
        lock(&self.edges).edge(a, b)
    }

    pub fn num_edges(&self) -> usize {
        lock(&self.edges).edge_count()
    }

    /// Rebuild every chunk's NodeGroups and their links.
    pub fn build_nodegroups(&mut self) {
        self.dirty_chunks.clear();
        self.built = true;

        let terrain = &*self;
        let all: Vec<usize> = (0..terrain.chunks.len()).collect();

        terrain.for_chunks(&all, |chunk| chunk.clear_nodegroups(terrain));

        let start = Instant::now();
        let groups = terrain.for_chunks(&all, |chunk| chunk.init_nodegroups(terrain));
        info!("Initialized {} node groups in {:?}", groups, start.elapsed());

        let start = Instant::now();
        let crossings = terrain.for_chunks(&all, |chunk| chunk.add_nodegroup_adjacent(terrain));
        info!(
            "Connected adjacent chunk node groups ({} crossings) in {:?}",
            crossings,
            start.elapsed()
        );
    }

    /// Rebuild the NodeGroups of every dirty chunk and relink them to their neighbors.
    /// Returns the number of chunks rebuilt.
    pub fn rebuild_dirty_chunks(&mut self) -> usize {
        if self.dirty_chunks.is_empty() {
            return 0;
        }

        let mut dirty: Vec<usize> = self.dirty_chunks.drain().collect();
        dirty.sort_unstable();

        let terrain = &*self;
        let start = Instant::now();
        terrain.for_chunks(&dirty, |chunk| chunk.clear_nodegroups(terrain));
        let groups = terrain.for_chunks(&dirty, |chunk| chunk.init_nodegroups(terrain));
        terrain.for_chunks(&dirty, |chunk| chunk.add_nodegroup_adjacent_all(terrain));
        info!(
            "Rebuilt {} dirty chunks into {} node groups in {:?}",
            dirty.len(),
            groups,
            start.elapsed()
        );

        dirty.len()
    }

    pub fn has_dirty_chunks(&self) -> bool {
        !self.dirty_chunks.is_empty()
    }

    fn for_chunks<F>(&self, indices: &[usize], f: F) -> usize
    where
        F: Fn(&Chunk) -> usize + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            indices
                .par_iter()
                .filter_map(|&index| self.chunks.get(index))
                .map(f)
                .sum()
        }

        #[cfg(not(feature = "parallel"))]
        {
            indices
                .iter()
                .filter_map(|&index| self.chunks.get(index))
                .map(f)
                .sum()
        }
    }

    /// Marks every chunk whose paths can change when the tile at `pos` changes.
    pub(crate) fn mark_dirty_for_pos(&mut self, pos: IVec3) {
        self.mark_dirty_for_box(pos + IVec3::new(-1, -1, -4), pos + IVec3::new(1, 1, 2));
    }

    /// Marks every chunk intersecting the inclusive box `min..=max`.
    fn mark_dirty_for_box(&mut self, min: IVec3, max: IVec3) {
        if !self.built {
            return;
        }

        let last = self.size.as_ivec3() - IVec3::ONE;
        let min = min.clamp(IVec3::ZERO, last).div_euclid(IVec3::splat(CHUNK_SIZE));
        let max = max.clamp(IVec3::ZERO, last).div_euclid(IVec3::splat(CHUNK_SIZE));

        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    if let Some(index) = self.chunk_index(IVec3::new(x, y, z)) {
                        self.dirty_chunks.insert(index);
                    }
                }
            }
        }
    }

    fn apply_edit_policy(&mut self) {
        if self.edit_policy == EditPolicy::Eager {
            self.rebuild_dirty_chunks();
        }
    }

    /// Set the material and color of a tile unconditionally.
    pub fn set_tile(&mut self, pos: IVec3, material: MaterialId, color: ColorId) -> Result<()> {
        let material = self
            .biome
            .material(material)
            .inspect_err(|_| warn!("Edit at {} references unknown material {}", pos, material))?
            .clone();

        self.tile_mut(pos)
            .ok_or(TerrainError::OutOfRange { position: pos })?
            .set_material(&material, color);

        self.mark_dirty_for_pos(pos);
        self.apply_edit_policy();
        Ok(())
    }

    /// Player edit: digging out a solid tile or filling an empty one is allowed, replacing
    /// a solid tile with another solid material is refused. Returns whether the edit happened.
    pub fn player_set_tile_material(
        &mut self,
        pos: IVec3,
        material: MaterialId,
        color: ColorId,
    ) -> Result<bool> {
        let current = self.get_tile(pos)?;
        if current.is_solid() && self.biome.material(material)?.solid {
            return Ok(false);
        }

        self.set_tile(pos, material, color)?;
        Ok(true)
    }

    /// Recolor a tile of `material`. Returns false if the tile is another material or the
    /// color is outside its palette.
    pub fn paint(&mut self, pos: IVec3, material: MaterialId, color: ColorId) -> Result<bool> {
        let material = self.biome.material(material)?.clone();
        let tile = self
            .tile_mut(pos)
            .ok_or(TerrainError::OutOfRange { position: pos })?;

        if tile.material_id() != material.id || !material.has_color(color) {
            return Ok(false);
        }

        tile.set_color_id(color, &material);
        Ok(true)
    }

    /// Write a stamp into every chunk it intersects.
    pub fn stamp_tile_region(&mut self, stamp: &TileStamp) -> Result<()> {
        self.apply_stamps(std::slice::from_ref(stamp)).map(|_| ())
    }

    /// Apply stamps in order, one task per chunk. Returns the number of tiles written.
    fn apply_stamps(&mut self, stamps: &[TileStamp]) -> Result<usize> {
        for stamp in stamps {
            self.biome.material(stamp.material)?;
        }

        let size = self.size.as_ivec3();
        let biome = &self.biome;

        let written: usize = map_chunks_mut(&mut self.chunks, |chunk| {
            let min = chunk.min();
            let mut written = 0;

            for stamp in stamps {
                let start = stamp.min.max(IVec3::ZERO) - min;
                let end = stamp.max.min(size) - min;
                if start.cmpge(IVec3::splat(CHUNK_SIZE)).any() || end.cmple(IVec3::ZERO).any() {
                    continue;
                }

                if let Some(material) = biome.get_material(stamp.material) {
                    written += chunk.stamp_tile_region(
                        material,
                        stamp.color,
                        stamp.filter.as_ref(),
                        start,
                        end,
                    );
                }
            }

            written
        })
        .into_iter()
        .sum();

        if self.built {
            for stamp in stamps.iter().filter(|stamp| !stamp.is_empty()) {
                self.mark_dirty_for_box(
                    stamp.min + IVec3::new(-1, -1, -4),
                    stamp.max + IVec3::new(0, 0, 1),
                );
            }
            self.apply_edit_policy();
        }

        Ok(written)
    }

    /// Raise every column by a top-layer rule.
    pub fn add_to_top(&mut self, layer: &AddToTop) -> Result<()> {
        let material = self.biome.material(layer.material)?.clone();
        let size = self.size.as_ivec3();
        let mut guess = size.z / 2;

        for x in 0..size.x {
            for y in 0..size.y {
                guess = self.get_first_not(&layer.above, x, y, guess);
                let height = layer.final_height(guess);

                for z in guess..height {
                    if let Some(tile) = self.tile_mut(IVec3::new(x, y, z)) {
                        if layer.can_overwrite(tile.material_id(), tile.color_id()) {
                            tile.set_material(&material, layer.color);
                        }
                    }
                }
            }
        }

        if self.built {
            self.mark_dirty_for_box(IVec3::ZERO, size);
            self.apply_edit_policy();
        }

        Ok(())
    }

    /// Grow grass on exposed tiles of the grass material and color it by its distance
    /// to walls and to open edges.
    pub fn init_grass(&mut self) {
        let Some(grass) = self.biome.grass().cloned() else {
            return;
        };
        if grass.is_empty() {
            return;
        }

        let top = self.size.z as i32 - 1;
        let exposed: Vec<IVec3> = self
            .positions()
            .filter(|&pos| pos.z == top || !self.is_solid(pos + IVec3::Z))
            .collect();

        let mut grown = Vec::new();
        for pos in exposed {
            if let Some(tile) = self.tile_mut(pos) {
                if tile.try_grow_grass(&grass) {
                    grown.push(pos);
                }
            }
        }

        let len = grass.len() as i32;
        timed!("Spread grass high field", {
            self.spread_grass(&grown, len, GrowField::High)
        });
        timed!("Spread grass low field", {
            self.spread_grass(&grown, len, GrowField::Low)
        });

        for &pos in &grown {
            if let Some(tile) = self.tile_mut(pos) {
                tile.set_grass_color(&grass);
            }
        }
    }

    /// Multi-source breadth first distance transform over grass tiles. Sources are grass
    /// tiles next to an edge of `field` and start at `len - 1`; values drop by one per step.
    fn spread_grass(&mut self, grown: &[IVec3], len: i32, field: GrowField) {
        let mut queue = VecDeque::new();

        for &pos in grown {
            let is_source = self
                .adjacent(pos, UnitPath::GRASS)
                .any(|(next, _)| self.tile(next).is_some_and(|tile| field.is_edge(tile)));

            if is_source {
                if let Some(tile) = self.tile_mut(pos) {
                    field.set(tile, len - 1);
                    queue.push_back(pos);
                }
            }
        }

        while let Some(pos) = queue.pop_front() {
            let Some(value) = self.tile(pos).map(|tile| field.get(tile)) else {
                continue;
            };
            if value <= 1 {
                continue;
            }

            let neighbors: SmallVec<[IVec3; 26]> = self
                .adjacent(pos, UnitPath::GRASS)
                .map(|(next, _)| next)
                .collect();

            for next in neighbors {
                if let Some(tile) = self.tile_mut(next) {
                    if tile.is_grass() && field.get(tile) < value - 1 {
                        field.set(tile, value - 1);
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    fn corridor(&self, groups: &[GroupId]) -> FxHashSet<IVec3> {
        let mut corridor = FxHashSet::default();

        for id in groups {
            if let Some(chunk) = self.chunks.get(id.chunk()) {
                chunk.with_node_group(id.local(), |group| corridor.extend(group.tiles().copied()));
            }
        }

        corridor
    }

    /// A* path between two standable tiles.
    ///
    /// Searches the NodeGroup graph first, then searches tiles inside the groups on that
    /// route.
    ///
    /// # Arguments
    /// * `start` - The standable tile to search from.
    /// * `goal` - The standable tile to reach.
    ///
    /// # Returns
    /// * `Option<Path>` - The tiles from `start` to `goal` with the movement cost, or `None`
    ///   if either end is not standable or no route exists.
    pub fn get_path_astar(&self, start: IVec3, goal: IVec3) -> Option<Path> {
        if !self.in_range(start) {
            warn!("Path start {} is outside the terrain", start);
            return None;
        }

        let start_group = self.get_node_group(start)?;
        let goal_group = self.get_node_group(goal)?;

        let groups = self.get_group_path_astar(start_group, goal_group)?;
        let corridor = self.corridor(groups.path());

        let goals = FxHashSet::from_iter([goal]);
        let space = TileSpace::new(self, UnitPath::STANDARD).within(&corridor);

        timed!("Tile A* search", {
            find_path(&space, start, &goals, SearchOrder::AStar)
        })
    }

    /// A* over the NodeGroup graph.
    pub fn get_group_path_astar(&self, start: GroupId, goal: GroupId) -> Option<Path<GroupId>> {
        let goals = FxHashSet::from_iter([goal]);
        let space = GroupSpace::new(self, UnitPath::STANDARD);

        timed!("Group A* search", {
            find_path(&space, start, &goals, SearchOrder::AStar)
        })
    }

    /// Fewest-steps path from `start` to the nearest standable tile of `goals`.
    ///
    /// The NodeGroup graph is searched first for a route to every goal group. Routes at
    /// most one hop longer than the shortest one form the corridor, and a single tile
    /// search runs towards every goal inside it.
    ///
    /// # Arguments
    /// * `start` - A standable tile to search from.
    /// * `goals` - Candidate destinations. Goals that are not standable are ignored.
    ///
    /// # Returns
    /// * `Option<Path>` - The path to the goal reached in the fewest steps, or `None` if
    ///   `start` is not standable or no goal can be reached.
    pub fn get_path_breadth_first(&self, start: IVec3, goals: &[IVec3]) -> Option<Path> {
        if !self.in_range(start) {
            warn!("Path start {} is outside the terrain", start);
            return None;
        }

        let start_group = self.get_node_group(start)?;
        let goals: Vec<(IVec3, GroupId)> = goals
            .iter()
            .filter_map(|&goal| self.get_node_group(goal).map(|id| (goal, id)))
            .collect();

        let mut goal_groups: Vec<GroupId> = goals.iter().map(|&(_, id)| id).collect();
        goal_groups.sort_unstable();
        goal_groups.dedup();

        let routes: Vec<Path<GroupId>> = goal_groups
            .iter()
            .filter_map(|&goal| self.get_group_path_breadth_first(start_group, &[goal]))
            .collect();
        let fewest = routes.iter().map(|route| route.len()).min()?;

        let mut reached = FxHashSet::default();
        let mut groups = Vec::new();
        for route in routes.iter().filter(|route| route.len() <= fewest + 1) {
            reached.extend(route.goal());
            groups.extend_from_slice(route.path());
        }
        groups.sort_unstable();
        groups.dedup();

        let corridor = self.corridor(&groups);
        let tile_goals: FxHashSet<IVec3> = goals
            .iter()
            .filter(|(_, id)| reached.contains(id))
            .map(|&(pos, _)| pos)
            .collect();
        let space = TileSpace::new(self, UnitPath::STANDARD).within(&corridor);

        timed!("Tile breadth first search", {
            find_path(&space, start, &tile_goals, SearchOrder::BreadthFirst)
        })
    }

    /// Fewest-hops path over the NodeGroup graph to the nearest of `goals`.
    pub fn get_group_path_breadth_first(
        &self,
        start: GroupId,
        goals: &[GroupId],
    ) -> Option<Path<GroupId>> {
        let goals: FxHashSet<GroupId> = goals.iter().copied().collect();
        let space = GroupSpace::new(self, UnitPath::STANDARD);

        timed!("Group breadth first search", {
            find_path(&space, start, &goals, SearchOrder::BreadthFirst)
        })
    }

    /// Every tile's packed color.
    pub fn to_voxels(&self) -> VoxelData {
        let size = self.size;
        let colors = Array3::from_shape_fn(
            (size.x as usize, size.y as usize, size.z as usize),
            |(x, y, z)| self.get_voxel(IVec3::new(x as i32, y as i32, z as i32)),
        );

        VoxelData::from_colors(IVec3::ZERO, colors)
    }

    /// Like [`Terrain::to_voxels`], with every NodeGroup's tiles painted in a color from a
    /// fixed debug palette. The terrain itself is unchanged.
    pub fn to_voxels_debug(&self) -> VoxelData {
        let mut data = self.to_voxels();
        let mut counter = 0;

        for chunk in &self.chunks {
            chunk.for_each_node_group(|_, group| {
                let color = DEBUG_COLORS[counter % DEBUG_COLORS.len()];
                for &pos in group.tiles() {
                    data.set_color(pos, color);
                }
                counter += 1;
            });
        }

        data
    }

    /// Write the terrain as a single layer `.qb` file.
    pub fn qb_save(&self, path: impl AsRef<FilePath>) -> Result<()> {
        qb::write_qb(path, &self.to_voxels())
    }

    /// Write the terrain with NodeGroups painted over it. Not meant to be read back.
    pub fn qb_save_debug(&self, path: impl AsRef<FilePath>) -> Result<()> {
        qb::write_qb(path, &self.to_voxels_debug())
    }
}

fn map_chunks_mut<T, F>(chunks: &mut [Chunk], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut Chunk) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        chunks.par_iter_mut().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks.iter_mut().map(f).collect()
    }
}
