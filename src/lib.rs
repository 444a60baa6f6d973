//! Chunked voxel terrain with hierarchical NodeGroup pathfinding.
//!
//! A [`terrain::Terrain`] stores tiles in 16³ chunks. Each chunk flood fills its standable
//! tiles into NodeGroups, which are linked across chunk borders into a coarse graph.
//! Path queries search that graph for a corridor first and then run a tile level
//! search restricted to the corridor.
use std::cmp::Ordering;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

mod adjacent;
pub mod biome;
pub mod chunk;
pub mod error;
pub mod generation;
mod macros;
pub mod material;
pub mod node_group;
pub mod path;
pub mod qb;
mod search;
pub mod terrain;
pub mod tile;
pub mod unit_path;

#[cfg(test)]
pub(crate) mod test_utils;

pub mod prelude {
    pub use crate::adjacent::{AdjacentIterator, ADJACENT_OFFSETS};
    pub use crate::biome::{Biome, BiomeBuilder, GrassSettings};
    pub use crate::error::{Result, TerrainError};
    pub use crate::generation::{
        AddToTop, HeightMode, HeightRule, MacroMap, StampGenerator, StampPlacement, TileStamp,
    };
    pub use crate::material::{Color, ColorMap, Material, MaterialGroup, AIR_ID};
    pub use crate::node_group::{GroupId, NodeGroup};
    pub use crate::path::Path;
    pub use crate::qb::VoxelData;
    pub use crate::search::{DIAGONAL_COST, ORTHOGONAL_COST, VERTICAL_COST};
    pub use crate::terrain::{EditPolicy, Terrain, TerrainSettings, TerrainSettingsBuilder};
    pub use crate::tile::Tile;
    pub use crate::unit_path::UnitPath;
    pub use crate::{ColorId, ColorInt, MaterialId, CHUNK_SIZE};
}

pub type MaterialId = u8;
pub type ColorId = u8;
/// Packed `0xRRGGBBAA` color.
pub type ColorInt = u32;

/// Side length of a cubic chunk in tiles.
pub const CHUNK_SIZE: i32 = 16;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
type FxIndexSet<K> = IndexSet<K, BuildHasherDefault<FxHasher>>;

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SmallestCostHolder<Id> {
    estimated_cost: Id,
    cost: Id,
    index: usize,
}

impl<Id: PartialEq> PartialEq for SmallestCostHolder<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.estimated_cost.eq(&other.estimated_cost) && self.cost.eq(&other.cost)
    }
}

impl<Id: Eq> Eq for SmallestCostHolder<Id> {}

impl<Id: Ord> PartialOrd for SmallestCostHolder<Id> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Id: Ord> Ord for SmallestCostHolder<Id> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.estimated_cost.cmp(&self.estimated_cost) {
            Ordering::Equal => self.cost.cmp(&other.cost),
            s => s,
        }
    }
}
