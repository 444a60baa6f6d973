//! Error type shared by terrain construction, edits and voxel file IO.
use bevy::math::{IVec3, UVec3};
use thiserror::Error;

use crate::MaterialId;

/// Errors that can abort terrain construction or a strict query.
///
/// Per-voxel permissive queries never return these, they fall back to an air sentinel.
/// Pathfinding never fails with an error either, an unreachable goal is `None`.
#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("position {position} is outside the terrain")]
    OutOfRange { position: IVec3 },

    #[error("no chunk allocated at chunk coordinate {0}")]
    MissingChunk(IVec3),

    #[error("material {0} is not defined by the biome")]
    UnknownMaterial(MaterialId),

    #[error("invalid biome: {0}")]
    InvalidBiome(String),

    #[error("voxel data has {found} entries but its size needs {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("voxel data of size {0} is empty along at least one axis")]
    EmptyVolume(UVec3),

    #[error("malformed voxel file: {0}")]
    Format(String),

    #[error("compressed voxel files are not supported (compression flag {0})")]
    UnsupportedCompression(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TerrainError>;
