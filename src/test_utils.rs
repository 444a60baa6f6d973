//! Shared fixtures for unit tests.
use bevy::math::{IVec3, UVec3};

use crate::{
    biome::{Biome, BiomeBuilder, GrassSettings},
    generation::TileStamp,
    material::{Color, Material},
    terrain::{EditPolicy, Terrain, TerrainSettingsBuilder},
    MaterialId,
};

pub(crate) const DIRT: MaterialId = 1;
pub(crate) const STONE: MaterialId = 2;
/// Index of the plain brown dirt color, outside the grass gradient.
pub(crate) const BROWN: u8 = 4;

pub(crate) fn test_biome() -> Biome {
    BiomeBuilder::new()
        .material(Material::new(
            DIRT,
            "Dirt",
            true,
            vec![
                Color::new("Grass 0", 0x2d5a1eff),
                Color::new("Grass 1", 0x3c7a28ff),
                Color::new("Grass 2", 0x4f9a34ff),
                Color::new("Grass 3", 0x66b844ff),
                Color::new("Brown", 0x5a3a1fff),
            ],
        ))
        .material(Material::new(
            STONE,
            "Stone",
            true,
            vec![Color::new("Grey", 0x808080ff), Color::new("Dark", 0x606060ff)],
        ))
        .grass(GrassSettings {
            material: DIRT,
            gradient: vec![0, 1, 2, 3],
            midpoint: 2,
        })
        .area_size(16)
        .build()
        .unwrap()
}

/// Terrain that is solid brown dirt below `ground` and air from `ground` up.
pub(crate) fn flat_terrain(size: UVec3, ground: i32) -> Terrain {
    let settings = TerrainSettingsBuilder::new(size.x, size.y, size.z)
        .edit_policy(EditPolicy::Deferred)
        .build();
    let mut terrain = Terrain::new(&settings, test_biome());

    terrain
        .stamp_tile_region(&TileStamp::new(
            DIRT,
            BROWN,
            IVec3::ZERO,
            IVec3::new(size.x as i32, size.y as i32, ground),
        ))
        .unwrap();
    terrain.rebuild_dirty_chunks();
    terrain.set_edit_policy(EditPolicy::Eager);
    terrain
}
