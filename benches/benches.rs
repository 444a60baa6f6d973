use bevy::math::IVec3;
use criterion::{criterion_group, criterion_main, Criterion};

use voxel_terrain::prelude::*;

const DIRT: MaterialId = 1;

fn biome() -> Biome {
    BiomeBuilder::new()
        .material(Material::new(
            DIRT,
            "Dirt",
            true,
            vec![Color::new("Brown", 0x5a3a1fff)],
        ))
        .area_size(16)
        .build()
        .expect("bench biome is valid")
}

/// Flat dirt floor with a few walls so the coarse graph has to route around them.
fn walled_terrain(width: u32, height: u32) -> Terrain {
    let settings = TerrainSettingsBuilder::new(width, height, 16)
        .edit_policy(EditPolicy::Deferred)
        .build();
    let mut terrain = Terrain::new(&settings, biome());

    terrain
        .stamp_tile_region(&TileStamp::new(
            DIRT,
            0,
            IVec3::ZERO,
            IVec3::new(width as i32, height as i32, 4),
        ))
        .unwrap();

    for x in (24..width as i32).step_by(32) {
        terrain
            .stamp_tile_region(&TileStamp::new(
                DIRT,
                0,
                IVec3::new(x, 0, 4),
                IVec3::new(x + 1, height as i32 - 8, 8),
            ))
            .unwrap();
    }

    terrain.rebuild_dirty_chunks();
    terrain
}

fn benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain");

    group.sample_size(10);

    group.bench_function("build_nodegroups_128x128x16", |b| {
        let mut terrain = walled_terrain(128, 128);
        b.iter(|| terrain.build_nodegroups())
    });

    let terrain = walled_terrain(128, 128);
    let start = IVec3::new(1, 1, 4);
    let goal = IVec3::new(126, 2, 4);

    group.bench_function("astar_128x128x16", |b| {
        b.iter(|| terrain.get_path_astar(start, goal))
    });

    group.bench_function("breadth_first_128x128x16", |b| {
        b.iter(|| terrain.get_path_breadth_first(start, &[goal]))
    });

    group.bench_function("edit_and_rebuild", |b| {
        let mut terrain = walled_terrain(64, 64);
        terrain.set_edit_policy(EditPolicy::Eager);
        let pos = IVec3::new(40, 40, 4);
        b.iter(|| {
            terrain.set_tile(pos, DIRT, 0).unwrap();
            terrain.set_tile(pos, AIR_ID, 0).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
