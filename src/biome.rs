//! `Biome`: the material palette and generation recipe a [`crate::terrain::Terrain`] is built from.
use rustc_hash::FxHashMap;

use crate::{
    error::{Result, TerrainError},
    generation::{AddToTop, StampGenerator, StampPlacement},
    material::{ColorMap, Material, AIR_ID},
    ColorId, ColorInt, MaterialId,
};

/// Grass growth configuration.
///
/// Tiles of `material` exposed to air become grass, and their color is chosen from
/// `gradient` by distance to walls and open edges.
#[derive(Debug, Clone)]
pub struct GrassSettings {
    pub material: MaterialId,
    /// Palette indices into `material`'s colors, darkest first.
    pub gradient: Vec<ColorId>,
    pub midpoint: usize,
}

impl GrassSettings {
    /// Length of the gradient, which also caps both growth distance fields.
    pub fn len(&self) -> usize {
        self.gradient.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradient.is_empty()
    }
}

/// Materials and generation rules for a terrain.
#[derive(Debug, Clone)]
pub struct Biome {
    materials: Vec<Material>,
    color_map: ColorMap,
    grass: Option<GrassSettings>,
    generators: Vec<StampGenerator>,
    macro_tiles: FxHashMap<u32, Vec<usize>>,
    top_layers: Vec<AddToTop>,
    area_size: u32,
    seed: u64,
}

impl Biome {
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn get_material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id as usize)
    }

    pub fn material(&self, id: MaterialId) -> Result<&Material> {
        self.get_material(id)
            .ok_or(TerrainError::UnknownMaterial(id))
    }

    pub fn air(&self) -> &Material {
        &self.materials[AIR_ID as usize]
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// Packed color of a material and color id, 0 if either is unknown.
    pub fn hex(&self, material: MaterialId, color: ColorId) -> ColorInt {
        self.get_material(material)
            .map(|material| material.hex(color))
            .unwrap_or(0)
    }

    pub fn grass(&self) -> Option<&GrassSettings> {
        self.grass.as_ref()
    }

    pub fn generators(&self) -> &[StampGenerator] {
        &self.generators
    }

    /// Generators that run in macro areas of type `macro_type`, in order.
    pub fn generators_for(&self, macro_type: u32) -> impl Iterator<Item = &StampGenerator> {
        self.macro_tiles
            .get(&macro_type)
            .into_iter()
            .flatten()
            .map(|&index| &self.generators[index])
    }

    pub fn top_layers(&self) -> &[AddToTop] {
        &self.top_layers
    }

    pub fn area_size(&self) -> u32 {
        self.area_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Builder for [`Biome`].
///
/// ```
/// use voxel_terrain::prelude::*;
///
/// let biome = BiomeBuilder::new()
///     .material(Material::new(1, "Dirt", true, vec![Color::new("Brown", 0x5a3a1fff)]))
///     .area_size(16)
///     .build()
///     .unwrap();
///
/// assert_eq!(biome.materials().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct BiomeBuilder {
    materials: Vec<Material>,
    grass: Option<GrassSettings>,
    generators: Vec<StampGenerator>,
    macro_tiles: FxHashMap<u32, Vec<usize>>,
    top_layers: Vec<AddToTop>,
    area_size: u32,
    seed: u64,
}

impl Default for BiomeBuilder {
    fn default() -> Self {
        BiomeBuilder {
            materials: Vec::new(),
            grass: None,
            generators: Vec::new(),
            macro_tiles: FxHashMap::default(),
            top_layers: Vec::new(),
            area_size: 32,
            seed: 0,
        }
    }
}

impl BiomeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material. Ids must end up dense from 0, air is added automatically if missing.
    pub fn material(mut self, material: Material) -> Self {
        self.materials.push(material);
        self
    }

    pub fn grass(mut self, grass: GrassSettings) -> Self {
        self.grass = Some(grass);
        self
    }

    /// Register a stamp generator. Returns its index through `macro_tile`.
    pub fn generator(mut self, generator: StampGenerator) -> Self {
        self.generators.push(generator);
        self
    }

    /// Run the generators at `generators` (indices in registration order) in every macro area of `macro_type`.
    pub fn macro_tile(mut self, macro_type: u32, generators: impl IntoIterator<Item = usize>) -> Self {
        self.macro_tiles
            .entry(macro_type)
            .or_default()
            .extend(generators);
        self
    }

    pub fn add_to_top(mut self, layer: AddToTop) -> Self {
        self.top_layers.push(layer);
        self
    }

    /// Side length of one macro map area in tiles.
    pub fn area_size(mut self, area_size: u32) -> Self {
        if area_size < 1 {
            panic!("Area size must be at least 1");
        }

        self.area_size = area_size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate and build the [`Biome`].
    pub fn build(mut self) -> Result<Biome> {
        if !self.materials.iter().any(|material| material.id == AIR_ID) {
            self.materials.push(Material::air());
        }

        self.materials.sort_by_key(|material| material.id);

        for (index, material) in self.materials.iter().enumerate() {
            if material.id as usize != index {
                return Err(TerrainError::InvalidBiome(format!(
                    "material ids must be unique and dense, found {} at position {}",
                    material.id, index
                )));
            }
            if material.colors.is_empty() {
                return Err(TerrainError::InvalidBiome(format!(
                    "material {} has no colors",
                    material.name
                )));
            }
        }

        if self.materials[AIR_ID as usize].solid {
            return Err(TerrainError::InvalidBiome("air must not be solid".into()));
        }

        if let Some(grass) = &self.grass {
            let material = self
                .materials
                .get(grass.material as usize)
                .ok_or(TerrainError::UnknownMaterial(grass.material))?;

            if let Some(color) = grass.gradient.iter().find(|&&c| !material.has_color(c)) {
                return Err(TerrainError::InvalidBiome(format!(
                    "grass color {} is outside the palette of {}",
                    color, material.name
                )));
            }
            if !grass.gradient.is_empty() && grass.midpoint >= grass.gradient.len() {
                return Err(TerrainError::InvalidBiome(
                    "grass midpoint must index into the gradient".into(),
                ));
            }
        }

        for generator in &self.generators {
            if generator.material as usize >= self.materials.len() {
                return Err(TerrainError::UnknownMaterial(generator.material));
            }
            match generator.placement {
                StampPlacement::Radius { radius, number } | StampPlacement::Grid { radius, number }
                    if radius <= 0 || number == 0 =>
                {
                    return Err(TerrainError::InvalidBiome(
                        "radius and grid generators need a positive radius and count".into(),
                    ));
                }
                _ => {}
            }
        }

        for layer in &self.top_layers {
            if layer.material as usize >= self.materials.len() {
                return Err(TerrainError::UnknownMaterial(layer.material));
            }
        }

        for (macro_type, indices) in &self.macro_tiles {
            if let Some(index) = indices.iter().find(|&&i| i >= self.generators.len()) {
                return Err(TerrainError::InvalidBiome(format!(
                    "macro tile {} references missing generator {}",
                    macro_type, index
                )));
            }
        }

        let color_map = ColorMap::new(&self.materials)?;

        Ok(Biome {
            materials: self.materials,
            color_map,
            grass: self.grass,
            generators: self.generators,
            macro_tiles: self.macro_tiles,
            top_layers: self.top_layers,
            area_size: self.area_size,
            seed: self.seed,
        })
    }
}
