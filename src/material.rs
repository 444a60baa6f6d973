//! Materials, their color palettes, and the groups used to filter stamps and top-layer rules.
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{Result, TerrainError},
    ColorId, ColorInt, MaterialId,
};

/// Material id reserved for empty space.
pub const AIR_ID: MaterialId = 0;

/// A named palette entry. `hex` is `0xRRGGBBAA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Color {
    pub name: String,
    pub hex: ColorInt,
}

impl Color {
    pub fn new(name: impl Into<String>, hex: ColorInt) -> Self {
        Color {
            name: name.into(),
            hex,
        }
    }
}

/// A terrain material. Tiles reference materials by id and pick a color from `colors`.
#[derive(Debug, Clone)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub colors: Vec<Color>,
    pub solid: bool,
    pub speed_multiplier: f32,
}

impl Material {
    pub fn new(id: MaterialId, name: impl Into<String>, solid: bool, colors: Vec<Color>) -> Self {
        Material {
            id,
            name: name.into(),
            colors,
            solid,
            speed_multiplier: 1.0,
        }
    }

    /// The default empty-space material with a single transparent color.
    pub fn air() -> Self {
        Material::new(AIR_ID, "Air", false, vec![Color::new("Clear", 0)])
    }

    pub fn with_speed_multiplier(mut self, speed_multiplier: f32) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    /// Packed color of `color_id`, or 0 when the id is outside the palette.
    pub fn hex(&self, color_id: ColorId) -> ColorInt {
        self.colors
            .get(color_id as usize)
            .map(|color| color.hex)
            .unwrap_or(0)
    }

    pub fn has_color(&self, color_id: ColorId) -> bool {
        (color_id as usize) < self.colors.len()
    }
}

/// A set of materials, some accepted with any color and some only with specific colors.
#[derive(Debug, Clone, Default)]
pub struct MaterialGroup {
    any_color: FxHashSet<MaterialId>,
    with_colors: FxHashMap<MaterialId, FxHashSet<ColorId>>,
}

impl MaterialGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `material` with any color.
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.any_color.insert(material);
        self
    }

    /// Accept `material` only when the tile has one of `colors`.
    pub fn with_material_colors(
        mut self,
        material: MaterialId,
        colors: impl IntoIterator<Item = ColorId>,
    ) -> Self {
        self.with_colors.entry(material).or_default().extend(colors);
        self
    }

    pub fn material_in(&self, material: MaterialId, color: ColorId) -> bool {
        if self.any_color.contains(&material) {
            return true;
        }

        self.with_colors
            .get(&material)
            .is_some_and(|colors| colors.contains(&color))
    }

    pub fn is_empty(&self) -> bool {
        self.any_color.is_empty() && self.with_colors.is_empty()
    }
}

/// Reverse lookup from packed colors to the material and color id that produce them,
/// used by voxel import. Color 0 is always air.
#[derive(Debug, Clone)]
pub struct ColorMap {
    inverse: FxHashMap<ColorInt, (MaterialId, ColorId)>,
}

impl ColorMap {
    /// Fails when a color of a non-air material is not fully opaque or appears twice.
    pub fn new<'a>(materials: impl IntoIterator<Item = &'a Material>) -> Result<Self> {
        let mut inverse = FxHashMap::default();
        inverse.insert(0, (AIR_ID, 0));

        for material in materials {
            if material.id == AIR_ID {
                continue;
            }

            for (color_id, color) in material.colors.iter().enumerate() {
                if color.hex & 0xff != 0xff {
                    return Err(TerrainError::InvalidBiome(format!(
                        "color {} of {} is not opaque ({:#010x})",
                        color.name, material.name, color.hex
                    )));
                }

                if let Some(&(other, other_color)) = inverse.get(&color.hex) {
                    return Err(TerrainError::InvalidBiome(format!(
                        "color {:#010x} of {} is already used by material {} color {}",
                        color.hex, material.name, other, other_color
                    )));
                }

                inverse.insert(color.hex, (material.id, color_id as ColorId));
            }
        }

        Ok(ColorMap { inverse })
    }

    /// Material and color id that produce `color`.
    pub fn lookup(&self, color: ColorInt) -> Option<(MaterialId, ColorId)> {
        self.inverse.get(&color).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirt() -> Material {
        Material::new(
            1,
            "Dirt",
            true,
            vec![Color::new("Brown", 0x5a3a1fff), Color::new("Dark Brown", 0x3d2814ff)],
        )
    }

    #[test]
    fn test_material_group_membership() {
        let group = MaterialGroup::new()
            .with_material(AIR_ID)
            .with_material_colors(1, [1]);

        assert!(group.material_in(AIR_ID, 0));
        assert!(group.material_in(AIR_ID, 7));
        assert!(group.material_in(1, 1));
        assert!(!group.material_in(1, 0));
        assert!(!group.material_in(2, 0));
        assert!(!group.is_empty());
        assert!(MaterialGroup::new().is_empty());
    }

    #[test]
    fn test_color_map_reserves_air() {
        let materials = [Material::air(), dirt()];
        let map = ColorMap::new(&materials).unwrap();

        assert_eq!(map.lookup(0x5a3a1fff), Some((1, 0)));
        assert_eq!(map.lookup(0x3d2814ff), Some((1, 1)));
        assert_eq!(map.lookup(0), Some((AIR_ID, 0)));
        assert_eq!(map.lookup(0x12345678), None);
    }

    #[test]
    fn test_color_map_rejects_shared_colors() {
        let mud = Material::new(2, "Mud", true, vec![Color::new("Wet", 0x5a3a1fff)]);
        let materials = [Material::air(), dirt(), mud];

        assert!(matches!(
            ColorMap::new(&materials),
            Err(TerrainError::InvalidBiome(_))
        ));
    }

    #[test]
    fn test_color_map_rejects_translucent_colors() {
        let glass = Material::new(2, "Glass", true, vec![Color::new("Clear", 0x88ccff80)]);
        let materials = [Material::air(), dirt(), glass];

        assert!(matches!(
            ColorMap::new(&materials),
            Err(TerrainError::InvalidBiome(_))
        ));
    }

    #[test]
    fn test_hex_outside_palette() {
        let dirt = dirt();

        assert_eq!(dirt.hex(1), 0x3d2814ff);
        assert_eq!(dirt.hex(5), 0);
        assert!(dirt.has_color(1));
        assert!(!dirt.has_color(2));
    }
}
