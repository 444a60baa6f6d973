//! The `Tile` voxel cell.
use crate::{
    biome::GrassSettings,
    material::{Material, AIR_ID},
    ColorId, MaterialId,
};

/// A single voxel. Its position is implicit in where its chunk stores it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    material: MaterialId,
    color: ColorId,
    grow_high: u8,
    grow_low: u8,
    grass: bool,
    solid: bool,
}

impl Tile {
    pub fn new(material: &Material, color: ColorId) -> Self {
        let mut tile = Tile::default();
        tile.set_material(material, color);
        tile
    }

    pub fn material_id(&self) -> MaterialId {
        self.material
    }

    pub fn color_id(&self) -> ColorId {
        self.color
    }

    pub fn is_solid(&self) -> bool {
        self.solid
    }

    pub fn is_grass(&self) -> bool {
        self.grass
    }

    /// Material and color packed as `material << 8 | color`, 0 for air.
    pub fn mat_color_id(&self) -> u16 {
        if self.material == AIR_ID {
            return 0;
        }

        ((self.material as u16) << 8) | self.color as u16
    }

    /// Replace the material. Solidity follows the material and grass is lost.
    /// A color outside the new palette falls back to 0.
    pub fn set_material(&mut self, material: &Material, color: ColorId) {
        self.material = material.id;
        self.solid = material.solid;
        self.grass = false;
        self.grow_high = 0;
        self.grow_low = 0;
        self.color = 0;
        self.set_color_id(color, material);
    }

    /// Recolor within the current palette. Out of palette ids are ignored.
    pub fn set_color_id(&mut self, color: ColorId, material: &Material) {
        if material.has_color(color) {
            self.color = color;
        }
    }

    /// Turn this tile to grass if it is made of the grass material.
    pub fn try_grow_grass(&mut self, settings: &GrassSettings) -> bool {
        if self.material != settings.material {
            return false;
        }

        self.grass = true;
        if let Some(&color) = settings.gradient.first() {
            self.color = color;
        }
        true
    }

    pub fn grow_high(&self) -> u8 {
        self.grow_high
    }

    pub fn grow_low(&self) -> u8 {
        self.grow_low
    }

    pub fn set_grow_high(&mut self, value: i32) {
        self.grow_high = value.clamp(0, u8::MAX as i32) as u8;
    }

    pub fn set_grow_low(&mut self, value: i32) {
        self.grow_low = value.clamp(0, u8::MAX as i32) as u8;
    }

    /// Pick this grass tile's color from both growth distances.
    pub fn set_grass_color(&mut self, settings: &GrassSettings) {
        if !self.grass || settings.gradient.is_empty() {
            return;
        }

        let len = settings.gradient.len() as i32;
        let mid = settings.midpoint as i32;
        let high_inf = (len - self.grow_high as i32 - 1).clamp(0, len - 1);
        let low_inf = (self.grow_low as i32).clamp(0, len - 1);

        let index = if low_inf >= high_inf || low_inf >= mid {
            low_inf
        } else if high_inf <= mid {
            high_inf
        } else {
            mid.clamp(0, len - 1)
        };

        self.color = settings.gradient[index as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Color;

    fn dirt() -> Material {
        Material::new(
            1,
            "Dirt",
            true,
            vec![
                Color::new("Grass 0", 0x1e5e1eff),
                Color::new("Grass 1", 0x2e7e2eff),
                Color::new("Grass 2", 0x3e9e3eff),
                Color::new("Grass 3", 0x4ebe4eff),
                Color::new("Brown", 0x5a3a1fff),
            ],
        )
    }

    fn grass_settings() -> GrassSettings {
        GrassSettings {
            material: 1,
            gradient: vec![0, 1, 2, 3],
            midpoint: 2,
        }
    }

    #[test]
    fn test_set_material_tracks_solidity() {
        let mut tile = Tile::new(&Material::air(), 0);
        assert!(!tile.is_solid());
        assert_eq!(tile.mat_color_id(), 0);

        tile.set_material(&dirt(), 4);
        assert!(tile.is_solid());
        assert_eq!(tile.material_id(), 1);
        assert_eq!(tile.color_id(), 4);
        assert_eq!(tile.mat_color_id(), 0x0104);
    }

    #[test]
    fn test_color_outside_palette_ignored() {
        let dirt = dirt();
        let mut tile = Tile::new(&dirt, 9);
        assert_eq!(tile.color_id(), 0);

        tile.set_color_id(3, &dirt);
        assert_eq!(tile.color_id(), 3);

        tile.set_color_id(200, &dirt);
        assert_eq!(tile.color_id(), 3);
    }

    #[test]
    fn test_grow_data_clamped() {
        let mut tile = Tile::default();
        tile.set_grow_high(-4);
        tile.set_grow_low(1000);

        assert_eq!(tile.grow_high(), 0);
        assert_eq!(tile.grow_low(), 255);
    }

    #[test]
    fn test_grass_only_on_grass_material() {
        let settings = grass_settings();
        let stone_material = Material::new(2, "Stone", true, vec![Color::new("Grey", 0x808080ff)]);
        let mut stone = Tile::new(&stone_material, 0);
        assert!(!stone.try_grow_grass(&settings));
        assert!(!stone.is_grass());

        let mut dirt = Tile::new(&dirt(), 4);
        assert!(dirt.try_grow_grass(&settings));
        assert!(dirt.is_grass());
        assert_eq!(dirt.color_id(), 0);
    }

    #[test]
    fn test_grass_color_gradient() {
        let settings = grass_settings();
        let mut tile = Tile::new(&dirt(), 0);
        tile.try_grow_grass(&settings);

        // Both distances saturated: the low field wins.
        tile.set_grow_low(3);
        tile.set_grow_high(3);
        tile.set_grass_color(&settings);
        assert_eq!(tile.color_id(), 3);

        // Close to an open edge, close to a wall: the wall side picks the color.
        tile.set_grow_low(0);
        tile.set_grow_high(2);
        tile.set_grass_color(&settings);
        assert_eq!(tile.color_id(), 1);

        // Equal influence.
        tile.set_grow_low(1);
        tile.set_grow_high(2);
        tile.set_grass_color(&settings);
        assert_eq!(tile.color_id(), 1);

        // Neither field reaches past the midpoint.
        tile.set_grow_low(1);
        tile.set_grow_high(0);
        tile.set_grass_color(&settings);
        assert_eq!(tile.color_id(), 2);
    }
}
