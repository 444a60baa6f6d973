//! Procedural generation inputs: randomized stamp volumes, top-layer rules, and the macro map.
use std::hash::{Hash, Hasher};

use bevy::math::{IVec2, IVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustc_hash::FxHasher;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{material::MaterialGroup, ColorId, MaterialId};

/// An axis-aligned box of material to write into the terrain. `max` is exclusive.
#[derive(Debug, Clone)]
pub struct TileStamp {
    pub material: MaterialId,
    pub color: ColorId,
    /// When set, only tiles whose current material and color are in the group get overwritten.
    pub filter: Option<MaterialGroup>,
    pub min: IVec3,
    pub max: IVec3,
}

impl TileStamp {
    pub fn new(material: MaterialId, color: ColorId, min: IVec3, max: IVec3) -> Self {
        TileStamp {
            material,
            color,
            filter: None,
            min,
            max,
        }
    }

    pub fn with_filter(mut self, filter: MaterialGroup) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn translated(mut self, offset: IVec3) -> Self {
        self.min += offset;
        self.max += offset;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpge(self.max).any()
    }
}

/// Where a generator places its stamps inside one macro area, relative to the area center.
#[derive(Debug, Clone, IntoStaticStr)]
pub enum StampPlacement {
    /// One stamp per listed point.
    Position(Vec<IVec2>),
    /// `number` stamps spread evenly around a square of half-side `radius`.
    Radius { radius: i32, number: usize },
    /// `number * number` stamps on a regular grid covering `-radius..radius`.
    Grid { radius: i32, number: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

/// Produces randomized [`TileStamp`]s for one macro area.
#[derive(Debug, Clone)]
pub struct StampGenerator {
    pub placement: StampPlacement,
    pub material: MaterialId,
    pub color: ColorId,
    pub filter: Option<MaterialGroup>,
    pub width: i32,
    pub width_variance: i32,
    pub height: i32,
    pub height_variance: i32,
    pub center_variance: i32,
}

impl StampGenerator {
    pub fn new(placement: StampPlacement, material: MaterialId, color: ColorId) -> Self {
        StampGenerator {
            placement,
            material,
            color,
            filter: None,
            width: 1,
            width_variance: 0,
            height: 1,
            height_variance: 0,
            center_variance: 0,
        }
    }

    pub fn with_filter(mut self, filter: MaterialGroup) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_width(mut self, width: i32, variance: i32) -> Self {
        self.width = width;
        self.width_variance = variance.abs();
        self
    }

    pub fn with_height(mut self, height: i32, variance: i32) -> Self {
        self.height = height;
        self.height_variance = variance.abs();
        self
    }

    pub fn with_center_variance(mut self, variance: i32) -> Self {
        self.center_variance = variance.abs();
        self
    }

    /// Number of stamps this generator emits per area.
    pub fn sub_regions(&self) -> usize {
        match &self.placement {
            StampPlacement::Position(points) => points.len(),
            StampPlacement::Radius { number, .. } => *number,
            StampPlacement::Grid { number, .. } => number * number,
        }
    }

    /// Inclusive range the center of stamp `sub_region` is drawn from.
    pub(crate) fn center_range(&self, sub_region: usize) -> (IVec2, IVec2) {
        let center = match &self.placement {
            StampPlacement::Position(points) => {
                let point = points[sub_region];
                return (point, point);
            }
            StampPlacement::Radius { radius, number } => {
                let radius = *radius;
                let distance = (8 * radius) as f64 / *number as f64 * sub_region as f64;
                let along = distance % (2 * radius) as f64;
                let side = match (distance / 2.0 / radius as f64) as u8 {
                    0 => Side::Top,
                    1 => Side::Right,
                    2 => Side::Bottom,
                    _ => Side::Left,
                };

                match side {
                    Side::Top => IVec2::new(-radius, -radius + along as i32),
                    Side::Right => IVec2::new(-radius + along as i32, radius),
                    Side::Bottom => IVec2::new(radius, radius - along as i32),
                    Side::Left => IVec2::new(radius - along as i32, -radius),
                }
            }
            StampPlacement::Grid { radius, number } => {
                let n = *number;
                let step = *radius / n as i32;
                IVec2::new(
                    (1 + 2 * (sub_region % n) as i32) * step - radius,
                    (1 + 2 * (sub_region / n) as i32) * step - radius,
                )
            }
        };

        (
            center - IVec2::splat(self.center_variance),
            center + IVec2::splat(self.center_variance),
        )
    }

    /// Randomized volume for stamp `sub_region`, in area-local coordinates.
    pub fn stamp<R: Rng + ?Sized>(&self, sub_region: usize, rng: &mut R) -> TileStamp {
        let (low, high) = self.center_range(sub_region);

        let center_x = rng.random_range(low.x..=high.x);
        let center_y = rng.random_range(low.y..=high.y);

        let size_x = self.width + rng.random_range(-self.width_variance..=self.width_variance);
        let size_y = self.width + rng.random_range(-self.width_variance..=self.width_variance);

        let mut min = IVec3::new(center_x - size_x / 2, center_y - size_y / 2, 0);
        let mut max = IVec3::new(center_x + size_x / 2, center_y + size_y / 2, 0);

        // Odd sizes shift one edge down by a cell, chosen at random.
        if size_x % 2 != 0 {
            if rng.random_bool(0.5) {
                min.x -= 1;
            } else {
                max.x -= 1;
            }
        }
        if size_y % 2 != 0 {
            if rng.random_bool(0.5) {
                min.y -= 1;
            } else {
                max.y -= 1;
            }
        }

        max.z = self.height + rng.random_range(-self.height_variance..=self.height_variance);

        TileStamp {
            material: self.material,
            color: self.color,
            filter: self.filter.clone(),
            min,
            max,
        }
    }

    /// Every stamp for one area, in sub-region order.
    pub fn stamps<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<TileStamp> {
        (0..self.sub_regions())
            .map(|sub_region| self.stamp(sub_region, rng))
            .collect()
    }
}

/// How a matching [`HeightRule`] computes the new top height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HeightMode {
    /// Fill up to an absolute height.
    To,
    /// Fill a fixed number of tiles above the current top.
    Add,
}

/// Applies when the column's current top is in `start..stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRule {
    pub start: i32,
    pub stop: i32,
    pub data: i32,
    pub mode: HeightMode,
}

impl HeightRule {
    pub fn to(start: i32, stop: i32, height: i32) -> Self {
        HeightRule {
            start,
            stop,
            data: height,
            mode: HeightMode::To,
        }
    }

    pub fn add(start: i32, stop: i32, amount: i32) -> Self {
        HeightRule {
            start,
            stop,
            data: amount,
            mode: HeightMode::Add,
        }
    }

    fn contains(&self, height: i32) -> bool {
        height >= self.start && height < self.stop
    }
}

/// Top-layer adjustment applied to every column after stamping.
#[derive(Debug, Clone)]
pub struct AddToTop {
    /// Materials that count as "ground" when looking for the top of a column.
    pub above: MaterialGroup,
    /// Materials that may be replaced when the layer is added.
    pub can_overwrite: MaterialGroup,
    pub material: MaterialId,
    pub color: ColorId,
    pub rules: Vec<HeightRule>,
}

impl AddToTop {
    pub fn new(
        above: MaterialGroup,
        can_overwrite: MaterialGroup,
        material: MaterialId,
        color: ColorId,
    ) -> Self {
        AddToTop {
            above,
            can_overwrite,
            material,
            color,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: HeightRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Height the layer should reach for a column whose top is at `height`.
    /// Unchanged when no rule matches.
    pub fn final_height(&self, height: i32) -> i32 {
        match self.rules.iter().find(|rule| rule.contains(height)) {
            Some(rule) => match rule.mode {
                HeightMode::To => rule.data,
                HeightMode::Add => height + rule.data,
            },
            None => height,
        }
    }

    pub fn can_overwrite(&self, material: MaterialId, color: ColorId) -> bool {
        self.can_overwrite.material_in(material, color)
    }
}

/// Coarse map choosing which generators run in each `area_size` square of the terrain.
#[derive(Debug, Clone)]
pub struct MacroMap {
    width: u32,
    height: u32,
    tiles: Vec<u32>,
}

impl MacroMap {
    /// `tiles` is row-major with `x` varying fastest.
    pub fn new(width: u32, height: u32, tiles: Vec<u32>) -> Self {
        if tiles.len() != (width * height) as usize {
            panic!("Macro map needs exactly width * height tiles");
        }

        MacroMap {
            width,
            height,
            tiles,
        }
    }

    /// A map where every area has the same type.
    pub fn filled(width: u32, height: u32, tile_type: u32) -> Self {
        MacroMap::new(width, height, vec![tile_type; (width * height) as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_type(&self, x: u32, y: u32) -> u32 {
        self.tiles[(y * self.width + x) as usize]
    }

    /// Deterministic random source for one area.
    pub fn rng_for(&self, seed: u64, x: u32, y: u32) -> StdRng {
        let mut hasher = FxHasher::default();
        (seed ^ self.tile_type(x, y) as u64, x, y).hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish())
    }

    pub fn areas(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.width).flat_map(move |x| (0..self.height).map(move |y| (x, y)))
    }
}
