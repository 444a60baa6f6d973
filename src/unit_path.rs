//! `UnitPath` bit flags describing the shape and openness of a single move between neighbor tiles.
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use bevy::math::IVec3;

/// Movement descriptor between two neighboring tile positions.
///
/// The shape bits say what kind of move it is. `OPEN` is set only when an agent
/// can physically make the move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UnitPath(u8);

impl UnitPath {
    /// No flags; the closed, shapeless path.
    pub const NONE: UnitPath = UnitPath(0);
    /// The move can be made.
    pub const OPEN: UnitPath = UnitPath(1);
    /// Same level, one orthogonal step.
    pub const HORIZONTAL1: UnitPath = UnitPath(2);
    /// Same level, one diagonal step.
    pub const HORIZONTAL2: UnitPath = UnitPath(4);
    /// Straight up or down.
    pub const VERTICAL: UnitPath = UnitPath(8);
    /// Up or down one level plus one orthogonal step.
    pub const UP_AND_OVER: UnitPath = UnitPath(16);
    /// Up or down one level plus one diagonal step.
    pub const UP_AND_DIAGONAL: UnitPath = UnitPath(32);

    /// Every flag. Used where any move shape is acceptable, e.g. NodeGroup flood fill.
    pub const ALL: UnitPath = UnitPath(63);
    /// Open moves of every shape except up-and-diagonal.
    pub const STANDARD: UnitPath = UnitPath(31);
    /// Level moves only. Closed paths between solid tiles are what grass spreads across.
    pub const GRASS: UnitPath = UnitPath(2 | 4);

    pub const fn from_bits(bits: u8) -> Self {
        UnitPath(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Shape bits for a neighbor offset, `OPEN` not set.
    ///
    /// Each component of `offset` must be in `-1..=1`.
    pub fn shape(offset: IVec3) -> Self {
        let d = offset.abs();
        let horizontal = (d.x + d.y) << (1 + 3 * d.z);
        let vertical = d.z << 3;

        if horizontal != 0 {
            UnitPath(horizontal as u8)
        } else {
            UnitPath(vertical as u8)
        }
    }

    pub fn is_open(self) -> bool {
        self.0 & Self::OPEN.0 != 0
    }

    pub fn is_diagonal(self) -> bool {
        self.0 & Self::HORIZONTAL2.0 != 0
    }

    pub fn is_up(self) -> bool {
        self.0 & Self::VERTICAL.0 != 0
    }

    pub fn is_level(self) -> bool {
        !self.is_up()
    }

    pub fn is_horizontal(self) -> bool {
        self.0 & (Self::HORIZONTAL1.0 | Self::HORIZONTAL2.0) != 0
    }

    pub fn is_up_and_over(self) -> bool {
        self.0 & Self::UP_AND_OVER.0 != 0
    }

    pub fn is_up_and_diagonal(self) -> bool {
        self.0 & Self::UP_AND_DIAGONAL.0 != 0
    }

    pub fn open(&mut self) {
        self.0 |= Self::OPEN.0;
    }

    pub fn close(&mut self) {
        self.0 &= !Self::OPEN.0;
    }

    /// True when every flag set on `self` is also set on `mask`.
    pub fn compatible(self, mask: UnitPath) -> bool {
        self.0 & !mask.0 == 0
    }
}

impl BitAnd for UnitPath {
    type Output = UnitPath;

    fn bitand(self, rhs: Self) -> Self::Output {
        UnitPath(self.0 & rhs.0)
    }
}

impl BitAndAssign for UnitPath {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for UnitPath {
    type Output = UnitPath;

    fn bitor(self, rhs: Self) -> Self::Output {
        UnitPath(self.0 | rhs.0)
    }
}

impl BitOrAssign for UnitPath {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for UnitPath {
    type Output = UnitPath;

    fn not(self) -> Self::Output {
        UnitPath(!self.0 & Self::ALL.0)
    }
}

impl From<UnitPath> for u8 {
    fn from(path: UnitPath) -> Self {
        path.0
    }
}
