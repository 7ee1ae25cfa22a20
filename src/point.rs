//! The point type and the octant/quadrant direction the engine navigates by.

use serde::{Deserialize, Serialize};

/// A 2D or 3D position extracted from a point record.
///
/// `z` is ignored whenever the enclosing [`Structure`](crate::structure::Structure)
/// is configured for 2D.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate, ignored by a 2D [`Structure`](crate::structure::Structure).
    pub z: f64,
}

impl Point {
    /// Builds a 3D point.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Builds a 2D point (`z` defaults to `0.0` and is never read by a 2D `Structure`).
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Squared Euclidean distance in 3D.
    pub fn sq_dist_3d(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Squared Euclidean distance in 2D (ignores `z`).
    pub fn sq_dist_2d(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Squared distance to `other`, 2D or 3D per `is3d`.
    pub fn sq_dist(&self, other: &Point, is3d: bool) -> f64 {
        if is3d {
            self.sq_dist_3d(other)
        } else {
            self.sq_dist_2d(other)
        }
    }
}

/// One of up to eight octants (the low three bits of [`Id`](crate::id::Id)'s child
/// index), or one of four quadrants when the enclosing tree is 2D.
///
/// Bit 0 is the X half, bit 1 is the Y half, bit 2 is the Z half (unused in 2D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dir(u8);

impl Dir {
    /// Builds a `Dir` from its integral child index (`0..8`, or `0..4` in 2D).
    ///
    /// # Panics
    ///
    /// Panics if `index >= 8`.
    pub fn from_index(index: u8) -> Self {
        assert!(index < 8, "direction index out of range: {index}");
        Dir(index)
    }

    /// The integral child index this direction corresponds to.
    pub fn to_index(self) -> u8 {
        self.0
    }

    /// All eight 3D directions, in ascending index order.
    pub fn all_3d() -> [Dir; 8] {
        std::array::from_fn(|i| Dir(i as u8))
    }

    /// All four 2D directions, in ascending index order.
    pub fn all_2d() -> [Dir; 4] {
        std::array::from_fn(|i| Dir(i as u8))
    }

    /// The tie-break rule used everywhere the tree is navigated: a coordinate
    /// exactly equal to its axis midpoint resolves to the *upper* half on
    /// that axis. This function is the single source of truth for that rule;
    /// nothing else in the crate re-derives it.
    pub fn of(point: &Point, mid: &Point, is3d: bool) -> Dir {
        let mut index = 0u8;
        if point.x >= mid.x {
            index |= 0b001;
        }
        if point.y >= mid.y {
            index |= 0b010;
        }
        if is3d && point.z >= mid.z {
            index |= 0b100;
        }
        Dir(index)
    }

    fn bit(self, shift: u8) -> bool {
        (self.0 >> shift) & 1 == 1
    }

    /// Whether this direction selects the upper half on the X axis.
    pub fn x_upper(self) -> bool {
        self.bit(0)
    }

    /// Whether this direction selects the upper half on the Y axis.
    pub fn y_upper(self) -> bool {
        self.bit(1)
    }

    /// Whether this direction selects the upper half on the Z axis (3D only).
    pub fn z_upper(self) -> bool {
        self.bit(2)
    }
}
