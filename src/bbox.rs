//! Axis-aligned bounding box with the single deterministic `go` operation
//! that descent (Climber, HierarchyClimber, Hierarchy::query) relies on.

use crate::point::{Dir, Point};
use serde::{Deserialize, Serialize};

/// An axis-aligned box spanning `[min, max)` conceptually (the upper bound is
/// exclusive at every depth since `go` always halves toward one side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// The box's lower corner.
    pub min: Point,
    /// The box's upper corner.
    pub max: Point,
}

impl BBox {
    /// Builds a box from explicit corners.
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// The box's midpoint on every axis.
    pub fn mid(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    /// Halves the box toward the octant/quadrant selected by `dir`, in place.
    ///
    /// Deterministic: repeated application from the root produces exactly the
    /// chunk volume for any depth, and two climbers given the same root and
    /// the same sequence of directions always agree on the resulting box.
    pub fn go(&mut self, dir: Dir) {
        let mid = self.mid();

        if dir.x_upper() {
            self.min.x = mid.x;
        } else {
            self.max.x = mid.x;
        }

        if dir.y_upper() {
            self.min.y = mid.y;
        } else {
            self.max.y = mid.y;
        }

        if dir.z_upper() {
            self.min.z = mid.z;
        } else {
            self.max.z = mid.z;
        }
    }

    /// A box narrowed toward `dir`, leaving `self` untouched.
    pub fn going(&self, dir: Dir) -> BBox {
        let mut next = *self;
        next.go(dir);
        next
    }

    /// Whether `self` fully contains `other`.
    pub fn contains(&self, other: &BBox) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Whether `self` and `other` overlap at all (touching edges count as overlap).
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}
