//! The point-record schema interface consumed by the engine.
//!
//! Actual schema/dimension registries (and the point-source parser that
//! decodes bytes against one) are out of scope for this crate — see the
//! Non-goals in SPEC_FULL.md. `SimpleSchema` exists only so the engine is
//! testable on its own.

use crate::point::Point;
use serde::{Deserialize, Serialize};

/// Describes one field of a point record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimInfo {
    /// The field's name, e.g. `"X"` or `"Intensity"`.
    pub name: String,
    /// Byte offset of this field within one record.
    pub offset: usize,
    /// Byte width of this field.
    pub size: usize,
}

/// The minimal interface the engine needs from a point record layout: its
/// fixed byte width and how to extract a geometric position from a record's
/// raw bytes.
pub trait Schema: Send + Sync {
    /// The fixed byte width of one point record under this schema.
    fn point_size(&self) -> usize;

    /// The fields this schema declares, in on-disk order.
    fn dims(&self) -> &[DimInfo];

    /// Extracts the geometric position from one record's raw bytes.
    ///
    /// # Panics
    ///
    /// May panic if `bytes.len() != self.point_size()`.
    fn extract(&self, bytes: &[u8]) -> Point;
}

/// A schema with `x`, `y`, `z` stored as consecutive little-endian `f64`
/// fields at the front of the record, followed by `extra_bytes` of opaque
/// payload. Good enough to drive the engine end to end without a real
/// point-source parser.
#[derive(Debug, Clone)]
pub struct SimpleSchema {
    dims: Vec<DimInfo>,
    point_size: usize,
}

impl SimpleSchema {
    /// Builds a schema with `extra_bytes` of opaque payload after the fixed
    /// `x`/`y`/`z` fields.
    pub fn new(extra_bytes: usize) -> Self {
        let dims = vec![
            DimInfo { name: "X".into(), offset: 0, size: 8 },
            DimInfo { name: "Y".into(), offset: 8, size: 8 },
            DimInfo { name: "Z".into(), offset: 16, size: 8 },
        ];
        Self { dims, point_size: 24 + extra_bytes }
    }
}

impl Schema for SimpleSchema {
    fn point_size(&self) -> usize {
        self.point_size
    }

    fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    fn extract(&self, bytes: &[u8]) -> Point {
        assert_eq!(bytes.len(), self.point_size);
        let x = f64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let y = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let z = f64::from_le_bytes(bytes[16..24].try_into().unwrap());
        Point::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_schema_round_trips_position() {
        let schema = SimpleSchema::new(4);
        assert_eq!(schema.point_size(), 28);

        let mut bytes = vec![0u8; 28];
        bytes[0..8].copy_from_slice(&1.5f64.to_le_bytes());
        bytes[8..16].copy_from_slice(&2.5f64.to_le_bytes());
        bytes[16..24].copy_from_slice(&3.5f64.to_le_bytes());

        let p = schema.extract(&bytes);
        assert_eq!(p, Point::new(1.5, 2.5, 3.5));
    }
}
