//! Typed, validated configuration: depth ranges, dimensionality, pool sizing
//! and hierarchy paging knobs. The file-format glue that turns a YAML/TOML
//! document into this struct lives outside this crate (see Non-goals); this
//! crate only owns the typed shape and its validation.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Depth-range and dimensionality configuration for a single tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// First depth held in the always-resident base chunk.
    pub base_index_begin: usize,
    /// Number of depths spanned by the base chunk (`0` disables the base entirely).
    pub base_index_span: usize,
    /// Whether a cold (on-demand) tier exists below the base range.
    pub has_cold: bool,
    /// Exclusive upper bound on cold-range depths (`0` means unbounded).
    pub cold_depth_end: usize,
    /// Whether points carry a Z coordinate and octants (vs. quadrants).
    pub is3d: bool,
    /// Whether cells within a leaf are additionally discriminated by `tick`
    /// (the "stacked cells along one axis" scheme).
    pub tubular: bool,
    /// Whether a point byte-identical to the current occupant is dropped
    /// instead of displacing it or descending.
    pub discard_duplicates: bool,
}

impl Structure {
    /// Validates and builds a `Structure`. Bad combinations are rejected here
    /// rather than surfacing as a panic deep inside the engine.
    pub fn new(
        base_index_begin: usize,
        base_index_span: usize,
        has_cold: bool,
        cold_depth_end: usize,
        is3d: bool,
        tubular: bool,
        discard_duplicates: bool,
    ) -> Result<Self, Error> {
        if has_cold && cold_depth_end != 0 && cold_depth_end <= base_index_begin + base_index_span
        {
            return Err(Error::Precondition(
                "cold_depth_end must exceed the base range when cold is enabled",
            ));
        }
        Ok(Self {
            base_index_begin,
            base_index_span,
            has_cold,
            cold_depth_end,
            is3d,
            tubular,
            discard_duplicates,
        })
    }

    /// The exclusive upper bound of the base range.
    pub fn base_index_end(&self) -> usize {
        self.base_index_begin + self.base_index_span
    }

    /// Whether `depth` falls in the always-resident base range.
    pub fn is_within_base(&self, depth: usize) -> bool {
        self.base_index_span > 0 && depth >= self.base_index_begin && depth < self.base_index_end()
    }

    /// Whether `depth` falls in the on-demand cold range.
    pub fn is_within_cold(&self, depth: usize) -> bool {
        self.has_cold
            && depth >= self.base_index_end()
            && (self.cold_depth_end == 0 || depth < self.cold_depth_end)
    }

    /// Whether `depth` is addressable at all (base or cold).
    pub fn in_range(&self, depth: usize) -> bool {
        self.is_within_base(depth) || self.is_within_cold(depth)
    }
}

/// How a [`Pool`](crate::pool::Pool) behaves when its free-list and backing
/// storage are both exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMode {
    /// `acquire*` returns [`Error::Exhausted`](crate::error::Error::Exhausted).
    Bounded,
    /// `acquire*` grows the backing storage by one more block and retries.
    Unbounded,
}

/// Pool sizing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots per block. The first block is allocated eagerly; later blocks
    /// (unbounded mode only) are allocated lazily on exhaustion.
    pub block_size: usize,
    /// Maximum number of blocks a bounded pool may hold; ignored in unbounded mode.
    pub max_blocks: usize,
    /// What happens when both the free list and backing storage are exhausted.
    pub mode: PoolMode,
}

impl PoolConfig {
    /// A pool that rejects `acquire*` with [`Error::Exhausted`](crate::error::Error::Exhausted)
    /// once `max_blocks` blocks of `block_size` slots are full.
    pub fn bounded(block_size: usize, max_blocks: usize) -> Self {
        Self { block_size, max_blocks, mode: PoolMode::Bounded }
    }

    /// A pool that grows by one more `block_size`-slot block whenever it runs out of room.
    pub fn unbounded(block_size: usize) -> Self {
        Self { block_size, max_blocks: usize::MAX, mode: PoolMode::Unbounded }
    }
}

/// Hierarchy paging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// The depth at which hierarchy accounting begins (matches Entwine's
    /// convention of skipping the shallowest, always-dense levels).
    pub depth_begin: usize,
    /// Number of consecutive depths serialized together as one paging slice.
    pub step: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self { depth_begin: 6, step: 8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> Structure {
        Structure::new(0, 4, true, 20, true, false, true).unwrap()
    }

    #[test]
    fn base_and_cold_ranges_partition_depths() {
        let s = structure();
        assert!(s.is_within_base(0));
        assert!(s.is_within_base(3));
        assert!(!s.is_within_base(4));
        assert!(s.is_within_cold(4));
        assert!(s.is_within_cold(19));
        assert!(!s.is_within_cold(20));
        assert!(s.in_range(4));
        assert!(!s.in_range(20));
    }

    #[test]
    fn cold_depth_end_zero_is_unbounded() {
        let s = Structure::new(0, 4, true, 0, true, false, true).unwrap();
        assert!(s.is_within_cold(10_000));
    }

    #[test]
    fn rejects_cold_end_inside_base_range() {
        let err = Structure::new(0, 4, true, 2, true, false, true);
        assert!(matches!(err, Err(Error::Precondition(_))));
    }
}
