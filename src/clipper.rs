//! Per-producer lifetime management for cold chunks (C7).
//!
//! A `Clipper` is an explicit handle one producer carries while walking the
//! tree — never thread-local, so a multi-threaded producer pool can run one
//! `Clipper` per worker without any implicit global state. It ref-counts
//! every cold chunk it touches via [`ColdChunk::add_ref`] and can release
//! that interest in bulk ("clip") once the producer's working set moves on,
//! mirroring the ref/unref pairing a real cold-chunk store needs to decide
//! when a chunk is safe to page out.

use crate::chunk::{cold_chunk_id, get_or_create_cold_chunk, ChunkStore, ColdChunk};
use crate::id::Id;
use crate::structure::Structure;
use std::collections::HashMap;
use std::sync::Arc;

/// A per-producer handle that resolves and ref-counts cold chunks as a
/// producer's insertions wander the tree, releasing them all at once on
/// [`Clipper::clip`] or drop.
pub struct Clipper<'s> {
    store: &'s dyn ChunkStore,
    held: HashMap<Id, Arc<ColdChunk>>,
}

impl<'s> Clipper<'s> {
    /// Builds an empty clipper against `store`.
    pub fn new(store: &'s dyn ChunkStore) -> Self {
        Self { store, held: HashMap::new() }
    }

    /// Resolves (materializing if needed) and ref-counts the cold chunk that
    /// owns `id` at `depth`. Idempotent per chunk: acquiring the same chunk
    /// twice through one `Clipper` does not inflate its ref count, since a
    /// producer only needs to hold its own interest once no matter how many
    /// points it routes through that chunk.
    pub fn acquire(&mut self, id: &Id, depth: usize, structure: &Structure) -> Arc<ColdChunk> {
        let chunk_id = cold_chunk_id(id, depth, structure);
        if let Some(chunk) = self.held.get(&chunk_id) {
            return chunk.clone();
        }
        let chunk = get_or_create_cold_chunk(self.store, &chunk_id);
        let _ = chunk.add_ref();
        let _ = self.held.insert(chunk_id, chunk.clone());
        chunk
    }

    /// Releases this clipper's interest in every chunk it currently holds.
    /// Called automatically on drop; exposed directly so a long-lived
    /// producer can clip mid-run as its working set moves across the tree.
    pub fn clip(&mut self) {
        for (_, chunk) in self.held.drain() {
            let remaining = chunk.release_ref();
            tracing::trace!(remaining, "clipper released cold chunk reference");
        }
    }

    /// Number of distinct chunks this clipper currently holds open.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl<'s> Drop for Clipper<'s> {
    fn drop(&mut self) {
        self.clip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::InMemoryChunkStore;
    use crate::point::Dir;

    #[test]
    fn acquire_refs_once_per_distinct_chunk() {
        let store = InMemoryChunkStore::new();
        let structure = Structure::new(0, 4, true, 0, true, false, true).unwrap();
        let mut clipper = Clipper::new(&store);

        let boundary = Id::root().climb(Dir::from_index(1));
        let a = boundary.climb(Dir::from_index(0));
        let b = boundary.climb(Dir::from_index(5));

        let depth = structure.base_index_end() + 1;
        let chunk_a = clipper.acquire(&a, depth, &structure);
        let chunk_b = clipper.acquire(&b, depth, &structure);
        assert!(Arc::ptr_eq(&chunk_a, &chunk_b), "a and b share a cold-chunk boundary ancestor");
        assert_eq!(chunk_a.ref_count(), 1, "second acquire of the same chunk must not double-ref");
        assert_eq!(clipper.held_count(), 1);
    }

    #[test]
    fn clip_releases_all_held_references() {
        let store = InMemoryChunkStore::new();
        let structure = Structure::new(0, 4, true, 0, true, false, true).unwrap();
        let mut clipper = Clipper::new(&store);

        let id = Id::root().climb(Dir::from_index(3));
        let depth = structure.base_index_end() + 1;
        let chunk = clipper.acquire(&id, depth, &structure);
        assert_eq!(chunk.ref_count(), 1);

        clipper.clip();
        assert_eq!(chunk.ref_count(), 0);
        assert_eq!(clipper.held_count(), 0);
    }

    #[test]
    fn drop_clips_automatically() {
        let store = InMemoryChunkStore::new();
        let structure = Structure::new(0, 4, true, 0, true, false, true).unwrap();
        let id = Id::root().climb(Dir::from_index(3));
        let depth = structure.base_index_end() + 1;

        let chunk = {
            let mut clipper = Clipper::new(&store);
            clipper.acquire(&id, depth, &structure)
        };
        assert_eq!(chunk.ref_count(), 0);
    }
}
