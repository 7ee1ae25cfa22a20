//! Chunk routing (half of C4): resolves a node id/depth to the chunk that
//! should hold its [`Tube`] — the single always-resident [`BaseChunk`], or
//! one of the on-demand [`ColdChunk`]s reached through a [`ChunkStore`].
//!
//! On-disk layout, compression and any real persistent backing for cold
//! chunks are out of scope for this crate; this module only owns the
//! routing decision (which chunk does this id belong to) and the trait
//! boundary a real store implements against. [`InMemoryChunkStore`] is a
//! minimal in-process stand-in so the engine is exercisable end to end
//! without one.

use crate::cell::{DataPool, InfoPool, Tube};
use crate::error::Result;
use crate::id::Id;
use crate::structure::Structure;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sparse, in-memory storage for the tubes belonging to one chunk's span of
/// depths. Entwine additionally distinguishes a contiguous (array-backed)
/// representation for densely-populated chunks; that layout choice is
/// persistence-oriented and out of scope here, so every chunk uses this one
/// sparse representation.
pub struct Chunk {
    tubes: RwLock<HashMap<Id, Arc<Tube>>>,
}

impl Chunk {
    /// Builds an empty chunk.
    pub fn new() -> Self {
        Self { tubes: RwLock::new(HashMap::new()) }
    }

    /// Returns the tube for `id`, creating one backed by `pool` if absent.
    pub fn tube(&self, id: &Id, pool: &InfoPool) -> Arc<Tube> {
        if let Some(tube) = self.tubes.read().get(id) {
            return tube.clone();
        }
        let mut tubes = self.tubes.write();
        tubes.entry(id.clone()).or_insert_with(|| Arc::new(Tube::new(pool.clone()))).clone()
    }

    /// Number of distinct node ids currently holding a tube in this chunk.
    pub fn len(&self) -> usize {
        self.tubes.read().len()
    }

    /// Whether this chunk holds no tubes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `tube` at `id`, replacing any existing tube there. Used when
    /// reconstructing a chunk from saved bytes.
    fn insert(&self, id: Id, tube: Arc<Tube>) {
        let _ = self.tubes.write().insert(id, tube);
    }

    /// Removes and returns every `(id, tube)` pair currently held, leaving
    /// this chunk empty.
    pub fn drain(&self) -> Vec<(Id, Arc<Tube>)> {
        self.tubes.write().drain().collect()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// The single chunk spanning `structure.base_index_begin..structure.base_index_end()`,
/// always resident for the lifetime of the tree.
pub struct BaseChunk {
    chunk: Chunk,
}

impl BaseChunk {
    /// Builds an empty base chunk.
    pub fn new() -> Self {
        Self { chunk: Chunk::new() }
    }

    /// Returns the tube for `id`, creating one backed by `pool` if absent.
    pub fn tube(&self, id: &Id, pool: &InfoPool) -> Arc<Tube> {
        self.chunk.tube(id, pool)
    }

    /// Number of distinct node ids currently holding a tube in this chunk.
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    /// Whether this chunk holds no tubes at all.
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// Removes and returns every `(id, tube)` pair currently held, leaving
    /// this chunk empty. Used by [`crate::registry::Registry::save`] to
    /// flush and release the base range.
    pub fn drain(&self) -> Vec<(Id, Arc<Tube>)> {
        self.chunk.drain()
    }

    /// Reconstructs a base chunk from the concatenated tube records written
    /// by repeated calls to [`Tube::save_base`] (e.g. the bytes
    /// [`crate::registry::Registry::save`] returns).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::CorruptChunk`] if any tube record fails
    /// to parse.
    pub fn load(bytes: &[u8], info_pool: &InfoPool, data_pool: &DataPool) -> Result<BaseChunk> {
        let base = BaseChunk::new();
        let mut cursor = 0usize;
        while cursor < bytes.len() {
            let (tube_id, tube) = Tube::from_base_bytes(bytes, &mut cursor, info_pool, data_pool)?;
            base.chunk.insert(Id::from_u64(tube_id), Arc::new(tube));
        }
        Ok(base)
    }
}

impl Default for BaseChunk {
    fn default() -> Self {
        Self::new()
    }
}

/// An on-demand chunk somewhere in the cold range, reference-counted by
/// [`crate::clipper::Clipper`]s currently holding it open.
pub struct ColdChunk {
    chunk: Chunk,
    refs: AtomicUsize,
}

impl ColdChunk {
    /// Builds an empty, unreferenced cold chunk.
    pub fn new() -> Self {
        Self { chunk: Chunk::new(), refs: AtomicUsize::new(0) }
    }

    /// Returns the tube for `id`, creating one backed by `pool` if absent.
    pub fn tube(&self, id: &Id, pool: &InfoPool) -> Arc<Tube> {
        self.chunk.tube(id, pool)
    }

    /// Registers one more live reference, returning the count after the increment.
    pub fn add_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases one reference, returning the count after the decrement.
    ///
    /// # Panics
    ///
    /// Panics if called more times than [`ColdChunk::add_ref`] (an unbalanced
    /// ref/unref pair is a bug in the calling [`crate::clipper::Clipper`]).
    pub fn release_ref(&self) -> usize {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "ColdChunk ref count underflow");
        prev - 1
    }

    /// The current live reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl Default for ColdChunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the cold chunk `id` belongs to: the ancestor of `id` at the
/// depth where the cold range begins. Every id that descends from the same
/// node at that depth shares one chunk.
pub fn cold_chunk_id(id: &Id, depth: usize, structure: &Structure) -> Id {
    let boundary = structure.base_index_end();
    debug_assert!(depth >= boundary, "cold_chunk_id called above the cold range");
    id.ancestor(depth - boundary)
}

/// The trait boundary a real cold-chunk store implements. This crate only
/// ships [`InMemoryChunkStore`], a process-local stand-in; a production
/// deployment backs this with an actual on-disk or object-store layout
/// (explicitly out of scope here).
pub trait ChunkStore: Send + Sync {
    /// Returns the chunk rooted at `chunk_id`, if it has been materialized.
    fn try_get(&self, chunk_id: &Id) -> Option<Arc<ColdChunk>>;

    /// Stores (or replaces) the chunk rooted at `chunk_id`.
    fn put(&self, chunk_id: &Id, chunk: Arc<ColdChunk>);

    /// Whether a chunk rooted at `chunk_id` currently exists in the store.
    fn exists(&self, chunk_id: &Id) -> bool {
        self.try_get(chunk_id).is_some()
    }
}

/// A process-local [`ChunkStore`] backed by a `HashMap`. Chunks are never
/// evicted; real deployments would page cold chunks out to disk or an
/// object store once their [`ColdChunk::ref_count`] drops to zero, which
/// this crate's Non-goals explicitly leave to the surrounding system.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<Id, Arc<ColdChunk>>>,
}

impl InMemoryChunkStore {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn try_get(&self, chunk_id: &Id) -> Option<Arc<ColdChunk>> {
        self.chunks.read().get(chunk_id).cloned()
    }

    fn put(&self, chunk_id: &Id, chunk: Arc<ColdChunk>) {
        let _ = self.chunks.write().insert(chunk_id.clone(), chunk);
    }
}

/// Fetches the cold chunk for `chunk_id`, materializing a fresh one in
/// `store` on first access.
pub fn get_or_create_cold_chunk(store: &dyn ChunkStore, chunk_id: &Id) -> Arc<ColdChunk> {
    if let Some(chunk) = store.try_get(chunk_id) {
        return chunk;
    }
    let chunk = Arc::new(ColdChunk::new());
    store.put(chunk_id, chunk.clone());
    chunk
}
