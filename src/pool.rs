//! Bounded or unbounded free-list pools producing owning [`Handle`]s.
//!
//! Generalizes the teacher queue's `Node`-chaining idiom: instead of an
//! unbounded chain of fixed-size slot blocks that only ever grows, a `Pool`
//! keeps the same "blocks of slots" shape but treats each slot as a
//! borrow-checked resource that is acquired, used by exactly one owner, and
//! released back — a lock-free stack of free indices rather than a lock-free
//! queue of items.
//!
//! The free-list head is a single `AtomicU64` packing a generation counter
//! (top 32 bits) with a free-slot index (bottom 32 bits, `u32::MAX` meaning
//! "empty"). The generation counter exists solely to close the ABA window: a
//! slot index can be popped and pushed back onto the head many times, and
//! without a generation tag a stale `compare_exchange` could believe the
//! free-list shape hasn't changed when it has.
//!
//! Growing the backing storage (unbounded mode, or the eager first block)
//! takes a short [`parking_lot::RwLock`] over the block table; steady-state
//! acquire/release only ever takes the read side of that lock to resolve an
//! index to a slot pointer, which is uncontended and cheap as long as no
//! growth is in flight.

use crate::cache_pad::CachePad;
use crate::error::Error;
use crate::variant::cell::UnsafeCell;
use crate::variant::sync::atomic::{AtomicU64, Ordering};
use crate::variant::sync::Arc;
use parking_lot::RwLock;
use std::marker::PhantomData;

pub(crate) const NIL: u32 = u32::MAX;

pub(crate) fn pack(generation: u32, index: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

pub(crate) fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

struct Slot<T> {
    value: UnsafeCell<T>,
    next_free: AtomicU64,
    /// Bumped every time this slot is handed out by `acquire_one`/`acquire_stack`.
    /// [`Cell`](crate::cell::Cell) tags its occupant with the value this
    /// counter held at acquire time so a later CAS can't mistake a slot index
    /// that was released and reissued to an unrelated point for the node it
    /// originally compared against.
    issued: AtomicU64,
}

impl<T: Default> Slot<T> {
    fn new() -> Self {
        Self {
            value: UnsafeCell::new(T::default()),
            next_free: AtomicU64::new(NIL as u64),
            issued: AtomicU64::new(0),
        }
    }
}

struct Inner<T> {
    blocks: RwLock<Vec<Box<[Slot<T>]>>>,
    // Padded: every acquire/release on the pool contends on this one word, so
    // it must not share a cache line with the far-less-hot fields around it.
    free_head: CachePad<AtomicU64>,
    block_size: usize,
    max_blocks: usize,
    unbounded: bool,
}

// SAFETY: a slot's `UnsafeCell<T>` is only ever touched by the one thread
// that currently holds the `Handle<T>` for that index. The free-list
// protocol (CAS on `free_head`, acquire/release ordered) guarantees a slot
// index is never handed out to two acquirers at once, so there is never
// concurrent access to the same cell, only ownership transfer of it.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

/// A bounded or unbounded free-list pool of `T`, producing [`Handle<T>`]s.
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool { inner: self.inner.clone() }
    }
}

impl<T: Default> Pool<T> {
    /// Builds a pool from a [`PoolConfig`](crate::structure::PoolConfig),
    /// eagerly allocating its first block.
    pub fn new(config: crate::structure::PoolConfig) -> Self {
        use crate::structure::PoolMode;
        let inner = Inner {
            blocks: RwLock::new(Vec::new()),
            free_head: CachePad::new(AtomicU64::new(pack(0, NIL))),
            block_size: config.block_size.max(1),
            max_blocks: config.max_blocks,
            unbounded: matches!(config.mode, PoolMode::Unbounded),
        };
        let pool = Pool { inner: Arc::new(inner) };
        pool.grow().expect("initial pool block allocation");
        pool
    }

    fn grow(&self) -> Result<(), Error> {
        let mut blocks = self.inner.blocks.write();
        if blocks.len() >= self.inner.max_blocks {
            return Err(Error::Exhausted);
        }
        let block_no = blocks.len();
        let base = block_no * self.inner.block_size;

        let mut new_block = Vec::with_capacity(self.inner.block_size);
        for local in 0..self.inner.block_size {
            let slot = Slot::new();
            // Chain the new block internally: slot i -> slot i+1, last -> NIL for now.
            let next = if local + 1 < self.inner.block_size {
                (base + local + 1) as u32
            } else {
                NIL
            };
            slot.next_free.store(next as u64, Ordering::Relaxed);
            new_block.push(slot);
        }
        blocks.push(new_block.into_boxed_slice());
        drop(blocks);

        // Splice the new block onto the global free list: its tail points at
        // whatever the old head was, and the head becomes the new block's
        // first slot.
        let new_head_index = base as u32;
        let tail_index = (base + self.inner.block_size - 1) as u32;
        loop {
            let head = self.inner.free_head.load(Ordering::Acquire);
            let (generation, old_index) = unpack(head);
            self.slot_at(tail_index).next_free.store(old_index as u64, Ordering::Relaxed);
            let new_head = pack(generation.wrapping_add(1), new_head_index);
            if self
                .inner
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::debug!(block_no, block_size = self.inner.block_size, "pool grew by one block");
                return Ok(());
            }
        }
    }

    fn slot_at(&self, index: u32) -> &Slot<T> {
        let block_no = index as usize / self.inner.block_size;
        let local = index as usize % self.inner.block_size;
        let blocks = self.inner.blocks.read();
        let block = &blocks[block_no];
        // SAFETY: blocks are never removed or moved once pushed (`Vec::push`
        // only reallocates the outer pointer array, never the `Box<[Slot<T>]>`
        // contents), so this reference outlives the read-lock guard.
        unsafe { &*(&block[local] as *const Slot<T>) }
    }

    /// Reads a slot by raw index without taking ownership of it, for callers
    /// (namely [`Cell`](crate::cell::Cell)) that hold an index rather than a
    /// `Handle` because it currently lives inside an atomic word.
    ///
    /// Callers must only pass an index known to currently be an occupied,
    /// owned slot (e.g. decoded out of a `Cell`'s word while that occupant is
    /// alive) — never an index pulled from the free list.
    pub(crate) fn peek(&self, index: u32) -> &T {
        unsafe { &*self.slot_at(index).value.with(|p| p) }
    }

    /// Acquires one handle, growing the pool (unbounded mode) or failing with
    /// [`Error::Exhausted`] (bounded mode) if the free-list is empty.
    pub fn acquire_one(&self) -> Result<Handle<T>, Error> {
        loop {
            let head = self.inner.free_head.load(Ordering::Acquire);
            let (generation, index) = unpack(head);
            if index == NIL {
                if self.inner.unbounded {
                    self.grow()?;
                    continue;
                }
                tracing::debug!("pool exhausted");
                return Err(Error::Exhausted);
            }

            let next = self.slot_at(index).next_free.load(Ordering::Relaxed) as u32;
            let new_head = pack(generation.wrapping_add(1), next);
            if self
                .inner
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let issued = self.slot_at(index).issued.fetch_add(1, Ordering::Relaxed) as u32;
                return Ok(Handle {
                    pool: self.clone(),
                    index: Some(index),
                    generation: issued,
                    _not_send_sync: PhantomData,
                });
            }
        }
    }

    /// Acquires `n` handles in a single free-list splice: no other thread can
    /// observe the free list with only some of the `n` slots removed.
    pub fn acquire_stack(&self, n: usize) -> Result<Vec<Handle<T>>, Error> {
        if n == 0 {
            return Ok(Vec::new());
        }
        loop {
            let head = self.inner.free_head.load(Ordering::Acquire);
            let (generation, first) = unpack(head);
            if first == NIL {
                if self.inner.unbounded {
                    self.grow()?;
                    continue;
                }
                return Err(Error::Exhausted);
            }

            let mut indices = Vec::with_capacity(n);
            indices.push(first);
            let mut cur = first;
            let mut complete = true;
            for _ in 1..n {
                let next = self.slot_at(cur).next_free.load(Ordering::Relaxed) as u32;
                if next == NIL {
                    complete = false;
                    break;
                }
                indices.push(next);
                cur = next;
            }

            if !complete {
                if self.inner.unbounded {
                    self.grow()?;
                    continue;
                }
                return Err(Error::Exhausted);
            }

            let after_last = self.slot_at(cur).next_free.load(Ordering::Relaxed) as u32;
            let new_head = pack(generation.wrapping_add(1), after_last);
            if self
                .inner
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(indices
                    .into_iter()
                    .map(|index| {
                        let issued = self.slot_at(index).issued.fetch_add(1, Ordering::Relaxed) as u32;
                        Handle { pool: self.clone(), index: Some(index), generation: issued, _not_send_sync: PhantomData }
                    })
                    .collect());
            }
        }
    }

    fn release(&self, index: u32) {
        // Reset to a fresh default value before returning to the free list so
        // the next acquirer never observes a previous owner's data.
        let slot = self.slot_at(index);
        unsafe {
            slot.value.with_mut(|p| *p = T::default());
        }
        loop {
            let head = self.inner.free_head.load(Ordering::Acquire);
            let (generation, old_index) = unpack(head);
            slot.next_free.store(old_index as u64, Ordering::Relaxed);
            let new_head = pack(generation.wrapping_add(1), index);
            if self
                .inner
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// An owning, movable-but-not-copyable handle to a pool slot.
///
/// A handle is either *owning* (backed by a slot, `index.is_some()`) or
/// *empty* (moved-from, via [`Handle::take`]).
pub struct Handle<T: Default> {
    pool: Pool<T>,
    index: Option<u32>,
    generation: u32,
    _not_send_sync: PhantomData<*const ()>,
}

// Despite the `PhantomData<*const ()>` marker (present to document intent),
// a Handle only ever touches its own exclusively-owned slot, so it is sound
// to send and share across threads like any other owned value.
unsafe impl<T: Default + Send> Send for Handle<T> {}
unsafe impl<T: Default + Sync> Sync for Handle<T> {}

impl<T: Default> Handle<T> {
    /// Whether this handle still owns a slot.
    pub fn is_owning(&self) -> bool {
        self.index.is_some()
    }

    /// Reads a reference to the held value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    pub fn get(&self) -> &T {
        let index = self.index.expect("operation on an empty pool handle");
        unsafe { &*self.pool.slot_at(index).value.with(|p| p) }
    }

    /// Mutably borrows the held value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    pub fn get_mut(&mut self) -> &mut T {
        let index = self.index.expect("operation on an empty pool handle");
        unsafe { &mut *self.pool.slot_at(index).value.with_mut(|p| p) }
    }

    /// Empties this handle, returning its slot to the pool and leaving the
    /// caller with a handle that owns nothing.
    pub fn take(&mut self) {
        if let Some(index) = self.index.take() {
            self.pool.release(index);
        }
    }

    /// The raw slot index, used by [`Cell`](crate::cell::Cell) to implement
    /// its tagged atomic swap without needing `Handle` itself to be `Copy`.
    pub(crate) fn into_raw_index(mut self) -> Option<u32> {
        self.index.take()
    }

    pub(crate) fn from_raw_index(pool: Pool<T>, index: u32) -> Self {
        Handle { pool, index: Some(index), generation: 0, _not_send_sync: PhantomData }
    }

    /// Consumes the handle into a single `(generation, index)` word suitable
    /// for storing directly in a [`Cell`](crate::cell::Cell)'s atomic slot.
    /// The generation is stamped by the pool at acquire time, so two handles
    /// that happen to share a slot index (one released, the slot reissued)
    /// never share a tag.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    pub(crate) fn into_raw_tag(mut self) -> u64 {
        let index = self.index.take().expect("operation on an empty pool handle");
        pack(self.generation, index)
    }

    /// Rebuilds a handle from a tag previously produced by [`into_raw_tag`](Self::into_raw_tag).
    pub(crate) fn from_raw_tag(pool: Pool<T>, tag: u64) -> Self {
        let (generation, index) = unpack(tag);
        Handle { pool, index: Some(index), generation, _not_send_sync: PhantomData }
    }
}

impl<T: Default> Drop for Handle<T> {
    fn drop(&mut self) {
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::PoolConfig;

    #[test]
    fn acquire_and_drop_round_trips_through_free_list() {
        let pool: Pool<u64> = Pool::new(PoolConfig::bounded(4, 1));
        let mut h = pool.acquire_one().unwrap();
        *h.get_mut() = 42;
        assert_eq!(*h.get(), 42);
        drop(h);

        let h2 = pool.acquire_one().unwrap();
        assert_eq!(*h2.get(), 0, "released slots are reset to Default");
    }

    #[test]
    fn bounded_pool_exhausts() {
        let pool: Pool<u32> = Pool::new(PoolConfig::bounded(2, 1));
        let _a = pool.acquire_one().unwrap();
        let _b = pool.acquire_one().unwrap();
        assert!(matches!(pool.acquire_one(), Err(Error::Exhausted)));
    }

    #[test]
    fn unbounded_pool_grows_past_one_block() {
        let pool: Pool<u32> = Pool::new(PoolConfig::unbounded(2));
        let handles: Vec<_> = (0..10).map(|_| pool.acquire_one().unwrap()).collect();
        assert_eq!(handles.len(), 10);
    }

    #[test]
    fn acquire_stack_splices_n_at_once() {
        let pool: Pool<u32> = Pool::new(PoolConfig::bounded(8, 1));
        let stack = pool.acquire_stack(5).unwrap();
        assert_eq!(stack.len(), 5);
        // Exactly 3 remain.
        let rest = pool.acquire_stack(3).unwrap();
        assert_eq!(rest.len(), 3);
        assert!(matches!(pool.acquire_one(), Err(Error::Exhausted)));
    }

    #[test]
    fn acquire_stack_fails_bounded_when_not_enough_free() {
        let pool: Pool<u32> = Pool::new(PoolConfig::bounded(4, 1));
        assert!(matches!(pool.acquire_stack(5), Err(Error::Exhausted)));
    }

    #[test]
    fn concurrent_acquire_release_conserves_pool() {
        use std::sync::Arc as StdArc;
        use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
        use std::thread;

        let pool: Pool<u32> = Pool::new(PoolConfig::unbounded(16));
        let success = StdArc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let success = success.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let h = pool.acquire_one().unwrap();
                        drop(h);
                        let _ = success.fetch_add(1, StdOrdering::Relaxed);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(success.load(StdOrdering::Relaxed), 8000);
    }
}
