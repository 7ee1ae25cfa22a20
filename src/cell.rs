//! The cell-level occupant slot (C2): one atomic word per tree node holding
//! either nothing or a single [`InfoNode`], plus the tubular variant
//! ([`Tube`]) that lets several occupants share one node when points are
//! additionally discriminated by a `tick` value.
//!
//! `Cell` never loops internally. [`Cell::swap`] is a single
//! compare-and-swap attempt against a snapshot the caller already took with
//! [`Cell::snapshot`] — the decision of *what* to swap in, and whether to
//! retry after losing a race, belongs to the insertion algorithm in
//! [`crate::registry`], which needs to interleave a "is incoming better than
//! the current occupant" comparison between the load and the swap.

use crate::error::{Error, Result};
use crate::point::Point;
use crate::pool::{pack, unpack, Handle, Pool, NIL};
use crate::variant::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// A point record's raw bytes, owned by a [`DataPool`] slot.
///
/// Kept separate from [`InfoNode`] so the (larger, schema-dependent) raw
/// bytes and the (small, fixed-size) geometric/bookkeeping fields can be
/// pooled independently, matching the split between Entwine's data and info
/// chains.
#[derive(Debug, Default)]
pub struct DataNode {
    bytes: Vec<u8>,
}

impl DataNode {
    /// Overwrites this node's bytes with a copy of `bytes`.
    pub fn set(&mut self, bytes: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
    }

    /// The point record's raw bytes, schema-encoded.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Pool of [`DataNode`] slots.
pub type DataPool = Pool<DataNode>;

/// The bookkeeping a tree cell actually compares and swaps: a point's
/// extracted position, the id of the file it came from (its "origin"), and
/// the [`Handle`] owning its raw bytes in a [`DataPool`].
#[derive(Default)]
pub struct InfoNode {
    point: Point,
    origin: u64,
    data: Option<Handle<DataNode>>,
}

impl InfoNode {
    /// Populates a freshly-acquired node. Pool slots reset to `Default` on
    /// release, so a node is always empty (`data: None`) until `set`.
    pub fn set(&mut self, point: Point, origin: u64, data: Handle<DataNode>) {
        self.point = point;
        self.origin = origin;
        self.data = Some(data);
    }

    /// The node's extracted position.
    pub fn point(&self) -> Point {
        self.point
    }

    /// The id of the source file this point arrived from.
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// The node's raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if the node was never populated via [`InfoNode::set`].
    pub fn data(&self) -> &DataNode {
        self.data.as_ref().expect("InfoNode read before being populated")
    }
}

/// Pool of [`InfoNode`] slots.
pub type InfoPool = Pool<InfoNode>;

/// An opaque snapshot of a [`Cell`]'s occupant word, captured by
/// [`Cell::snapshot`] and presented back to [`Cell::swap`] so the swap can
/// detect whether the cell changed underneath the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(u64);

impl Tag {
    /// Whether this snapshot observed an empty cell.
    pub fn is_empty(self) -> bool {
        unpack(self.0).1 == NIL
    }
}

/// A single atomic occupant slot.
///
/// Transitions are monotonic in practice (a cell only ever moves from empty
/// to occupied, or from one occupant to a strictly "better" one — see
/// [`crate::registry`]), but `Cell` itself enforces none of that; it only
/// guarantees the swap is atomic and detects staleness via `Tag`.
pub struct Cell {
    word: AtomicU64,
    pool: InfoPool,
}

impl Cell {
    /// Builds an empty cell backed by `pool`.
    pub fn new(pool: InfoPool) -> Self {
        Self { word: AtomicU64::new(pack(0, NIL)), pool }
    }

    /// Whether the cell currently holds no occupant.
    pub fn is_empty(&self) -> bool {
        unpack(self.word.load(Ordering::Acquire)).1 == NIL
    }

    /// Reads the current occupant without taking ownership of it.
    pub fn load(&self) -> Option<&InfoNode> {
        let (_, index) = unpack(self.word.load(Ordering::Acquire));
        if index == NIL {
            None
        } else {
            Some(self.pool.peek(index))
        }
    }

    /// Captures the current occupant word for a later [`Cell::swap`].
    pub fn snapshot(&self) -> Tag {
        Tag(self.word.load(Ordering::Acquire))
    }

    /// Attempts to replace the occupant seen in `expected` with `incoming`.
    ///
    /// On success, returns the displaced occupant (`None` if the cell was
    /// empty). On failure — the cell moved since `expected` was captured —
    /// `incoming` is handed back unchanged so the caller can re-snapshot and
    /// retry its comparison.
    pub fn swap(
        &self,
        incoming: Handle<InfoNode>,
        expected: Tag,
    ) -> Result<Option<Handle<InfoNode>>, Handle<InfoNode>> {
        let incoming_tag = incoming.into_raw_tag();
        match self.word.compare_exchange(expected.0, incoming_tag, Ordering::AcqRel, Ordering::Acquire) {
            Ok(old) => {
                let (_, old_index) = unpack(old);
                if old_index == NIL {
                    Ok(None)
                } else {
                    Ok(Some(Handle::from_raw_tag(self.pool.clone(), old)))
                }
            }
            Err(_) => Err(Handle::from_raw_tag(self.pool.clone(), incoming_tag)),
        }
    }
}

const UNSET_TICK: u64 = u64::MAX;

/// A stack of [`Cell`]s at one tree node, discriminated by a caller-supplied
/// `tick` (e.g. a dimension used to order coincident-footprint points).
///
/// The first tick value presented claims a dedicated `primary` cell with no
/// locking at all; every other tick value falls back to a
/// [`parking_lot::Mutex`]-guarded map. Non-tubular structures only ever use
/// tick `0`, so in that (common) configuration the secondary map is never
/// touched.
pub struct Tube {
    pool: InfoPool,
    primary_tick: AtomicU64,
    primary: Cell,
    secondary: Mutex<BTreeMap<u64, Cell>>,
}

impl Tube {
    /// Builds an empty tube backed by `pool`.
    pub fn new(pool: InfoPool) -> Self {
        Self {
            primary: Cell::new(pool.clone()),
            primary_tick: AtomicU64::new(UNSET_TICK),
            secondary: Mutex::new(BTreeMap::new()),
            pool,
        }
    }

    fn with_cell<R>(&self, tick: u64, f: impl FnOnce(&Cell) -> R) -> R {
        loop {
            let current = self.primary_tick.load(Ordering::Acquire);
            if current == tick {
                return f(&self.primary);
            }
            if current != UNSET_TICK {
                break;
            }
            match self.primary_tick.compare_exchange(UNSET_TICK, tick, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return f(&self.primary),
                // Someone else just claimed the primary slot — for our tick
                // or another one. Either way, reload and decide again.
                Err(_) => continue,
            }
        }
        let mut guard = self.secondary.lock();
        let cell = guard.entry(tick).or_insert_with(|| Cell::new(self.pool.clone()));
        f(cell)
    }

    /// The occupant's position at `tick`, if any.
    pub fn load(&self, tick: u64) -> Option<Point> {
        self.with_cell(tick, |cell| cell.load().map(InfoNode::point))
    }

    /// Runs `f` against the full occupant node at `tick` (`None` if empty),
    /// for callers (namely [`crate::registry::Registry`]) that need more
    /// than just the position — e.g. the occupant's raw bytes to check for
    /// an exact duplicate.
    pub fn with_occupant<R>(&self, tick: u64, f: impl FnOnce(Option<&InfoNode>) -> R) -> R {
        self.with_cell(tick, |cell| f(cell.load()))
    }

    /// Captures a snapshot of the cell at `tick`.
    pub fn snapshot(&self, tick: u64) -> Tag {
        self.with_cell(tick, Cell::snapshot)
    }

    /// Forwards to [`Cell::swap`] on the cell at `tick`.
    pub fn swap(
        &self,
        tick: u64,
        incoming: Handle<InfoNode>,
        expected: Tag,
    ) -> Result<Option<Handle<InfoNode>>, Handle<InfoNode>> {
        self.with_cell(tick, |cell| cell.swap(incoming, expected))
    }

    /// Number of distinct ticks this tube currently holds occupants for.
    /// Used by tests and hierarchy accounting; walks the (usually-empty)
    /// secondary map under its lock.
    pub fn occupant_count(&self) -> usize {
        let primary = if self.primary.is_empty() { 0 } else { 1 };
        let secondary = self.secondary.lock().values().filter(|c| !c.is_empty()).count();
        primary + secondary
    }

    /// Every live occupant, primary first, then secondaries in map order,
    /// sorted by tick.
    fn occupant_nodes(&self) -> Vec<(u64, &InfoNode)> {
        let mut occupants: Vec<(u64, &InfoNode)> = Vec::new();
        let primary_tick = self.primary_tick.load(Ordering::Acquire);
        if primary_tick != UNSET_TICK {
            if let Some(node) = self.primary.load() {
                occupants.push((primary_tick, node));
            }
        }
        let guard = self.secondary.lock();
        for (tick, cell) in guard.iter() {
            if let Some(node) = cell.load() {
                occupants.push((*tick, node));
            }
        }
        occupants.sort_by_key(|(tick, _)| *tick);
        occupants
    }

    /// Every live occupant as owned `(tick, point, origin, bytes)` tuples,
    /// sorted by tick. Used by [`crate::registry::Registry::merge`] to
    /// re-insert another tube's occupants through the normal placement path.
    pub fn occupants(&self) -> Vec<(u64, Point, u64, Vec<u8>)> {
        self.occupant_nodes()
            .into_iter()
            .map(|(tick, node)| (tick, node.point(), node.origin(), node.data().bytes().to_vec()))
            .collect()
    }

    /// Serializes every occupant into the base-chunk binary format: an
    /// 8-byte big-endian tube id, a 4-byte occupant count, then one record
    /// per occupant (tick, point, origin, data length, data bytes), sorted
    /// by tick so the encoding is deterministic regardless of insertion
    /// order or primary/secondary placement.
    pub fn save_base(&self, tube_id: u64) -> Vec<u8> {
        let occupants = self.occupant_nodes();

        let mut out = Vec::new();
        out.extend_from_slice(&tube_id.to_be_bytes());
        out.extend_from_slice(&(occupants.len() as u32).to_be_bytes());
        for (tick, node) in occupants {
            out.extend_from_slice(&tick.to_be_bytes());
            out.extend_from_slice(&node.point().x.to_be_bytes());
            out.extend_from_slice(&node.point().y.to_be_bytes());
            out.extend_from_slice(&node.point().z.to_be_bytes());
            out.extend_from_slice(&node.origin().to_be_bytes());
            let bytes = node.data().bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Reconstructs one tube from the format [`Tube::save_base`] writes,
    /// advancing `cursor` past the record consumed. Returns the tube id that
    /// prefixed the record together with the reconstructed tube.
    ///
    /// Occupants are installed single-threaded via the same `snapshot`/`swap`
    /// path insertion uses, so a duplicate tick within the record (corrupt
    /// input) is caught explicitly up front rather than silently overwriting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptChunk`] if the bytes are truncated or contain
    /// a repeated tick.
    pub fn from_base_bytes(
        bytes: &[u8],
        cursor: &mut usize,
        info_pool: &InfoPool,
        data_pool: &DataPool,
    ) -> Result<(u64, Tube)> {
        fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
            if *cursor + 8 > bytes.len() {
                return Err(Error::CorruptChunk("truncated tube record".into()));
            }
            let v = u64::from_be_bytes(bytes[*cursor..*cursor + 8].try_into().unwrap());
            *cursor += 8;
            Ok(v)
        }
        fn read_f64(bytes: &[u8], cursor: &mut usize) -> Result<f64> {
            if *cursor + 8 > bytes.len() {
                return Err(Error::CorruptChunk("truncated tube record".into()));
            }
            let v = f64::from_be_bytes(bytes[*cursor..*cursor + 8].try_into().unwrap());
            *cursor += 8;
            Ok(v)
        }
        fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
            if *cursor + 4 > bytes.len() {
                return Err(Error::CorruptChunk("truncated tube record".into()));
            }
            let v = u32::from_be_bytes(bytes[*cursor..*cursor + 4].try_into().unwrap());
            *cursor += 4;
            Ok(v)
        }

        let tube_id = read_u64(bytes, cursor)?;
        let occupant_count = read_u32(bytes, cursor)? as usize;

        let mut records = Vec::with_capacity(occupant_count);
        let mut seen_ticks = HashSet::with_capacity(occupant_count);
        for _ in 0..occupant_count {
            let tick = read_u64(bytes, cursor)?;
            if !seen_ticks.insert(tick) {
                return Err(Error::CorruptChunk(format!("duplicate tick {tick} in base record")));
            }
            let x = read_f64(bytes, cursor)?;
            let y = read_f64(bytes, cursor)?;
            let z = read_f64(bytes, cursor)?;
            let origin = read_u64(bytes, cursor)?;
            let data_len = read_u32(bytes, cursor)? as usize;
            if *cursor + data_len > bytes.len() {
                return Err(Error::CorruptChunk("truncated tube record".into()));
            }
            let data_bytes = bytes[*cursor..*cursor + data_len].to_vec();
            *cursor += data_len;
            records.push((tick, Point::new(x, y, z), origin, data_bytes));
        }

        let tube = Tube::new(info_pool.clone());
        for (tick, point, origin, data_bytes) in records {
            let mut data = data_pool.acquire_one()?;
            data.get_mut().set(&data_bytes);
            let mut info = info_pool.acquire_one()?;
            info.get_mut().set(point, origin, data);

            let expected = tube.snapshot(tick);
            let _ = tube
                .swap(tick, info, expected)
                .map_err(|_| Error::CorruptChunk("tube occupant raced during reconstruction".into()))?;
        }

        Ok((tube_id, tube))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::PoolConfig;

    fn pools() -> (InfoPool, DataPool) {
        (Pool::new(PoolConfig::unbounded(8)), Pool::new(PoolConfig::unbounded(8)))
    }

    fn info_handle(info_pool: &InfoPool, data_pool: &DataPool, point: Point, origin: u64) -> Handle<InfoNode> {
        let mut data = data_pool.acquire_one().unwrap();
        data.get_mut().set(b"payload");
        let mut node = info_pool.acquire_one().unwrap();
        node.get_mut().set(point, origin, data);
        node
    }

    #[test]
    fn empty_cell_accepts_first_insert() {
        let (info_pool, data_pool) = pools();
        let cell = Cell::new(info_pool.clone());
        assert!(cell.is_empty());

        let incoming = info_handle(&info_pool, &data_pool, Point::new(1.0, 2.0, 3.0), 0);
        let expected = cell.snapshot();
        let displaced = cell.swap(incoming, expected).unwrap();
        assert!(displaced.is_none());
        assert!(!cell.is_empty());
        assert_eq!(cell.load().unwrap().point(), Point::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn stale_snapshot_is_rejected_and_handle_returned() {
        let (info_pool, data_pool) = pools();
        let cell = Cell::new(info_pool.clone());

        let first = info_handle(&info_pool, &data_pool, Point::new(0.0, 0.0, 0.0), 0);
        let stale = cell.snapshot();
        let _ = cell.swap(first, stale).unwrap();

        let second = info_handle(&info_pool, &data_pool, Point::new(9.0, 9.0, 9.0), 1);
        let err = cell.swap(second, stale).unwrap_err();
        assert_eq!(err.get().point(), Point::new(9.0, 9.0, 9.0));
    }

    #[test]
    fn swap_returns_displaced_occupant() {
        let (info_pool, data_pool) = pools();
        let cell = Cell::new(info_pool.clone());

        let first = info_handle(&info_pool, &data_pool, Point::new(1.0, 1.0, 1.0), 0);
        let expected = cell.snapshot();
        let _ = cell.swap(first, expected).unwrap();

        let second = info_handle(&info_pool, &data_pool, Point::new(2.0, 2.0, 2.0), 1);
        let expected = cell.snapshot();
        let displaced = cell.swap(second, expected).unwrap().expect("first occupant displaced");
        assert_eq!(displaced.get().point(), Point::new(1.0, 1.0, 1.0));
        assert_eq!(cell.load().unwrap().point(), Point::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn tube_first_tick_claims_primary_others_go_secondary() {
        let (info_pool, data_pool) = pools();
        let tube = Tube::new(info_pool.clone());

        let a = info_handle(&info_pool, &data_pool, Point::new(1.0, 0.0, 0.0), 0);
        let expected = tube.snapshot(5);
        let _ = tube.swap(5, a, expected).unwrap();

        let b = info_handle(&info_pool, &data_pool, Point::new(2.0, 0.0, 0.0), 1);
        let expected = tube.snapshot(7);
        let _ = tube.swap(7, b, expected).unwrap();

        assert_eq!(tube.load(5), Some(Point::new(1.0, 0.0, 0.0)));
        assert_eq!(tube.load(7), Some(Point::new(2.0, 0.0, 0.0)));
        assert_eq!(tube.occupant_count(), 2);
    }

    #[test]
    fn save_base_prefixes_tube_id_and_sorts_by_tick() {
        let (info_pool, data_pool) = pools();
        let tube = Tube::new(info_pool.clone());

        let later = info_handle(&info_pool, &data_pool, Point::new(1.0, 1.0, 1.0), 0);
        let expected = tube.snapshot(9);
        let _ = tube.swap(9, later, expected).unwrap();

        let earlier = info_handle(&info_pool, &data_pool, Point::new(2.0, 2.0, 2.0), 1);
        let expected = tube.snapshot(3);
        let _ = tube.swap(3, earlier, expected).unwrap();

        let bytes = tube.save_base(0xAABB);
        assert_eq!(&bytes[0..8], &0xAABBu64.to_be_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_be_bytes());
        // First occupant record starts right after the header; its tick
        // (big-endian u64) must be the smaller one (3), proving the sort.
        let first_tick = u64::from_be_bytes(bytes[12..20].try_into().unwrap());
        assert_eq!(first_tick, 3);
    }

    #[test]
    fn save_base_then_from_base_bytes_round_trips() {
        let (info_pool, data_pool) = pools();
        let tube = Tube::new(info_pool.clone());

        let a = info_handle(&info_pool, &data_pool, Point::new(1.0, 2.0, 3.0), 10);
        let expected = tube.snapshot(5);
        let _ = tube.swap(5, a, expected).unwrap();

        let b = info_handle(&info_pool, &data_pool, Point::new(4.0, 5.0, 6.0), 20);
        let expected = tube.snapshot(9);
        let _ = tube.swap(9, b, expected).unwrap();

        let bytes = tube.save_base(0x1234);
        let mut cursor = 0usize;
        let (tube_id, loaded) = Tube::from_base_bytes(&bytes, &mut cursor, &info_pool, &data_pool).unwrap();
        assert_eq!(tube_id, 0x1234);
        assert_eq!(cursor, bytes.len());

        let mut original: Vec<_> = tube.occupants();
        let mut round_tripped: Vec<_> = loaded.occupants();
        original.sort_by_key(|(tick, ..)| *tick);
        round_tripped.sort_by_key(|(tick, ..)| *tick);
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn from_base_bytes_rejects_duplicate_tick() {
        let (info_pool, data_pool) = pools();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u64.to_be_bytes()); // tube id
        bytes.extend_from_slice(&2u32.to_be_bytes()); // occupant count
        for _ in 0..2 {
            bytes.extend_from_slice(&7u64.to_be_bytes()); // same tick twice
            bytes.extend_from_slice(&1.0f64.to_be_bytes());
            bytes.extend_from_slice(&1.0f64.to_be_bytes());
            bytes.extend_from_slice(&1.0f64.to_be_bytes());
            bytes.extend_from_slice(&0u64.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
        }

        let mut cursor = 0usize;
        let err = Tube::from_base_bytes(&bytes, &mut cursor, &info_pool, &data_pool).unwrap_err();
        assert!(matches!(err, Error::CorruptChunk(_)));
    }
}
