//! The insertion engine (C5) and the base/cold chunk router it drives (the
//! other half of C4).
//!
//! `Registry::add_point` is the single entry point every producer thread
//! calls concurrently. It walks a [`Climber`] down from the root, at each
//! depth resolving the owning [`Tube`] (through the always-resident
//! [`BaseChunk`] or, past the base range, a [`ColdChunk`] reached via the
//! caller's [`Clipper`]) and racing a lock-free compare-and-swap against
//! whatever else is inserting concurrently.

use crate::bbox::BBox;
use crate::cell::{DataNode, DataPool, InfoNode, InfoPool};
use crate::chunk::{BaseChunk, ChunkStore};
use crate::climber::Climber;
use crate::clipper::Clipper;
use crate::error::{Error, Result};
use crate::hierarchy::Hierarchy;
use crate::id::Id;
use crate::point::Point;
use crate::structure::Structure;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Whether `candidate` should displace `incumbent` at a node centered on
/// `mid`: the point closer to the node's center wins, building (across the
/// whole tree) a multiresolution sample where each level holds the points
/// most representative of their node. Ties keep the incumbent in place so
/// the comparison is stable and the insertion loop can't livelock between
/// two equally-good points repeatedly swapping.
pub(crate) fn better(candidate: &Point, incumbent: &Point, mid: &Point, is3d: bool) -> bool {
    candidate.sq_dist(mid, is3d) < incumbent.sq_dist(mid, is3d)
}

/// The concurrent insertion engine for one tree.
pub struct Registry {
    structure: Structure,
    root_bbox: BBox,
    info_pool: InfoPool,
    data_pool: DataPool,
    base: BaseChunk,
    store: Arc<dyn ChunkStore>,
    saved: AtomicBool,
}

impl Registry {
    /// Builds a registry over `structure`, rooted at `root_bbox`. `store`
    /// backs the cold range (ignored if `structure.has_cold` is false).
    pub fn new(
        structure: Structure,
        root_bbox: BBox,
        info_pool: InfoPool,
        data_pool: DataPool,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            structure,
            root_bbox,
            info_pool,
            data_pool,
            base: BaseChunk::new(),
            store,
            saved: AtomicBool::new(false),
        }
    }

    /// The depth-range and dimensionality configuration this registry was built with.
    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    /// The bounding box of the tree's root node.
    pub fn root_bbox(&self) -> &BBox {
        &self.root_bbox
    }

    /// The cold-chunk store backing this registry. Every [`Clipper`] used
    /// with [`Registry::add_point`] must be built against this same store —
    /// a clipper built against a different store would materialize its own,
    /// disconnected cold chunks instead of sharing the tree's real ones.
    pub fn store(&self) -> &dyn ChunkStore {
        self.store.as_ref()
    }

    fn tube_for(&self, id: &Id, depth: usize, clipper: &mut Clipper<'_>) -> Arc<crate::cell::Tube> {
        if self.structure.is_within_base(depth) {
            self.base.tube(id, &self.info_pool)
        } else {
            let chunk = clipper.acquire(id, depth, &self.structure);
            chunk.tube(id, &self.info_pool)
        }
    }

    fn acquire_info_node(&self, point: Point, origin: u64, bytes: &[u8]) -> Result<crate::pool::Handle<InfoNode>> {
        let mut data: crate::pool::Handle<DataNode> = self.data_pool.acquire_one()?;
        data.get_mut().set(bytes);
        let mut info = self.info_pool.acquire_one()?;
        info.get_mut().set(point, origin, data);
        Ok(info)
    }

    /// Inserts one point. `tick` discriminates coincident-footprint
    /// occupants within one node for `tubular` structures (pass `0` for
    /// non-tubular ones). `max_depth` caps how far a point may descend (`0`
    /// disables the cap). `hierarchy`, if given, has its count bumped at the
    /// node the point finally settles at (and at the node any point it
    /// displaces relocates to), via the same path [`Climber`] already
    /// tracked during descent.
    ///
    /// Returns `true` if the point was kept anywhere in the tree, `false` if
    /// it was dropped (descended past the addressable range or `max_depth`,
    /// or was a discarded exact duplicate).
    pub fn add_point(
        &self,
        clipper: &mut Clipper<'_>,
        point: Point,
        tick: u64,
        origin: u64,
        bytes: &[u8],
        max_depth: usize,
        hierarchy: Option<&mut Hierarchy>,
    ) -> Result<bool> {
        if !self.structure.in_range(0) {
            return Err(Error::Precondition("structure has no addressable depths"));
        }
        if self.saved.load(AtomicOrdering::Acquire) {
            return Err(Error::Precondition("registry's base has already been saved and released"));
        }

        let climber = Climber::new(self.root_bbox, self.structure.is3d);
        let incoming = self.acquire_info_node(point, origin, bytes)?;
        self.place(clipper, climber, point, incoming, tick, max_depth, hierarchy)
    }

    /// Walks `incoming` down from `climber` until it wins a permanent slot
    /// or falls off the addressable range.
    ///
    /// Whenever `incoming` displaces an existing occupant, `incoming` itself
    /// is placed at that instant — the displaced occupant still needs a new
    /// home, but finding one is a separate concern from whether *this* call's
    /// point was kept, so the relocation runs as an independent recursive
    /// `place` whose outcome is only logged, never folded into this call's
    /// return value.
    #[allow(clippy::too_many_arguments)]
    fn place(
        &self,
        clipper: &mut Clipper<'_>,
        mut climber: Climber,
        incoming_point: Point,
        mut incoming: crate::pool::Handle<InfoNode>,
        tick: u64,
        max_depth: usize,
        mut hierarchy: Option<&mut Hierarchy>,
    ) -> Result<bool> {
        loop {
            let depth = climber.depth();
            if !self.structure.in_range(depth) || (max_depth != 0 && depth >= max_depth) {
                tracing::debug!(depth, "dropping point: descended past the addressable range");
                return Ok(false);
            }

            let tube = self.tube_for(climber.id(), depth, clipper);

            'probe: loop {
                let expected = tube.snapshot(tick);
                let occupant = tube
                    .with_occupant(tick, |opt| opt.map(|node| (node.point(), node.data().bytes().to_vec())));

                match occupant {
                    None => match tube.swap(tick, incoming, expected) {
                        Ok(_) => {
                            if let Some(h) = hierarchy.as_deref_mut() {
                                h.increment(climber.path());
                            }
                            return Ok(true);
                        }
                        Err(returned) => {
                            incoming = returned;
                            continue 'probe;
                        }
                    },
                    Some((occupant_pos, occupant_bytes)) => {
                        if self.structure.discard_duplicates
                            && occupant_bytes == incoming.get().data().bytes()
                        {
                            tracing::trace!(depth, "dropping byte-identical duplicate point");
                            return Ok(false);
                        }

                        let mid = climber.bbox().mid();
                        if better(&incoming_point, &occupant_pos, &mid, self.structure.is3d) {
                            match tube.swap(tick, incoming, expected) {
                                Ok(displaced) => {
                                    let displaced =
                                        displaced.expect("occupant load() observed Some immediately before");
                                    if let Some(h) = hierarchy.as_deref_mut() {
                                        h.increment(climber.path());
                                    }
                                    let displaced_point = displaced.get().point();
                                    let mut next_climber = climber.clone();
                                    next_climber.magnify(&displaced_point);
                                    if let Err(err) = self.place(
                                        clipper,
                                        next_climber,
                                        displaced_point,
                                        displaced,
                                        tick,
                                        max_depth,
                                        hierarchy.as_deref_mut(),
                                    ) {
                                        tracing::warn!(%err, "failed to relocate a displaced point");
                                    }
                                    return Ok(true);
                                }
                                Err(returned) => {
                                    incoming = returned;
                                    continue 'probe;
                                }
                            }
                        } else {
                            break 'probe;
                        }
                    }
                }
            }

            climber.magnify(&incoming_point);
        }
    }

    /// Flushes the base chunk to bytes (concatenated [`crate::cell::Tube::save_base`]
    /// records, sorted by tube id for determinism) and releases it: every
    /// tube, cell and pool handle the base range held is dropped, returning
    /// their slots to `info_pool`/`data_pool`. Any later [`Registry::add_point`]
    /// fails with [`Error::Precondition`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if the base was already saved.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        if self.saved.swap(true, AtomicOrdering::AcqRel) {
            return Err(Error::Precondition("registry's base has already been saved and released"));
        }

        let mut tubes = self.base.drain();
        tubes.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut out = Vec::new();
        for (id, tube) in tubes {
            let tube_id = id.as_u64().expect("base-range ids always fit in a u64");
            out.extend_from_slice(&tube.save_base(tube_id));
        }
        Ok(out)
    }

    /// Folds `other`'s base-range occupants into `self`, re-running each one
    /// through the normal placement path so the same winner-takes-center
    /// rule that resolves concurrent insertion also resolves conflicts
    /// between the two trees. Used to combine independently-built subset
    /// trees into one.
    ///
    /// Only the base range is merged: [`ChunkStore`] has no operation to
    /// enumerate an arbitrary store's cold chunks, so cold-range merging is
    /// left to the store implementation.
    pub fn merge(&mut self, other: &Registry) -> Result<()> {
        let mut clipper = Clipper::new(self.store());
        for (_, tube) in other.base.drain() {
            for (tick, point, origin, bytes) in tube.occupants() {
                let _ = self.add_point(&mut clipper, point, tick, origin, &bytes, 0, None)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::InMemoryChunkStore;
    use crate::structure::PoolConfig;

    fn registry(structure: Structure) -> Registry {
        let root = BBox::new(Point::new(0.0, 0.0, 0.0), Point::new(1024.0, 1024.0, 1024.0));
        let info_pool = InfoPool::new(PoolConfig::unbounded(64));
        let data_pool = DataPool::new(PoolConfig::unbounded(64));
        let store: Arc<dyn ChunkStore> = Arc::new(InMemoryChunkStore::new());
        Registry::new(structure, root, info_pool, data_pool, store)
    }

    fn default_structure() -> Structure {
        Structure::new(0, 6, true, 0, true, false, true).unwrap()
    }

    #[test]
    fn better_prefers_the_point_closer_to_center() {
        let mid = Point::new(0.0, 0.0, 0.0);
        let near = Point::new(1.0, 0.0, 0.0);
        let far = Point::new(5.0, 0.0, 0.0);
        assert!(better(&near, &far, &mid, true));
        assert!(!better(&far, &near, &mid, true));
        assert!(!better(&near, &near, &mid, true), "ties keep the incumbent");
    }

    #[test]
    fn single_point_lands_at_the_root() {
        let structure = default_structure();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        let added = registry
            .add_point(&mut clipper, Point::new(1.0, 1.0, 1.0), 0, 0, b"payload-a", 0, None)
            .unwrap();
        assert!(added);
    }

    #[test]
    fn second_point_in_same_cell_descends_past_the_first() {
        let structure = default_structure();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        // Near the root bbox's center (512, 512, 512): wins the root slot outright.
        let won_center = registry
            .add_point(&mut clipper, Point::new(500.0, 500.0, 500.0), 0, 0, b"center", 0, None)
            .unwrap();
        assert!(won_center);
        // Near a corner, far from the root's center: loses the comparison at
        // the root and must descend, but should still be retained deeper.
        let added = registry
            .add_point(&mut clipper, Point::new(1.0, 1.0, 1.0), 0, 1, b"corner", 0, None)
            .unwrap();
        assert!(added);
    }

    #[test]
    fn exact_duplicate_is_dropped_when_configured() {
        let structure = default_structure();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        let p = Point::new(1.0, 1.0, 1.0);
        assert!(registry.add_point(&mut clipper, p, 0, 0, b"same-bytes", 0, None).unwrap());
        let added_again = registry.add_point(&mut clipper, p, 0, 0, b"same-bytes", 0, None).unwrap();
        assert!(!added_again, "byte-identical duplicate must be dropped, not descended");
    }

    #[test]
    fn point_past_addressable_depth_is_dropped() {
        let _ = tracing_subscriber::fmt::try_init();

        // base_index_span = 1 and no cold tier: only depth 0 is addressable.
        let structure = Structure::new(0, 1, false, 0, true, false, true).unwrap();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        // The first point sits exactly at the root's center, so no later
        // point can ever be a strictly closer match and displace it; the
        // second must therefore always lose the comparison at depth 0 and
        // descend into the (unaddressable) depth 1, where it is dropped.
        let root = registry.root_bbox().mid();
        let center_kept = registry.add_point(&mut clipper, root, 0, 0, b"a", 0, None).unwrap();
        assert!(center_kept);
        let added = registry.add_point(&mut clipper, Point::new(1.0, 1.0, 1.0), 0, 1, b"b", 0, None).unwrap();
        assert!(!added);
    }

    #[test]
    fn max_depth_caps_descent_independently_of_structure_range() {
        // A wide-enough structure that depth alone would not stop descent,
        // so only max_depth can be responsible for the drop.
        let structure = Structure::new(0, 10, true, 0, true, false, true).unwrap();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        let root = registry.root_bbox().mid();
        let center_kept = registry.add_point(&mut clipper, root, 0, 0, b"a", 1, None).unwrap();
        assert!(center_kept, "depth 0 is still < max_depth of 1");

        // Loses the comparison at depth 0 and must descend to depth 1, which
        // max_depth=1 forbids ("descent stops strictly before max_depth").
        let added = registry.add_point(&mut clipper, Point::new(1.0, 1.0, 1.0), 0, 1, b"b", 1, None).unwrap();
        assert!(!added);
    }

    #[test]
    fn successful_placement_increments_the_given_hierarchy() {
        let structure = default_structure();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());
        let mut hierarchy = crate::hierarchy::Hierarchy::new(crate::structure::HierarchyConfig::default());

        let root = registry.root_bbox().mid();
        assert!(registry.add_point(&mut clipper, root, 0, 0, b"a", 0, Some(&mut hierarchy)).unwrap());
        assert_eq!(hierarchy.total(), 1);

        // Loses at the root and descends; the relocated/descended point
        // still lands somewhere and should still be counted once.
        let other = Point::new(1.0, 1.0, 1.0);
        assert!(registry.add_point(&mut clipper, other, 0, 1, b"b", 0, Some(&mut hierarchy)).unwrap());
        assert_eq!(hierarchy.total(), 2);
    }

    #[test]
    fn many_points_all_land_somewhere_in_a_wide_tree() {
        use rand::{Rng, SeedableRng};

        let structure = Structure::new(0, 10, true, 0, true, false, true).unwrap();
        let registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);

        let mut kept = 0;
        for i in 0..200u32 {
            let x = rng.gen_range(1.0..1023.0);
            let y = rng.gen_range(1.0..1023.0);
            let z = rng.gen_range(1.0..1023.0);
            if registry
                .add_point(&mut clipper, Point::new(x, y, z), 0, i as u64, format!("pt{i}").as_bytes(), 0, None)
                .unwrap()
            {
                kept += 1;
            }
        }
        assert!(kept > 190, "a wide enough tree should retain nearly every distinct point, got {kept}");
    }

    #[test]
    fn save_flushes_base_and_blocks_further_inserts() {
        let structure = default_structure();
        let mut registry = registry(structure);
        let mut clipper = Clipper::new(registry.store());

        assert!(registry.add_point(&mut clipper, Point::new(1.0, 1.0, 1.0), 0, 0, b"a", 0, None).unwrap());
        assert!(registry
            .add_point(&mut clipper, Point::new(900.0, 900.0, 900.0), 0, 1, b"b", 0, None)
            .unwrap());

        let bytes = registry.save().unwrap();
        assert!(!bytes.is_empty());

        let err = registry
            .add_point(&mut clipper, Point::new(2.0, 2.0, 2.0), 0, 2, b"c", 0, None)
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));

        let err = registry.save().unwrap_err();
        assert!(matches!(err, Error::Precondition(_)), "saving twice must fail loudly, not no-op");
    }

    #[test]
    fn merge_folds_other_registrys_points_into_self() {
        let mut a = registry(default_structure());
        let b = registry(default_structure());

        let mut clipper_b = Clipper::new(b.store());
        assert!(b
            .add_point(&mut clipper_b, Point::new(1.0, 1.0, 1.0), 0, 0, b"from-b", 0, None)
            .unwrap());

        let mut clipper_a = Clipper::new(a.store());
        assert!(a
            .add_point(&mut clipper_a, Point::new(900.0, 900.0, 900.0), 0, 1, b"from-a", 0, None)
            .unwrap());

        a.merge(&b).unwrap();

        let bytes = a.save().unwrap();
        let info_pool = InfoPool::new(PoolConfig::unbounded(64));
        let data_pool = DataPool::new(PoolConfig::unbounded(64));
        let loaded = BaseChunk::load(&bytes, &info_pool, &data_pool).unwrap();
        assert_eq!(loaded.len(), 2, "merge must fold b's point in alongside a's own");
    }
}
