//! Depth-by-depth descent state (C3): walks bounding box, id and depth
//! together so every consumer that descends the tree — insertion, hierarchy
//! queries — agrees on the same coordinates without re-deriving
//! [`Dir::of`] or [`Id::climb`] independently.

use crate::bbox::BBox;
use crate::id::Id;
use crate::point::{Dir, Point};

/// Tracks `(bbox, id, depth)` while descending toward a point's home cell.
#[derive(Debug, Clone)]
pub struct Climber {
    bbox: BBox,
    id: Id,
    depth: usize,
    is3d: bool,
    path: Vec<Dir>,
}

impl Climber {
    /// Starts a climber at the root, covering `bbox`.
    pub fn new(bbox: BBox, is3d: bool) -> Self {
        Self { bbox, id: Id::root(), depth: 0, is3d, path: Vec::new() }
    }

    /// The sequence of octant/quadrant choices taken from the root to reach
    /// the node currently being visited. [`crate::registry::Registry::add_point`]
    /// feeds this straight into [`crate::hierarchy::Hierarchy::increment`]
    /// when the caller supplies a `Hierarchy` to update.
    pub fn path(&self) -> &[Dir] {
        &self.path
    }

    /// The bounding box of the node currently being visited.
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    /// The id of the node currently being visited.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// How many steps this climber has taken from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this climber is navigating a 3D (vs. 2D) tree.
    pub fn is3d(&self) -> bool {
        self.is3d
    }

    /// Steps one level toward `point`: narrows the bbox, climbs the id, and
    /// bumps the depth. The direction chosen is exactly [`Dir::of`] applied
    /// to the current bbox's midpoint, so two climbers fed the same point
    /// from the same root always visit the identical sequence of nodes.
    pub fn magnify(&mut self, point: &Point) {
        let dir = Dir::of(point, &self.bbox.mid(), self.is3d);
        self.bbox.go(dir);
        self.id = self.id.climb(dir);
        self.depth += 1;
        self.path.push(dir);
    }
}

/// Mirrors [`Climber`] for walking the accounting-only
/// [`crate::hierarchy::Hierarchy`] tree, where descent is driven by which
/// octant of a query box is being visited rather than by a single point's
/// position. Immutable/functional rather than stepped in place, since a
/// hierarchy query branches into up to eight children per node instead of
/// following one point down a single path.
#[derive(Debug, Clone)]
pub struct HierarchyClimber {
    bbox: BBox,
    depth: usize,
    is3d: bool,
}

impl HierarchyClimber {
    /// Starts a hierarchy climber at the root, covering `bbox`.
    pub fn new(bbox: BBox, is3d: bool) -> Self {
        Self { bbox, depth: 0, is3d }
    }

    /// The bounding box of the node currently being visited.
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    /// How many steps this climber has taken from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this climber is navigating a 3D (vs. 2D) tree.
    pub fn is3d(&self) -> bool {
        self.is3d
    }

    /// The directions a child step can take: all eight octants in 3D, the
    /// four quadrants in 2D.
    pub fn directions(&self) -> Vec<Dir> {
        if self.is3d {
            Dir::all_3d().to_vec()
        } else {
            Dir::all_2d().to_vec()
        }
    }

    /// A new climber one level deeper, toward `dir`. Leaves `self` untouched
    /// so a caller can fan out into several children from the same parent.
    pub fn child(&self, dir: Dir) -> HierarchyClimber {
        HierarchyClimber { bbox: self.bbox.going(dir), depth: self.depth + 1, is3d: self.is3d }
    }
}
