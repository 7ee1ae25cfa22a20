//! The accounting-only point-count tree (C6): a much smaller shadow of the
//! main tree that records, per node, how many points came to rest there,
//! without any point data. A client can answer "how many points does this
//! box hold between these two depths" by walking this tree instead of
//! touching the cold range at all.
//!
//! [`crate::registry::Registry::add_point`] takes an optional `&mut
//! Hierarchy` and, on a successful placement, increments it at the
//! [`crate::climber::Climber::path`] the point settled at — the same path
//! used to route the point through [`crate::cell::Tube`]s, so no coordinate
//! is recomputed. A caller that doesn't care about live counts passes
//! `None`; one that shards insertion across producers typically keeps one
//! `Hierarchy` per shard and combines them afterward via [`Hierarchy::merge`].

use crate::bbox::BBox;
use crate::climber::HierarchyClimber;
use crate::error::{Error, Result};
use crate::point::Dir;
use crate::structure::HierarchyConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One node's local point count and its present children, keyed by
/// octant/quadrant index. A node with no children and `count == 0` simply
/// means a point passed through it only to come to rest somewhere below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Points whose final resting place is this exact node (not its descendants).
    pub count: u64,
    /// Present children, keyed by octant/quadrant index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<u8, Node>,
}

/// The accounting tree, rooted at the same node as the tree it shadows.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    config: HierarchyConfig,
    root: Node,
}

impl Hierarchy {
    /// Builds an empty hierarchy rooted at depth zero.
    pub fn new(config: HierarchyConfig) -> Self {
        Self { config, root: Node::default() }
    }

    /// The paging configuration this hierarchy was built with.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// The root node of the full (unfiltered) tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Records one point that settled at the node reached by `path` (the
    /// sequence of directions taken from the root).
    pub fn increment(&mut self, path: &[Dir]) {
        let mut cursor = &mut self.root;
        for dir in path {
            cursor = cursor.children.entry(dir.to_index()).or_default();
        }
        cursor.count += 1;
    }

    /// The total number of points recorded anywhere in the tree.
    pub fn total(&self) -> u64 {
        fn sum(node: &Node) -> u64 {
            node.count + node.children.values().map(sum).sum::<u64>()
        }
        sum(&self.root)
    }

    /// Returns the subtree of nodes between `depth_begin` (inclusive) and
    /// `depth_end` (exclusive) whose bounding box overlaps `qbox`, counts
    /// intact. `root_bbox` and `is3d` describe the tree this hierarchy
    /// shadows, since the hierarchy itself stores no coordinates.
    pub fn query(
        &self,
        qbox: &BBox,
        root_bbox: BBox,
        depth_begin: usize,
        depth_end: usize,
        is3d: bool,
    ) -> Node {
        fn walk(
            node: &Node,
            climber: &HierarchyClimber,
            qbox: &BBox,
            depth_begin: usize,
            depth_end: usize,
        ) -> Option<Node> {
            if !climber.bbox().overlaps(qbox) || climber.depth() >= depth_end {
                return None;
            }
            let mut out = Node::default();
            if climber.depth() >= depth_begin {
                out.count = node.count;
            }
            for (&index, child) in &node.children {
                let child_climber = climber.child(Dir::from_index(index));
                if let Some(child_out) = walk(child, &child_climber, qbox, depth_begin, depth_end) {
                    if child_out.count > 0 || !child_out.children.is_empty() {
                        let _ = out.children.insert(index, child_out);
                    }
                }
            }
            Some(out)
        }

        let climber = HierarchyClimber::new(root_bbox, is3d);
        walk(&self.root, &climber, qbox, depth_begin, depth_end).unwrap_or_default()
    }

    /// Folds `other`'s counts into `self`, node by node. Used to combine
    /// hierarchies accumulated independently by separate producers.
    pub fn merge(&mut self, other: &Hierarchy) {
        fn merge_node(into: &mut Node, from: &Node) {
            into.count += from.count;
            for (index, child) in &from.children {
                merge_node(into.children.entry(*index).or_default(), child);
            }
        }
        merge_node(&mut self.root, &other.root);
    }

    /// Serializes the whole tree as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.root).map_err(|e| Error::CorruptHierarchy(e.to_string()))
    }

    /// Rebuilds a hierarchy from JSON produced by [`Hierarchy::to_json`].
    /// `config` is not itself carried in the JSON (the serialized form is
    /// just the node tree), so the caller supplies the same paging
    /// configuration it serialized with.
    pub fn from_json(config: HierarchyConfig, json: &str) -> Result<Hierarchy> {
        let root: Node = serde_json::from_str(json).map_err(|e| Error::CorruptHierarchy(e.to_string()))?;
        Ok(Hierarchy { config, root })
    }

    /// Serializes the tree breadth-first: each node is an 8-byte big-endian
    /// count followed by a 1-byte bitmap of which of its (up to eight) child
    /// slots are present, with present children appended to the queue in
    /// ascending index order. Compact and streaming-friendly compared to
    /// JSON, at the cost of being opaque without this format in hand —
    /// matches the paging granularity `config.step` describes.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(&self.root);
        while let Some(node) = queue.pop_front() {
            out.extend_from_slice(&node.count.to_be_bytes());
            let mut bitmap = 0u8;
            for index in 0..8u8 {
                if node.children.contains_key(&index) {
                    bitmap |= 1 << index;
                }
            }
            out.push(bitmap);
            for index in 0..8u8 {
                if let Some(child) = node.children.get(&index) {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Reconstructs a hierarchy from the format [`Hierarchy::to_binary`] writes.
    pub fn from_binary(config: HierarchyConfig, bytes: &[u8]) -> Result<Hierarchy> {
        fn read_record(bytes: &[u8], cursor: &mut usize) -> Result<(u64, u8)> {
            if *cursor + 9 > bytes.len() {
                return Err(Error::CorruptHierarchy("truncated node record".into()));
            }
            let count = u64::from_be_bytes(bytes[*cursor..*cursor + 8].try_into().unwrap());
            let bitmap = bytes[*cursor + 8];
            *cursor += 9;
            Ok((count, bitmap))
        }

        let mut cursor = 0usize;
        let (root_count, root_bitmap) = read_record(bytes, &mut cursor)?;
        let mut root = Node { count: root_count, children: BTreeMap::new() };

        let mut queue: VecDeque<(Vec<u8>, u8)> = VecDeque::new();
        queue.push_back((Vec::new(), root_bitmap));

        while let Some((path, bitmap)) = queue.pop_front() {
            for index in 0..8u8 {
                if bitmap & (1 << index) == 0 {
                    continue;
                }
                let (count, child_bitmap) = read_record(bytes, &mut cursor)?;
                let mut node = &mut root;
                for &step in &path {
                    node = node
                        .children
                        .get_mut(&step)
                        .expect("path only contains indices already inserted below root");
                }
                let _ = node.children.insert(index, Node { count, children: BTreeMap::new() });

                let mut child_path = path.clone();
                child_path.push(index);
                queue.push_back((child_path, child_bitmap));
            }
        }

        Ok(Hierarchy { config, root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point;

    fn cube(side: f64) -> BBox {
        BBox::new(Point::new(0.0, 0.0, 0.0), Point::new(side, side, side))
    }

    fn path(indices: &[u8]) -> Vec<Dir> {
        indices.iter().map(|&i| Dir::from_index(i)).collect()
    }

    #[test]
    fn increment_creates_intermediate_nodes_with_only_the_leaf_counted() {
        let mut h = Hierarchy::new(HierarchyConfig::default());
        h.increment(&path(&[3, 5]));
        assert_eq!(h.root().count, 0);
        let mid = &h.root().children[&3];
        assert_eq!(mid.count, 0);
        assert_eq!(mid.children[&5].count, 1);
        assert_eq!(h.total(), 1);
    }

    #[test]
    fn total_sums_every_node_in_the_tree() {
        let mut h = Hierarchy::new(HierarchyConfig::default());
        h.increment(&path(&[]));
        h.increment(&path(&[1]));
        h.increment(&path(&[1, 2]));
        h.increment(&path(&[1, 2]));
        assert_eq!(h.total(), 4);
    }

    #[test]
    fn binary_round_trips() {
        let mut h = Hierarchy::new(HierarchyConfig::default());
        h.increment(&path(&[]));
        h.increment(&path(&[0]));
        h.increment(&path(&[0, 7]));
        h.increment(&path(&[4]));

        let bytes = h.to_binary();
        let back = Hierarchy::from_binary(*h.config(), &bytes).unwrap();
        assert_eq!(back.root(), h.root());
    }

    #[test]
    fn json_round_trips() {
        let mut h = Hierarchy::new(HierarchyConfig::default());
        h.increment(&path(&[2, 2, 2]));
        let json = h.to_json().unwrap();
        let back = Hierarchy::from_json(*h.config(), &json).unwrap();
        assert_eq!(back.root(), h.root());
    }

    #[test]
    fn merge_sums_matching_nodes_and_unions_the_rest() {
        let mut a = Hierarchy::new(HierarchyConfig::default());
        a.increment(&path(&[1]));
        a.increment(&path(&[1, 2]));

        let mut b = Hierarchy::new(HierarchyConfig::default());
        b.increment(&path(&[1]));
        b.increment(&path(&[3]));

        a.merge(&b);
        assert_eq!(a.root().children[&1].count, 2);
        assert_eq!(a.root().children[&1].children[&2].count, 1);
        assert_eq!(a.root().children[&3].count, 1);
        assert_eq!(a.total(), 4);
    }

    #[test]
    fn query_prunes_by_depth_range_and_bbox_overlap() {
        let mut h = Hierarchy::new(HierarchyConfig::default());
        // Three levels deep, always taking octant 0 (lower corner of every
        // axis), so every node sits inside the lower-corner sub-box.
        h.increment(&path(&[0]));
        h.increment(&path(&[0, 0]));
        h.increment(&path(&[0, 0, 0]));
        // And one branch that goes the opposite way entirely.
        h.increment(&path(&[7]));

        let root_bbox = cube(8.0);
        // Strictly inside the lower octant, not touching the octant-7 half
        // at all, so overlap with that branch is unambiguous.
        let lower_octant = BBox::new(Point::new(0.0, 0.0, 0.0), Point::new(3.9, 3.9, 3.9));

        let pruned = h.query(&lower_octant, root_bbox, 1, 3, true);
        // Depth 0 (the tree root) is excluded by depth_begin = 1; depth 3+ is
        // excluded by depth_end = 3; only the depth-1 and depth-2 nodes in
        // the lower octant survive, and the unrelated octant-7 branch never
        // overlaps the query box so it is pruned entirely.
        assert_eq!(pruned.count, 0, "the tree root itself is excluded by depth_begin");
        assert!(!pruned.children.contains_key(&7), "octant 7 branch doesn't overlap the query box");
        let depth1 = &pruned.children[&0];
        assert_eq!(depth1.count, 1);
        let depth2 = &depth1.children[&0];
        assert_eq!(depth2.count, 1);
        assert!(depth2.children.is_empty(), "depth 3 is excluded by depth_end");
    }
}
