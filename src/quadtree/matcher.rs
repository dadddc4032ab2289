//! Merge-style pairing of the leaves of two quadtrees.

use super::QuadTree;
use super::node::LeafNode;
use super::partition::Partition;

/// Walks the leaf chains of two trees in quad-key order and pairs leaves that
/// share a tile or whose tiles nest inside one another.
///
/// Leaves of a single tree never overlap, so a leaf can only pair with a
/// contiguous run of leaves on the other side and one pass over both chains
/// finds every overlapping pair.
pub struct QuadTreeJoinMatcher<'a, L: Partition, R: Partition> {
    left: &'a QuadTree<L>,
    right: &'a QuadTree<R>,
}

impl<'a, L: Partition, R: Partition> QuadTreeJoinMatcher<'a, L, R> {
    pub fn new(left: &'a QuadTree<L>, right: &'a QuadTree<R>) -> Self {
        Self { left, right }
    }

    /// Overlapping leaf pairs, skipping leaves that hold no values.
    pub fn match_leaves(&self) -> Vec<(&'a LeafNode<L>, &'a LeafNode<R>)> {
        let mut pairs = Vec::new();
        let mut left = self.left.leaves().peekable();
        let mut right = self.right.leaves().peekable();

        while let (Some(l), Some(r)) = (left.peek().copied(), right.peek().copied()) {
            let (lk, rk) = (l.quad_key(), r.quad_key());
            let matched = lk == rk || lk.starts_with(rk) || rk.starts_with(lk);
            if matched && l.value_count() > 0 && r.value_count() > 0 {
                pairs.push((l, r));
            }

            if lk == rk {
                left.next();
                right.next();
            } else if rk.starts_with(lk) {
                right.next();
            } else if lk.starts_with(rk) || lk < rk {
                left.next();
            } else {
                right.next();
            }
        }
        pairs
    }

    /// Overlapping leaf quad-key pairs.
    pub fn match_keys(&self) -> Vec<(String, String)> {
        self.match_leaves()
            .into_iter()
            .map(|(l, r)| (l.quad_key().to_string(), r.quad_key().to_string()))
            .collect()
    }
}
