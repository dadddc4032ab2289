//! Bottom-up assembly of a [`QuadTree`] from a known set of leaves.

use super::node::{LeafNode, Node, NodeId, NonLeafNode};
use super::partition::Partition;
use super::{PartitionSupplier, QuadTree};
use crate::error::{ClusterError, Result};
use crate::tile;
use geocluster_types::Envelope;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a tree whose leaves are exactly the given quad-keys, plus the empty
/// siblings needed to complete every parent.
///
/// # Examples
///
/// ```
/// use geocluster::quadtree::{QuadTreeBuilder, SimplePartition, Pointer};
///
/// let mut builder = QuadTreeBuilder::new(|_: &str| SimplePartition::<Pointer>::new(8));
/// builder.add("0120", SimplePartition::new(8)).unwrap();
/// builder.add("013", SimplePartition::new(8)).unwrap();
/// let tree = builder.build().unwrap();
///
/// assert_eq!(tree.root_key(), "01");
/// let keys: Vec<&str> = tree.leaves().map(|l| l.quad_key()).collect();
/// assert_eq!(keys, ["010", "011", "0120", "0121", "0122", "0123", "013"]);
/// ```
pub struct QuadTreeBuilder<P: Partition> {
    supplier: PartitionSupplier<P>,
    quad_key: Option<String>,
    fixed: bool,
    leaves: BTreeMap<String, P>,
}

impl<P: Partition> QuadTreeBuilder<P> {
    pub fn new<F>(supplier: F) -> Self
    where
        F: Fn(&str) -> P + Send + Sync + 'static,
    {
        Self {
            supplier: Arc::new(supplier),
            quad_key: None,
            fixed: false,
            leaves: BTreeMap::new(),
        }
    }

    /// Root the tree at `quad_key` instead of the common prefix of the leaves.
    pub fn with_quad_key(mut self, quad_key: impl Into<String>) -> Self {
        self.quad_key = Some(quad_key.into());
        self
    }

    /// Pin the built tree's domain to its root tile.
    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn add(&mut self, quad_key: &str, partition: P) -> Result<&mut Self> {
        tile::digits_of(quad_key)?;
        if self.leaves.insert(quad_key.to_string(), partition).is_some() {
            return Err(ClusterError::InvalidInput(format!(
                "duplicate leaf quad-key '{quad_key}'"
            )));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<QuadTree<P>> {
        let root_key = match &self.quad_key {
            Some(key) => key.clone(),
            None => self.common_prefix(),
        };
        tile::digits_of(&root_key)?;
        self.check_keys(&root_key)?;

        let mut nodes: Vec<Node<P>> = Vec::with_capacity(self.leaves.len() * 2);
        let mut pending: BTreeMap<String, NodeId> = BTreeMap::new();
        for (key, partition) in self.leaves {
            let leaf = LeafNode::new(key.clone(), partition)?;
            pending.insert(key, nodes.len());
            nodes.push(Node::Leaf(leaf));
        }
        if pending.is_empty() {
            let partition = (self.supplier)(&root_key);
            pending.insert(root_key.clone(), nodes.len());
            nodes.push(Node::Leaf(LeafNode::new(root_key.clone(), partition)?));
        }

        loop {
            let depth = pending.keys().map(String::len).max().unwrap_or(0);
            if depth <= root_key.len() {
                break;
            }

            let deepest: Vec<String> = pending
                .keys()
                .filter(|key| key.len() == depth)
                .cloned()
                .collect();
            let mut families: BTreeMap<String, [Option<NodeId>; 4]> = BTreeMap::new();
            for key in deepest {
                let (Some(parent), Some(ordinal)) =
                    (tile::parent_key(&key), tile::sibling_ordinal(&key))
                else {
                    continue;
                };
                let id = pending.remove(&key);
                families.entry(parent.to_string()).or_default()[ordinal] = id;
            }

            for (parent, members) in families {
                let mut children = [0; 4];
                let mut data_bounds = Envelope::empty();
                for (digit, member) in members.into_iter().enumerate() {
                    let id = match member {
                        Some(id) => id,
                        None => {
                            let key = tile::child_key(&parent, digit);
                            let partition = (self.supplier)(&key);
                            nodes.push(Node::Leaf(LeafNode::new(key, partition)?));
                            nodes.len() - 1
                        }
                    };
                    data_bounds.expand_to_include(&nodes[id].data_bounds());
                    children[digit] = id;
                }
                let tile_bounds = tile::bounds_of(&parent)?;
                pending.insert(parent.clone(), nodes.len());
                nodes.push(Node::NonLeaf(NonLeafNode {
                    quad_key: parent,
                    tile_bounds,
                    data_bounds,
                    children,
                }));
            }
        }

        let root = pending.remove(&root_key).ok_or_else(|| {
            ClusterError::Other(format!("no node assembled for root '{root_key}'"))
        })?;
        link_leaves(&mut nodes, root);

        let enforced = if self.fixed {
            Some((root_key.clone(), nodes[root].tile_bounds()))
        } else {
            None
        };
        debug!("built quadtree: root='{}', nodes={}", root_key, nodes.len());
        Ok(QuadTree::from_parts(nodes, root, self.supplier, enforced))
    }

    fn common_prefix(&self) -> String {
        let mut keys = self.leaves.keys();
        let Some(first) = keys.next() else {
            return String::new();
        };
        let len = keys.fold(first.len(), |len, key| {
            len.min(tile::common_prefix_len(first, key))
        });
        first[..len].to_string()
    }

    /// Leaves must sit under the root and must not nest inside each other.
    fn check_keys(&self, root_key: &str) -> Result<()> {
        let mut previous: Option<&str> = None;
        for key in self.leaves.keys() {
            if !key.starts_with(root_key) {
                return Err(ClusterError::InvalidInput(format!(
                    "leaf '{key}' lies outside the root '{root_key}'"
                )));
            }
            if let Some(prev) = previous
                && key.starts_with(prev)
            {
                return Err(ClusterError::InvalidInput(format!(
                    "leaf '{key}' is nested inside leaf '{prev}'"
                )));
            }
            previous = Some(key);
        }
        Ok(())
    }
}

fn link_leaves<P>(nodes: &mut [Node<P>], root: NodeId) {
    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        match &nodes[id] {
            Node::Leaf(_) => order.push(id),
            Node::NonLeaf(node) => stack.extend(node.children.iter().rev()),
        }
    }
    for (pos, &id) in order.iter().enumerate() {
        if let Node::Leaf(leaf) = &mut nodes[id] {
            leaf.prev = pos.checked_sub(1).map(|p| order[p]);
            leaf.next = order.get(pos + 1).copied();
        }
    }
}
