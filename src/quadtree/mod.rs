//! Adaptive quadtree over quad-key tiles.
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by
//! [`NodeId`]. Every leaf owns a [`Partition`]; when a partition rejects a
//! value the leaf is split into its four child tiles in place, and values whose
//! envelope crosses a tile edge are replicated into every child they touch.
//! Leaves are additionally chained in quad-key order so a full scan never has
//! to walk the tree.
//!
//! A tree is either *range-expandable*, growing new parents above the root when
//! a value falls outside it, or *fixed* to an enforced tile, in which case a
//! value outside that tile is [`ClusterError::OutOfRange`].

pub mod builder;
pub mod matcher;
pub mod node;
pub mod partition;
pub mod pointer;

pub use builder::QuadTreeBuilder;
pub use matcher::QuadTreeJoinMatcher;
pub use node::{LeafNode, NodeId, SpatialRelation};
pub use partition::{EnvelopedValue, Partition, SimplePartition, SinglePartition, Void, VoidPartition};
pub use pointer::{PersistedPointerPartition, Pointer, PointerGroup, PointerPartition};

use crate::error::{ClusterError, Result};
use crate::tile;
use geocluster_types::Envelope;
use log::debug;
use node::{Node, NonLeafNode};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Creates the partition of a new leaf, given the leaf's quad-key.
pub type PartitionSupplier<P> = Arc<dyn Fn(&str) -> P + Send + Sync>;

pub struct QuadTree<P: Partition> {
    nodes: Vec<Node<P>>,
    root: NodeId,
    /// Arena slots released by collapses, reused before the arena grows.
    free: Vec<NodeId>,
    supplier: PartitionSupplier<P>,
    /// Pinned domain of a fixed-range tree.
    enforced: Option<(String, Envelope)>,
}

impl<P: Partition> QuadTree<P> {
    /// Range-expandable tree whose root covers the whole tile domain.
    pub fn new<F>(supplier: F) -> Self
    where
        F: Fn(&str) -> P + Send + Sync + 'static,
    {
        Self::with_root(Arc::new(supplier), String::new(), tile::domain_bounds())
    }

    /// Range-expandable tree starting at `quad_key`.
    pub fn with_quad_key<F>(quad_key: &str, supplier: F) -> Result<Self>
    where
        F: Fn(&str) -> P + Send + Sync + 'static,
    {
        let bounds = tile::bounds_of(quad_key)?;
        Ok(Self::with_root(Arc::new(supplier), quad_key.to_string(), bounds))
    }

    /// Tree whose domain is pinned to `quad_key`.
    pub fn fixed<F>(quad_key: &str, supplier: F) -> Result<Self>
    where
        F: Fn(&str) -> P + Send + Sync + 'static,
    {
        let mut tree = Self::with_quad_key(quad_key, supplier)?;
        tree.set_range_expandable(false);
        Ok(tree)
    }

    fn with_root(supplier: PartitionSupplier<P>, quad_key: String, bounds: Envelope) -> Self {
        let partition = supplier(&quad_key);
        Self {
            nodes: vec![Node::Leaf(LeafNode::with_bounds(quad_key, bounds, partition))],
            root: 0,
            free: Vec::new(),
            supplier,
            enforced: None,
        }
    }

    pub(crate) fn from_parts(
        nodes: Vec<Node<P>>,
        root: NodeId,
        supplier: PartitionSupplier<P>,
        enforced: Option<(String, Envelope)>,
    ) -> Self {
        Self {
            nodes,
            root,
            free: Vec::new(),
            supplier,
            enforced,
        }
    }

    /// Switching to fixed mode pins the domain to the current root tile.
    pub fn set_range_expandable(&mut self, expandable: bool) {
        if expandable {
            self.enforced = None;
        } else if self.enforced.is_none() {
            let root = &self.nodes[self.root];
            self.enforced = Some((root.quad_key().to_string(), root.tile_bounds()));
        }
    }

    pub fn is_range_expandable(&self) -> bool {
        self.enforced.is_none()
    }

    pub fn enforced_quad_key(&self) -> Option<&str> {
        self.enforced.as_ref().map(|(key, _)| key.as_str())
    }

    pub fn root_key(&self) -> &str {
        self.nodes[self.root].quad_key()
    }

    pub fn tile_bounds(&self) -> Envelope {
        self.nodes[self.root].tile_bounds()
    }

    /// Union of the envelopes of every stored value.
    pub fn data_bounds(&self) -> Envelope {
        self.nodes[self.root].data_bounds()
    }

    pub fn is_leaf_root(&self) -> bool {
        matches!(self.nodes[self.root], Node::Leaf(_))
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Insert `value` into every leaf whose tile intersects its envelope.
    ///
    /// Returns the quad-keys of the leaves that received the value.
    pub fn insert(&mut self, value: &P::Value) -> Result<SmallVec<[String; 4]>> {
        let envelope = value.envelope();
        if envelope.is_empty() {
            return Err(ClusterError::InvalidInput(
                "cannot insert a value with an empty envelope".to_string(),
            ));
        }
        self.fit_root(&envelope)?;

        let mut leaves: SmallVec<[NodeId; 4]> = SmallVec::new();
        self.insert_node(self.root, value, &envelope, &mut leaves)?;
        Ok(leaves
            .iter()
            .map(|&id| self.nodes[id].quad_key().to_string())
            .collect())
    }

    fn insert_node(
        &mut self,
        id: NodeId,
        value: &P::Value,
        envelope: &Envelope,
        out: &mut SmallVec<[NodeId; 4]>,
    ) -> Result<()> {
        let children = match &self.nodes[id] {
            Node::Leaf(_) => return self.insert_into_leaf(id, value, envelope, out),
            Node::NonLeaf(node) => node.children,
        };
        for child in children {
            if self.nodes[child].tile_bounds().intersects(envelope) {
                self.insert_node(child, value, envelope, out)?;
            }
        }
        if let Node::NonLeaf(node) = &mut self.nodes[id] {
            node.data_bounds.expand_to_include(envelope);
        }
        Ok(())
    }

    fn insert_into_leaf(
        &mut self,
        id: NodeId,
        value: &P::Value,
        envelope: &Envelope,
        out: &mut SmallVec<[NodeId; 4]>,
    ) -> Result<()> {
        loop {
            let leaf = self.leaf_mut(id)?;
            if leaf.partition.add(value, true) {
                out.push(id);
                return Ok(());
            }
            if leaf.partition.size() == 0 {
                return Err(ClusterError::TooBigValue(format!(
                    "value rejected by the empty leaf '{}'",
                    leaf.quad_key
                )));
            }

            match self.split(id) {
                Ok(()) if id == self.root => {
                    if let Some(only) = self.single_occupied_child(id) {
                        self.collapse_to(only);
                        self.fit_root(envelope)?;
                    }
                    return self.insert_node(self.root, value, envelope, out);
                }
                Ok(()) => return self.insert_node(id, value, envelope, out),
                Err(err) if err.is_too_big() => {
                    if !self.leaf_mut(id)?.partition.expand() {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Grow or check the root so that it can take a value with `envelope`.
    fn fit_root(&mut self, envelope: &Envelope) -> Result<()> {
        if let Some((key, bounds)) = self.enforced.clone() {
            if !bounds.intersects(envelope) {
                return Err(ClusterError::OutOfRange {
                    tree: key,
                    value: describe(envelope),
                });
            }
            while self.root_key().len() > key.len() && !self.tile_bounds().contains(envelope) {
                self.expand_root()?;
            }
            return Ok(());
        }

        while !self.tile_bounds().contains(envelope) {
            if self.root_key().is_empty() {
                if self.tile_bounds().intersects(envelope) {
                    break;
                }
                return Err(ClusterError::OutOfRange {
                    tree: String::new(),
                    value: describe(envelope),
                });
            }
            self.expand_root()?;
        }
        Ok(())
    }

    /// Put a new parent above the root, with three empty siblings.
    fn expand_root(&mut self) -> Result<()> {
        let root_key = self.root_key().to_string();
        let (Some(parent_key), Some(ordinal)) =
            (tile::parent_key(&root_key), tile::sibling_ordinal(&root_key))
        else {
            return Err(ClusterError::OutOfRange {
                tree: root_key,
                value: "<root>".to_string(),
            });
        };
        let parent_key = parent_key.to_string();
        let tile_bounds = tile::bounds_of(&parent_key)?;

        let mut children = [self.root; 4];
        for (digit, slot) in children.iter_mut().enumerate() {
            if digit != ordinal {
                *slot = self.push_leaf(tile::child_key(&parent_key, digit))?;
            }
        }
        self.link_children(&children, None, None);

        let data_bounds = self.data_bounds();
        debug!("expanded: '{}' -> '{}'", root_key, parent_key);
        self.root = self.push(Node::NonLeaf(NonLeafNode {
            quad_key: parent_key,
            tile_bounds,
            data_bounds,
            children,
        }));
        Ok(())
    }

    /// Turn leaf `id` into a non-leaf with four child leaves.
    ///
    /// The tree is untouched when the split fails.
    fn split(&mut self, id: NodeId) -> Result<()> {
        let Node::Leaf(leaf) = &self.nodes[id] else {
            return Ok(());
        };
        let quad_key = leaf.quad_key.clone();
        if quad_key.len() >= tile::MAX_LEVEL {
            return Err(ClusterError::TooBigValue(format!(
                "leaf '{quad_key}' is at the deepest level"
            )));
        }

        let mut children = Vec::with_capacity(4);
        for key in tile::child_keys(&quad_key) {
            let partition = (self.supplier)(&key);
            children.push(LeafNode::new(key, partition)?);
        }

        let count = leaf.partition.size();
        for value in leaf.partition.values() {
            let envelope = value.envelope();
            let mut placed = false;
            for child in children.iter_mut() {
                if !child.tile_bounds.intersects(&envelope) {
                    continue;
                }
                while !child.partition.add(&value, false) {
                    if !child.partition.expand() {
                        return Err(ClusterError::TooBigValue(format!(
                            "child '{}' cannot take its share of '{quad_key}'",
                            child.quad_key
                        )));
                    }
                }
                placed = true;
            }
            if !placed {
                return Err(ClusterError::Other(format!(
                    "value {} lies outside the tile '{quad_key}'",
                    describe(&envelope)
                )));
            }
        }

        if children.iter().all(|child| child.partition.size() == count) {
            return Err(ClusterError::TooBigValue(format!(
                "splitting '{quad_key}' does not reduce its {count} values"
            )));
        }

        debug!(
            "split: quadkey='{}', count={}, children=[{}]",
            quad_key,
            count,
            children
                .iter()
                .map(|c| c.partition.size().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );

        let (tile_bounds, data_bounds, prev, next) =
            (leaf.tile_bounds, leaf.partition.bounds(), leaf.prev, leaf.next);
        let mut ids = [0; 4];
        for (slot, child) in ids.iter_mut().zip(children) {
            *slot = self.push(Node::Leaf(child));
        }
        self.nodes[id] = Node::NonLeaf(NonLeafNode {
            quad_key,
            tile_bounds,
            data_bounds,
            children: ids,
        });
        self.link_children(&ids, prev, next);
        Ok(())
    }

    fn single_occupied_child(&self, id: NodeId) -> Option<NodeId> {
        let Node::NonLeaf(node) = &self.nodes[id] else {
            return None;
        };
        let mut occupied = node
            .children
            .iter()
            .copied()
            .filter(|&child| !self.nodes[child].data_bounds().is_empty());
        match (occupied.next(), occupied.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Make `id` the new root, dropping its siblings from the leaf chain.
    ///
    /// Every node outside the subtree of `id` is released.
    fn collapse_to(&mut self, id: NodeId) {
        debug!(
            "collapsed: '{}' -> '{}'",
            self.root_key(),
            self.nodes[id].quad_key()
        );
        let old_root = self.root;
        self.root = id;
        let (first, last) = (self.first_leaf(id), self.last_leaf(id));
        self.link(None, Some(first));
        self.link(Some(last), None);
        self.release(old_root, id);
    }

    /// Free the subtree at `id`, except the subtree at `keep`.
    fn release(&mut self, id: NodeId, keep: NodeId) {
        if id == keep {
            return;
        }
        if let Node::NonLeaf(node) = std::mem::replace(&mut self.nodes[id], Node::vacant(id)) {
            for child in node.children {
                self.release(child, keep);
            }
        }
        self.free.push(id);
    }

    /// Shrink the root to the smallest tile containing the data.
    ///
    /// Descends into the single child covering the data while that child is
    /// still an ancestor of the target tile; a leaf root is re-keyed directly.
    pub fn compact(&mut self) -> Result<()> {
        let data_bounds = self.data_bounds();
        if data_bounds.is_empty() {
            return Ok(());
        }
        let target = tile::smallest_tile_containing(&data_bounds);
        let before = self.root_key().to_string();

        loop {
            let root_key = self.root_key();
            if target.len() <= root_key.len() || !target.starts_with(root_key) {
                break;
            }
            let digit = usize::from(target.as_bytes()[root_key.len()] - b'0');
            match &mut self.nodes[self.root] {
                Node::NonLeaf(node) => {
                    let child = node.children[digit];
                    self.collapse_to(child);
                }
                Node::Leaf(leaf) => {
                    leaf.tile_bounds = tile::bounds_of(&target)?;
                    leaf.quad_key = target.clone();
                    break;
                }
            }
        }

        if self.enforced.is_some() {
            self.enforced = Some((self.root_key().to_string(), self.tile_bounds()));
        }
        debug!("compacted: '{}' -> '{}'", before, self.root_key());
        Ok(())
    }

    /// Leaves matching `op`; `All` yields every leaf in quad-key order.
    pub fn query_leaf_nodes(&self, op: SpatialRelation, key: &Envelope) -> Vec<&LeafNode<P>> {
        match op {
            SpatialRelation::All => self.leaves().collect(),
            SpatialRelation::Intersects => {
                let mut found = Vec::new();
                self.collect_leaves(self.root, key, &mut found);
                found
            }
        }
    }

    fn collect_leaves<'a>(&'a self, id: NodeId, key: &Envelope, out: &mut Vec<&'a LeafNode<P>>) {
        match &self.nodes[id] {
            Node::Leaf(leaf) => {
                if leaf.data_bounds().intersects(key) {
                    out.push(leaf);
                }
            }
            Node::NonLeaf(node) => {
                if node.data_bounds.intersects(key) {
                    for child in node.children {
                        self.collect_leaves(child, key, out);
                    }
                }
            }
        }
    }

    /// Values matching `op` against `key`.
    ///
    /// A value replicated into several leaves is returned once per leaf.
    pub fn query(&self, op: SpatialRelation, key: &Envelope) -> Vec<P::Value> {
        self.query_leaf_nodes(op, key)
            .into_iter()
            .flat_map(|leaf| leaf.query(op, key))
            .collect()
    }

    /// Leaves in quad-key order, following the leaf chain.
    pub fn leaves(&self) -> Leaves<'_, P> {
        Leaves {
            nodes: &self.nodes,
            next: Some(self.first_leaf(self.root)),
        }
    }

    /// The leaf addressed by exactly `quad_key`, if there is one.
    pub fn leaf(&self, quad_key: &str) -> Option<&LeafNode<P>> {
        let mut id = self.root;
        loop {
            match &self.nodes[id] {
                Node::Leaf(leaf) => return (leaf.quad_key == quad_key).then_some(leaf),
                Node::NonLeaf(node) => {
                    let depth = node.quad_key.len();
                    if quad_key.len() <= depth || !quad_key.starts_with(&node.quad_key) {
                        return None;
                    }
                    let digit = usize::from(quad_key.as_bytes()[depth].checked_sub(b'0')?);
                    id = *node.children.get(digit)?;
                }
            }
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafNode<P>> {
        match &mut self.nodes[id] {
            Node::Leaf(leaf) => Ok(leaf),
            Node::NonLeaf(node) => Err(ClusterError::Other(format!(
                "node '{}' is not a leaf",
                node.quad_key
            ))),
        }
    }

    fn push(&mut self, node: Node<P>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn push_leaf(&mut self, quad_key: String) -> Result<NodeId> {
        let partition = (self.supplier)(&quad_key);
        let leaf = LeafNode::new(quad_key, partition)?;
        Ok(self.push(Node::Leaf(leaf)))
    }

    fn first_leaf(&self, mut id: NodeId) -> NodeId {
        while let Node::NonLeaf(node) = &self.nodes[id] {
            id = node.children[0];
        }
        id
    }

    fn last_leaf(&self, mut id: NodeId) -> NodeId {
        while let Node::NonLeaf(node) = &self.nodes[id] {
            id = node.children[3];
        }
        id
    }

    /// Chain `prev`, the leaves of each child subtree, then `next`.
    fn link_children(&mut self, children: &[NodeId; 4], prev: Option<NodeId>, next: Option<NodeId>) {
        let mut tail = prev;
        for &child in children {
            let head = self.first_leaf(child);
            self.link(tail, Some(head));
            tail = Some(self.last_leaf(child));
        }
        self.link(tail, next);
    }

    fn link(&mut self, left: Option<NodeId>, right: Option<NodeId>) {
        if let Some(Node::Leaf(leaf)) = left.map(|id| &mut self.nodes[id]) {
            leaf.next = right;
        }
        if let Some(Node::Leaf(leaf)) = right.map(|id| &mut self.nodes[id]) {
            leaf.prev = left;
        }
    }
}

impl<P: Partition> fmt::Debug for QuadTree<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuadTree")
            .field("root", &self.root_key())
            .field("enforced", &self.enforced_quad_key())
            .field("leaves", &self.leaf_count())
            .finish()
    }
}

/// Iterator over the leaf chain of a [`QuadTree`].
pub struct Leaves<'a, P> {
    nodes: &'a [Node<P>],
    next: Option<NodeId>,
}

impl<'a, P> Iterator for Leaves<'a, P> {
    type Item = &'a LeafNode<P>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        match &self.nodes[id] {
            Node::Leaf(leaf) => {
                self.next = leaf.next;
                Some(leaf)
            }
            Node::NonLeaf(_) => {
                self.next = None;
                None
            }
        }
    }
}

fn describe(envelope: &Envelope) -> String {
    let key = tile::smallest_tile_containing(envelope);
    if key.is_empty() {
        format!(
            "[{}, {}, {}, {}]",
            envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y
        )
    } else {
        key
    }
}
