//! Quadtree nodes, stored in an arena and addressed by [`NodeId`].

use super::partition::Partition;
use crate::error::Result;
use crate::tile;
use geocluster_types::Envelope;
use std::fmt;

/// Index of a node in its tree's arena.
pub type NodeId = usize;

pub(crate) enum Node<P> {
    Leaf(LeafNode<P>),
    NonLeaf(NonLeafNode),
}

impl<P: Partition> Node<P> {
    /// Placeholder for a released arena slot, holding no partition.
    pub(crate) fn vacant(id: NodeId) -> Self {
        Node::NonLeaf(NonLeafNode {
            quad_key: String::new(),
            tile_bounds: Envelope::empty(),
            data_bounds: Envelope::empty(),
            children: [id; 4],
        })
    }

    pub(crate) fn quad_key(&self) -> &str {
        match self {
            Node::Leaf(leaf) => &leaf.quad_key,
            Node::NonLeaf(node) => &node.quad_key,
        }
    }

    pub(crate) fn tile_bounds(&self) -> Envelope {
        match self {
            Node::Leaf(leaf) => leaf.tile_bounds,
            Node::NonLeaf(node) => node.tile_bounds,
        }
    }

    pub(crate) fn data_bounds(&self) -> Envelope {
        match self {
            Node::Leaf(leaf) => leaf.partition.bounds(),
            Node::NonLeaf(node) => node.data_bounds,
        }
    }
}

/// A tile holding a partition of values, linked to its neighbours in
/// quad-key order.
pub struct LeafNode<P> {
    pub(crate) quad_key: String,
    pub(crate) tile_bounds: Envelope,
    pub(crate) partition: P,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
}

impl<P: Partition> LeafNode<P> {
    pub(crate) fn new(quad_key: String, partition: P) -> Result<Self> {
        let tile_bounds = tile::bounds_of(&quad_key)?;
        Ok(Self::with_bounds(quad_key, tile_bounds, partition))
    }

    pub(crate) fn with_bounds(quad_key: String, tile_bounds: Envelope, partition: P) -> Self {
        Self {
            quad_key,
            tile_bounds,
            partition,
            prev: None,
            next: None,
        }
    }

    pub fn quad_key(&self) -> &str {
        &self.quad_key
    }

    pub fn tile_bounds(&self) -> &Envelope {
        &self.tile_bounds
    }

    pub fn data_bounds(&self) -> Envelope {
        self.partition.bounds()
    }

    pub fn partition(&self) -> &P {
        &self.partition
    }

    pub fn value_count(&self) -> usize {
        self.partition.size()
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = P::Value> + '_> {
        self.partition.values()
    }

    /// Values of this leaf matching `op` against `key`.
    pub fn query(&self, op: SpatialRelation, key: &Envelope) -> Vec<P::Value> {
        match op {
            SpatialRelation::All => self.values().collect(),
            SpatialRelation::Intersects => {
                if self.data_bounds().intersects(key) {
                    self.partition.intersects(key)
                } else {
                    Vec::new()
                }
            }
        }
    }
}

impl<P: Partition> fmt::Debug for LeafNode<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Leaf({}:{})", self.quad_key, self.partition.size())
    }
}

pub(crate) struct NonLeafNode {
    pub(crate) quad_key: String,
    pub(crate) tile_bounds: Envelope,
    pub(crate) data_bounds: Envelope,
    pub(crate) children: [NodeId; 4],
}

/// Spatial operator of a quadtree query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialRelation {
    /// Values whose envelope intersects the query rectangle.
    Intersects,
    /// Every value, in leaf order.
    All,
}
