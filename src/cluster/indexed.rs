//! Clusters read back from storage, with their intra-cluster sub-index.

use super::QuadCluster;
use crate::error::{ClusterError, Result};
use crate::quadtree::{
    PersistedPointerPartition, Pointer, PointerPartition, QuadTree, QuadTreeBuilder,
    SpatialRelation,
};
use crate::tile;
use geocluster_types::{ClusterSchema, Envelope, TaggedRecord};
use log::warn;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A stored cluster loaded into memory.
///
/// When the cluster was written with a sub-index, range queries go through a
/// quadtree of [`Pointer`]s into the record list instead of scanning it.
#[derive(Debug)]
pub struct IndexedCluster {
    quad_key: String,
    tile_bounds: Option<Envelope>,
    data_bounds: Envelope,
    schema: Arc<ClusterSchema>,
    records: Vec<TaggedRecord>,
    duplicate_count: usize,
    index: Option<QuadTree<PointerPartition>>,
}

impl IndexedCluster {
    /// `records` must already be ordered owned-first.
    ///
    /// Fails with [`ClusterError::InvalidFormat`] when the sub-index points
    /// past the end of `records`.
    pub fn new(
        quad_key: impl Into<String>,
        schema: Arc<ClusterSchema>,
        records: Vec<TaggedRecord>,
        duplicate_count: usize,
        index: Option<QuadTree<PointerPartition>>,
    ) -> Result<Self> {
        let quad_key = quad_key.into();
        let tile_bounds = if tile::is_outliers(&quad_key) {
            None
        } else {
            Some(tile::bounds_of(&quad_key)?)
        };
        if let Some(tree) = &index
            && let Some(bad) = tree
                .query(SpatialRelation::All, &Envelope::empty())
                .into_iter()
                .find(|ptr| ptr.index >= records.len())
        {
            return Err(ClusterError::InvalidFormat(format!(
                "sub-index of {} points at record {} of {}",
                quad_key,
                bad.index,
                records.len()
            )));
        }
        let data_bounds = records
            .iter()
            .fold(Envelope::empty(), |acc, rec| acc.union(&rec.envelope));
        Ok(Self {
            quad_key,
            tile_bounds,
            data_bounds,
            schema,
            records,
            duplicate_count,
            index,
        })
    }

    pub fn sub_index(&self) -> Option<&QuadTree<PointerPartition>> {
        self.index.as_ref()
    }
}

impl QuadCluster for IndexedCluster {
    fn quad_key(&self) -> &str {
        &self.quad_key
    }

    fn tile_bounds(&self) -> Option<Envelope> {
        self.tile_bounds
    }

    fn data_bounds(&self) -> Envelope {
        self.data_bounds
    }

    fn schema(&self) -> &ClusterSchema {
        &self.schema
    }

    fn records(&self) -> &[TaggedRecord] {
        &self.records
    }

    fn duplicate_count(&self) -> usize {
        self.duplicate_count
    }

    fn query_positions(&self, range: &Envelope) -> Vec<usize> {
        let Some(index) = &self.index else {
            return self
                .records
                .iter()
                .enumerate()
                .filter(|(_, rec)| rec.envelope.intersects(range))
                .map(|(idx, _)| idx)
                .collect();
        };

        let mut seen = FxHashSet::default();
        let mut hits: Vec<usize> = index
            .query(SpatialRelation::Intersects, range)
            .into_iter()
            .map(|ptr| ptr.index)
            .filter(|&idx| seen.insert(idx))
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Quadtree over the records of one cluster, pointing at record positions.
///
/// The tree starts at the cluster's tile and grows upward for records reaching
/// beyond it. Returns `None` when the records cannot be indexed, in which case
/// the cluster is stored without a sub-index and queried by scanning.
pub fn build_sub_index(
    quad_key: &str,
    records: &[TaggedRecord],
    max_slots: usize,
    fill_ratio: f64,
) -> Option<QuadTree<PointerPartition>> {
    if tile::is_outliers(quad_key) {
        return None;
    }
    let supplier = move |_: &str| PointerPartition::with_limits(max_slots, fill_ratio);
    let mut tree = QuadTree::with_quad_key(quad_key, supplier).ok()?;
    for (idx, rec) in records.iter().enumerate() {
        if rec.envelope.is_empty() {
            continue;
        }
        if let Err(err) = tree.insert(&Pointer::new(rec.envelope, idx)) {
            warn!("sub-index skipped: quadkey={}, cause={}", quad_key, err);
            return None;
        }
    }
    Some(tree)
}

/// Serialized sub-index: the root key and the non-empty leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSubIndex {
    pub root: String,
    pub leaves: Vec<(String, PersistedPointerPartition)>,
}

impl PersistedSubIndex {
    pub fn from_tree(tree: &QuadTree<PointerPartition>) -> Self {
        Self {
            root: tree.root_key().to_string(),
            leaves: tree
                .leaves()
                .filter(|leaf| leaf.value_count() > 0)
                .map(|leaf| (leaf.quad_key().to_string(), leaf.partition().to_persisted()))
                .collect(),
        }
    }

    pub fn into_tree(self) -> Result<QuadTree<PointerPartition>> {
        let mut builder =
            QuadTreeBuilder::new(|_: &str| PointerPartition::new()).with_quad_key(self.root);
        for (key, persisted) in self.leaves {
            builder.add(&key, PointerPartition::from_persisted(persisted))?;
        }
        builder.build()
    }
}
