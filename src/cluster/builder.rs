//! Partitioning a record stream into quad-key clusters.

use super::binder::QuadKeyBinder;
use super::memory::InMemoryCluster;
use super::{QuadCluster, owns_point};
use crate::config::Config;
use crate::error::{ClusterError, Result};
use crate::projection::{self, CoordinateTransform};
use crate::quadtree::{Pointer, QuadTree, SimplePartition};
use crate::tile;
use geocluster_types::{ClusterSchema, Envelope, Record, TaggedRecord};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fraction of the leaf capacity a cluster is expected to fill.
const FILL_FACTOR: f64 = 0.5;

/// Builds [`InMemoryCluster`]s from records of one schema.
///
/// Geometries are reprojected to the reference projection, then either
/// partitioned by a fixed-range quadtree sized from the cluster count hint
/// ([`build`](Self::build)) or bound to an externally agreed tile set
/// ([`build_with_quad_keys`](Self::build_with_quad_keys)).
pub struct InMemoryClusterBuilder {
    schema: Arc<ClusterSchema>,
    geom_idx: usize,
    transform: Arc<dyn CoordinateTransform>,
    cluster_count_hint: usize,
    bind_outliers: bool,
}

impl InMemoryClusterBuilder {
    pub fn new(schema: ClusterSchema, config: &Config) -> Result<Self> {
        let geom_idx = schema.geometry_column_index().ok_or_else(|| {
            ClusterError::SchemaMismatch(format!(
                "no geometry column '{}' in the record schema",
                schema.geometry.name
            ))
        })?;
        let transform = projection::transform_for(schema.srid())?;
        Ok(Self {
            schema: Arc::new(schema),
            geom_idx,
            transform,
            cluster_count_hint: config.cluster_count_hint.max(1),
            bind_outliers: config.bind_outliers,
        })
    }

    pub fn with_cluster_count_hint(mut self, hint: usize) -> Self {
        self.cluster_count_hint = hint.max(1);
        self
    }

    pub fn with_bind_outliers(mut self, bind_outliers: bool) -> Self {
        self.bind_outliers = bind_outliers;
        self
    }

    pub fn schema(&self) -> &Arc<ClusterSchema> {
        &self.schema
    }

    /// Pair a record with its envelope in the reference projection.
    ///
    /// Returns `None` for a record without a usable geometry.
    pub fn tag(&self, record: Record) -> Result<Option<TaggedRecord>> {
        Ok(self
            .envelope_of(&record)?
            .map(|envelope| TaggedRecord::new(envelope, record)))
    }

    fn envelope_of(&self, record: &Record) -> Result<Option<Envelope>> {
        if !record.conforms_to(&self.schema.schema) {
            return Err(ClusterError::SchemaMismatch(format!(
                "record with {} values does not match the schema",
                record.len()
            )));
        }
        Ok(record
            .geometry_envelope(self.geom_idx)
            .filter(|env| !env.is_empty())
            .map(|env| self.transform.transform_envelope(&env)))
    }

    /// Partition `records` into roughly `cluster_count_hint` clusters.
    ///
    /// Records without geometry are dropped. Records reaching outside the
    /// tile domain go to the outliers cluster when outlier binding is on.
    pub fn build<I>(&self, records: I) -> Result<Vec<InMemoryCluster>>
    where
        I: IntoIterator<Item = Record>,
    {
        let domain = tile::domain_bounds();
        let mut tagged = Vec::new();
        let mut outliers = Vec::new();
        let mut skipped = 0usize;
        for record in records {
            match self.tag(record)? {
                Some(rec) if domain.contains(&rec.envelope) => tagged.push(rec),
                Some(rec) => outliers.push(rec),
                None => skipped += 1,
            }
        }

        let mut clusters = self.partition(tagged)?;
        if !outliers.is_empty() {
            if self.bind_outliers {
                clusters.push(InMemoryCluster::new(
                    tile::OUTLIERS_KEY,
                    self.schema.clone(),
                    outliers,
                )?);
            } else {
                debug!("dropped outliers: count={}", outliers.len());
            }
        }

        info!(
            "built clusters: count={}, records={}, skipped={}",
            clusters.len(),
            clusters.iter().map(|c| c.owned_count()).sum::<usize>(),
            skipped
        );
        Ok(clusters)
    }

    fn partition(&self, tagged: Vec<TaggedRecord>) -> Result<Vec<InMemoryCluster>> {
        if tagged.is_empty() {
            return Ok(Vec::new());
        }
        let root = owning_root(&tagged);
        let count = tagged.len();
        let hint = self.cluster_count_hint;
        let target = hint.min(count).max(1);
        let mut leaf_size = ((count as f64 / (target as f64 * FILL_FACTOR)).ceil() as usize).max(1);

        let tree = loop {
            match partition_tree(&root, &tagged, leaf_size) {
                Ok(tree) => {
                    let leaves = tree.leaves().filter(|l| l.value_count() > 0).count();
                    if leaves <= 2 * hint || leaf_size >= count {
                        break tree;
                    }
                    debug!("too many clusters: leaves={}, leaf_size={}", leaves, leaf_size);
                }
                Err(err) if err.is_too_big() && leaf_size < count => {
                    debug!("leaf too small: leaf_size={}, cause={}", leaf_size, err);
                }
                Err(err) => return Err(err),
            }
            leaf_size *= 2;
        };

        tree.leaves()
            .filter(|leaf| leaf.value_count() > 0)
            .map(|leaf| {
                let records = leaf
                    .values()
                    .map(|ptr| tagged[ptr.index].clone())
                    .collect();
                InMemoryCluster::new(leaf.quad_key(), self.schema.clone(), records)
            })
            .collect()
    }

    /// Bind every record to the known tiles it intersects.
    ///
    /// A record is owned by the bound tile owning the centre of its envelope.
    /// When none does, because the centre lies on the outer edge of the tile
    /// set or between its tiles, the first bound tile owns it, so that every
    /// record keeps exactly one owned copy. Records without geometry, and
    /// records no tile or fallback key takes, go to the outliers cluster when
    /// outlier binding is on.
    pub fn build_with_quad_keys<I, K, S>(&self, records: I, quad_keys: K) -> Result<Vec<InMemoryCluster>>
    where
        I: IntoIterator<Item = Record>,
        K: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let binder = QuadKeyBinder::new(quad_keys, self.bind_outliers, false)?;
        let mut groups: BTreeMap<String, (Vec<TaggedRecord>, Vec<TaggedRecord>)> = BTreeMap::new();
        let mut outliers = Vec::new();

        for record in records {
            let Some(envelope) = self.envelope_of(&record)? else {
                if self.bind_outliers {
                    outliers.push(TaggedRecord::new(Envelope::empty(), record));
                }
                continue;
            };
            let rec = TaggedRecord::new(envelope, record);
            let keys = binder.bind(&rec.envelope);
            if keys.is_empty() {
                if self.bind_outliers {
                    outliers.push(rec);
                }
                continue;
            }
            let owner = owner_position(&keys, &rec.envelope)?;
            for (pos, key) in keys.iter().enumerate() {
                let (owned, replicas) = groups.entry(key.clone()).or_default();
                if pos == owner {
                    owned.push(rec.clone());
                } else {
                    replicas.push(rec.clone());
                }
            }
        }

        let mut clusters = groups
            .into_iter()
            .map(|(key, (owned, replicas))| {
                InMemoryCluster::with_ownership(key, self.schema.clone(), owned, replicas)
            })
            .collect::<Result<Vec<_>>>()?;
        if !outliers.is_empty() {
            clusters.push(InMemoryCluster::new(
                tile::OUTLIERS_KEY,
                self.schema.clone(),
                outliers,
            )?);
        }
        Ok(clusters)
    }
}

/// Position in `keys` of the tile owning a record bound to all of them.
fn owner_position(keys: &[String], envelope: &Envelope) -> Result<usize> {
    let Some(centre) = envelope.centre() else {
        return Ok(0);
    };
    for (pos, key) in keys.iter().enumerate() {
        if owns_point(&tile::bounds_of(key)?, centre) {
            return Ok(pos);
        }
    }
    Ok(0)
}

/// Smallest tile containing the data that also owns every record centre.
fn owning_root(tagged: &[TaggedRecord]) -> String {
    let data_bounds = tagged
        .iter()
        .fold(Envelope::empty(), |acc, rec| acc.union(&rec.envelope));
    let mut root = tile::smallest_tile_containing(&data_bounds);
    while let Ok(bounds) = tile::bounds_of(&root) {
        let all_owned = tagged.iter().all(|rec| {
            rec.envelope
                .centre()
                .is_some_and(|centre| owns_point(&bounds, centre))
        });
        match tile::parent_key(&root) {
            Some(parent) if !all_owned => root = parent.to_string(),
            _ => break,
        }
    }
    root
}

fn partition_tree(
    root: &str,
    tagged: &[TaggedRecord],
    leaf_size: usize,
) -> Result<QuadTree<SimplePartition<Pointer>>> {
    let mut tree = QuadTree::fixed(root, move |_: &str| SimplePartition::new(leaf_size))?;
    for (idx, rec) in tagged.iter().enumerate() {
        tree.insert(&Pointer::new(rec.envelope, idx))?;
    }
    Ok(tree)
}

/// Partition `records` into clusters with the default configuration.
pub fn build_clusters<I>(records: I, schema: ClusterSchema, cluster_count_hint: usize) -> Result<Vec<InMemoryCluster>>
where
    I: IntoIterator<Item = Record>,
{
    InMemoryClusterBuilder::new(schema, &Config::default())?
        .with_cluster_count_hint(cluster_count_hint)
        .build(records)
}

/// Cluster `records` by an externally supplied set of tile quad-keys.
pub fn cluster_by_quad_keys<I, K, S>(
    records: I,
    schema: ClusterSchema,
    quad_keys: K,
    bind_outliers: bool,
) -> Result<Vec<InMemoryCluster>>
where
    I: IntoIterator<Item = Record>,
    K: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    InMemoryClusterBuilder::new(schema, &Config::default())?
        .with_bind_outliers(bind_outliers)
        .build_with_quad_keys(records, quad_keys)
}
