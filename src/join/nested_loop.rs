//! Nested-loop spatial joins over clustered datasets.

use super::predicate::{PairMatcher, SpatialPredicate};
use crate::cache::ClusterCache;
use crate::cluster::QuadCluster;
use crate::error::{ClusterError, Result};
use crate::projection;
use crate::storage::ClusterDataset;
use geocluster_types::{ClusterSchema, Record, TaggedRecord};
use log::{debug, info};
use std::collections::BTreeMap;

/// A left record and a right record satisfying the join predicate.
pub type JoinedPair = (TaggedRecord, TaggedRecord);

/// Join two stored datasets cluster pair by cluster pair.
///
/// Cluster pairs come from [`GlobalIndex::match_clusters`], widened by the
/// join distance. Within a pair the smaller cluster is scanned and each of
/// its records searches the other cluster's sub-index. Only owned records take
/// part on either side, so a pair of records replicated into several tiles
/// is reported once: by the two clusters owning them. Which side is scanned
/// does not change the result.
///
/// [`GlobalIndex::match_clusters`]: crate::storage::GlobalIndex::match_clusters
pub fn spatial_join(
    left: &ClusterCache<ClusterDataset>,
    right: &ClusterCache<ClusterDataset>,
    predicate: SpatialPredicate,
) -> Result<Vec<JoinedPair>> {
    let (left_index, right_index) = (left.source().index(), right.source().index());
    let forward = PairMatcher::new(predicate, left_index.schema(), right_index.schema())?;
    let backward = forward.reversed();

    let mut joined = Vec::new();
    for (le, re) in left_index.match_clusters(right_index, forward.search_distance()) {
        if le.owned_count == 0 || re.owned_count == 0 {
            continue;
        }
        let lc = left.get_cluster(&le.quad_key)?;
        let rc = right.get_cluster(&re.quad_key)?;

        let before = joined.len();
        if lc.owned_count() <= rc.owned_count() {
            join_owned(&*lc, &*rc, &forward, |o, i| joined.push((o.clone(), i.clone())));
        } else {
            join_owned(&*rc, &*lc, &backward, |o, i| joined.push((i.clone(), o.clone())));
        }
        debug!(
            "joined clusters: left={}({}), right={}({}), matches={}",
            le.quad_key,
            lc.record_count(),
            re.quad_key,
            rc.record_count(),
            joined.len() - before
        );
    }
    info!("spatial join: predicate={}, matches={}", predicate, joined.len());
    Ok(joined)
}

/// Match the owned records of `outer` against the owned records of `inner`.
fn join_owned<'a, O, I, F>(outer: &'a O, inner: &'a I, matcher: &PairMatcher, mut emit: F)
where
    O: QuadCluster + ?Sized,
    I: QuadCluster + ?Sized,
    F: FnMut(&'a TaggedRecord, &'a TaggedRecord),
{
    let inner_bounds = inner.data_bounds();
    for o in outer.read(true) {
        let key = matcher.match_key(&o.record, &o.envelope);
        if !key.intersects(&inner_bounds) {
            continue;
        }
        for i in inner.query(&key, true) {
            if matcher.matches(&o.record, &i.record) {
                emit(o, i);
            }
        }
    }
}

/// Join an unclustered record stream against a stored dataset.
///
/// Each outer record is grouped under the dataset clusters whose data bounds
/// its search envelope touches; clusters are then visited one at a time
/// through `inner`, so each is loaded at most once per call. Inner records
/// are deduplicated by cluster ownership.
pub fn clustered_nl_join<I>(
    outer: I,
    outer_schema: &ClusterSchema,
    inner: &ClusterCache<ClusterDataset>,
    predicate: SpatialPredicate,
) -> Result<Vec<(Record, TaggedRecord)>>
where
    I: IntoIterator<Item = Record>,
{
    let index = inner.source().index();
    let matcher = PairMatcher::new(predicate, outer_schema, index.schema())?;
    let geom_idx = outer_schema.geometry_column_index().ok_or_else(|| {
        ClusterError::SchemaMismatch(format!(
            "no geometry column '{}' in the outer schema",
            outer_schema.geometry.name
        ))
    })?;
    let transform = projection::transform_for(outer_schema.srid())?;

    let mut outer_records = Vec::new();
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for record in outer {
        let Some(native) = record.geometry_envelope(geom_idx) else {
            continue;
        };
        let envelope = transform.transform_envelope(&native);
        let key = matcher.match_key(&record, &envelope);
        let pos = outer_records.len();
        for entry in index.query(&key) {
            groups.entry(entry.quad_key.as_str()).or_default().push(pos);
        }
        outer_records.push((record, key));
    }

    let mut joined = Vec::new();
    for (quad_key, members) in groups {
        let cluster = inner.get_cluster(quad_key)?;
        let before = joined.len();
        for pos in members {
            let (record, key) = &outer_records[pos];
            joined.extend(
                cluster
                    .query(key, true)
                    .into_iter()
                    .filter(|i| matcher.matches(record, &i.record))
                    .map(|i| (record.clone(), i.clone())),
            );
        }
        debug!(
            "scanned cluster: quadkey={}, records={}, matches={}",
            quad_key,
            cluster.record_count(),
            joined.len() - before
        );
    }
    info!(
        "clustered join: predicate={}, outer={}, matches={}, loads={}",
        predicate,
        outer_records.len(),
        joined.len(),
        inner.load_count()
    );
    Ok(joined)
}
