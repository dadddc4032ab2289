//! Spatial clusters: the records of one quad-key tile.
//!
//! A record whose envelope crosses tile edges is stored in every tile it
//! touches, but it is *owned* by exactly one of them, normally the tile
//! containing the centre of its envelope. Clusters keep owned records first
//! and replicas last, so readers that want each record exactly once can stop
//! after [`QuadCluster::owned_count`] records.

pub mod binder;
pub mod builder;
pub mod indexed;
pub mod memory;

pub use binder::QuadKeyBinder;
pub use builder::{InMemoryClusterBuilder, build_clusters, cluster_by_quad_keys};
pub use indexed::IndexedCluster;
pub use memory::InMemoryCluster;

use crate::tile;
use geo::Coord;
use geocluster_types::{ClusterSchema, Envelope, TaggedRecord};

/// Read access shared by clusters built in memory and clusters loaded from
/// storage.
pub trait QuadCluster {
    fn quad_key(&self) -> &str;

    /// Tile bounds; `None` for the outliers cluster, which has no tile.
    fn tile_bounds(&self) -> Option<Envelope>;

    /// Union of the envelopes of all stored records.
    fn data_bounds(&self) -> Envelope;

    fn schema(&self) -> &ClusterSchema;

    /// All stored records, owned records first.
    fn records(&self) -> &[TaggedRecord];

    /// Number of replicas of records owned by another tile.
    fn duplicate_count(&self) -> usize;

    fn record_count(&self) -> usize {
        self.records().len()
    }

    fn owned_count(&self) -> usize {
        self.record_count() - self.duplicate_count()
    }

    /// Stored records, or only the owned ones when `drop_duplicates` is set.
    fn read(&self, drop_duplicates: bool) -> &[TaggedRecord] {
        let records = self.records();
        if drop_duplicates {
            &records[..self.owned_count().min(records.len())]
        } else {
            records
        }
    }

    /// Positions in [`records`](Self::records) of the records whose envelope
    /// intersects `range`, ascending.
    fn query_positions(&self, range: &Envelope) -> Vec<usize> {
        self.records()
            .iter()
            .enumerate()
            .filter(|(_, rec)| rec.envelope.intersects(range))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Records whose envelope intersects `range`.
    ///
    /// With `drop_duplicates` only owned records are returned. A record has a
    /// single owning cluster in its dataset and that cluster's data bounds
    /// cover it, so querying every cluster whose data bounds meet `range`
    /// yields each record once.
    fn query(&self, range: &Envelope, drop_duplicates: bool) -> Vec<&TaggedRecord> {
        let records = self.records();
        let owned = self.owned_count();
        self.query_positions(range)
            .into_iter()
            .filter(|&idx| !drop_duplicates || idx < owned)
            .filter_map(|idx| records.get(idx))
            .collect()
    }

    fn is_outliers(&self) -> bool {
        tile::is_outliers(self.quad_key())
    }
}

/// Half-open point ownership: a tile owns its west and south edges, plus the
/// east and north edges where they coincide with the edge of the tile domain.
///
/// Adjacent tiles share edges bit-for-bit, so every point of the domain is
/// owned by exactly one tile of any set of non-overlapping tiles covering it.
pub fn owns_point(tile_bounds: &Envelope, point: Coord<f64>) -> bool {
    let domain = tile::domain_bounds();
    let in_x = point.x >= tile_bounds.min_x
        && (point.x < tile_bounds.max_x
            || (tile_bounds.max_x >= domain.max_x && point.x <= tile_bounds.max_x));
    let in_y = point.y >= tile_bounds.min_y
        && (point.y < tile_bounds.max_y
            || (tile_bounds.max_y >= domain.max_y && point.y <= tile_bounds.max_y));
    in_x && in_y
}

/// Order `records` owned-first and return the number of duplicates.
pub(crate) fn order_by_ownership(
    tile_bounds: Option<&Envelope>,
    records: Vec<TaggedRecord>,
) -> (Vec<TaggedRecord>, usize) {
    let Some(bounds) = tile_bounds else {
        return (records, 0);
    };
    let (mut owned, duplicates): (Vec<_>, Vec<_>) = records.into_iter().partition(|rec| {
        rec.envelope
            .centre()
            .is_some_and(|centre| owns_point(bounds, centre))
    });
    let duplicate_count = duplicates.len();
    owned.extend(duplicates);
    (owned, duplicate_count)
}
