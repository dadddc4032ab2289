//! The global index: the directory of every stored cluster of a dataset.

use super::format::{self, INDEX_FILE_NAME};
use crate::error::{ClusterError, Result};
use crate::join;
use crate::quadtree::{
    Pointer, QuadTree, QuadTreeBuilder, QuadTreeJoinMatcher, SinglePartition, SpatialRelation,
};
use crate::tile;
use geocluster_types::{ClusterSchema, Envelope};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

/// Where and what one stored cluster is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIndexEntry {
    /// Partition file name, relative to the dataset directory.
    pub pack_id: String,
    pub quad_key: String,
    pub data_bounds: Envelope,
    pub count: u64,
    pub owned_count: u64,
    /// Byte offset of the compressed block in the partition file.
    pub start: u64,
    /// Compressed block length in bytes.
    pub length: u64,
}

impl GlobalIndexEntry {
    pub fn duplicate_count(&self) -> u64 {
        self.count.saturating_sub(self.owned_count)
    }

    pub fn is_outliers(&self) -> bool {
        tile::is_outliers(&self.quad_key)
    }

    /// `None` for the outliers entry.
    pub fn tile_bounds(&self) -> Option<Envelope> {
        if self.is_outliers() {
            None
        } else {
            tile::bounds_of(&self.quad_key).ok()
        }
    }
}

type EntryTree = QuadTree<SinglePartition<Pointer>>;

/// Cluster directory of a dataset plus a quadtree over its tiles.
///
/// The quadtree holds one pointer per tile cluster, enveloped by the
/// cluster's data bounds, so a range lookup descends only into tiles whose
/// stored records can match. The outliers cluster has no tile and is kept
/// beside the tree.
pub struct GlobalIndex {
    schema: Arc<ClusterSchema>,
    entries: Vec<GlobalIndexEntry>,
    by_key: FxHashMap<String, usize>,
    tree: Option<EntryTree>,
    outliers: Option<usize>,
}

/// Aggregate counters over all entries of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub cluster_count: usize,
    pub record_count: u64,
    pub owned_count: u64,
    pub duplicate_count: u64,
    pub data_bounds: Envelope,
    pub tile_bounds: Envelope,
}

impl GlobalIndex {
    pub fn new(schema: ClusterSchema, entries: Vec<GlobalIndexEntry>) -> Result<Self> {
        let mut by_key = FxHashMap::default();
        let mut outliers = None;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.owned_count > entry.count {
                return Err(ClusterError::InvalidInput(format!(
                    "entry {} owns {} of {} records",
                    entry.quad_key, entry.owned_count, entry.count
                )));
            }
            if by_key.insert(entry.quad_key.clone(), idx).is_some() {
                return Err(ClusterError::InvalidInput(format!(
                    "duplicate cluster entry: {}",
                    entry.quad_key
                )));
            }
            if entry.is_outliers() {
                outliers = Some(idx);
            } else {
                tile::digits_of(&entry.quad_key)?;
            }
        }

        let tree = match Self::build_tree(&entries) {
            Ok(tree) => Some(tree),
            Err(err) => {
                warn!("cluster tree unavailable, falling back to scans: {}", err);
                None
            }
        };

        Ok(Self {
            schema: Arc::new(schema),
            entries,
            by_key,
            tree,
            outliers,
        })
    }

    fn build_tree(entries: &[GlobalIndexEntry]) -> Result<EntryTree> {
        let mut builder = QuadTreeBuilder::new(|_: &str| SinglePartition::empty()).fixed(true);
        for (idx, entry) in entries.iter().enumerate() {
            if entry.is_outliers() || entry.data_bounds.is_empty() {
                continue;
            }
            builder.add(
                &entry.quad_key,
                SinglePartition::of(Pointer::new(entry.data_bounds, idx)),
            )?;
        }
        builder.build()
    }

    pub fn schema(&self) -> &Arc<ClusterSchema> {
        &self.schema
    }

    pub fn entries(&self) -> &[GlobalIndexEntry] {
        &self.entries
    }

    pub fn entry(&self, quad_key: &str) -> Option<&GlobalIndexEntry> {
        self.by_key.get(quad_key).map(|&idx| &self.entries[idx])
    }

    pub fn outliers(&self) -> Option<&GlobalIndexEntry> {
        self.outliers.map(|idx| &self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Quad-keys of all clusters, sorted.
    pub fn quad_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.iter().map(|e| e.quad_key.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Entries whose data bounds intersect `range`, in key order.
    ///
    /// The outliers entry, when present and intersecting, comes last.
    pub fn query(&self, range: &Envelope) -> Vec<&GlobalIndexEntry> {
        let mut hits: Vec<usize> = match &self.tree {
            Some(tree) => tree
                .query(SpatialRelation::Intersects, range)
                .into_iter()
                .map(|ptr| ptr.index)
                .collect(),
            None => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.is_outliers() && e.data_bounds.intersects(range))
                .map(|(idx, _)| idx)
                .collect(),
        };
        hits.sort_unstable_by(|&a, &b| self.entries[a].quad_key.cmp(&self.entries[b].quad_key));
        hits.dedup();

        let mut found: Vec<&GlobalIndexEntry> = hits.into_iter().map(|idx| &self.entries[idx]).collect();
        if let Some(outliers) = self.outliers()
            && outliers.data_bounds.intersects(range)
        {
            found.push(outliers);
        }
        found
    }

    /// Pairs of clusters, one from each index, whose tiles are equal or
    /// nested and whose data bounds intersect.
    ///
    /// An outliers cluster has no tile, so it is paired with every cluster of
    /// the other index whose data bounds it intersects.
    pub fn match_tiles<'a>(
        &'a self,
        other: &'a GlobalIndex,
    ) -> Vec<(&'a GlobalIndexEntry, &'a GlobalIndexEntry)> {
        let mut pairs: Vec<(&GlobalIndexEntry, &GlobalIndexEntry)> =
            match (&self.tree, &other.tree) {
                (Some(left), Some(right)) => QuadTreeJoinMatcher::new(left, right)
                    .match_leaves()
                    .into_iter()
                    .filter_map(|(l, r)| {
                        let l = l.partition().get()?;
                        let r = r.partition().get()?;
                        Some((&self.entries[l.index], &other.entries[r.index]))
                    })
                    .collect(),
                _ => {
                    let left: Vec<&str> = self.tile_keys();
                    let right: Vec<&str> = other.tile_keys();
                    join::match_cluster_keys(&left, &right)
                        .into_iter()
                        .filter_map(|(l, r)| Some((self.entry(l)?, other.entry(r)?)))
                        .collect()
                }
            };
        pairs.retain(|(l, r)| l.data_bounds.intersects(&r.data_bounds));

        if let Some(outliers) = self.outliers() {
            pairs.extend(
                other
                    .entries
                    .iter()
                    .filter(|r| r.data_bounds.intersects(&outliers.data_bounds))
                    .map(|r| (outliers, r)),
            );
        }
        if let Some(outliers) = other.outliers() {
            pairs.extend(
                self.entries
                    .iter()
                    .filter(|l| !l.is_outliers())
                    .filter(|l| l.data_bounds.intersects(&outliers.data_bounds))
                    .map(|l| (l, outliers)),
            );
        }
        debug!("matched tiles: pairs={}", pairs.len());
        pairs
    }

    /// Pairs of clusters, one from each index, whose data bounds come within
    /// `distance` of each other, in left key order.
    ///
    /// Tiles need not be nested: two records within `distance` may be stored
    /// in neighbouring tiles only. The pair of clusters owning two such
    /// records is always among the result.
    pub fn match_clusters<'a>(
        &'a self,
        other: &'a GlobalIndex,
        distance: f64,
    ) -> Vec<(&'a GlobalIndexEntry, &'a GlobalIndexEntry)> {
        let mut left: Vec<&GlobalIndexEntry> = self
            .entries
            .iter()
            .filter(|e| !e.data_bounds.is_empty())
            .collect();
        left.sort_unstable_by(|a, b| a.quad_key.cmp(&b.quad_key));

        let pairs: Vec<(&GlobalIndexEntry, &GlobalIndexEntry)> = left
            .into_iter()
            .flat_map(|l| {
                other
                    .query(&l.data_bounds.expanded_by(distance))
                    .into_iter()
                    .map(move |r| (l, r))
            })
            .collect();
        debug!("matched clusters: distance={}, pairs={}", distance, pairs.len());
        pairs
    }

    fn tile_keys(&self) -> Vec<&str> {
        self.quad_keys()
            .into_iter()
            .filter(|k| !tile::is_outliers(k))
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        self.entries.iter().fold(
            IndexStats {
                cluster_count: self.entries.len(),
                ..IndexStats::default()
            },
            |mut stats, entry| {
                stats.record_count += entry.count;
                stats.owned_count += entry.owned_count;
                stats.duplicate_count += entry.duplicate_count();
                stats.data_bounds.expand_to_include(&entry.data_bounds);
                if let Some(bounds) = entry.tile_bounds() {
                    stats.tile_bounds.expand_to_include(&bounds);
                }
                stats
            },
        )
    }

    /// Write the index into `dir` atomically through a temporary file.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let path = dir.join(INDEX_FILE_NAME);
        let tmp_path = path.with_extension("idx.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            format::write_index_body(&mut writer, &self.schema, &self.entries)?;
            writer
                .into_inner()
                .map_err(|err| err.into_error())?
                .sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(INDEX_FILE_NAME);
        let file = File::open(&path)?;
        let body = format::read_index_body(BufReader::new(file))?;
        Self::new(body.schema, body.entries)
    }
}

impl std::fmt::Debug for GlobalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalIndex")
            .field("clusters", &self.entries.len())
            .field("tree", &self.tree.is_some())
            .field("outliers", &self.outliers.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocluster_types::{DataType, GeometryColumnInfo, RecordSchema};
    use tempfile::TempDir;

    fn schema() -> ClusterSchema {
        ClusterSchema::new(
            RecordSchema::new()
                .with_column("id", DataType::Long)
                .with_column("the_geom", DataType::Geometry),
            GeometryColumnInfo::new("the_geom", "EPSG:4326"),
        )
    }

    fn entry(quad_key: &str, fill: f64, count: u64, owned: u64) -> GlobalIndexEntry {
        let data_bounds = match tile::bounds_of(quad_key) {
            Ok(b) => Envelope::new(
                b.min_x + b.width() * (1.0 - fill) / 2.0,
                b.min_y + b.height() * (1.0 - fill) / 2.0,
                b.max_x - b.width() * (1.0 - fill) / 2.0,
                b.max_y - b.height() * (1.0 - fill) / 2.0,
            ),
            Err(_) => Envelope::new(-10.0, 86.0, 10.0, 88.0),
        };
        GlobalIndexEntry {
            pack_id: "p.part".into(),
            quad_key: quad_key.into(),
            data_bounds,
            count,
            owned_count: owned,
            start: 0,
            length: 1,
        }
    }

    #[test]
    fn test_query_by_data_bounds() {
        let index = GlobalIndex::new(
            schema(),
            vec![entry("0", 0.5, 10, 8), entry("1", 0.5, 5, 5), entry("2", 0.5, 1, 1)],
        )
        .unwrap();

        let west = tile::bounds_of("0").unwrap();
        // inside tile "0" but outside the data bounds of its cluster
        let corner = Envelope::new(west.min_x, west.max_y - 1.0, west.min_x + 1.0, west.max_y);
        assert!(index.query(&corner).is_empty());

        let keys: Vec<&str> = index
            .query(&tile::domain_bounds())
            .iter()
            .map(|e| e.quad_key.as_str())
            .collect();
        assert_eq!(keys, ["0", "1", "2"]);
    }

    #[test]
    fn test_outliers_entry_is_queried_last() {
        let index = GlobalIndex::new(
            schema(),
            vec![entry(tile::OUTLIERS_KEY, 1.0, 2, 2), entry("1", 1.0, 3, 3)],
        )
        .unwrap();
        let keys: Vec<&str> = index
            .query(&Envelope::new(-180.0, -90.0, 180.0, 90.0))
            .iter()
            .map(|e| e.quad_key.as_str())
            .collect();
        assert_eq!(keys, ["1", tile::OUTLIERS_KEY]);
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let result = GlobalIndex::new(schema(), vec![entry("1", 1.0, 1, 1), entry("1", 1.0, 1, 1)]);
        assert!(matches!(result, Err(ClusterError::InvalidInput(_))));
    }

    #[test]
    fn test_match_tiles_nested() {
        let left = GlobalIndex::new(schema(), vec![entry("0", 0.9, 4, 4), entry("1", 0.9, 4, 4)])
            .unwrap();
        let right = GlobalIndex::new(
            schema(),
            vec![entry("00", 0.9, 2, 2), entry("03", 0.9, 2, 2), entry("2", 0.9, 2, 2)],
        )
        .unwrap();

        let pairs: Vec<(&str, &str)> = left
            .match_tiles(&right)
            .into_iter()
            .map(|(l, r)| (l.quad_key.as_str(), r.quad_key.as_str()))
            .collect();
        assert_eq!(pairs, [("0", "00"), ("0", "03")]);
    }

    fn bounded(quad_key: &str, data_bounds: Envelope) -> GlobalIndexEntry {
        GlobalIndexEntry {
            data_bounds,
            ..entry(quad_key, 1.0, 1, 1)
        }
    }

    #[test]
    fn test_match_clusters_within_distance() {
        let left = GlobalIndex::new(
            schema(),
            vec![bounded("0", Envelope::from_point(-89.9, 60.5))],
        )
        .unwrap();
        let right = GlobalIndex::new(
            schema(),
            vec![
                bounded("00", Envelope::new(-91.0, 60.0, -89.95, 61.0)),
                bounded("02", Envelope::new(-170.0, -40.0, -150.0, -30.0)),
                bounded("03", Envelope::new(-60.0, -40.0, -50.0, -30.0)),
            ],
        )
        .unwrap();

        let keys = |distance: f64| -> Vec<(String, String)> {
            left.match_clusters(&right, distance)
                .into_iter()
                .map(|(l, r)| (l.quad_key.clone(), r.quad_key.clone()))
                .collect()
        };
        assert!(keys(0.0).is_empty());
        assert_eq!(keys(1.0), [("0".to_string(), "00".to_string())]);
    }

    #[test]
    fn test_match_clusters_across_neighbouring_tiles() {
        let left = GlobalIndex::new(
            schema(),
            vec![bounded("00", Envelope::new(-100.0, 40.0, -90.5, 50.0))],
        )
        .unwrap();
        let right = GlobalIndex::new(
            schema(),
            vec![
                bounded("01", Envelope::new(-89.5, 40.0, -80.0, 50.0)),
                bounded(tile::OUTLIERS_KEY, Envelope::new(-95.0, 86.0, -94.0, 87.0)),
            ],
        )
        .unwrap();

        assert!(left.match_tiles(&right).is_empty());
        let pairs: Vec<(&str, &str)> = left
            .match_clusters(&right, 2.0)
            .into_iter()
            .map(|(l, r)| (l.quad_key.as_str(), r.quad_key.as_str()))
            .collect();
        assert_eq!(pairs, [("00", "01")]);

        let far: Vec<(&str, &str)> = left
            .match_clusters(&right, 40.0)
            .into_iter()
            .map(|(l, r)| (l.quad_key.as_str(), r.quad_key.as_str()))
            .collect();
        assert_eq!(far, [("00", "01"), ("00", tile::OUTLIERS_KEY)]);
    }

    #[test]
    fn test_stats() {
        let index = GlobalIndex::new(
            schema(),
            vec![entry("0", 1.0, 10, 8), entry("1", 1.0, 5, 4), entry(tile::OUTLIERS_KEY, 1.0, 1, 1)],
        )
        .unwrap();
        let stats = index.stats();
        assert_eq!(stats.cluster_count, 3);
        assert_eq!(stats.record_count, 16);
        assert_eq!(stats.owned_count, 13);
        assert_eq!(stats.duplicate_count, 3);
        assert_eq!(stats.tile_bounds.min_y, 0.0);
    }

    #[test]
    fn test_index_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let entries = vec![entry("0", 0.5, 10, 8), entry(tile::OUTLIERS_KEY, 1.0, 1, 1)];
        let index = GlobalIndex::new(schema(), entries.clone()).unwrap();
        index.write_to_dir(dir.path()).unwrap();

        let restored = GlobalIndex::read_from_dir(dir.path()).unwrap();
        assert_eq!(restored.entries(), entries.as_slice());
        assert_eq!(restored.schema().as_ref(), &schema());
        assert!(restored.outliers().is_some());
        assert!(!dir.path().join("cluster.idx.tmp").exists());
    }
}
