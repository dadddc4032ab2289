//! Read handle over a stored dataset directory.

use super::index::{GlobalIndex, GlobalIndexEntry};
use super::reader;
use crate::cache::ClusterSource;
use crate::cluster::{IndexedCluster, QuadCluster};
use crate::error::{ClusterError, Result};
use geocluster_types::{ClusterSchema, Envelope, TaggedRecord};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opened dataset: its directory and global index.
///
/// Clusters are read from disk on every call; wrap the dataset in a
/// [`ClusterCache`](crate::cache::ClusterCache) to keep recently used ones in
/// memory.
#[derive(Debug)]
pub struct ClusterDataset {
    dir: PathBuf,
    index: GlobalIndex,
}

impl ClusterDataset {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let index = GlobalIndex::read_from_dir(&dir)?;
        debug!(
            "opened dataset: dir={}, clusters={}",
            dir.display(),
            index.len()
        );
        Ok(Self { dir, index })
    }

    pub(crate) fn from_parts(dir: PathBuf, index: GlobalIndex) -> Self {
        Self { dir, index }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &GlobalIndex {
        &self.index
    }

    pub fn schema(&self) -> &Arc<ClusterSchema> {
        self.index.schema()
    }

    pub fn get_cluster(&self, quad_key: &str) -> Result<IndexedCluster> {
        let entry = self
            .index
            .entry(quad_key)
            .ok_or_else(|| ClusterError::UnknownCluster(quad_key.to_string()))?;
        self.load_entry(entry)
    }

    fn load_entry(&self, entry: &GlobalIndexEntry) -> Result<IndexedCluster> {
        reader::read_cluster(&self.dir, entry, Arc::clone(self.index.schema()))
    }

    /// Quad-keys of the clusters that may hold records intersecting `range`.
    pub fn query_cluster_keys(&self, range: &Envelope) -> Vec<String> {
        self.index
            .query(range)
            .into_iter()
            .map(|entry| entry.quad_key.clone())
            .collect()
    }

    /// Records intersecting `range` across all clusters.
    ///
    /// With `drop_duplicates`, each record stored in several clusters is
    /// returned once.
    pub fn query(&self, range: &Envelope, drop_duplicates: bool) -> Result<Vec<TaggedRecord>> {
        let mut found = Vec::new();
        for entry in self.index.query(range) {
            let cluster = self.load_entry(entry)?;
            found.extend(cluster.query(range, drop_duplicates).into_iter().cloned());
        }
        Ok(found)
    }

    /// Every record of the dataset exactly once, cluster by cluster.
    pub fn read_owned(&self) -> OwnedRecords<'_> {
        OwnedRecords {
            dataset: self,
            entries: self.index.entries().iter(),
            current: Vec::new().into_iter(),
        }
    }
}

impl ClusterSource for ClusterDataset {
    type Cluster = IndexedCluster;

    fn load_cluster(&self, quad_key: &str) -> Result<IndexedCluster> {
        self.get_cluster(quad_key)
    }
}

/// Iterator over the owned records of a dataset.
///
/// Each cluster is read when the previous one is exhausted; an error ends
/// the iteration after it is yielded.
pub struct OwnedRecords<'a> {
    dataset: &'a ClusterDataset,
    entries: std::slice::Iter<'a, GlobalIndexEntry>,
    current: std::vec::IntoIter<TaggedRecord>,
}

impl Iterator for OwnedRecords<'_> {
    type Item = Result<TaggedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            let entry = self.entries.next()?;
            match reader::read_owned_records(&self.dataset.dir, entry) {
                Ok(records) => self.current = records.into_iter(),
                Err(err) => {
                    self.entries = Default::default();
                    return Some(Err(err));
                }
            }
        }
    }
}
