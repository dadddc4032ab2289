//! Reading cluster blocks back from partition files.

use super::format::{self, DecodedBlock};
use super::index::GlobalIndexEntry;
use crate::cluster::IndexedCluster;
use crate::error::{ClusterError, Result};
use flate2::read::DeflateDecoder;
use geocluster_types::{ClusterSchema, TaggedRecord};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the cluster described by `entry` from the dataset in `dir`.
///
/// Any failure, including a missing partition file, is reported as
/// [`ClusterError::CorruptCluster`] naming the cluster, file and offset.
pub fn read_cluster(
    dir: &Path,
    entry: &GlobalIndexEntry,
    schema: Arc<ClusterSchema>,
) -> Result<IndexedCluster> {
    let path = dir.join(&entry.pack_id);
    let load = || -> Result<IndexedCluster> {
        let block = read_block(&path, entry, None)?;
        check_count(entry, block.records.len() as u64, entry.count)?;
        let index = block.sub_index.map(|persisted| persisted.into_tree()).transpose()?;
        IndexedCluster::new(
            entry.quad_key.as_str(),
            schema,
            block.records,
            entry.duplicate_count() as usize,
            index,
        )
    };
    load().map_err(|err| corrupt(entry, path.clone(), err))
}

/// The owned records of the cluster described by `entry`.
///
/// Decoding stops after the owned prefix, so the replicas stored behind it
/// are never deserialized.
pub fn read_owned_records(dir: &Path, entry: &GlobalIndexEntry) -> Result<Vec<TaggedRecord>> {
    let path = dir.join(&entry.pack_id);
    let load = || -> Result<Vec<TaggedRecord>> {
        let block = read_block(&path, entry, Some(entry.owned_count as usize))?;
        check_count(entry, block.records.len() as u64, entry.owned_count)?;
        Ok(block.records)
    };
    load().map_err(|err| corrupt(entry, path.clone(), err))
}

fn read_block(path: &Path, entry: &GlobalIndexEntry, limit: Option<usize>) -> Result<DecodedBlock> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let end = entry.start.checked_add(entry.length);
    if end.is_none_or(|end| end > file_len) {
        return Err(ClusterError::InvalidFormat(format!(
            "block {}+{} runs past the end of a {} byte file",
            entry.start, entry.length, file_len
        )));
    }
    file.seek(SeekFrom::Start(entry.start))?;
    let mut compressed = Vec::new();
    file.take(entry.length).read_to_end(&mut compressed)?;
    if compressed.len() as u64 != entry.length {
        return Err(ClusterError::InvalidFormat(format!(
            "short block read: {} of {} bytes",
            compressed.len(),
            entry.length
        )));
    }
    format::decode_block(DeflateDecoder::new(&compressed[..]), limit)
}

fn check_count(entry: &GlobalIndexEntry, found: u64, expected: u64) -> Result<()> {
    if found != expected {
        return Err(ClusterError::InvalidFormat(format!(
            "cluster {} holds {} records, index expects {}",
            entry.quad_key, found, expected
        )));
    }
    Ok(())
}

fn corrupt(entry: &GlobalIndexEntry, path: PathBuf, err: ClusterError) -> ClusterError {
    ClusterError::CorruptCluster {
        quad_key: entry.quad_key.clone(),
        path,
        offset: entry.start,
        reason: err.to_string(),
    }
}
