//! Writing cluster blocks and whole datasets.
//!
//! Record encoding runs on the calling thread and block compression on a
//! helper thread. The two are joined by a bounded channel of byte chunks, so
//! encoding blocks when compression falls behind.

use super::format::{self, PARTITION_EXTENSION};
use super::index::{GlobalIndex, GlobalIndexEntry};
use crate::cluster::QuadCluster;
use crate::cluster::indexed::{PersistedSubIndex, build_sub_index};
use crate::config::Config;
use crate::error::{ClusterError, Result};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use geocluster_types::ClusterSchema;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use uuid::Uuid;

/// Append `cluster` as one compressed block to the partition file at `path`.
///
/// Returns the index entry describing the block. On failure the file is cut
/// back to its previous length, except after a timeout, when the compressor
/// may still be running and the file must no longer be appended to.
pub fn store_cluster<C: QuadCluster + ?Sized>(
    path: &Path,
    cluster: &C,
    config: &Config,
) -> Result<GlobalIndexEntry> {
    let quad_key = cluster.quad_key().to_string();
    let sub_index = if config.persist_sub_index {
        build_sub_index(
            &quad_key,
            cluster.records(),
            config.partition_max_slots,
            config.partition_fill_ratio,
        )
        .map(|tree| PersistedSubIndex::from_tree(&tree))
    } else {
        None
    };

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let start = file.metadata()?.len();
    let sink = file.try_clone()?;

    let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Bytes>(config.pipe_capacity.max(1));
    let (done_tx, done_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let cancelled = Arc::new(AtomicBool::new(false));
    let level = Compression::new(config.compression_level.min(9));

    let consumer = {
        let cancelled = Arc::clone(&cancelled);
        let quad_key = quad_key.clone();
        thread::Builder::new()
            .name(format!("geocluster-store-{quad_key}"))
            .spawn(move || {
                let outcome = compress_chunks(sink, chunk_rx, level, &cancelled, &quad_key);
                let _ = done_tx.send(outcome);
            })?
    };

    let produced = produce_chunks(
        cluster,
        sub_index.as_ref(),
        &chunk_tx,
        config.pipe_chunk_size.max(1),
    );
    if produced.is_err() {
        cancelled.store(true, Ordering::SeqCst);
    }
    drop(chunk_tx);

    let timeout = config.store_timeout();
    let outcome = match done_rx.recv_timeout(timeout) {
        Ok(consumed) => {
            let _ = consumer.join();
            first_failure(produced, consumed)
        }
        Err(RecvTimeoutError::Timeout) => {
            cancelled.store(true, Ordering::SeqCst);
            warn!("store_cluster timed out: quadkey={}, timeout={:?}", quad_key, timeout);
            return Err(ClusterError::StoreTimeout { quad_key, timeout });
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = consumer.join();
            Err(ClusterError::StoreCancelled {
                quad_key: quad_key.clone(),
                reason: "compressor exited without a result".into(),
            })
        }
    };

    if let Err(err) = outcome {
        warn!("store_cluster failed: quadkey={}, cause={}", quad_key, err);
        file.set_len(start)?;
        return Err(err);
    }

    let length = file.metadata()?.len() - start;
    let entry = GlobalIndexEntry {
        pack_id: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        quad_key,
        data_bounds: cluster.data_bounds(),
        count: cluster.record_count() as u64,
        owned_count: cluster.owned_count() as u64,
        start,
        length,
    };
    info!(
        "store_cluster: quadkey={}, count={}+{}, start={}, size={}",
        entry.quad_key,
        entry.owned_count,
        entry.duplicate_count(),
        entry.start,
        entry.length
    );
    Ok(entry)
}

/// Outcome of the encode/compress pipeline.
///
/// An encoder failure cancels the compressor, whose own error then only
/// reports the cancellation, so the encoder's error wins.
fn first_failure(produced: Result<()>, consumed: Result<()>) -> Result<()> {
    produced.and(consumed)
}

fn produce_chunks<C: QuadCluster + ?Sized>(
    cluster: &C,
    sub_index: Option<&PersistedSubIndex>,
    chunks: &Sender<Bytes>,
    chunk_size: usize,
) -> Result<()> {
    let send = |chunk: Bytes| {
        chunks.send(chunk).map_err(|_| ClusterError::StoreCancelled {
            quad_key: cluster.quad_key().to_string(),
            reason: "compressor stopped".into(),
        })
    };

    let mut buf = BytesMut::with_capacity(chunk_size);
    for record in cluster.records() {
        format::encode_record(&mut buf, record)?;
        if buf.len() >= chunk_size {
            send(buf.split().freeze())?;
        }
    }
    match sub_index {
        Some(index) => format::encode_sub_index(&mut buf, index)?,
        None => format::encode_end(&mut buf),
    }
    send(buf.freeze())
}

fn compress_chunks(
    sink: File,
    chunks: Receiver<Bytes>,
    level: Compression,
    cancelled: &AtomicBool,
    quad_key: &str,
) -> Result<()> {
    let cancel = || ClusterError::StoreCancelled {
        quad_key: quad_key.to_string(),
        reason: "encoder failed".into(),
    };

    let mut encoder = DeflateEncoder::new(BufWriter::new(sink), level);
    for chunk in chunks.iter() {
        if cancelled.load(Ordering::SeqCst) {
            return Err(cancel());
        }
        encoder.write_all(&chunk)?;
    }
    if cancelled.load(Ordering::SeqCst) {
        return Err(cancel());
    }
    let file = encoder
        .finish()?
        .into_inner()
        .map_err(|err| err.into_error())?;
    file.sync_data()?;
    Ok(())
}

/// Stores the clusters of one dataset and writes its global index.
///
/// Blocks go to rolling partition files named `<uuid>.part`; a new file is
/// started once the current one reaches the configured partition size, or
/// after a failed store.
pub struct ClusterDatasetWriter {
    dir: PathBuf,
    schema: ClusterSchema,
    config: Config,
    entries: Vec<GlobalIndexEntry>,
    partition: Option<(PathBuf, u64)>,
}

impl ClusterDatasetWriter {
    pub fn create(dir: impl AsRef<Path>, schema: ClusterSchema, config: Config) -> Result<Self> {
        config.validate().map_err(ClusterError::InvalidInput)?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            schema,
            config,
            entries: Vec::new(),
            partition: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entries(&self) -> &[GlobalIndexEntry] {
        &self.entries
    }

    pub fn store_cluster<C: QuadCluster + ?Sized>(&mut self, cluster: &C) -> Result<&GlobalIndexEntry> {
        if cluster.schema() != &self.schema {
            return Err(ClusterError::SchemaMismatch(format!(
                "cluster {} does not match the dataset schema",
                cluster.quad_key()
            )));
        }
        if self.entries.iter().any(|e| e.quad_key == cluster.quad_key()) {
            return Err(ClusterError::InvalidInput(format!(
                "cluster {} already stored",
                cluster.quad_key()
            )));
        }

        let path = self.current_partition();
        match store_cluster(&path, cluster, &self.config) {
            Ok(entry) => {
                let end = entry.start + entry.length;
                self.partition = Some((path, end));
                self.entries.push(entry);
                Ok(&self.entries[self.entries.len() - 1])
            }
            Err(err) => {
                self.partition = None;
                Err(err)
            }
        }
    }

    fn current_partition(&mut self) -> PathBuf {
        match &self.partition {
            Some((path, size)) if *size < self.config.partition_file_size => path.clone(),
            _ => {
                let path = self
                    .dir
                    .join(format!("{}.{}", Uuid::new_v4(), PARTITION_EXTENSION));
                debug!("new partition file: {}", path.display());
                self.partition = Some((path.clone(), 0));
                path
            }
        }
    }

    /// Write `cluster.idx` and return the index of everything stored.
    pub fn finish(self) -> Result<GlobalIndex> {
        let index = GlobalIndex::new(self.schema, self.entries)?;
        index.write_to_dir(&self.dir)?;
        info!(
            "dataset written: dir={}, clusters={}",
            self.dir.display(),
            index.len()
        );
        Ok(index)
    }
}
