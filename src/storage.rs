//! Persistent cluster storage.
//!
//! A dataset is a directory holding one global index file (`cluster.idx`)
//! and one or more partition files. Each partition file is a sequence of
//! independently compressed cluster blocks; the index records, per cluster,
//! the partition file name plus the byte offset and length of its block.
//! Paths inside the index are relative, so a dataset directory can be moved
//! as a unit.

pub mod dataset;
pub mod format;
pub mod index;
pub mod reader;
pub mod writer;

pub use dataset::{ClusterDataset, OwnedRecords};
pub use index::{GlobalIndex, GlobalIndexEntry, IndexStats};
pub use reader::{read_cluster, read_owned_records};
pub use writer::{ClusterDatasetWriter, store_cluster};
