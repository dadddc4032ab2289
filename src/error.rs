//! Error types for cluster building, storage and querying.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// A value cannot be placed in any leaf even after a split and a
    /// partition expansion.
    #[error("value too big for the quadtree: {0}")]
    TooBigValue(String),

    /// A value falls outside the domain of a fixed-range quadtree.
    #[error("value out of range: tree={tree}, value={value}")]
    OutOfRange { tree: String, value: String },

    #[error("invalid quad-key: '{0}'")]
    InvalidQuadKey(String),

    #[error("unknown cluster: quad_key={0}")]
    UnknownCluster(String),

    #[error(
        "corrupt cluster: quad_key={quad_key}, path={}, offset={offset}: {reason}",
        path.display()
    )]
    CorruptCluster {
        quad_key: String,
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unsupported srid: {0}")]
    UnsupportedSrid(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cluster store timed out: quad_key={quad_key}, timeout={timeout:?}")]
    StoreTimeout { quad_key: String, timeout: Duration },

    #[error("cluster store cancelled: quad_key={quad_key}: {reason}")]
    StoreCancelled { quad_key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for ClusterError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) => ClusterError::Io(io),
            other => ClusterError::Serialization(other.to_string()),
        }
    }
}

impl ClusterError {
    pub fn is_too_big(&self) -> bool {
        matches!(self, ClusterError::TooBigValue(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, ClusterError::OutOfRange { .. })
    }
}
