//! Configuration for cluster building, storage and caching.
//!
//! All fields carry serde defaults so partial JSON or TOML documents load
//! cleanly; values are checked by [`Config::validate`].

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration.
///
/// # Example
///
/// ```rust
/// use geocluster::Config;
///
/// let config = Config::default();
/// assert_eq!(config.partition_max_slots, 64);
///
/// let json = r#"{
///     "cache_capacity": 8,
///     "cluster_count_hint": 32
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.cache_capacity, 8);
/// assert_eq!(config.partition_fill_ratio, 0.85);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Slot count of a duplicate-collapsing partition before it overflows.
    #[serde(default = "Config::default_partition_max_slots")]
    pub partition_max_slots: usize,

    /// Fill ratio a collapsed partition must stay under to accept an insert.
    #[serde(default = "Config::default_partition_fill_ratio")]
    pub partition_fill_ratio: f64,

    /// Number of deserialized clusters kept by a cluster cache.
    #[serde(default = "Config::default_cache_capacity")]
    pub cache_capacity: usize,

    /// Number of serialized chunks the store pipe buffers before the producer blocks.
    #[serde(default = "Config::default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Size in bytes of one chunk handed through the store pipe.
    #[serde(default = "Config::default_pipe_chunk_size")]
    pub pipe_chunk_size: usize,

    /// How long a store waits for the compressing consumer to finish.
    #[serde(default = "Config::default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Deflate level used for cluster blocks (0-9).
    #[serde(default = "Config::default_compression_level")]
    pub compression_level: u32,

    /// Target number of clusters when building from a record stream.
    #[serde(default = "Config::default_cluster_count_hint")]
    pub cluster_count_hint: usize,

    /// Bind records matching no known tile to a fallback key instead of dropping them.
    #[serde(default = "Config::default_bind_outliers")]
    pub bind_outliers: bool,

    /// Persist each cluster's pointer sub-index after its records.
    #[serde(default = "Config::default_persist_sub_index")]
    pub persist_sub_index: bool,

    /// Partition file size after which the writer starts a new file.
    #[serde(default = "Config::default_partition_file_size")]
    pub partition_file_size: u64,
}

impl Config {
    const fn default_partition_max_slots() -> usize {
        64
    }

    const fn default_partition_fill_ratio() -> f64 {
        0.85
    }

    const fn default_cache_capacity() -> usize {
        3
    }

    const fn default_pipe_capacity() -> usize {
        64
    }

    const fn default_pipe_chunk_size() -> usize {
        64 * 1024
    }

    const fn default_store_timeout_ms() -> u64 {
        3_000
    }

    const fn default_compression_level() -> u32 {
        6
    }

    const fn default_cluster_count_hint() -> usize {
        16
    }

    const fn default_bind_outliers() -> bool {
        true
    }

    const fn default_persist_sub_index() -> bool {
        true
    }

    const fn default_partition_file_size() -> u64 {
        64 * 1024 * 1024
    }

    pub fn with_partition_limits(mut self, max_slots: usize, fill_ratio: f64) -> Self {
        self.partition_max_slots = max_slots;
        self.partition_fill_ratio = fill_ratio;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Cache capacity must be greater than zero");
        self.cache_capacity = capacity;
        self
    }

    pub fn with_cluster_count_hint(mut self, hint: usize) -> Self {
        assert!(hint > 0, "Cluster count hint must be greater than zero");
        self.cluster_count_hint = hint;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_bind_outliers(mut self, bind: bool) -> Self {
        self.bind_outliers = bind;
        self
    }

    pub fn with_persist_sub_index(mut self, persist: bool) -> Self {
        self.persist_sub_index = persist;
        self
    }

    pub fn with_partition_file_size(mut self, size: u64) -> Self {
        self.partition_file_size = size;
        self
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.partition_max_slots == 0 {
            return Err("Partition max slots must be greater than zero".to_string());
        }
        if !self.partition_fill_ratio.is_finite()
            || self.partition_fill_ratio <= 0.0
            || self.partition_fill_ratio > 1.0
        {
            return Err("Partition fill ratio must be in (0, 1]".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("Cache capacity must be greater than zero".to_string());
        }
        if self.pipe_capacity == 0 {
            return Err("Pipe capacity must be greater than zero".to_string());
        }
        if self.pipe_chunk_size == 0 {
            return Err("Pipe chunk size must be greater than zero".to_string());
        }
        if self.store_timeout_ms == 0 {
            return Err("Store timeout must be greater than zero".to_string());
        }
        if self.compression_level > 9 {
            return Err("Compression level must be between 0 and 9".to_string());
        }
        if self.cluster_count_hint == 0 {
            return Err("Cluster count hint must be greater than zero".to_string());
        }
        if self.partition_file_size == 0 {
            return Err("Partition file size must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            partition_max_slots: Self::default_partition_max_slots(),
            partition_fill_ratio: Self::default_partition_fill_ratio(),
            cache_capacity: Self::default_cache_capacity(),
            pipe_capacity: Self::default_pipe_capacity(),
            pipe_chunk_size: Self::default_pipe_chunk_size(),
            store_timeout_ms: Self::default_store_timeout_ms(),
            compression_level: Self::default_compression_level(),
            cluster_count_hint: Self::default_cluster_count_hint(),
            bind_outliers: Self::default_bind_outliers(),
            persist_sub_index: Self::default_persist_sub_index(),
            partition_file_size: Self::default_partition_file_size(),
        }
    }
}
