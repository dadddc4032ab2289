//! One-call building of a stored dataset.

use crate::cluster::InMemoryClusterBuilder;
use crate::config::Config;
use crate::error::{ClusterError, Result};
use crate::storage::{ClusterDataset, ClusterDatasetWriter};
use geocluster_types::{ClusterSchema, Record};
use log::info;
use std::path::PathBuf;

/// Builder that clusters a record stream and stores it as a dataset
/// directory, ready to be queried.
///
/// ```no_run
/// use geocluster::DatasetBuilder;
/// use geocluster::prelude::*;
///
/// let schema = ClusterSchema::new(
///     RecordSchema::new()
///         .with_column("id", DataType::Long)
///         .with_column("the_geom", DataType::Geometry),
///     GeometryColumnInfo::new("the_geom", "EPSG:4326"),
/// );
/// let records = vec![Record::new(vec![
///     Value::Long(1),
///     Value::Geometry(Point::new(127.0, 37.5).into()),
/// ])];
///
/// let dataset = DatasetBuilder::new("/tmp/stations", schema)
///     .cluster_count_hint(8)
///     .build(records)?;
/// assert_eq!(dataset.index().stats().owned_count, 1);
/// # Ok::<(), geocluster::ClusterError>(())
/// ```
#[derive(Debug)]
pub struct DatasetBuilder {
    dir: PathBuf,
    schema: ClusterSchema,
    config: Config,
    quad_keys: Option<Vec<String>>,
}

impl DatasetBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P, schema: ClusterSchema) -> Self {
        Self {
            dir: dir.into(),
            schema,
            config: Config::default(),
            quad_keys: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn cluster_count_hint(mut self, hint: usize) -> Self {
        self.config.cluster_count_hint = hint;
        self
    }

    pub fn bind_outliers(mut self, bind: bool) -> Self {
        self.config.bind_outliers = bind;
        self
    }

    /// Cluster by these tiles instead of partitioning the data afresh, so
    /// the dataset lines up with another one built over the same keys.
    pub fn quad_keys<I, S>(mut self, quad_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quad_keys = Some(quad_keys.into_iter().map(Into::into).collect());
        self
    }

    /// Cluster `records`, store every cluster and open the written dataset.
    pub fn build<I>(self, records: I) -> Result<ClusterDataset>
    where
        I: IntoIterator<Item = Record>,
    {
        self.config.validate().map_err(ClusterError::InvalidInput)?;
        let builder = InMemoryClusterBuilder::new(self.schema.clone(), &self.config)?;
        let clusters = match &self.quad_keys {
            Some(keys) => builder.build_with_quad_keys(records, keys)?,
            None => builder.build(records)?,
        };

        let mut writer = ClusterDatasetWriter::create(&self.dir, self.schema, self.config)?;
        for cluster in &clusters {
            writer.store_cluster(cluster)?;
        }
        let index = writer.finish()?;

        let stats = index.stats();
        info!(
            "built dataset: dir={}, clusters={}, records={}, duplicates={}",
            self.dir.display(),
            stats.cluster_count,
            stats.owned_count,
            stats.duplicate_count
        );
        Ok(ClusterDataset::from_parts(self.dir, index))
    }
}
