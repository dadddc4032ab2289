//! Quad-key clustered storage for spatial records.
//!
//! Records are partitioned into clusters by Web-Mercator quad-key tiles. A
//! record crossing tile edges is replicated into every tile it touches but
//! owned by exactly one, so queries and joins can report it once. Clusters
//! are stored as compressed blocks in shared partition files and located
//! through a global index that answers range and join-pairing lookups.
//!
//! ```rust
//! use geocluster::prelude::*;
//!
//! let schema = ClusterSchema::new(
//!     RecordSchema::new()
//!         .with_column("name", DataType::String)
//!         .with_column("the_geom", DataType::Geometry),
//!     GeometryColumnInfo::new("the_geom", "EPSG:4326"),
//! );
//! let records = vec![
//!     Record::new(vec!["seoul".into(), Value::Geometry(Point::new(126.98, 37.57).into())]),
//!     Record::new(vec!["busan".into(), Value::Geometry(Point::new(129.07, 35.18).into())]),
//! ];
//!
//! let clusters = build_clusters(records, schema, 4)?;
//! let owned: usize = clusters.iter().map(|c| c.owned_count()).sum();
//! assert_eq!(owned, 2);
//! # Ok::<(), geocluster::ClusterError>(())
//! ```

pub mod builder;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod join;
pub mod projection;
pub mod quadtree;
pub mod storage;
pub mod tile;

pub use builder::DatasetBuilder;
pub use cache::{ClusterCache, ClusterSource};
pub use cluster::{
    InMemoryCluster, InMemoryClusterBuilder, IndexedCluster, QuadCluster, QuadKeyBinder,
    build_clusters, cluster_by_quad_keys,
};
pub use config::Config;
pub use error::{ClusterError, Result};
pub use join::{SpatialPredicate, clustered_nl_join, match_cluster_keys, spatial_join};
pub use quadtree::{QuadTree, QuadTreeBuilder, QuadTreeJoinMatcher, SpatialRelation};
pub use storage::{
    ClusterDataset, ClusterDatasetWriter, GlobalIndex, GlobalIndexEntry, store_cluster,
};

pub use geocluster_types::{
    ClusterSchema, Column, DataType, Envelope, GeometryColumnInfo, Record, RecordSchema,
    TaggedRecord, Value,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{ClusterError, Config, DatasetBuilder, Result};

    pub use geo::{Geometry, Point, Polygon, Rect};

    pub use crate::{
        ClusterSchema, DataType, Envelope, GeometryColumnInfo, Record, RecordSchema,
        TaggedRecord, Value,
    };

    pub use crate::{QuadCluster, build_clusters, cluster_by_quad_keys};

    pub use crate::{ClusterCache, ClusterDataset, GlobalIndex};

    pub use crate::{SpatialPredicate, clustered_nl_join, spatial_join};
}
