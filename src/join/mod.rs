//! Spatial joins between clustered datasets.
//!
//! Joins run cluster against cluster: the quad-keys of two datasets are
//! merged to find clusters whose tiles are equal or nested, and only those
//! pairs are compared record by record.

pub mod matcher;
pub mod nested_loop;
pub mod predicate;

pub use matcher::match_cluster_keys;
pub use nested_loop::{JoinedPair, clustered_nl_join, spatial_join};
pub use predicate::SpatialPredicate;
