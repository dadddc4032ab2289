//! # geocluster-types
//!
//! Value types shared by every layer of the geocluster engine:
//!
//! - **Envelopes**: [`Envelope`], a minimum bounding rectangle with an explicit empty state
//! - **Records**: [`Record`], [`Value`], [`TaggedRecord`]
//! - **Schemas**: [`RecordSchema`], [`Column`], [`DataType`], [`GeometryColumnInfo`], [`ClusterSchema`]
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! geometric primitives.
//!
//! ## Examples
//!
//! ```rust
//! use geocluster_types::Envelope;
//!
//! let a = Envelope::new(0.0, 0.0, 10.0, 10.0);
//! let b = Envelope::new(5.0, 5.0, 20.0, 20.0);
//! assert!(a.intersects(&b));
//! assert_eq!(a.intersection(&b), Envelope::new(5.0, 5.0, 10.0, 10.0));
//! ```

pub mod envelope;
pub mod record;

pub use envelope::Envelope;
pub use record::{
    ClusterSchema, Column, DataType, GeometryColumnInfo, Record, RecordSchema, TaggedRecord, Value,
};
