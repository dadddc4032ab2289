use super::QuadCluster;
use crate::error::Result;
use crate::tile;
use geocluster_types::{ClusterSchema, Envelope, TaggedRecord};
use std::sync::Arc;

/// A cluster assembled in memory by the cluster builder, before it is stored.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    quad_key: String,
    tile_bounds: Option<Envelope>,
    data_bounds: Envelope,
    schema: Arc<ClusterSchema>,
    records: Vec<TaggedRecord>,
    duplicate_count: usize,
}

impl InMemoryCluster {
    /// Records are reordered owned-first against the tile of `quad_key`.
    pub fn new(
        quad_key: impl Into<String>,
        schema: Arc<ClusterSchema>,
        records: Vec<TaggedRecord>,
    ) -> Result<Self> {
        let quad_key = quad_key.into();
        let tile_bounds = tile_bounds_of(&quad_key)?;
        let (records, duplicate_count) = super::order_by_ownership(tile_bounds.as_ref(), records);
        Ok(Self::from_parts(quad_key, tile_bounds, schema, records, duplicate_count))
    }

    /// A cluster whose owned records were chosen by the caller.
    pub fn with_ownership(
        quad_key: impl Into<String>,
        schema: Arc<ClusterSchema>,
        mut owned: Vec<TaggedRecord>,
        replicas: Vec<TaggedRecord>,
    ) -> Result<Self> {
        let quad_key = quad_key.into();
        let tile_bounds = tile_bounds_of(&quad_key)?;
        let duplicate_count = replicas.len();
        owned.extend(replicas);
        Ok(Self::from_parts(quad_key, tile_bounds, schema, owned, duplicate_count))
    }

    fn from_parts(
        quad_key: String,
        tile_bounds: Option<Envelope>,
        schema: Arc<ClusterSchema>,
        records: Vec<TaggedRecord>,
        duplicate_count: usize,
    ) -> Self {
        let data_bounds = records.iter().fold(Envelope::empty(), |acc, rec| {
            acc.union(&rec.envelope)
        });
        Self {
            quad_key,
            tile_bounds,
            data_bounds,
            schema,
            records,
            duplicate_count,
        }
    }

    pub fn into_records(self) -> Vec<TaggedRecord> {
        self.records
    }
}

fn tile_bounds_of(quad_key: &str) -> Result<Option<Envelope>> {
    if tile::is_outliers(quad_key) {
        Ok(None)
    } else {
        tile::bounds_of(quad_key).map(Some)
    }
}

impl QuadCluster for InMemoryCluster {
    fn quad_key(&self) -> &str {
        &self.quad_key
    }

    fn tile_bounds(&self) -> Option<Envelope> {
        self.tile_bounds
    }

    fn data_bounds(&self) -> Envelope {
        self.data_bounds
    }

    fn schema(&self) -> &ClusterSchema {
        &self.schema
    }

    fn records(&self) -> &[TaggedRecord] {
        &self.records
    }

    fn duplicate_count(&self) -> usize {
        self.duplicate_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocluster_types::{DataType, GeometryColumnInfo, Record, RecordSchema, Value};

    fn schema() -> Arc<ClusterSchema> {
        Arc::new(ClusterSchema::new(
            RecordSchema::new().with_column("id", DataType::Long),
            GeometryColumnInfo::new("the_geom", "EPSG:4326"),
        ))
    }

    fn tagged(id: i64, envelope: Envelope) -> TaggedRecord {
        TaggedRecord::new(envelope, Record::new(vec![Value::Long(id)]))
    }

    #[test]
    fn test_owned_records_come_first() {
        // tile "1" spans lon 0..180, lat 0..85
        let records = vec![
            tagged(1, Envelope::new(-10.0, 10.0, 2.0, 12.0)),
            tagged(2, Envelope::from_point(45.0, 45.0)),
            tagged(3, Envelope::new(-20.0, 30.0, 1.0, 31.0)),
        ];
        let cluster = InMemoryCluster::new("1", schema(), records).unwrap();

        assert_eq!(cluster.record_count(), 3);
        assert_eq!(cluster.duplicate_count(), 2);
        assert_eq!(cluster.owned_count(), 1);
        assert_eq!(cluster.read(true)[0].record.get(0), Some(&Value::Long(2)));
        assert_eq!(cluster.data_bounds(), Envelope::new(-20.0, 10.0, 45.0, 45.0));
    }

    #[test]
    fn test_query_drops_replicas_of_other_tiles() {
        // centre (-4, 11) lies in tile "0"
        let crossing = tagged(1, Envelope::new(-10.0, 10.0, 2.0, 12.0));
        let east = InMemoryCluster::new("1", schema(), vec![crossing.clone()]).unwrap();
        let west = InMemoryCluster::new("0", schema(), vec![crossing]).unwrap();

        // the range only reaches the part east of the meridian
        let range = Envelope::new(0.5, 0.0, 50.0, 50.0);
        assert_eq!(east.query(&range, true).len(), 0);
        assert_eq!(east.query(&range, false).len(), 1);
        assert_eq!(west.query(&range, true).len(), 0);
        assert_eq!(west.query(&Envelope::new(-1.0, 0.0, 50.0, 50.0), true).len(), 1);
    }

    #[test]
    fn test_explicit_ownership() {
        // owned here although its centre lies west of the tile
        let owned = vec![tagged(1, Envelope::new(-3.0, 10.0, 1.0, 12.0))];
        let replicas = vec![tagged(2, Envelope::from_point(45.0, 45.0))];
        let cluster = InMemoryCluster::with_ownership("1", schema(), owned, replicas).unwrap();

        assert_eq!(cluster.owned_count(), 1);
        assert_eq!(cluster.duplicate_count(), 1);
        let everything = Envelope::new(-180.0, -90.0, 180.0, 90.0);
        let found = cluster.query(&everything, true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.get(0), Some(&Value::Long(1)));
    }
}
