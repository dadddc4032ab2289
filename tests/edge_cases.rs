use geo::{Point, Rect};
use geocluster::prelude::*;
use geocluster::storage::format::INDEX_FILE_NAME;
use geocluster::tile::{self, MAX_LATITUDE, OUTLIERS_KEY};
use std::fs;
use tempfile::TempDir;

fn schema_in(srid: &str) -> ClusterSchema {
    ClusterSchema::new(
        RecordSchema::new()
            .with_column("id", DataType::Long)
            .with_column("the_geom", DataType::Geometry),
        GeometryColumnInfo::new("the_geom", srid),
    )
}

fn schema() -> ClusterSchema {
    schema_in("EPSG:4326")
}

fn point(id: i64, x: f64, y: f64) -> Record {
    Record::new(vec![Value::Long(id), Value::Geometry(Point::new(x, y).into())])
}

fn ids(records: &[TaggedRecord]) -> Vec<i64> {
    let mut ids: Vec<i64> = records
        .iter()
        .filter_map(|r| match r.record.get(0) {
            Some(Value::Long(id)) => Some(*id),
            _ => None,
        })
        .collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_empty_dataset() {
    let dir = TempDir::new().unwrap();
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .build(Vec::new())
        .unwrap();

    assert!(dataset.index().is_empty());
    assert_eq!(dataset.read_owned().count(), 0);
    let everything = Envelope::new(-180.0, -90.0, 180.0, 90.0);
    assert!(dataset.query(&everything, true).unwrap().is_empty());

    let reopened = ClusterDataset::open(dir.path()).unwrap();
    assert!(reopened.index().is_empty());
}

#[test]
fn test_polar_records_go_to_outliers() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        point(1, 10.0, 10.0),
        point(2, 0.0, 89.5),
        point(3, -120.0, -88.0),
        point(4, -40.0, -20.0),
    ];
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .build(records.clone())
        .unwrap();

    let outliers = dataset.index().outliers().unwrap();
    assert_eq!(outliers.quad_key, OUTLIERS_KEY);
    assert_eq!(outliers.count, 2);
    assert_eq!(outliers.owned_count, 2);

    let arctic = dataset
        .query(&Envelope::new(-10.0, 86.0, 10.0, 90.0), true)
        .unwrap();
    assert_eq!(ids(&arctic), [2]);

    let dropped_dir = TempDir::new().unwrap();
    let dropped = DatasetBuilder::new(dropped_dir.path(), schema())
        .bind_outliers(false)
        .build(records)
        .unwrap();
    assert!(dropped.index().outliers().is_none());
    assert_eq!(dropped.index().stats().owned_count, 2);
}

#[test]
fn test_records_without_geometry_are_skipped() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        point(1, 1.0, 1.0),
        Record::new(vec![Value::Long(2), Value::Null]),
    ];
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .build(records)
        .unwrap();
    assert_eq!(dataset.index().stats().record_count, 1);
}

#[test]
fn test_schema_mismatch_is_reported() {
    let dir = TempDir::new().unwrap();
    let short = Record::new(vec![Value::Long(1)]);
    let result = DatasetBuilder::new(dir.path(), schema()).build(vec![short]);
    assert!(matches!(result, Err(ClusterError::SchemaMismatch(_))));
}

#[test]
fn test_web_mercator_dataset() {
    let dir = TempDir::new().unwrap();
    // roughly Seoul and Sydney in Web-Mercator metres
    let records = vec![
        point(1, 14_135_000.0, 4_518_000.0),
        point(2, 16_834_000.0, -4_012_000.0),
    ];
    let dataset = DatasetBuilder::new(dir.path(), schema_in("EPSG:3857"))
        .build(records)
        .unwrap();

    let bounds = dataset.index().stats().data_bounds;
    assert!(bounds.min_x > 126.0 && bounds.max_x < 152.0);
    assert!(bounds.min_y > -34.0 && bounds.max_y < 38.0);

    let korea = dataset
        .query(&Envelope::new(124.0, 33.0, 132.0, 39.0), true)
        .unwrap();
    assert_eq!(ids(&korea), [1]);
}

#[test]
fn test_unsupported_srid() {
    let dir = TempDir::new().unwrap();
    let result = DatasetBuilder::new(dir.path(), schema_in("EPSG:5186")).build(vec![point(1, 0.0, 0.0)]);
    assert!(matches!(result, Err(ClusterError::UnsupportedSrid(_))));
}

#[test]
fn test_bad_index_magic() {
    let dir = TempDir::new().unwrap();
    DatasetBuilder::new(dir.path(), schema())
        .build(vec![point(1, 5.0, 5.0)])
        .unwrap();

    let path = dir.path().join(INDEX_FILE_NAME);
    let mut bytes = fs::read(&path).unwrap();
    bytes[..4].copy_from_slice(b"XXXX");
    fs::write(&path, bytes).unwrap();

    let result = ClusterDataset::open(dir.path());
    assert!(matches!(result, Err(ClusterError::InvalidFormat(_))));
}

#[test]
fn test_missing_index() {
    let dir = TempDir::new().unwrap();
    assert!(ClusterDataset::open(dir.path()).is_err());
}

#[test]
fn test_points_on_tile_edges_are_owned_once() {
    let dir = TempDir::new().unwrap();
    let mut records = Vec::new();
    let mut id = 0;
    for x in [-90.0, 0.0, 90.0] {
        for y in [-45.0, 0.0, 45.0] {
            records.push(point(id, x, y));
            id += 1;
        }
    }
    // a box spanning the equator and the meridian
    records.push(Record::new(vec![
        Value::Long(id),
        Value::Geometry(Rect::new((-1.0, -1.0), (1.0, 1.0)).into()),
    ]));
    let total = records.len();

    let dataset = DatasetBuilder::new(dir.path(), schema())
        .quad_keys(["0", "1", "2", "3"])
        .build(records)
        .unwrap();

    let stats = dataset.index().stats();
    assert_eq!(stats.owned_count, total as u64);
    assert!(stats.duplicate_count > 0);
    assert!(dataset.index().outliers().is_none());

    let owned: Vec<TaggedRecord> = dataset.read_owned().collect::<Result<_>>().unwrap();
    assert_eq!(ids(&owned), (0..total as i64).collect::<Vec<_>>());

    let centre = dataset
        .query(&Envelope::new(-0.5, -0.5, 0.5, 0.5), true)
        .unwrap();
    assert_eq!(ids(&centre), [4, 9]);
}

#[test]
fn test_identical_points_do_not_split_forever() {
    let dir = TempDir::new().unwrap();
    let records = (0..2_000).map(|i| point(i, 127.0, 37.5));
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .cluster_count_hint(16)
        .build(records)
        .unwrap();

    let stats = dataset.index().stats();
    assert_eq!(stats.owned_count, 2_000);
    assert_eq!(stats.duplicate_count, 0);
    assert!(stats.cluster_count >= 1);
    let keys = dataset.index().quad_keys();
    assert!(keys.iter().all(|k| tile::is_valid_quad_key(k)));
}

#[test]
fn test_domain_corner_points() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        point(1, -180.0, -MAX_LATITUDE),
        point(2, 180.0, MAX_LATITUDE),
        point(3, 180.0, -MAX_LATITUDE),
        point(4, -180.0, MAX_LATITUDE),
    ];
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .build(records)
        .unwrap();
    assert_eq!(dataset.index().stats().owned_count, 4);
    let owned: Vec<TaggedRecord> = dataset.read_owned().collect::<Result<_>>().unwrap();
    assert_eq!(ids(&owned), [1, 2, 3, 4]);
}
