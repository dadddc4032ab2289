use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geo::{Point, Rect};
use geocluster::prelude::*;
use geocluster::quadtree::{Pointer, QuadTree, SimplePartition, SpatialRelation};
use geocluster::storage::read_cluster;
use geocluster::ClusterDatasetWriter;
use std::sync::Arc;
use tempfile::TempDir;

fn schema() -> ClusterSchema {
    ClusterSchema::new(
        RecordSchema::new()
            .with_column("id", DataType::Long)
            .with_column("the_geom", DataType::Geometry),
        GeometryColumnInfo::new("the_geom", "EPSG:4326"),
    )
}

fn scattered(n: usize, size: f64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let x = -170.0 + ((i * 7_919) % 3_400) as f64 * 0.1;
            let y = -70.0 + ((i * 104_729) % 1_400) as f64 * 0.1;
            let geom: Geometry<f64> = if size > 0.0 {
                Rect::new((x, y), (x + size, y + size)).into()
            } else {
                Point::new(x, y).into()
            };
            Record::new(vec![Value::Long(i as i64), Value::Geometry(geom)])
        })
        .collect()
}

fn benchmark_cluster_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_building");

    for count in [1_000, 10_000] {
        let records = scattered(count, 0.5);
        group.bench_with_input(BenchmarkId::new("build_clusters", count), &records, |b, records| {
            b.iter(|| build_clusters(black_box(records.clone()), schema(), 16).unwrap())
        });
    }

    group.finish();
}

fn benchmark_quadtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("quadtree");

    let envelopes: Vec<Envelope> = (0..5_000)
        .map(|i| {
            let x = -170.0 + ((i * 7_919) % 3_400) as f64 * 0.1;
            let y = -70.0 + ((i * 104_729) % 1_400) as f64 * 0.1;
            Envelope::new(x, y, x + 0.2, y + 0.2)
        })
        .collect();

    group.bench_function("insert_5000", |b| {
        b.iter(|| {
            let mut tree = QuadTree::new(|_: &str| SimplePartition::<Pointer>::new(64));
            for (idx, env) in envelopes.iter().enumerate() {
                tree.insert(&Pointer::new(*env, idx)).unwrap();
            }
            tree
        })
    });

    let mut tree = QuadTree::new(|_: &str| SimplePartition::<Pointer>::new(64));
    for (idx, env) in envelopes.iter().enumerate() {
        tree.insert(&Pointer::new(*env, idx)).unwrap();
    }
    let range = Envelope::new(-20.0, -10.0, 20.0, 10.0);
    group.bench_function("query_intersects", |b| {
        b.iter(|| tree.query(SpatialRelation::Intersects, black_box(&range)))
    });

    group.finish();
}

fn benchmark_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");
    group.sample_size(20);

    let clusters = build_clusters(scattered(20_000, 0.3), schema(), 8).unwrap();
    group.bench_function("store_dataset", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let mut writer =
                ClusterDatasetWriter::create(dir.path(), schema(), Config::default()).unwrap();
            for cluster in &clusters {
                writer.store_cluster(cluster).unwrap();
            }
            writer.finish().unwrap()
        })
    });

    let dir = TempDir::new().unwrap();
    let dataset = DatasetBuilder::new(dir.path(), schema())
        .cluster_count_hint(8)
        .build(scattered(20_000, 0.3))
        .unwrap();
    let entry = dataset
        .index()
        .entries()
        .iter()
        .max_by_key(|e| e.count)
        .unwrap()
        .clone();
    group.bench_function("read_cluster", |b| {
        b.iter(|| read_cluster(dir.path(), black_box(&entry), Arc::clone(dataset.schema())).unwrap())
    });

    let range = Envelope::new(-30.0, -20.0, 30.0, 20.0);
    group.bench_function("dataset_query", |b| {
        b.iter(|| dataset.query(black_box(&range), true).unwrap())
    });

    group.finish();
}

fn benchmark_joins(c: &mut Criterion) {
    let mut group = c.benchmark_group("joins");
    group.sample_size(10);

    let (left_dir, right_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let left = DatasetBuilder::new(left_dir.path(), schema())
        .cluster_count_hint(8)
        .build(scattered(5_000, 0.4))
        .unwrap();
    let right = DatasetBuilder::new(right_dir.path(), schema())
        .cluster_count_hint(16)
        .build(scattered(3_000, 0.0))
        .unwrap();
    let left = ClusterCache::new(left, 4);
    let right = ClusterCache::new(right, 4);

    group.bench_function("spatial_join_intersects", |b| {
        b.iter(|| spatial_join(&left, &right, SpatialPredicate::Intersects).unwrap())
    });

    let points = scattered(500, 0.0);
    group.bench_function("clustered_nl_join_within_distance", |b| {
        b.iter(|| {
            clustered_nl_join(
                points.clone(),
                &schema(),
                &left,
                SpatialPredicate::WithinDistance(0.5),
            )
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_cluster_building,
    benchmark_quadtree,
    benchmark_storage,
    benchmark_joins
);
criterion_main!(benches);
