//! Benchmarks pour la fusion et l'encodage

use chrono::{TimeZone, Utc};
use correction_core::value::attributes_from_json;
use correction_core::{
    encode_layer, infer_from_features, merge_all, BaseFeature, CorrectionRecord, EncodeOptions,
    ExportFormat, FeatureStatus, Layer, RawGeometry,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{Geometry, Point};
use serde_json::json;

fn synthetic_rows(n: usize) -> Vec<(BaseFeature, Option<CorrectionRecord>)> {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let x = (i % 360) as f64 - 180.0;
            let y = (i % 180) as f64 - 90.0;
            let geometry = RawGeometry::from_geometry(&Geometry::Point(Point::new(x, y))).unwrap();
            let base = BaseFeature::new(
                format!("f-{}", i),
                FeatureStatus::Pending,
                attributes_from_json(json!({
                    "h": i as f64 * 0.5,
                    "usage": "habitat",
                    "tags": ["a", "b"],
                })),
                geometry,
                created,
            );
            // une feature sur trois corrigée
            let correction = (i % 3 == 0).then(|| CorrectionRecord {
                id: format!("c-{}", i),
                feature_id: format!("f-{}", i),
                patch: attributes_from_json(json!({"h": 1.0, "note": "vérifié"})),
                geometry: None,
                created_at: created,
                submission_id: None,
            });
            (base, correction)
        })
        .collect()
}

fn layer() -> Layer {
    Layer::new("bench", "Bench layer").with_geometry_type("Point")
}

fn bench_merge(c: &mut Criterion) {
    let layer = layer();
    let mut group = c.benchmark_group("merge_all");

    for size in [1_000usize, 10_000] {
        let rows = synthetic_rows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| black_box(merge_all(&layer, black_box(rows))))
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let layer = layer();
    let features = merge_all(&layer, &synthetic_rows(5_000));
    let schema = infer_from_features(&layer, &features);
    let options = EncodeOptions::default();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(features.len() as u64));
    group.sample_size(10);

    for format in ExportFormat::ALL {
        group.bench_function(format.as_str(), |b| {
            b.iter(|| {
                let out = encode_layer(format, &layer, &features, Some(&schema), &options).unwrap();
                black_box(out.payload.len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_encode);
criterion_main!(benches);
