//! Tests du pipeline d'export sur le dépôt en mémoire

use std::io::{Cursor, Read};

use chrono::{DateTime, TimeZone, Utc};
use correction_core::value::attributes_from_json;
use correction_core::{
    BaseFeature, CorrectionRecord, ExportFormat, FeatureStatus, Layer, RawGeometry, StatusFilter,
};
use correction_export::{ExportError, ExportRequest, Exporter, MemoryRepository};
use geo::{Geometry, Point};
use serde_json::json;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn point(x: f64, y: f64) -> RawGeometry {
    RawGeometry::from_geometry(&Geometry::Point(Point::new(x, y))).unwrap()
}

fn feature(id: &str, status: FeatureStatus, attrs: serde_json::Value, hour: u32) -> BaseFeature {
    BaseFeature::new(id, status, attributes_from_json(attrs), point(1.0, 2.0), at(1, hour))
}

fn correction(id: &str, feature_id: &str, patch: serde_json::Value, hour: u32) -> CorrectionRecord {
    CorrectionRecord {
        id: id.to_string(),
        feature_id: feature_id.to_string(),
        patch: attributes_from_json(patch),
        geometry: Some(point(1.1, 2.1)),
        created_at: at(2, hour),
        submission_id: Some(format!("sub-{}", id)),
    }
}

async fn exporter() -> Exporter<MemoryRepository> {
    let repo = MemoryRepository::new();
    repo.add_layer(
        "releve",
        Layer::new("bati", "Bâti relevé")
            .with_geometry_type("Point")
            .with_fields(["h", "usage"]),
    )
    .await;
    repo.add_reference_layer("releve", Layer::new("parcelles", "Parcelles"), "Cadastre")
        .await;

    repo.add_feature("bati", feature("f-1", FeatureStatus::Pending, json!({"h": 2.0}), 8))
        .await
        .unwrap();
    repo.add_feature(
        "bati",
        feature("f-2", FeatureStatus::Validated, json!({"h": 3.0, "usage": "grange"}), 9),
    )
    .await
    .unwrap();

    repo.record_correction("bati", correction("c-1", "f-2", json!({"h": 3.5}), 8))
        .await
        .unwrap();
    repo.record_correction("bati", correction("c-2", "f-2", json!({"h": 4.0}), 10))
        .await
        .unwrap();

    Exporter::new(repo)
}

fn geojson_properties(payload: &[u8]) -> Vec<serde_json::Value> {
    let doc: serde_json::Value = serde_json::from_slice(payload).unwrap();
    doc["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"].clone())
        .collect()
}

#[tokio::test]
async fn test_export_applies_latest_correction() {
    let exporter = exporter().await;
    let request = ExportRequest::new("releve", "bati", ExportFormat::GeoJson);
    let result = exporter.export(&request).await.unwrap();

    assert_eq!(result.feature_count, 2);
    assert_eq!(result.corrected_count, 1);
    assert_eq!(result.filename, "B_ti_relev.geojson");
    assert_eq!(result.media_type, "application/geo+json");
    assert_eq!(
        result.content_disposition(),
        "attachment; filename=\"B_ti_relev.geojson\""
    );

    let props = geojson_properties(&result.payload);
    assert_eq!(props[0]["_id"], "f-1");
    assert_eq!(props[0]["h"], json!(2.0));
    assert_eq!(props[1]["_id"], "f-2");
    assert_eq!(props[1]["h"], json!(4.0));
    assert_eq!(props[1]["usage"], "grange");
}

#[tokio::test]
async fn test_revert_to_earlier_value_is_exported() {
    let repo = MemoryRepository::new();
    repo.add_layer("releve", Layer::new("bati", "Bâti").with_geometry_type("Point"))
        .await;
    repo.add_feature("bati", feature("f-1", FeatureStatus::Pending, json!({"h": 2.0}), 8))
        .await
        .unwrap();

    // A → B → A, sans identifiant de soumission
    for (id, h, hour) in [("c-1", 2.5, 8), ("c-2", 3.0, 9), ("c-3", 2.5, 10)] {
        let mut record = correction(id, "f-1", json!({ "h": h }), hour);
        record.submission_id = None;
        assert!(repo.record_correction("bati", record).await.unwrap());
    }

    let exporter = Exporter::new(repo);
    let request = ExportRequest::new("releve", "bati", ExportFormat::GeoJson);
    let result = exporter.export(&request).await.unwrap();
    let props = geojson_properties(&result.payload);
    assert_eq!(props[0]["h"], json!(2.5));
}

#[tokio::test]
async fn test_export_without_corrections() {
    let exporter = exporter().await;
    let request =
        ExportRequest::new("releve", "bati", ExportFormat::GeoJson).with_corrections(false);
    let result = exporter.export(&request).await.unwrap();

    assert_eq!(result.corrected_count, 0);
    let props = geojson_properties(&result.payload);
    assert_eq!(props[1]["h"], json!(3.0));
}

#[tokio::test]
async fn test_status_filter() {
    let exporter = exporter().await;
    let request = ExportRequest::new("releve", "bati", ExportFormat::Csv)
        .with_status(StatusFilter::Only(FeatureStatus::Validated));
    let result = exporter.export(&request).await.unwrap();

    assert_eq!(result.feature_count, 1);
    let csv = std::str::from_utf8(&result.payload).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("POINT(1.1 2.1)"));
}

#[tokio::test]
async fn test_empty_result_is_not_not_found() {
    let exporter = exporter().await;
    let request = ExportRequest::new("releve", "bati", ExportFormat::Gpkg)
        .with_status(StatusFilter::Only(FeatureStatus::Locked));

    let err = exporter.export(&request).await.unwrap_err();
    assert!(matches!(err, ExportError::EmptyResult { .. }));
    assert!(err.is_client_error());
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_unknown_layer_or_project() {
    let exporter = exporter().await;

    for (project, layer) in [("releve", "nope"), ("autre", "bati")] {
        let request = ExportRequest::new(project, layer, ExportFormat::Kml);
        let err = exporter.export(&request).await.unwrap_err();
        assert!(
            matches!(err, ExportError::NotFound { .. }),
            "{}/{} should be NotFound, got {:?}",
            project,
            layer,
            err
        );
    }
}

#[tokio::test]
async fn test_shapefile_archive() {
    let exporter = exporter().await;
    let request = ExportRequest::new("releve", "bati", ExportFormat::Shp);
    let result = exporter.export(&request).await.unwrap();

    assert_eq!(result.filename, "B_ti_relev.shp.zip");
    assert_eq!(result.media_type, "application/zip");

    let mut archive = zip::ZipArchive::new(Cursor::new(result.payload.to_vec())).unwrap();
    assert!(archive.len() >= 4);

    let mut prj = String::new();
    archive
        .by_name("B_ti_relev.prj")
        .unwrap()
        .read_to_string(&mut prj)
        .unwrap();
    assert!(prj.contains("WGS_1984"));
}

#[tokio::test]
async fn test_every_format_exports() {
    let exporter = exporter().await;
    for format in ExportFormat::ALL {
        let request = ExportRequest::new("releve", "bati", format);
        let result = exporter.export(&request).await.unwrap();
        assert!(!result.payload.is_empty(), "{} payload is empty", format);
        assert!(result.filename.ends_with(format.extension()));
        assert_eq!(result.format, format);
    }
}

#[tokio::test]
async fn test_meta_counts_without_encoding() {
    let exporter = exporter().await;

    let meta = exporter
        .meta("releve", "bati", StatusFilter::Only(FeatureStatus::Pending))
        .await
        .unwrap();
    assert_eq!(meta.feature_count, 1);
    assert_eq!(meta.layer_id, "bati");

    // un compte nul n'est pas une erreur
    let meta = exporter
        .meta("releve", "bati", StatusFilter::Only(FeatureStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(meta.feature_count, 0);

    let err = exporter
        .meta("releve", "nope", StatusFilter::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::NotFound { .. }));
}

#[tokio::test]
async fn test_layers_listing() {
    let exporter = exporter().await;
    let layers = exporter.layers("releve").await.unwrap();

    let ids: Vec<&str> = layers.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["bati", "parcelles"]);
    assert_eq!(layers[0].feature_count, 2);
    assert!(!layers[0].is_reference);
    assert!(layers[1].is_reference);
}
