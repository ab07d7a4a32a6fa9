//! Tests d'intégration: fusion puis encodage dans les cinq formats

use std::io::{Cursor, Read};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use correction_core::value::attributes_from_json;
use correction_core::{
    encode_layer, infer_from_features, latest_correction, merge_all, AttrValue, BaseFeature,
    CanonicalFeature, CorrectionRecord, EncodeError, EncodeOptions, ExportFormat, FeatureStatus,
    Layer, RawGeometry, RESERVED_KEYS,
};
use geo::{Geometry, Point};
use serde_json::json;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

fn point(x: f64, y: f64) -> RawGeometry {
    RawGeometry::from_geometry(&Geometry::Point(Point::new(x, y))).unwrap()
}

fn layer() -> Layer {
    Layer::new("layer-1", "Relevé 2024")
        .with_geometry_type("Point")
        .with_fields(["h", "usage"])
}

fn base(id: &str, attrs: serde_json::Value, x: f64, y: f64) -> BaseFeature {
    BaseFeature::new(
        id,
        FeatureStatus::Pending,
        attributes_from_json(attrs),
        point(x, y),
        at(8),
    )
}

fn correction(
    id: &str,
    feature_id: &str,
    patch: serde_json::Value,
    geometry: Option<RawGeometry>,
    hour: u32,
) -> CorrectionRecord {
    CorrectionRecord {
        id: id.to_string(),
        feature_id: feature_id.to_string(),
        patch: attributes_from_json(patch),
        geometry,
        created_at: at(hour),
        submission_id: None,
    }
}

fn geojson_features(bytes: &[u8]) -> Vec<geojson::Feature> {
    let text = std::str::from_utf8(bytes).unwrap();
    match geojson::GeoJson::from_str(text).unwrap() {
        geojson::GeoJson::FeatureCollection(fc) => fc.features,
        other => panic!("Expected a FeatureCollection, got {:?}", other),
    }
}

fn encode(format: ExportFormat, features: &[CanonicalFeature]) -> Vec<u8> {
    let layer = layer();
    let schema = format
        .needs_schema()
        .then(|| infer_from_features(&layer, features));
    encode_layer(
        format,
        &layer,
        features,
        schema.as_ref(),
        &EncodeOptions::default(),
    )
    .unwrap()
    .payload
}

#[test]
fn test_uncorrected_feature_keeps_base() {
    let features = merge_all(&layer(), &[(base("f-1", json!({"h": 2.0}), 1.0, 2.0), None)]);

    let out = geojson_features(&encode(ExportFormat::GeoJson, &features));
    assert_eq!(out.len(), 1);

    let props = out[0].properties.as_ref().unwrap();
    assert_eq!(props["h"], json!(2.0));
    assert_eq!(props["_status"], json!("pending"));
    assert_eq!(props["_id"], json!("f-1"));

    // h + exactement les clés réservées
    assert_eq!(props.len(), 1 + RESERVED_KEYS.len());
    for key in RESERVED_KEYS {
        assert!(props.contains_key(key), "missing {}", key);
    }

    let geom = Geometry::<f64>::try_from(out[0].geometry.clone().unwrap()).unwrap();
    assert_eq!(geom, Geometry::Point(Point::new(1.0, 2.0)));
}

#[test]
fn test_correction_overrides_attributes_and_geometry() {
    let rows = vec![(
        base("f-1", json!({"h": 2.0, "usage": "grange"}), 1.0, 2.0),
        Some(correction(
            "c-1",
            "f-1",
            json!({"h": 2.5}),
            Some(point(1.1, 2.1)),
            9,
        )),
    )];
    let features = merge_all(&layer(), &rows);
    assert!(features[0].corrected);

    let out = geojson_features(&encode(ExportFormat::GeoJson, &features));
    let props = out[0].properties.as_ref().unwrap();
    assert_eq!(props["h"], json!(2.5));
    assert_eq!(props["usage"], json!("grange"));

    // coordonnées conservées à l'identique
    let geom = Geometry::<f64>::try_from(out[0].geometry.clone().unwrap()).unwrap();
    assert_eq!(geom, Geometry::Point(Point::new(1.1, 2.1)));
}

#[test]
fn test_only_latest_correction_applies() {
    let early = correction("c-1", "f-1", json!({"h": 3.0, "usage": "x"}), None, 9);
    let late = correction("c-2", "f-1", json!({"h": 4.0}), None, 10);
    let all = [late.clone(), early];

    let chosen = latest_correction(&all).cloned();
    let features = merge_all(&layer(), &[(base("f-1", json!({"h": 2.0}), 0.0, 0.0), chosen)]);

    assert_eq!(features[0].attributes["h"], AttrValue::Float(4.0));
    // la correction antérieure n'a laissé aucune trace
    assert!(!features[0].attributes.contains_key("usage"));
}

#[test]
fn test_empty_input_never_produces_a_file() {
    let layer = layer();
    let schema = infer_from_features(&layer, &[]);
    for format in ExportFormat::ALL {
        let err = encode_layer(format, &layer, &[], Some(&schema), &EncodeOptions::default())
            .unwrap_err();
        assert!(
            matches!(err, EncodeError::EmptyResult),
            "{} should reject an empty feature list",
            format
        );
    }
}

#[test]
fn test_shapefile_single_archive() {
    let rows = vec![
        (base("f-1", json!({"h": 2.0, "usage": "grange"}), 1.0, 2.0), None),
        (base("f-2", json!({"h": 3.5, "usage": null}), 3.0, 4.0), None),
    ];
    let features = merge_all(&layer(), &rows);

    let layer = layer();
    let schema = infer_from_features(&layer, &features);
    let out = encode_layer(
        ExportFormat::Shp,
        &layer,
        &features,
        Some(&schema),
        &EncodeOptions::default(),
    )
    .unwrap();
    assert_eq!(out.filename, "Relev_2024.shp.zip");
    assert_eq!(out.media_type, "application/zip");

    let mut archive = zip::ZipArchive::new(Cursor::new(out.payload)).unwrap();
    assert!(archive.len() >= 4);

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for ext in ["shp", "shx", "dbf", "prj"] {
        assert!(names.contains(&format!("Relev_2024.{}", ext)), "missing .{}", ext);
    }

    let mut shp = Vec::new();
    archive
        .by_name("Relev_2024.shp")
        .unwrap()
        .read_to_end(&mut shp)
        .unwrap();
    assert_eq!(&shp[0..4], &9994i32.to_be_bytes());
}

#[test]
fn test_geojson_reencoding_is_identical() {
    let rows = vec![
        (
            base(
                "f-1",
                json!({"h": 2.0, "n": 3, "tags": ["a", "b"], "meta": {"k": true}}),
                0.1 + 0.2,
                -45.123456789012345,
            ),
            None,
        ),
        (
            base("f-2", json!({"h": 1e-7}), 5.72, 45.19),
            Some(correction("c-1", "f-2", json!({"h": 2.25}), None, 9)),
        ),
    ];
    let features = merge_all(&layer(), &rows);
    let first = encode(ExportFormat::GeoJson, &features);

    // relecture puis ré-encodage
    let reread: Vec<CanonicalFeature> = geojson_features(&first)
        .into_iter()
        .zip(&features)
        .map(|(f, original)| {
            let geom = Geometry::<f64>::try_from(f.geometry.unwrap()).unwrap();
            CanonicalFeature {
                id: original.id.clone(),
                status: original.status,
                attributes: attributes_from_json(serde_json::Value::Object(
                    f.properties.unwrap(),
                )),
                geometry: RawGeometry::from_geometry(&geom).unwrap(),
                corrected: original.corrected,
            }
        })
        .collect();
    let second = encode(ExportFormat::GeoJson, &reread);

    assert_eq!(first, second);
}

#[test]
fn test_typed_formats_from_same_features() {
    let rows = vec![
        (base("f-1", json!({"h": 2.0, "usage": "grange"}), 1.0, 2.0), None),
        (base("f-2", json!({"h": "7", "usage": {"a": 1}}), 3.0, 4.0), None),
    ];
    let features = merge_all(&layer(), &rows);

    let gpkg = encode(ExportFormat::Gpkg, &features);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.gpkg");
    std::fs::write(&path, gpkg).unwrap();
    let conn = rusqlite::Connection::open(&path).unwrap();
    let usages: Vec<String> = conn
        .prepare("SELECT usage FROM \"Relev_2024\" ORDER BY fid")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(usages, vec!["grange".to_string(), r#"{"a":1}"#.to_string()]);
    let h: f64 = conn
        .query_row("SELECT h FROM \"Relev_2024\" WHERE fid = 2", [], |r| r.get(0))
        .unwrap();
    assert_eq!(h, 7.0);

    let kml = String::from_utf8(encode(ExportFormat::Kml, &features)).unwrap();
    assert_eq!(kml.matches("<Placemark").count(), 2);
    assert!(kml.contains(r#"<SimpleData name="_status">pending</SimpleData>"#));

    let csv = String::from_utf8(encode(ExportFormat::Csv, &features)).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("_wkt,"));
    assert!(csv.contains("POINT(3 4)"));
}
