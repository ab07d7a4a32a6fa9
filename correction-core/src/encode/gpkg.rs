//! Encodage GeoPackage (SQLite via rusqlite)
//!
//! Le fichier est construit dans un répertoire temporaire puis relu en
//! mémoire. Les géométries sont stockées au format binaire GeoPackage:
//! en-tête `GP` + enveloppe XY, suivi du WKB.

use std::fs;

use geo::{BoundingRect, Geometry, Rect};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use super::{
    check_geometry, ensure_not_empty, extend_extent, require_schema, safe_filename, EncodeOptions, Encoder,
    ExportFormat, ScratchDir, TypedRows, WGS84_EPSG, WGS84_WKT,
};
use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer, RawGeometry};
use crate::schema::{FieldType, FieldValue, InferredSchema, SchemaGeometry};

/// `GPKG` en ASCII
const APPLICATION_ID: i32 = 0x4750_4B47;
/// GeoPackage 1.3.0
const USER_VERSION: i32 = 10300;

const FID_COLUMN: &str = "fid";
const GEOM_COLUMN: &str = "geom";

/// Encodeur GeoPackage
#[derive(Debug, Clone, Default)]
pub struct GeoPackageEncoder {
    options: EncodeOptions,
}

impl GeoPackageEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }
}

impl Encoder for GeoPackageEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Gpkg
    }

    fn encode(
        &self,
        layer: &Layer,
        features: &[CanonicalFeature],
        schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError> {
        ensure_not_empty(features)?;
        let schema = require_schema(self.format(), schema)?;

        let scratch = ScratchDir::create(self.options.scratch_root.as_deref())?;
        let table = safe_filename(&layer.name, self.options.max_filename_len);
        let path = scratch.file(&format!("{}.gpkg", table));

        {
            let mut conn = Connection::open(&path)?;
            init_geopackage(&conn)?;

            let columns = column_names(schema);
            create_feature_table(&conn, &table, schema, &columns)?;

            let mut rows = TypedRows::new(schema);
            let mut extent: Option<Rect> = None;

            let tx = conn.transaction()?;
            {
                let insert_sql = insert_statement(&table, &columns);
                let mut stmt = tx.prepare(&insert_sql)?;
                for feature in features {
                    let geom = feature.decode_geometry()?;
                    check_geometry(schema, &feature.id, &geom)?;

                    let envelope = geom.bounding_rect();
                    extent = extend_extent(extent, envelope);

                    let mut values = Vec::with_capacity(columns.len() + 1);
                    values.push(SqlValue::Blob(gpkg_blob(feature, &geom, envelope)?));
                    values.extend(rows.row(feature).into_iter().map(sql_value));
                    stmt.execute(params_from_iter(values))?;
                }
            }
            register_layer(&tx, &table, layer, schema, extent)?;
            tx.commit()?;
            rows.finish(layer, self.format());

            conn.close().map_err(|(_, e)| EncodeError::Sqlite(e))?;
        }

        let bytes = fs::read(&path)?;
        debug!(table = %table, bytes = bytes.len(), "GeoPackage written");
        Ok(bytes)
    }
}

/// Pragmas d'identification et tables système
fn init_geopackage(conn: &Connection) -> Result<(), EncodeError> {
    conn.pragma_update(None, "application_id", APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", USER_VERSION)?;

    conn.execute_batch(
        "CREATE TABLE gpkg_spatial_ref_sys (
            srs_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL PRIMARY KEY,
            organization TEXT NOT NULL,
            organization_coordsys_id INTEGER NOT NULL,
            definition TEXT NOT NULL,
            description TEXT
        );
        CREATE TABLE gpkg_contents (
            table_name TEXT NOT NULL PRIMARY KEY,
            data_type TEXT NOT NULL,
            identifier TEXT UNIQUE,
            description TEXT DEFAULT '',
            last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE,
            srs_id INTEGER,
            CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
        );
        CREATE TABLE gpkg_geometry_columns (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            geometry_type_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL,
            z TINYINT NOT NULL,
            m TINYINT NOT NULL,
            CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
            CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
            CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
        );",
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO gpkg_spatial_ref_sys
            (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        "Undefined cartesian SRS",
        -1,
        "NONE",
        -1,
        "undefined",
        "undefined cartesian coordinate reference system"
    ])?;
    stmt.execute(params![
        "Undefined geographic SRS",
        0,
        "NONE",
        0,
        "undefined",
        "undefined geographic coordinate reference system"
    ])?;
    stmt.execute(params![
        "WGS 84 geodetic",
        WGS84_EPSG,
        "EPSG",
        WGS84_EPSG,
        WGS84_WKT,
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
    ])?;

    Ok(())
}

fn create_feature_table(
    conn: &Connection,
    table: &str,
    schema: &InferredSchema,
    columns: &[String],
) -> Result<(), EncodeError> {
    let mut ddl = format!(
        "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, {} {}",
        quote_ident(table),
        quote_ident(FID_COLUMN),
        quote_ident(GEOM_COLUMN),
        geometry_type_name(schema.geometry)
    );
    for (field, column) in schema.fields.iter().zip(columns) {
        ddl.push_str(", ");
        ddl.push_str(&quote_ident(column));
        ddl.push(' ');
        ddl.push_str(sql_type(field.field_type));
    }
    ddl.push(')');

    conn.execute(&ddl, [])?;
    Ok(())
}

fn register_layer(
    conn: &Connection,
    table: &str,
    layer: &Layer,
    schema: &InferredSchema,
    extent: Option<Rect>,
) -> Result<(), EncodeError> {
    let (min, max) = match extent {
        Some(rect) => (Some(rect.min()), Some(rect.max())),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO gpkg_contents
            (table_name, data_type, identifier, description, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?1, 'features', ?2, '', ?3, ?4, ?5, ?6, ?7)",
        params![
            table,
            layer.name,
            min.map(|c| c.x),
            min.map(|c| c.y),
            max.map(|c| c.x),
            max.map(|c| c.y),
            WGS84_EPSG
        ],
    )?;
    conn.execute(
        "INSERT INTO gpkg_geometry_columns
            (table_name, column_name, geometry_type_name, srs_id, z, m)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            table,
            GEOM_COLUMN,
            geometry_type_name(schema.geometry),
            WGS84_EPSG,
            // 2: Z optionnel
            if schema.geometry == SchemaGeometry::LineString3D { 2 } else { 0 }
        ],
    )?;
    Ok(())
}

/// Géométrie au format binaire GeoPackage
fn gpkg_blob(
    feature: &CanonicalFeature,
    geom: &Geometry,
    envelope: Option<Rect>,
) -> Result<Vec<u8>, EncodeError> {
    let wkb = RawGeometry::from_geometry(geom)
        .map_err(|reason| EncodeError::invalid_geometry(&feature.id, reason))?;

    let mut blob = Vec::with_capacity(8 + 32 + wkb.0.len());
    blob.extend_from_slice(b"GP");
    blob.push(0); // version
    match envelope {
        Some(rect) => {
            // little endian + enveloppe [minx, maxx, miny, maxy]
            blob.push(0b0000_0011);
            blob.extend_from_slice(&(WGS84_EPSG as i32).to_le_bytes());
            blob.extend_from_slice(&rect.min().x.to_le_bytes());
            blob.extend_from_slice(&rect.max().x.to_le_bytes());
            blob.extend_from_slice(&rect.min().y.to_le_bytes());
            blob.extend_from_slice(&rect.max().y.to_le_bytes());
        }
        None => {
            // géométrie vide, sans enveloppe
            blob.push(0b0001_0001);
            blob.extend_from_slice(&(WGS84_EPSG as i32).to_le_bytes());
        }
    }
    blob.extend_from_slice(&wkb.0);
    Ok(blob)
}

fn insert_statement(table: &str, columns: &[String]) -> String {
    let mut names = vec![quote_ident(GEOM_COLUMN)];
    names.extend(columns.iter().map(|c| quote_ident(c)));
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Noms de colonnes attributaires, uniques sans tenir compte de la casse
/// (comme SQLite) et sans collision avec `fid` / `geom`
fn column_names(schema: &InferredSchema) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let base = if field.name.eq_ignore_ascii_case(FID_COLUMN)
            || field.name.eq_ignore_ascii_case(GEOM_COLUMN)
        {
            format!("{}_attr", field.name)
        } else {
            field.name.clone()
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while names.iter().any(|existing| existing.eq_ignore_ascii_case(&candidate)) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(candidate);
    }
    names
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn geometry_type_name(geometry: SchemaGeometry) -> &'static str {
    match geometry {
        SchemaGeometry::Point => "POINT",
        SchemaGeometry::MultiPoint => "MULTIPOINT",
        SchemaGeometry::LineString | SchemaGeometry::LineString3D => "LINESTRING",
        SchemaGeometry::MultiLineString => "MULTILINESTRING",
        SchemaGeometry::Polygon => "POLYGON",
        SchemaGeometry::MultiPolygon => "MULTIPOLYGON",
        SchemaGeometry::Unknown => "GEOMETRY",
    }
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Bool => "BOOLEAN",
        FieldType::Int => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Str => "TEXT",
    }
}

fn sql_value(value: FieldValue) -> SqlValue {
    match value {
        FieldValue::Null => SqlValue::Null,
        FieldValue::Bool(b) => SqlValue::Integer(i64::from(b)),
        FieldValue::Int(i) => SqlValue::Integer(i),
        FieldValue::Float(f) => SqlValue::Real(f),
        FieldValue::Str(s) => SqlValue::Text(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureStatus;
    use crate::schema::infer_from_features;
    use crate::value::attributes_from_json;
    use geo::{LineString, Point};
    use serde_json::json;

    fn feature(id: &str, attrs: serde_json::Value, geom: Geometry) -> CanonicalFeature {
        CanonicalFeature {
            id: id.to_string(),
            status: FeatureStatus::Pending,
            attributes: attributes_from_json(attrs),
            geometry: RawGeometry::from_geometry(&geom).unwrap(),
            corrected: false,
        }
    }

    fn open(bytes: &[u8]) -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");
        fs::write(&path, bytes).unwrap();
        let conn = Connection::open(&path).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_geopackage_layout() {
        let layer = Layer::new("l1", "Points relevés").with_geometry_type("Point");
        let features = vec![
            feature("a", json!({"h": 2.0, "nom": "x"}), Point::new(1.0, 2.0).into()),
            feature("b", json!({"h": "3.5", "nom": null}), Point::new(3.0, -1.0).into()),
        ];
        let schema = infer_from_features(&layer, &features);

        let bytes = GeoPackageEncoder::default()
            .encode(&layer, &features, Some(&schema))
            .unwrap();
        assert_eq!(&bytes[..16], b"SQLite format 3\0");

        let (_dir, conn) = open(&bytes);
        let app_id: i32 = conn
            .query_row("PRAGMA application_id", [], |r| r.get(0))
            .unwrap();
        assert_eq!(app_id, APPLICATION_ID);

        let (table, min_x, max_y): (String, f64, f64) = conn
            .query_row(
                "SELECT table_name, min_x, max_y FROM gpkg_contents",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(table, "Points_relev_s");
        assert_eq!(min_x, 1.0);
        assert_eq!(max_y, 2.0);

        let heights: Vec<f64> = conn
            .prepare(&format!("SELECT h FROM {} ORDER BY fid", quote_ident(&table)))
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(heights, vec![2.0, 3.5]);

        let blob: Vec<u8> = conn
            .query_row(
                &format!("SELECT geom FROM {} WHERE fid = 1", quote_ident(&table)),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(&blob[..4], &[b'G', b'P', 0, 0b0000_0011]);
        assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 4326);
    }

    #[test]
    fn test_geometry_mismatch() {
        let layer = Layer::new("l1", "x").with_geometry_type("Point");
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]);
        let features = vec![feature("a", json!({}), line.into())];
        let schema = infer_from_features(&layer, &features);

        let err = GeoPackageEncoder::default()
            .encode(&layer, &features, Some(&schema))
            .unwrap_err();
        assert!(matches!(err, EncodeError::GeometryMismatch { .. }));
    }

    #[test]
    fn test_case_insensitive_column_collisions() {
        let layer = Layer::new("l1", "Noms").with_geometry_type("Point");
        let features = vec![feature(
            "a",
            json!({"Nom": "x", "nom": "y", "FID": 7}),
            Point::new(0.0, 0.0).into(),
        )];
        let schema = infer_from_features(&layer, &features);

        let bytes = GeoPackageEncoder::default()
            .encode(&layer, &features, Some(&schema))
            .unwrap();
        let (_dir, conn) = open(&bytes);

        let (fid_attr, upper, lower): (i64, String, String) = conn
            .query_row(
                r#"SELECT "FID_attr", "Nom", "nom_1" FROM "Noms" WHERE fid = 1"#,
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(fid_attr, 7);
        assert_eq!(upper, "x");
        assert_eq!(lower, "y");
    }

    #[test]
    fn test_schema_required() {
        let layer = Layer::new("l1", "x");
        let features = vec![feature("a", json!({}), Point::new(0.0, 0.0).into())];
        let err = GeoPackageEncoder::default()
            .encode(&layer, &features, None)
            .unwrap_err();
        assert!(matches!(err, EncodeError::MissingSchema(ExportFormat::Gpkg)));
    }
}
