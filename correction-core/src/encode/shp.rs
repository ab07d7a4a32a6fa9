//! Encodage Shapefile (shp/shx/dbf/prj/cpg, livré en archive zip)
//!
//! Les composants sont écrits dans un répertoire temporaire puis regroupés
//! dans une seule archive. Un Shapefile ne porte qu'un type de forme: pour
//! une couche de type inconnu, c'est la première géométrie qui le fixe.

use std::fs;
use std::io::{Cursor, Write};

use chrono::{Datelike, Utc};
use geo::orient::{Direction, Orient};
use geo::{Coord, Geometry, LineString, Polygon, Rect};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::{
    check_geometry, ensure_not_empty, extend_extent, require_schema, safe_filename, EncodeOptions, Encoder,
    ExportFormat, ScratchDir, TypedRows,
};
use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer};
use crate::schema::{FieldType, FieldValue, InferredSchema, SchemaGeometry};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;

/// Longueur maximale d'un nom de champ dBase
const DBF_NAME_LEN: usize = 10;
/// Largeur maximale d'un champ caractère dBase
const DBF_CHAR_MAX: usize = 254;
/// Nombre maximal de champs d'une table dBase
const DBF_MAX_FIELDS: usize = 255;

const ESRI_WGS84: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// Encodeur Shapefile
#[derive(Debug, Clone, Default)]
pub struct ShapefileEncoder {
    options: EncodeOptions,
}

impl ShapefileEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }
}

impl Encoder for ShapefileEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Shp
    }

    fn encode(
        &self,
        layer: &Layer,
        features: &[CanonicalFeature],
        schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError> {
        ensure_not_empty(features)?;
        let schema = require_schema(self.format(), schema)?;

        let geometries = features
            .iter()
            .map(|f| f.decode_geometry())
            .collect::<Result<Vec<_>, _>>()?;
        let shape_type = layer_shape_type(schema, &features[0].id, &geometries[0])?;

        let mut shapes = Vec::with_capacity(features.len());
        for (feature, geom) in features.iter().zip(&geometries) {
            check_geometry(schema, &feature.id, geom)?;
            shapes.push(ShapeRecord::from_geometry(shape_type, &feature.id, geom)?);
        }

        let mut rows = TypedRows::new(schema);
        let records: Vec<Vec<FieldValue>> = features.iter().map(|f| rows.row(f)).collect();
        rows.finish(layer, self.format());

        let (shp, shx) = write_shp_shx(shape_type, &shapes);
        let dbf = write_dbf(schema, &records)?;

        let base = safe_filename(&layer.name, self.options.max_filename_len);
        let scratch = ScratchDir::create(self.options.scratch_root.as_deref())?;
        fs::write(scratch.file(&format!("{}.shp", base)), shp)?;
        fs::write(scratch.file(&format!("{}.shx", base)), shx)?;
        fs::write(scratch.file(&format!("{}.dbf", base)), dbf)?;
        fs::write(scratch.file(&format!("{}.prj", base)), ESRI_WGS84)?;
        fs::write(scratch.file(&format!("{}.cpg", base)), "UTF-8")?;

        let archive = zip_components(&scratch)?;
        debug!(
            shape_type = ?shape_type,
            records = shapes.len(),
            bytes = archive.len(),
            "Shapefile archive written"
        );
        Ok(archive)
    }
}

/// Regroupe les fichiers du répertoire temporaire dans une archive
fn zip_components(scratch: &ScratchDir) -> Result<Vec<u8>, EncodeError> {
    let buf = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(buf);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for path in scratch.entries()? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(&path)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Types de forme ESRI utilisés
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ShapeType {
    Null = 0,
    Point = 1,
    PolyLine = 3,
    Polygon = 5,
    MultiPoint = 8,
}

impl ShapeType {
    fn of(geom: &Geometry) -> Option<Self> {
        match geom {
            Geometry::Point(_) => Some(Self::Point),
            Geometry::MultiPoint(_) => Some(Self::MultiPoint),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(Self::PolyLine)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(Self::Polygon),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

/// Type de forme de la couche
fn layer_shape_type(
    schema: &InferredSchema,
    first_id: &str,
    first: &Geometry,
) -> Result<ShapeType, EncodeError> {
    let shape_type = match schema.geometry {
        SchemaGeometry::Point => Some(ShapeType::Point),
        SchemaGeometry::MultiPoint => Some(ShapeType::MultiPoint),
        // geo est 2D: les lignes 3D déclarées sont écrites en PolyLine
        SchemaGeometry::LineString
        | SchemaGeometry::LineString3D
        | SchemaGeometry::MultiLineString => Some(ShapeType::PolyLine),
        SchemaGeometry::Polygon | SchemaGeometry::MultiPolygon => Some(ShapeType::Polygon),
        SchemaGeometry::Unknown => ShapeType::of(first),
    };
    shape_type.ok_or_else(|| EncodeError::GeometryMismatch {
        feature_id: first_id.to_string(),
        expected: "a single Shapefile shape type".to_string(),
        found: SchemaGeometry::of(first).to_string(),
    })
}

/// Enregistrement de forme: une liste de parties (anneaux, lignes ou points)
#[derive(Debug, Clone, PartialEq)]
struct ShapeRecord {
    shape_type: ShapeType,
    parts: Vec<Vec<Coord>>,
}

impl ShapeRecord {
    fn from_geometry(
        layer_type: ShapeType,
        feature_id: &str,
        geom: &Geometry,
    ) -> Result<Self, EncodeError> {
        if ShapeType::of(geom) != Some(layer_type) {
            return Err(EncodeError::GeometryMismatch {
                feature_id: feature_id.to_string(),
                expected: format!("{:?}", layer_type),
                found: SchemaGeometry::of(geom).to_string(),
            });
        }

        let parts: Vec<Vec<Coord>> = match geom {
            Geometry::Point(p) => vec![vec![p.0]],
            Geometry::MultiPoint(mp) => vec![mp.iter().map(|p| p.0).collect()],
            Geometry::Line(l) => vec![vec![l.start, l.end]],
            Geometry::LineString(ls) => vec![ls.0.clone()],
            Geometry::MultiLineString(mls) => mls.iter().map(|ls| ls.0.clone()).collect(),
            Geometry::Polygon(p) => polygon_rings(p),
            Geometry::MultiPolygon(mp) => mp.iter().flat_map(polygon_rings).collect(),
            Geometry::Rect(r) => polygon_rings(&r.to_polygon()),
            Geometry::Triangle(t) => polygon_rings(&t.to_polygon()),
            Geometry::GeometryCollection(_) => Vec::new(),
        };
        let parts: Vec<Vec<Coord>> = parts.into_iter().filter(|p| !p.is_empty()).collect();

        Ok(Self {
            shape_type: if parts.is_empty() {
                ShapeType::Null
            } else {
                layer_type
            },
            parts,
        })
    }

    fn bbox(&self) -> Option<Rect> {
        self.parts
            .iter()
            .flatten()
            .map(|c| Some(Rect::new(*c, *c)))
            .fold(None, extend_extent)
    }

    /// Contenu de l'enregistrement (sans l'en-tête numéro/longueur)
    fn content(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.shape_type as i32).to_le_bytes());

        match self.shape_type {
            ShapeType::Null => {}
            ShapeType::Point => {
                let c = self.parts[0][0];
                put_f64s(&mut buf, &[c.x, c.y]);
            }
            ShapeType::MultiPoint => {
                put_bbox(&mut buf, self.bbox());
                let points = &self.parts[0];
                buf.extend_from_slice(&(points.len() as i32).to_le_bytes());
                for c in points {
                    put_f64s(&mut buf, &[c.x, c.y]);
                }
            }
            ShapeType::PolyLine | ShapeType::Polygon => {
                put_bbox(&mut buf, self.bbox());
                let num_points: usize = self.parts.iter().map(Vec::len).sum();
                buf.extend_from_slice(&(self.parts.len() as i32).to_le_bytes());
                buf.extend_from_slice(&(num_points as i32).to_le_bytes());
                let mut start = 0i32;
                for part in &self.parts {
                    buf.extend_from_slice(&start.to_le_bytes());
                    start += part.len() as i32;
                }
                for c in self.parts.iter().flatten() {
                    put_f64s(&mut buf, &[c.x, c.y]);
                }
            }
        }
        buf
    }
}

/// Anneaux d'un polygone: extérieur horaire, trous anti-horaires
fn polygon_rings(polygon: &Polygon) -> Vec<Vec<Coord>> {
    let oriented = polygon.orient(Direction::Reversed);
    std::iter::once(oriented.exterior())
        .chain(oriented.interiors())
        .map(closed_ring)
        .collect()
}

fn closed_ring(ring: &LineString) -> Vec<Coord> {
    let mut coords = ring.0.clone();
    if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
        if first != last {
            coords.push(first);
        }
    }
    coords
}

fn put_f64s(buf: &mut Vec<u8>, values: &[f64]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn put_bbox(buf: &mut Vec<u8>, bbox: Option<Rect>) {
    match bbox {
        Some(r) => put_f64s(buf, &[r.min().x, r.min().y, r.max().x, r.max().y]),
        None => put_f64s(buf, &[0.0; 4]),
    }
}

/// En-tête commun .shp / .shx (longueur en mots de 16 bits)
fn file_header(shape_type: ShapeType, length_bytes: usize, bbox: Option<Rect>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.extend_from_slice(&FILE_CODE.to_be_bytes());
    buf.extend_from_slice(&[0u8; 20]);
    buf.extend_from_slice(&((length_bytes / 2) as i32).to_be_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(shape_type as i32).to_le_bytes());
    put_bbox(&mut buf, bbox);
    // Z et M non utilisés
    put_f64s(&mut buf, &[0.0; 4]);
    buf
}

fn write_shp_shx(shape_type: ShapeType, shapes: &[ShapeRecord]) -> (Vec<u8>, Vec<u8>) {
    let contents: Vec<Vec<u8>> = shapes.iter().map(ShapeRecord::content).collect();
    let bbox = shapes.iter().map(ShapeRecord::bbox).fold(None, extend_extent);

    let shp_len = HEADER_LEN + contents.iter().map(|c| 8 + c.len()).sum::<usize>();
    let shx_len = HEADER_LEN + 8 * contents.len();

    let mut shp = file_header(shape_type, shp_len, bbox);
    let mut shx = file_header(shape_type, shx_len, bbox);
    shp.reserve(shp_len - HEADER_LEN);
    shx.reserve(shx_len - HEADER_LEN);

    for (i, content) in contents.iter().enumerate() {
        let offset_words = (shp.len() / 2) as i32;
        let length_words = (content.len() / 2) as i32;

        shp.extend_from_slice(&(i as i32 + 1).to_be_bytes());
        shp.extend_from_slice(&length_words.to_be_bytes());
        shp.extend_from_slice(content);

        shx.extend_from_slice(&offset_words.to_be_bytes());
        shx.extend_from_slice(&length_words.to_be_bytes());
    }

    (shp, shx)
}

/// Descripteur de champ dBase
#[derive(Debug, Clone, PartialEq)]
struct DbfField {
    name: String,
    kind: u8,
    length: usize,
    decimals: u8,
}

/// Noms dBase: ASCII, 10 caractères au plus, uniques
fn dbf_field_names(schema: &InferredSchema) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let cleaned: String = field
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .take(DBF_NAME_LEN)
            .collect();
        let base = if cleaned.is_empty() {
            "field".to_string()
        } else {
            cleaned
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while names.iter().any(|existing| existing.eq_ignore_ascii_case(&candidate)) {
            let suffix = format!("_{}", n);
            let keep = DBF_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
            candidate = format!("{}{}", &base[..keep], suffix);
            n += 1;
        }
        names.push(candidate);
    }
    names
}

fn dbf_fields(schema: &InferredSchema, records: &[Vec<FieldValue>]) -> Vec<DbfField> {
    let names = dbf_field_names(schema);
    schema
        .fields
        .iter()
        .zip(names)
        .enumerate()
        .map(|(col, (field, name))| match field.field_type {
            FieldType::Bool => DbfField {
                name,
                kind: b'L',
                length: 1,
                decimals: 0,
            },
            FieldType::Int => DbfField {
                name,
                kind: b'N',
                length: 20,
                decimals: 0,
            },
            FieldType::Float => DbfField {
                name,
                kind: b'N',
                length: 24,
                decimals: 15,
            },
            FieldType::Str => {
                let widest = records
                    .iter()
                    .filter_map(|row| match &row[col] {
                        FieldValue::Str(s) => Some(s.len()),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(1);
                DbfField {
                    name,
                    kind: b'C',
                    length: widest.clamp(1, DBF_CHAR_MAX),
                    decimals: 0,
                }
            }
        })
        .collect()
}

fn write_dbf(
    schema: &InferredSchema,
    records: &[Vec<FieldValue>],
) -> Result<Vec<u8>, EncodeError> {
    let fields = dbf_fields(schema, records);
    let record_len = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    let too_wide = || EncodeError::TableTooWide {
        fields: fields.len(),
        record_len,
        max_fields: DBF_MAX_FIELDS,
    };
    if fields.len() > DBF_MAX_FIELDS {
        return Err(too_wide());
    }
    let header_len = u16::try_from(32 + 32 * fields.len() + 1).map_err(|_| too_wide())?;
    let record_len_u16 = u16::try_from(record_len).map_err(|_| too_wide())?;

    let mut buf = Vec::with_capacity(usize::from(header_len) + record_len * records.len() + 1);
    let today = Utc::now();
    buf.push(0x03);
    buf.push((today.year() - 1900).clamp(0, 255) as u8);
    buf.push(today.month() as u8);
    buf.push(today.day() as u8);
    buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&record_len_u16.to_le_bytes());
    buf.extend_from_slice(&[0u8; 20]);

    for field in &fields {
        let mut name = [0u8; 11];
        name[..field.name.len()].copy_from_slice(field.name.as_bytes());
        buf.extend_from_slice(&name);
        buf.push(field.kind);
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(field.length as u8);
        buf.push(field.decimals);
        buf.extend_from_slice(&[0u8; 14]);
    }
    buf.push(0x0D);

    for row in records {
        buf.push(b' ');
        for (field, value) in fields.iter().zip(row) {
            buf.extend_from_slice(&dbf_cell(field, value));
        }
    }
    buf.push(0x1A);
    Ok(buf)
}

/// Valeur formatée sur la largeur exacte du champ
fn dbf_cell(field: &DbfField, value: &FieldValue) -> Vec<u8> {
    let text = match (field.kind, value) {
        (b'L', FieldValue::Bool(true)) => "T".to_string(),
        (b'L', FieldValue::Bool(false)) => "F".to_string(),
        (b'L', _) => "?".to_string(),
        (b'N', FieldValue::Int(i)) => i.to_string(),
        (b'N', FieldValue::Float(f)) if f.is_finite() => {
            let fixed = format!("{:.*}", field.decimals as usize, f);
            if fixed.len() <= field.length {
                fixed
            } else {
                format!("{:.*e}", field.decimals as usize, f)
            }
        }
        (b'C', FieldValue::Str(s)) => truncate_utf8(s, field.length).to_string(),
        _ => String::new(),
    };

    let mut bytes = text.into_bytes();
    bytes.truncate(field.length);
    let pad = field.length - bytes.len();
    if field.kind == b'N' {
        // numériques alignés à droite
        let mut cell = vec![b' '; pad];
        cell.extend_from_slice(&bytes);
        cell
    } else {
        bytes.resize(field.length, b' ');
        bytes
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
