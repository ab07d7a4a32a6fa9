//! Encodage KML 2.2
//!
//! Les attributs sont décrits par un `<Schema>` et portés par
//! `<ExtendedData>/<SchemaData>`. Les valeurs nulles sont omises. Toute
//! géométrie est acceptée, les collections deviennent `<MultiGeometry>`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use geo::{Coord, Geometry, LineString, Polygon};
use tracing::debug;

use super::{
    ensure_not_empty, require_schema, safe_filename, EncodeOptions, Encoder, ExportFormat, ScratchDir,
    TypedRows,
};
use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer};
use crate::schema::{FieldType, FieldValue, InferredSchema};

const KML_NS: &str = "http://www.opengis.net/kml/2.2";

/// Encodeur KML
#[derive(Debug, Clone, Default)]
pub struct KmlEncoder {
    options: EncodeOptions,
}

impl KmlEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }
}

impl Encoder for KmlEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Kml
    }

    fn encode(
        &self,
        layer: &Layer,
        features: &[CanonicalFeature],
        schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError> {
        ensure_not_empty(features)?;
        let schema = require_schema(self.format(), schema)?;

        let schema_id = safe_filename(&layer.name, self.options.max_filename_len);
        let scratch = ScratchDir::create(self.options.scratch_root.as_deref())?;
        let path = scratch.file(&format!("{}.kml", schema_id));

        {
            let file = File::create(&path)?;
            let mut writer = BufWriter::new(file);
            let mut rows = TypedRows::new(schema);

            write_header(&mut writer, layer, schema, &schema_id)?;
            for feature in features {
                let geom = feature.decode_geometry()?;
                let values = rows.row(feature);
                write_placemark(&mut writer, feature, &geom, schema, &values, &schema_id)?;
            }
            write!(writer, "</Folder>\n</Document>\n</kml>\n")?;
            writer.flush()?;

            rows.finish(layer, self.format());
        }

        let bytes = fs::read(&path)?;
        debug!(placemarks = features.len(), bytes = bytes.len(), "KML written");
        Ok(bytes)
    }
}

fn write_header<W: Write>(
    writer: &mut W,
    layer: &Layer,
    schema: &InferredSchema,
    schema_id: &str,
) -> Result<(), EncodeError> {
    writeln!(writer, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(writer, r#"<kml xmlns="{}">"#, KML_NS)?;
    writeln!(writer, r#"<Document id="root_doc">"#)?;
    writeln!(
        writer,
        r#"<Schema name="{}" id="{}">"#,
        escape_xml(schema_id),
        escape_xml(schema_id)
    )?;
    for field in &schema.fields {
        writeln!(
            writer,
            r#"  <SimpleField name="{}" type="{}"></SimpleField>"#,
            escape_xml(&field.name),
            kml_type(field.field_type)
        )?;
    }
    writeln!(writer, "</Schema>")?;
    writeln!(writer, "<Folder><name>{}</name>", escape_xml(&layer.name))?;
    Ok(())
}

fn write_placemark<W: Write>(
    writer: &mut W,
    feature: &CanonicalFeature,
    geom: &Geometry,
    schema: &InferredSchema,
    values: &[FieldValue],
    schema_id: &str,
) -> Result<(), EncodeError> {
    writeln!(writer, r#"  <Placemark id="{}">"#, escape_xml(&feature.id))?;

    let present: Vec<(&str, String)> = schema
        .fields
        .iter()
        .zip(values)
        .filter_map(|(field, value)| simple_data(value).map(|text| (field.name.as_str(), text)))
        .collect();
    if !present.is_empty() {
        writeln!(
            writer,
            "    <ExtendedData><SchemaData schemaUrl=\"#{}\">",
            escape_xml(schema_id)
        )?;
        for (name, text) in present {
            writeln!(
                writer,
                r#"      <SimpleData name="{}">{}</SimpleData>"#,
                escape_xml(name),
                escape_xml(&text)
            )?;
        }
        writeln!(writer, "    </SchemaData></ExtendedData>")?;
    }

    write!(writer, "    ")?;
    write_geometry(writer, geom)?;
    writeln!(writer)?;
    writeln!(writer, "  </Placemark>")?;
    Ok(())
}

fn write_geometry<W: Write>(writer: &mut W, geom: &Geometry) -> Result<(), EncodeError> {
    match geom {
        Geometry::Point(p) => {
            write!(writer, "<Point><coordinates>{}</coordinates></Point>", coord(p.0))?;
        }
        Geometry::Line(l) => {
            write_line(writer, &LineString::from(vec![l.start, l.end]))?;
        }
        Geometry::LineString(ls) => write_line(writer, ls)?,
        Geometry::Polygon(p) => write_polygon(writer, p)?,
        Geometry::Rect(r) => write_polygon(writer, &r.to_polygon())?,
        Geometry::Triangle(t) => write_polygon(writer, &t.to_polygon())?,
        Geometry::MultiPoint(mp) => {
            write!(writer, "<MultiGeometry>")?;
            for p in mp.iter() {
                write_geometry(writer, &Geometry::Point(*p))?;
            }
            write!(writer, "</MultiGeometry>")?;
        }
        Geometry::MultiLineString(mls) => {
            write!(writer, "<MultiGeometry>")?;
            for ls in mls.iter() {
                write_line(writer, ls)?;
            }
            write!(writer, "</MultiGeometry>")?;
        }
        Geometry::MultiPolygon(mp) => {
            write!(writer, "<MultiGeometry>")?;
            for p in mp.iter() {
                write_polygon(writer, p)?;
            }
            write!(writer, "</MultiGeometry>")?;
        }
        Geometry::GeometryCollection(gc) => {
            write!(writer, "<MultiGeometry>")?;
            for g in gc.iter() {
                write_geometry(writer, g)?;
            }
            write!(writer, "</MultiGeometry>")?;
        }
    }
    Ok(())
}

fn write_line<W: Write>(writer: &mut W, ls: &LineString) -> Result<(), EncodeError> {
    write!(
        writer,
        "<LineString><coordinates>{}</coordinates></LineString>",
        coords(ls)
    )?;
    Ok(())
}

fn write_polygon<W: Write>(writer: &mut W, polygon: &Polygon) -> Result<(), EncodeError> {
    write!(
        writer,
        "<Polygon><outerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></outerBoundaryIs>",
        coords(polygon.exterior())
    )?;
    for ring in polygon.interiors() {
        write!(
            writer,
            "<innerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></innerBoundaryIs>",
            coords(ring)
        )?;
    }
    write!(writer, "</Polygon>")?;
    Ok(())
}

fn coord(c: Coord) -> String {
    format!("{},{}", c.x, c.y)
}

fn coords(ls: &LineString) -> String {
    ls.0.iter().map(|c| coord(*c)).collect::<Vec<_>>().join(" ")
}

fn kml_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Bool => "bool",
        FieldType::Int => "int",
        FieldType::Float => "double",
        FieldType::Str => "string",
    }
}

fn simple_data(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::Float(f) => Some(f.to_string()),
        FieldValue::Str(s) => Some(s.clone()),
    }
}

/// Échappe une chaîne pour XML
fn escape_xml(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            // caractères de contrôle interdits en XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            _ => result.push(c),
        }
    }
    result
}
