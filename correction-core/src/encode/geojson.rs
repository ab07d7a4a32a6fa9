//! Encodage GeoJSON avec geozero (streaming)
//!
//! Format sans perte: les attributs sont sérialisés tels quels, objets et
//! tableaux compris. Aucun schéma n'est nécessaire.

use std::io::{BufWriter, Write};

use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;

use super::{ensure_not_empty, Encoder, ExportFormat};
use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer};
use crate::schema::InferredSchema;

/// Encodeur GeoJSON (FeatureCollection)
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonEncoder;

impl Encoder for GeoJsonEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::GeoJson
    }

    fn encode(
        &self,
        layer: &Layer,
        features: &[CanonicalFeature],
        _schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError> {
        ensure_not_empty(features)?;

        let mut out = Vec::with_capacity(features.len() * 256);
        {
            let mut writer = BufWriter::new(&mut out);
            write_collection(&mut writer, layer, features)?;
            writer.flush()?;
        }
        Ok(out)
    }
}

fn write_collection<W: Write>(
    writer: &mut W,
    layer: &Layer,
    features: &[CanonicalFeature],
) -> Result<(), EncodeError> {
    // Header FeatureCollection
    write!(writer, r#"{{"type":"FeatureCollection","name":"#)?;
    serde_json::to_writer(&mut *writer, &layer.name)?;
    write!(writer, r#","features":["#)?;

    for (i, feature) in features.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, feature)?;
    }

    // Footer
    write!(writer, "]}}")?;
    Ok(())
}

/// Écrit une feature en GeoJSON
fn write_feature<W: Write>(writer: &mut W, feature: &CanonicalFeature) -> Result<(), EncodeError> {
    write!(writer, r#"{{"type":"Feature","id":"#)?;
    serde_json::to_writer(&mut *writer, &feature.id)?;

    // Geometry via geozero
    write!(writer, r#","geometry":"#)?;
    let geom = feature.decode_geometry()?;
    let mut geom_buf = Vec::new();
    {
        let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
        geom.process_geom(&mut geom_writer)
            .map_err(|e| EncodeError::invalid_geometry(&feature.id, e.to_string()))?;
    }
    writer.write_all(&geom_buf)?;

    // Properties (ordre des clés stable)
    write!(writer, r#","properties":{{"#)?;
    for (i, (key, value)) in feature.attributes.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        serde_json::to_writer(&mut *writer, key)?;
        write!(writer, ":")?;
        serde_json::to_writer(&mut *writer, &value.to_json())?;
    }
    write!(writer, "}}}}")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureStatus, RawGeometry};
    use crate::value::{AttrValue, Attributes};
    use geo::{Geometry, Point};

    fn feature(id: &str, attrs: Attributes, geom: Geometry) -> CanonicalFeature {
        CanonicalFeature {
            id: id.to_string(),
            status: FeatureStatus::Pending,
            attributes: attrs,
            geometry: RawGeometry::from_geometry(&geom).unwrap(),
            corrected: false,
        }
    }

    #[test]
    fn test_feature_collection() {
        let mut attrs = Attributes::new();
        attrs.insert("h".into(), AttrValue::Float(2.0));
        attrs.insert("nom".into(), AttrValue::from("Le \"Moulin\""));
        let features = vec![feature("f-1", attrs, Point::new(1.0, 2.0).into())];

        let bytes = GeoJsonEncoder
            .encode(&Layer::new("l1", "Moulins"), &features, None)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["name"], "Moulins");
        let f = &json["features"][0];
        assert_eq!(f["id"], "f-1");
        assert_eq!(f["geometry"]["type"], "Point");
        assert_eq!(f["geometry"]["coordinates"][0], 1.0);
        assert_eq!(f["properties"]["h"], 2.0);
        assert_eq!(f["properties"]["nom"], "Le \"Moulin\"");
    }

    #[test]
    fn test_nested_values_preserved() {
        let json = serde_json::json!({"tags": ["a", "b"], "meta": {"k": 1}});
        let attrs = crate::value::attributes_from_json(json);
        let features = vec![feature("f-1", attrs, Point::new(0.0, 0.0).into())];

        let bytes = GeoJsonEncoder
            .encode(&Layer::new("l1", "x"), &features, None)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let props = &parsed["features"][0]["properties"];
        assert_eq!(props["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(props["meta"]["k"], 1);
    }

    #[test]
    fn test_empty_rejected() {
        let err = GeoJsonEncoder
            .encode(&Layer::new("l1", "x"), &[], None)
            .unwrap_err();
        assert!(matches!(err, EncodeError::EmptyResult));
    }

    #[test]
    fn test_invalid_geometry() {
        let features = vec![CanonicalFeature {
            id: "broken".into(),
            status: FeatureStatus::Pending,
            attributes: Attributes::new(),
            geometry: RawGeometry(vec![0x01, 0x02]),
            corrected: false,
        }];
        let err = GeoJsonEncoder
            .encode(&Layer::new("l1", "x"), &features, None)
            .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidGeometry { .. }));
    }
}
