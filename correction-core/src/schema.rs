//! Inférence de schéma pour les formats fortement typés
//!
//! GeoPackage, Shapefile et KML exigent un type par colonne. Le type est
//! déduit de la première valeur non nulle observée pour chaque clé, dans
//! l'ordre bool, int, float puis texte par défaut.

use std::collections::HashSet;
use std::fmt;

use geo::Geometry;
use serde::Serialize;

use crate::model::{CanonicalFeature, Layer};
use crate::value::AttrValue;

/// Type de géométrie d'un schéma de sortie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchemaGeometry {
    Point,
    MultiPoint,
    LineString,
    LineString3D,
    MultiLineString,
    Polygon,
    MultiPolygon,
    /// Type non déclaré ou inconnu: toute géométrie est acceptée
    Unknown,
}

impl SchemaGeometry {
    /// Correspondance depuis le type déclaré de la couche
    pub fn from_declared(declared: Option<&str>) -> Self {
        match declared {
            Some("Point") => Self::Point,
            Some("MultiPoint") => Self::MultiPoint,
            Some("LineString") => Self::LineString,
            Some("LineStringZ") => Self::LineString3D,
            Some("MultiLineString") => Self::MultiLineString,
            Some("Polygon") => Self::Polygon,
            Some("MultiPolygon") => Self::MultiPolygon,
            _ => Self::Unknown,
        }
    }

    /// Type équivalent d'une géométrie concrète
    pub fn of(geom: &Geometry) -> Self {
        match geom {
            Geometry::Point(_) => Self::Point,
            Geometry::MultiPoint(_) => Self::MultiPoint,
            Geometry::LineString(_) | Geometry::Line(_) => Self::LineString,
            Geometry::MultiLineString(_) => Self::MultiLineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => Self::Polygon,
            Geometry::MultiPolygon(_) => Self::MultiPolygon,
            Geometry::GeometryCollection(_) => Self::Unknown,
        }
    }

    /// Vrai si une géométrie peut être écrite dans une couche de ce type
    pub fn accepts(&self, geom: &Geometry) -> bool {
        match self {
            Self::Unknown => true,
            // geo est 2D: une ligne 3D déclarée reçoit des LineString
            Self::LineString3D => Self::of(geom) == Self::LineString,
            expected => Self::of(geom) == *expected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::MultiPoint => "MultiPoint",
            Self::LineString => "LineString",
            Self::LineString3D => "3D LineString",
            Self::MultiLineString => "MultiLineString",
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SchemaGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type d'une colonne attributaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
}

impl FieldType {
    /// Classe une valeur non nulle
    pub fn classify(value: &AttrValue) -> Self {
        match value {
            AttrValue::Bool(_) => Self::Bool,
            AttrValue::Int(_) => Self::Int,
            AttrValue::Float(_) => Self::Float,
            _ => Self::Str,
        }
    }
}

/// Colonne du schéma inféré
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
}

/// Schéma typé d'une couche exportée
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredSchema {
    pub geometry: SchemaGeometry,
    /// Colonnes, dans l'ordre de première apparition
    pub fields: Vec<SchemaField>,
}

impl InferredSchema {
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.field_type)
    }
}

/// Échantillon: une valeur non nulle représentative par clé
///
/// La première occurrence non nulle gagne. Les clés toujours nulles
/// n'apparaissent pas.
pub fn sample_attributes(features: &[CanonicalFeature]) -> Vec<(&str, &AttrValue)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut sample: Vec<(&str, &AttrValue)> = Vec::new();
    for feature in features {
        for (key, value) in &feature.attributes {
            if !value.is_null() && seen.insert(key.as_str()) {
                sample.push((key.as_str(), value));
            }
        }
    }
    sample
}

/// Infère le schéma d'une couche à partir d'un échantillon
pub fn infer(layer: &Layer, sample: &[(&str, &AttrValue)]) -> InferredSchema {
    InferredSchema {
        geometry: SchemaGeometry::from_declared(layer.geometry_type.as_deref()),
        fields: sample
            .iter()
            .map(|(name, value)| SchemaField {
                name: name.to_string(),
                field_type: FieldType::classify(value),
            })
            .collect(),
    }
}

/// Raccourci: échantillonne puis infère
pub fn infer_from_features(layer: &Layer, features: &[CanonicalFeature]) -> InferredSchema {
    infer(layer, &sample_attributes(features))
}

/// Valeur scalaire prête à écrire dans une colonne typée
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Convertit une valeur vers le type de colonne, sans jamais échouer.
///
/// Une valeur inconvertible devient `Null` plutôt que d'interrompre l'export.
pub fn coerce(value: &AttrValue, field_type: FieldType) -> FieldValue {
    if value.is_null() {
        return FieldValue::Null;
    }
    match field_type {
        FieldType::Str => FieldValue::Str(value.to_text()),
        FieldType::Bool => match value {
            AttrValue::Bool(b) => FieldValue::Bool(*b),
            AttrValue::Int(i) => FieldValue::Bool(*i != 0),
            AttrValue::Float(f) => FieldValue::Bool(*f != 0.0),
            AttrValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" | "oui" => FieldValue::Bool(true),
                "false" | "f" | "no" | "n" | "0" | "non" => FieldValue::Bool(false),
                _ => FieldValue::Null,
            },
            _ => FieldValue::Null,
        },
        FieldType::Int => match value {
            AttrValue::Int(i) => FieldValue::Int(*i),
            AttrValue::Bool(b) => FieldValue::Int(i64::from(*b)),
            AttrValue::Float(f) => float_to_int(*f),
            AttrValue::String(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => FieldValue::Int(i),
                    Err(_) => s.parse::<f64>().map_or(FieldValue::Null, float_to_int),
                }
            }
            _ => FieldValue::Null,
        },
        FieldType::Float => match value {
            AttrValue::Float(f) => FieldValue::Float(*f),
            AttrValue::Int(i) => FieldValue::Float(*i as f64),
            AttrValue::Bool(b) => FieldValue::Float(if *b { 1.0 } else { 0.0 }),
            AttrValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map_or(FieldValue::Null, FieldValue::Float),
            _ => FieldValue::Null,
        },
    }
}

fn float_to_int(f: f64) -> FieldValue {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        FieldValue::Int(f.trunc() as i64)
    } else {
        FieldValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureStatus, RawGeometry};
    use crate::value::Attributes;
    use geo::{LineString, Point};

    fn feature(id: &str, attrs: &[(&str, AttrValue)]) -> CanonicalFeature {
        let attributes: Attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        CanonicalFeature {
            id: id.to_string(),
            status: FeatureStatus::Pending,
            attributes,
            geometry: RawGeometry::from_geometry(&Geometry::Point(Point::new(0.0, 0.0))).unwrap(),
            corrected: false,
        }
    }

    #[test]
    fn test_declared_geometry_mapping() {
        assert_eq!(SchemaGeometry::from_declared(Some("Point")), SchemaGeometry::Point);
        assert_eq!(
            SchemaGeometry::from_declared(Some("LineStringZ")),
            SchemaGeometry::LineString3D
        );
        assert_eq!(
            SchemaGeometry::from_declared(Some("Geometry")),
            SchemaGeometry::Unknown
        );
        assert_eq!(SchemaGeometry::from_declared(Some("Curve")), SchemaGeometry::Unknown);
        assert_eq!(SchemaGeometry::from_declared(None), SchemaGeometry::Unknown);
    }

    #[test]
    fn test_unknown_accepts_anything() {
        let line = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert!(SchemaGeometry::Unknown.accepts(&line));
        assert!(!SchemaGeometry::Point.accepts(&line));
        assert!(SchemaGeometry::LineString3D.accepts(&line));
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(FieldType::classify(&AttrValue::Bool(true)), FieldType::Bool);
        assert_eq!(FieldType::classify(&AttrValue::Int(1)), FieldType::Int);
        assert_eq!(FieldType::classify(&AttrValue::Float(1.5)), FieldType::Float);
        assert_eq!(FieldType::classify(&AttrValue::from("x")), FieldType::Str);
        assert_eq!(
            FieldType::classify(&AttrValue::Array(vec![AttrValue::Int(1)])),
            FieldType::Str
        );
    }

    #[test]
    fn test_first_non_null_wins() {
        let features = vec![
            feature("a", &[("h", AttrValue::Null), ("n", AttrValue::Int(3))]),
            feature("b", &[("h", AttrValue::Float(2.0)), ("n", AttrValue::from("x"))]),
            feature("c", &[("h", AttrValue::from("tall")), ("only_null", AttrValue::Null)]),
        ];
        let layer = Layer::new("l", "L").with_geometry_type("Point");
        let schema = infer_from_features(&layer, &features);

        assert_eq!(schema.geometry, SchemaGeometry::Point);
        assert_eq!(schema.field_type("h"), Some(FieldType::Float));
        assert_eq!(schema.field_type("n"), Some(FieldType::Int));
        assert_eq!(schema.field_type("only_null"), None);
    }

    #[test]
    fn test_inference_idempotent() {
        let features = vec![
            feature("a", &[("h", AttrValue::Float(2.0)), ("ok", AttrValue::Bool(true))]),
            feature("b", &[("nom", AttrValue::from("x"))]),
        ];
        let layer = Layer::new("l", "L");
        let sample = sample_attributes(&features);
        assert_eq!(infer(&layer, &sample), infer(&layer, &sample));
    }

    #[test]
    fn test_coerce_best_effort() {
        assert_eq!(coerce(&AttrValue::from("12"), FieldType::Int), FieldValue::Int(12));
        assert_eq!(coerce(&AttrValue::from("12.7"), FieldType::Int), FieldValue::Int(12));
        assert_eq!(coerce(&AttrValue::from("abc"), FieldType::Int), FieldValue::Null);
        assert_eq!(coerce(&AttrValue::Int(3), FieldType::Float), FieldValue::Float(3.0));
        assert_eq!(coerce(&AttrValue::from("oui"), FieldType::Bool), FieldValue::Bool(true));
        assert_eq!(coerce(&AttrValue::Int(0), FieldType::Bool), FieldValue::Bool(false));
        assert_eq!(
            coerce(&AttrValue::from(serde_json::json!({"a": 1})), FieldType::Str),
            FieldValue::Str(r#"{"a":1}"#.into())
        );
        assert_eq!(coerce(&AttrValue::Null, FieldType::Str), FieldValue::Null);
        assert_eq!(coerce(&AttrValue::Float(f64::NAN), FieldType::Int), FieldValue::Null);
    }
}
