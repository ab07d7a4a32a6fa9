//! Valeurs d'attributs faiblement typées
//!
//! Les attributs saisis sur le terrain sont stockés en JSON. Ils sont
//! représentés ici par une union étiquetée qui distingue entiers et flottants,
//! distinction dont dépend l'inférence de schéma.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Table d'attributs, triée par clé pour une sortie déterministe
pub type Attributes = BTreeMap<String, AttrValue>;

/// Valeur d'attribut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<AttrValue>),
    Object(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Nom court du type, pour les logs et les messages d'erreur
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Convertit en `serde_json::Value`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            // NaN/inf n'existent pas en JSON
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Représentation texte à plat: JSON pour les valeurs composées,
    /// chaîne vide pour null.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::String(s) => s.clone(),
            Self::Array(_) | Self::Object(_) => self.to_json().to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                // u64 hors plage i64 ou flottant
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, AttrValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            // partie décimale conservée (2.0, pas 2) comme en JSON
            Self::Float(x) => match serde_json::Number::from_f64(*x) {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "{}", x),
            },
            Self::String(s) => f.write_str(s),
            Self::Array(_) | Self::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// Convertit un objet JSON en table d'attributs.
///
/// Tout ce qui n'est pas un objet (null compris) donne une table vide.
pub fn attributes_from_json(value: serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, AttrValue::from(v)))
            .collect(),
        _ => Attributes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_numbers_stay_int() {
        assert_eq!(AttrValue::from(json!(3)), AttrValue::Int(3));
        assert_eq!(AttrValue::from(json!(2.0)), AttrValue::Float(2.0));
        assert_eq!(AttrValue::from(json!(true)), AttrValue::Bool(true));
    }

    #[test]
    fn test_nested_values() {
        let v = AttrValue::from(json!({"a": [1, "x", null]}));
        match &v {
            AttrValue::Object(map) => {
                assert_eq!(
                    map.get("a"),
                    Some(&AttrValue::Array(vec![
                        AttrValue::Int(1),
                        AttrValue::String("x".into()),
                        AttrValue::Null
                    ]))
                );
            }
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(v.to_text(), r#"{"a":[1,"x",null]}"#);
    }

    #[test]
    fn test_deserialize_untagged() {
        let attrs: Attributes = serde_json::from_str(r#"{"h": 2.0, "n": 4, "s": "x", "z": null}"#).unwrap();
        assert_eq!(attrs.get("h"), Some(&AttrValue::Float(2.0)));
        assert_eq!(attrs.get("n"), Some(&AttrValue::Int(4)));
        assert_eq!(attrs.get("z"), Some(&AttrValue::Null));
    }

    #[test]
    fn test_attributes_from_non_object() {
        assert!(attributes_from_json(json!(null)).is_empty());
        assert!(attributes_from_json(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_to_text() {
        assert_eq!(AttrValue::Null.to_text(), "");
        assert_eq!(AttrValue::Float(2.5).to_text(), "2.5");
        assert_eq!(AttrValue::Float(2.0).to_text(), "2.0");
        assert_eq!(AttrValue::Int(2).to_text(), "2");
        assert_eq!(AttrValue::Bool(false).to_text(), "false");
    }
}
