//! Modèle de données: couches, features de base, corrections et features canoniques

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::ToGeo;
use serde::{Deserialize, Serialize};

use crate::value::{AttrValue, Attributes};

/// Clés de provenance réservées, ajoutées à chaque feature canonique
pub const KEY_ID: &str = "_id";
pub const KEY_STATUS: &str = "_status";
pub const KEY_SOURCE_FILE: &str = "_source_file";
pub const KEY_CORRECTED_AT: &str = "_corrected_at";
pub const KEY_VALIDATED_AT: &str = "_validated_at";

pub const RESERVED_KEYS: [&str; 5] = [
    KEY_ID,
    KEY_STATUS,
    KEY_SOURCE_FILE,
    KEY_CORRECTED_AT,
    KEY_VALIDATED_AT,
];

/// Vrai si `name` est une clé de provenance réservée
pub fn is_reserved_key(name: &str) -> bool {
    RESERVED_KEYS.contains(&name)
}

/// Statut de revue d'une feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Pending,
    Corrected,
    Validated,
    Rejected,
    Locked,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Corrected => "corrected",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "corrected" => Ok(Self::Corrected),
            "validated" => Ok(Self::Validated),
            "rejected" => Ok(Self::Rejected),
            "locked" => Ok(Self::Locked),
            _ => Err(format!(
                "Invalid status: {}. Use: pending, corrected, validated, rejected, locked",
                s
            )),
        }
    }
}

/// Filtre de statut d'un export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatusFilter {
    #[default]
    All,
    Only(FeatureStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: FeatureStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(expected) => *expected == status,
        }
    }

    /// Statut à passer à la requête SQL (None = pas de filtre)
    pub fn status(&self) -> Option<FeatureStatus> {
        match self {
            Self::All => None,
            Self::Only(status) => Some(*status),
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(status) => status.fmt(f),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::Only)
    }
}

impl TryFrom<String> for StatusFilter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatusFilter> for String {
    fn from(value: StatusFilter) -> Self {
        value.to_string()
    }
}

/// Définition d'un champ de couche
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Nom de l'attribut
    pub name: String,

    /// Nom de la question KoboToolbox correspondante (défaut: `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kobo_question_name: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kobo_question_name: None,
        }
    }

    /// Nom attendu dans une soumission terrain
    pub fn kobo_name(&self) -> &str {
        self.kobo_question_name.as_deref().unwrap_or(&self.name)
    }
}

/// Une couche de projet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Identifiant de la couche
    pub id: String,

    /// Nom d'affichage
    pub name: String,

    /// Type de géométrie déclaré (ex: "Point", "MultiPolygon", "Geometry")
    pub geometry_type: Option<String>,

    /// Schéma ordonné des champs
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl Layer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            geometry_type: None,
            fields: Vec::new(),
        }
    }

    pub fn with_geometry_type(mut self, geometry_type: impl Into<String>) -> Self {
        self.geometry_type = Some(geometry_type.into());
        self
    }

    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = names.into_iter().map(FieldDef::new).collect();
        self
    }

    /// Champs déclarés dont le nom entre en collision avec une clé réservée
    pub fn reserved_collisions(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| is_reserved_key(name))
            .collect()
    }
}

/// Géométrie brute au format WKB
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawGeometry(pub Vec<u8>);

impl RawGeometry {
    /// Encode une géométrie `geo` en WKB
    pub fn from_geometry(geom: &Geometry) -> Result<Self, String> {
        wkb::geom_to_wkb(geom)
            .map(Self)
            .map_err(|e| format!("Failed to convert geometry to WKB: {:?}", e))
    }

    /// Décode le WKB en géométrie `geo`
    pub fn decode(&self) -> Result<Geometry, String> {
        Wkb(self.0.clone()).to_geo().map_err(|e| e.to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawGeometry({} bytes)", self.0.len())
    }
}

/// Feature telle que stockée, avant toute correction
#[derive(Debug, Clone, PartialEq)]
pub struct BaseFeature {
    pub id: String,
    pub status: FeatureStatus,
    pub attributes: Attributes,
    pub geometry: RawGeometry,
    /// Fichier source de l'import initial
    pub source_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub corrected_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl BaseFeature {
    /// Feature minimale, sans fichier source ni horodatage d'audit
    pub fn new(
        id: impl Into<String>,
        status: FeatureStatus,
        attributes: Attributes,
        geometry: RawGeometry,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            status,
            attributes,
            geometry,
            source_file: None,
            created_at,
            updated_at: None,
            corrected_at: None,
            validated_at: None,
        }
    }
}

/// Correction terrain d'une feature
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    /// Identifiant de la correction
    pub id: String,
    /// Feature corrigée
    pub feature_id: String,
    /// Attributs remplacés (clés présentes uniquement)
    pub patch: Attributes,
    /// Géométrie de remplacement
    pub geometry: Option<RawGeometry>,
    pub created_at: DateTime<Utc>,
    /// Identifiant de la soumission terrain d'origine
    pub submission_id: Option<String>,
}

/// Feature fusionnée, prête à l'export
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFeature {
    pub id: String,
    pub status: FeatureStatus,
    /// Attributs effectifs, clés de provenance incluses
    pub attributes: Attributes,
    pub geometry: RawGeometry,
    /// Vrai si une correction a été appliquée
    pub corrected: bool,
}

impl CanonicalFeature {
    /// Décode la géométrie effective
    pub fn decode_geometry(&self) -> Result<Geometry, crate::EncodeError> {
        self.geometry
            .decode()
            .map_err(|reason| crate::EncodeError::invalid_geometry(&self.id, reason))
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}
