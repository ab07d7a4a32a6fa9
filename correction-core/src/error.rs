//! Types d'erreurs pour le crate correction-core

use thiserror::Error;

use crate::encode::ExportFormat;

/// Erreurs pouvant survenir lors de l'encodage d'une couche
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Aucune feature à encoder (le filtre n'a rien retenu)
    #[error("No features to encode")]
    EmptyResult,

    /// Format typé appelé sans schéma inféré
    #[error("Format {0} requires an inferred schema")]
    MissingSchema(ExportFormat),

    /// Géométrie binaire illisible
    #[error("Invalid geometry for {feature_id}: {reason}")]
    InvalidGeometry { feature_id: String, reason: String },

    /// Géométrie incompatible avec le type déclaré de la couche
    #[error("Geometry of {feature_id} is {found}, layer expects {expected}")]
    GeometryMismatch {
        feature_id: String,
        expected: String,
        found: String,
    },

    /// Table attributaire hors des limites dBase
    #[error("Attribute table too wide for dBase: {fields} fields, {record_len} bytes per record (max {max_fields} fields)")]
    TableTooWide {
        fields: usize,
        record_len: usize,
        max_fields: usize,
    },

    /// Erreur d'I/O (répertoire temporaire, fichiers composants)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de sérialisation JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Erreur du writer CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Erreur lors de la création de l'archive
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Erreur SQLite (GeoPackage)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl EncodeError {
    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(feature_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            feature_id: feature_id.into(),
            reason: reason.into(),
        }
    }
}

/// Erreurs de conversion d'une soumission terrain en correction
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Champ obligatoire absent de la soumission
    #[error("Submission is missing {0}")]
    MissingField(&'static str),

    /// Aucun champ ne relie la soumission à une feature existante
    #[error("Submission missing feature_id linking field")]
    MissingFeatureLink,

    /// Géolocalisation présente mais inexploitable
    #[error("Invalid geolocation: {0}")]
    InvalidGeolocation(String),
}
