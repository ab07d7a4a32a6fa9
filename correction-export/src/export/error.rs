//! Erreurs d'un export

use correction_core::{EncodeError, ExportFormat, StatusFilter};
use thiserror::Error;

use crate::repository::RepositoryError;

/// Erreurs d'un export, tout ou rien par requête
#[derive(Debug, Error)]
pub enum ExportError {
    /// Projet ou couche inconnu
    #[error("Layer {layer_id} not found in project '{project_slug}'")]
    NotFound {
        project_slug: String,
        layer_id: String,
    },

    /// Le filtre de statut ne retient aucune feature
    #[error("No features to export for layer {layer_id} (status: {status})")]
    EmptyResult {
        layer_id: String,
        status: StatusFilter,
    },

    /// Échec de l'encodeur: aucun fichier partiel n'est livré
    #[error("Failed to encode {format}: {source}")]
    EncodingFailure {
        format: ExportFormat,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Base indisponible ou ligne illisible, jamais rejoué
    #[error("Repository failure: {0}")]
    RepositoryFailure(#[source] RepositoryError),
}

impl ExportError {
    pub(crate) fn encoding(
        format: ExportFormat,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::EncodingFailure {
            format,
            source: source.into(),
        }
    }

    /// Une erreur d'encodage "liste vide" reste une erreur client
    pub(crate) fn from_encode(
        format: ExportFormat,
        layer_id: &str,
        status: StatusFilter,
        err: EncodeError,
    ) -> Self {
        match err {
            EncodeError::EmptyResult => Self::EmptyResult {
                layer_id: layer_id.to_string(),
                status,
            },
            other => Self::encoding(format, other),
        }
    }

    /// Vrai pour les erreurs imputables à la requête
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::EmptyResult { .. })
    }

    /// Code HTTP équivalent
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::EmptyResult { .. } => 404,
            Self::EncodingFailure { .. } | Self::RepositoryFailure(_) => 500,
        }
    }
}

impl From<RepositoryError> for ExportError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::LayerNotFound {
                project_slug,
                layer_id,
            } => Self::NotFound {
                project_slug,
                layer_id,
            },
            other => Self::RepositoryFailure(other),
        }
    }
}
