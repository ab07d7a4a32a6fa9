//! Accès aux couches, features et corrections
//!
//! Le dépôt ne fait que *sélectionner*: la couche, ses features filtrées par
//! statut et, pour chacune, la correction la plus récente. La fusion reste
//! une fonction pure du crate `correction-core`.

pub mod memory;
pub mod postgres;

use std::future::Future;

use correction_core::{BaseFeature, CorrectionRecord, Layer, StatusFilter};
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Erreurs du dépôt
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Couche absente du projet (ou projet inconnu)
    #[error("Layer {layer_id} not found in project '{project_slug}'")]
    LayerNotFound {
        project_slug: String,
        layer_id: String,
    },

    /// Impossible d'obtenir une connexion
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Erreur SQL
    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Ligne illisible (statut inconnu, géométrie manquante, champs invalides)
    #[error("Invalid {entity} row {id}: {reason}")]
    Decode {
        entity: &'static str,
        id: String,
        reason: String,
    },
}

impl RepositoryError {
    pub fn layer_not_found(project_slug: &str, layer_id: &str) -> Self {
        Self::LayerNotFound {
            project_slug: project_slug.to_string(),
            layer_id: layer_id.to_string(),
        }
    }

    pub fn decode(entity: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Sélection d'une couche à exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerQuery {
    pub project_slug: String,
    pub layer_id: String,
    pub status: StatusFilter,
    /// Joindre la dernière correction de chaque feature
    pub use_corrected: bool,
}

impl LayerQuery {
    pub fn new(project_slug: impl Into<String>, layer_id: impl Into<String>) -> Self {
        Self {
            project_slug: project_slug.into(),
            layer_id: layer_id.into(),
            status: StatusFilter::All,
            use_corrected: true,
        }
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_corrections(mut self, use_corrected: bool) -> Self {
        self.use_corrected = use_corrected;
        self
    }
}

/// Couche et lignes (feature, dernière correction), ordonnées par date de création
#[derive(Debug, Clone)]
pub struct LayerRows {
    pub layer: Layer,
    pub rows: Vec<(BaseFeature, Option<CorrectionRecord>)>,
}

/// Résumé d'une couche pour le listing d'un projet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    pub id: String,
    pub name: String,
    pub geometry_type: Option<String>,
    pub is_reference: bool,
    pub display_order: i32,
    pub group_name: Option<String>,
    pub feature_count: i64,
}

/// Source des couches d'un projet
///
/// Les implémentations renvoient des futures `Send` pour être appelées
/// depuis des tâches tokio.
pub trait FeatureRepository: Send + Sync {
    /// Couche et features filtrées, avec au plus une correction (la plus récente) chacune
    fn fetch_layer(
        &self,
        query: &LayerQuery,
    ) -> impl Future<Output = Result<LayerRows, RepositoryError>> + Send;

    /// Nombre de features retenues par le filtre de statut
    fn count_features(
        &self,
        query: &LayerQuery,
    ) -> impl Future<Output = Result<usize, RepositoryError>> + Send;

    /// Couches d'un projet, par ordre d'affichage
    fn list_layers(
        &self,
        project_slug: &str,
    ) -> impl Future<Output = Result<Vec<LayerSummary>, RepositoryError>> + Send;
}
