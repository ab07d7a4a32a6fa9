//! Orchestration d'un export: lecture, fusion, schéma, encodage
//!
//! Chaque requête est indépendante. La lecture est asynchrone, la fusion et
//! l'encodage (écritures bloquantes pour GeoPackage, Shapefile et KML) passent
//! par `spawn_blocking`.

pub mod error;
pub mod pool;

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use correction_core::{
    encode_layer, infer_from_features, merge_all, EncodeOptions, ExportFormat, StatusFilter,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::repository::{FeatureRepository, LayerQuery, LayerRows, LayerSummary};

pub use error::ExportError;

/// Une demande d'export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub project_slug: String,
    pub layer_id: String,
    pub format: ExportFormat,
    pub status: StatusFilter,
    /// Appliquer la dernière correction de chaque feature
    pub use_corrected: bool,
}

impl ExportRequest {
    pub fn new(
        project_slug: impl Into<String>,
        layer_id: impl Into<String>,
        format: ExportFormat,
    ) -> Self {
        Self {
            project_slug: project_slug.into(),
            layer_id: layer_id.into(),
            format,
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

    pub fn query(&self) -> LayerQuery {
        LayerQuery::new(&self.project_slug, &self.layer_id)
            .with_status(self.status)
            .with_corrections(self.use_corrected)
    }
}

/// Fichier produit et métadonnées de livraison
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub payload: Bytes,
    pub filename: String,
    pub media_type: &'static str,
    pub format: ExportFormat,
    pub layer_id: String,
    pub layer_name: String,
    pub feature_count: usize,
    pub corrected_count: usize,
    pub exported_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExportResult {
    /// En-tête `Content-Disposition` (pièce jointe)
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Métadonnées d'export, sans encodage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMeta {
    pub project_slug: String,
    pub layer_id: String,
    pub status: StatusFilter,
    pub feature_count: usize,
    pub exported_at: DateTime<Utc>,
}

/// Exporte les couches d'un dépôt
#[derive(Debug, Clone)]
pub struct Exporter<R> {
    repository: R,
    options: EncodeOptions,
}

impl<R: FeatureRepository> Exporter<R> {
    pub fn new(repository: R) -> Self {
        Self::with_options(repository, EncodeOptions::default())
    }

    pub fn with_options(repository: R, options: EncodeOptions) -> Self {
        Self {
            repository,
            options,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Produit le fichier d'une couche dans le format demandé
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportResult, ExportError> {
        let started = Instant::now();
        info!(
            project = %request.project_slug,
            layer = %request.layer_id,
            format = %request.format,
            status = %request.status,
            use_corrected = request.use_corrected,
            "Starting export"
        );

        let result = self.run(request, started).await;
        match &result {
            Ok(out) => info!(
                layer = %out.layer_id,
                format = %out.format,
                features = out.feature_count,
                corrected = out.corrected_count,
                bytes = out.payload.len(),
                duration = ?out.duration,
                "Export complete"
            ),
            Err(e) if e.is_client_error() => info!(
                layer = %request.layer_id,
                format = %request.format,
                "Export rejected: {}",
                e
            ),
            Err(e) => error!(
                layer = %request.layer_id,
                format = %request.format,
                "Export failed: {}",
                e
            ),
        }
        result
    }

    async fn run(
        &self,
        request: &ExportRequest,
        started: Instant,
    ) -> Result<ExportResult, ExportError> {
        let LayerRows { layer, rows } = self.repository.fetch_layer(&request.query()).await?;

        if rows.is_empty() {
            return Err(ExportError::EmptyResult {
                layer_id: layer.id,
                status: request.status,
            });
        }
        debug!(layer = %layer.id, rows = rows.len(), "Rows fetched");

        let format = request.format;
        let status = request.status;
        let options = self.options.clone();
        let layer_id = layer.id.clone();
        let layer_name = layer.name.clone();

        let (encoded, feature_count, corrected_count) = tokio::task::spawn_blocking(move || {
            let features = merge_all(&layer, &rows);
            let corrected = features.iter().filter(|f| f.corrected).count();
            let schema = format
                .needs_schema()
                .then(|| infer_from_features(&layer, &features));

            encode_layer(format, &layer, &features, schema.as_ref(), &options)
                .map(|encoded| (encoded, features.len(), corrected))
        })
        .await
        .map_err(|e| ExportError::encoding(format, e))?
        .map_err(|e| ExportError::from_encode(format, &layer_id, status, e))?;

        Ok(ExportResult {
            payload: Bytes::from(encoded.payload),
            filename: encoded.filename,
            media_type: encoded.media_type,
            format,
            layer_id,
            layer_name,
            feature_count,
            corrected_count,
            exported_at: Utc::now(),
            duration: started.elapsed(),
        })
    }

    /// Nombre de features retenues, sans rien encoder
    ///
    /// Un compte nul n'est pas une erreur ici.
    pub async fn meta(
        &self,
        project_slug: &str,
        layer_id: &str,
        status: StatusFilter,
    ) -> Result<ExportMeta, ExportError> {
        let query = LayerQuery::new(project_slug, layer_id)
            .with_status(status)
            .with_corrections(false);
        let feature_count = self.repository.count_features(&query).await?;

        debug!(
            project = project_slug,
            layer = layer_id,
            status = %status,
            features = feature_count,
            "Export metadata"
        );

        Ok(ExportMeta {
            project_slug: project_slug.to_string(),
            layer_id: layer_id.to_string(),
            status,
            feature_count,
            exported_at: Utc::now(),
        })
    }

    /// Couches d'un projet, par ordre d'affichage
    pub async fn layers(&self, project_slug: &str) -> Result<Vec<LayerSummary>, ExportError> {
        Ok(self.repository.list_layers(project_slug).await?)
    }
}
