//! Dépôt en mémoire
//!
//! Même contrat que le dépôt PostgreSQL. Sert aux tests du pipeline et aux
//! exports hors base. Les corrections re-livrées sont ignorées à l'insertion.

use std::collections::HashMap;
use std::sync::Arc;

use correction_core::merge::dedupe::fingerprint_hex;
use correction_core::{is_duplicate, latest_correction, BaseFeature, CorrectionRecord, Layer};
use tokio::sync::RwLock;
use tracing::debug;

use super::{FeatureRepository, LayerQuery, LayerRows, LayerSummary, RepositoryError};

#[derive(Debug, Clone)]
struct StoredLayer {
    layer: Layer,
    is_reference: bool,
    display_order: i32,
    group_name: Option<String>,
    features: Vec<BaseFeature>,
    corrections: Vec<CorrectionRecord>,
}

/// Dépôt en mémoire, partageable entre tâches
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    /// slug de projet → couches
    projects: Arc<RwLock<HashMap<String, Vec<StoredLayer>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une couche (ordre d'affichage = ordre d'insertion)
    pub async fn add_layer(&self, project_slug: &str, layer: Layer) {
        let mut projects = self.projects.write().await;
        let layers = projects.entry(project_slug.to_string()).or_default();
        let display_order = layers.len() as i32;
        layers.push(StoredLayer {
            layer,
            is_reference: false,
            display_order,
            group_name: None,
            features: Vec::new(),
            corrections: Vec::new(),
        });
    }

    /// Ajoute une couche de référence, rangée dans un groupe
    pub async fn add_reference_layer(&self, project_slug: &str, layer: Layer, group_name: &str) {
        let layer_id = layer.id.clone();
        self.add_layer(project_slug, layer).await;

        let mut projects = self.projects.write().await;
        if let Some(stored) = projects
            .get_mut(project_slug)
            .and_then(|layers| layers.iter_mut().find(|l| l.layer.id == layer_id))
        {
            stored.is_reference = true;
            stored.group_name = Some(group_name.to_string());
        }
    }

    pub async fn add_feature(
        &self,
        layer_id: &str,
        feature: BaseFeature,
    ) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write().await;
        let stored = find_layer_mut(&mut projects, layer_id)?;
        stored.features.push(feature);
        Ok(())
    }

    /// Enregistre une correction; renvoie `false` si c'est une re-livraison
    pub async fn record_correction(
        &self,
        layer_id: &str,
        correction: CorrectionRecord,
    ) -> Result<bool, RepositoryError> {
        let mut projects = self.projects.write().await;
        let stored = find_layer_mut(&mut projects, layer_id)?;

        if is_duplicate(&stored.corrections, &correction) {
            debug!(
                layer = layer_id,
                feature = %correction.feature_id,
                correction = %correction.id,
                submission = ?correction.submission_id,
                fingerprint = %fingerprint_hex(&correction),
                "Duplicate correction ignored"
            );
            return Ok(false);
        }
        stored.corrections.push(correction);
        Ok(true)
    }

    async fn with_layer<T>(
        &self,
        query: &LayerQuery,
        f: impl FnOnce(&StoredLayer) -> T,
    ) -> Result<T, RepositoryError> {
        let projects = self.projects.read().await;
        projects
            .get(&query.project_slug)
            .and_then(|layers| layers.iter().find(|l| l.layer.id == query.layer_id))
            .map(f)
            .ok_or_else(|| RepositoryError::layer_not_found(&query.project_slug, &query.layer_id))
    }
}

fn find_layer_mut<'a>(
    projects: &'a mut HashMap<String, Vec<StoredLayer>>,
    layer_id: &str,
) -> Result<&'a mut StoredLayer, RepositoryError> {
    projects
        .values_mut()
        .flat_map(|layers| layers.iter_mut())
        .find(|l| l.layer.id == layer_id)
        .ok_or_else(|| RepositoryError::layer_not_found("*", layer_id))
}

impl FeatureRepository for MemoryRepository {
    async fn fetch_layer(&self, query: &LayerQuery) -> Result<LayerRows, RepositoryError> {
        self.with_layer(query, |stored| {
            let mut features: Vec<&BaseFeature> = stored
                .features
                .iter()
                .filter(|f| query.status.matches(f.status))
                .collect();
            features.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            let rows = features
                .into_iter()
                .map(|base| {
                    let correction = if query.use_corrected {
                        latest_correction(
                            stored.corrections.iter().filter(|c| c.feature_id == base.id),
                        )
                        .cloned()
                    } else {
                        None
                    };
                    (base.clone(), correction)
                })
                .collect();

            LayerRows {
                layer: stored.layer.clone(),
                rows,
            }
        })
        .await
    }

    async fn count_features(&self, query: &LayerQuery) -> Result<usize, RepositoryError> {
        self.with_layer(query, |stored| {
            stored
                .features
                .iter()
                .filter(|f| query.status.matches(f.status))
                .count()
        })
        .await
    }

    async fn list_layers(&self, project_slug: &str) -> Result<Vec<LayerSummary>, RepositoryError> {
        let projects = self.projects.read().await;
        let mut layers: Vec<LayerSummary> = projects
            .get(project_slug)
            .map(|layers| {
                layers
                    .iter()
                    .map(|stored| LayerSummary {
                        id: stored.layer.id.clone(),
                        name: stored.layer.name.clone(),
                        geometry_type: stored.layer.geometry_type.clone(),
                        is_reference: stored.is_reference,
                        display_order: stored.display_order,
                        group_name: stored.group_name.clone(),
                        feature_count: stored.features.len() as i64,
                    })
                    .collect()
            })
            .unwrap_or_default();
        layers.sort_by_key(|l| l.display_order);
        Ok(layers)
    }
}
