//! Rapport d'export
//!
//! Une exécution peut couvrir plusieurs couches: chaque export réussi ou
//! rejeté est consigné, sans interrompre les couches suivantes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use correction_core::{ExportFormat, StatusFilter};
use serde::Serialize;

use crate::export::{ExportError, ExportResult};

/// Statut global d'une exécution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    /// Toutes les couches exportées
    Success,
    /// Au moins une couche exportée, au moins une en échec
    PartialSuccess,
    /// Aucune couche exportée
    Failed,
}

/// Une couche exportée
#[derive(Debug, Clone, Serialize)]
pub struct LayerExport {
    pub layer_id: String,
    pub layer_name: String,
    pub filename: String,
    /// Chemin écrit sur disque (absent si non sauvegardé)
    pub path: Option<PathBuf>,
    pub features: usize,
    pub corrected: usize,
    pub bytes: usize,
    pub duration_secs: f64,
}

/// Une couche non exportée
#[derive(Debug, Clone, Serialize)]
pub struct LayerFailure {
    pub layer_id: String,
    pub message: String,
    /// Erreur de requête (couche inconnue, résultat vide) plutôt que serveur
    pub client_error: bool,
}

/// Rapport complet d'une exécution
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub project_slug: String,
    pub format: ExportFormat,
    pub status_filter: StatusFilter,
    pub use_corrected: bool,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub status: ReportStatus,
    pub exports: Vec<LayerExport>,
    pub failures: Vec<LayerFailure>,
}

impl ExportReport {
    pub fn new(
        project_slug: &str,
        format: ExportFormat,
        status_filter: StatusFilter,
        use_corrected: bool,
    ) -> Self {
        Self {
            project_slug: project_slug.to_string(),
            format,
            status_filter,
            use_corrected,
            started_at: Utc::now(),
            duration_secs: 0.0,
            status: ReportStatus::Success,
            exports: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Enregistre un export réussi
    pub fn record_export(&mut self, result: &ExportResult, path: Option<&Path>) {
        self.exports.push(LayerExport {
            layer_id: result.layer_id.clone(),
            layer_name: result.layer_name.clone(),
            filename: result.filename.clone(),
            path: path.map(Path::to_path_buf),
            features: result.feature_count,
            corrected: result.corrected_count,
            bytes: result.payload.len(),
            duration_secs: result.duration.as_secs_f64(),
        });
    }

    /// Enregistre un échec
    pub fn record_failure(&mut self, layer_id: &str, error: &ExportError) {
        self.failures.push(LayerFailure {
            layer_id: layer_id.to_string(),
            message: error.to_string(),
            client_error: error.is_client_error(),
        });
    }

    /// Enregistre un export encodé mais non écrit sur disque
    pub fn record_write_failure(&mut self, layer_id: &str, path: &Path, error: &std::io::Error) {
        self.failures.push(LayerFailure {
            layer_id: layer_id.to_string(),
            message: format!("Failed to write {}: {}", path.display(), error),
            client_error: false,
        });
    }

    /// Définit la durée totale
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = match (self.exports.is_empty(), self.failures.is_empty()) {
            (false, true) => ReportStatus::Success,
            (false, false) => ReportStatus::PartialSuccess,
            (true, _) => ReportStatus::Failed,
        };
    }

    pub fn total_features(&self) -> usize {
        self.exports.iter().map(|e| e.features).sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.exports.iter().map(|e| e.bytes).sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!(
            "EXPORT REPORT - {} ({})",
            self.project_slug,
            self.format.as_str()
        );
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);
        println!("Status filter: {}", self.status_filter);
        println!("Corrections applied: {}", self.use_corrected);

        if !self.exports.is_empty() {
            println!("\n--- LAYERS ({}) ---", self.exports.len());
            for e in &self.exports {
                println!(
                    "  {} [{}]: {} features ({} corrected), {} bytes, {:.2}s",
                    e.layer_name, e.layer_id, e.features, e.corrected, e.bytes, e.duration_secs
                );
                if let Some(path) = &e.path {
                    println!("    -> {}", path.display());
                }
            }
        }

        if !self.failures.is_empty() {
            println!("\n--- FAILURES ({}) ---", self.failures.len());
            for f in self.failures.iter().take(20) {
                println!("  [{}] {}", f.layer_id, f.message);
            }
            if self.failures.len() > 20 {
                println!("  ... and {} more", self.failures.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{}: {} layers exported, {} features, {} bytes, {} failures",
            self.project_slug,
            self.exports.len(),
            self.total_features(),
            self.total_bytes(),
            self.failures.len()
        )
    }
}
