//! Configuration des exports

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use correction_core::{EncodeOptions, ExportFormat};

/// Réglages d'export (fichier JSON, surchargés par l'environnement)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Longueur maximale du nom de fichier livré (hors extension)
    pub max_filename_len: usize,

    /// Répertoire des fichiers temporaires (défaut: temporaire système)
    pub scratch_dir: Option<PathBuf>,

    /// Format utilisé quand la commande n'en précise pas
    pub default_format: ExportFormat,

    /// Appliquer les corrections par défaut
    pub use_corrected: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            max_filename_len: 50,
            scratch_dir: None,
            default_format: ExportFormat::GeoJson,
            use_corrected: true,
        }
    }
}

impl ExportSettings {
    /// Charge les réglages depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        settings.validate()
    }

    /// Réglages par défaut surchargés par `EXPORT_SCRATCH_DIR` et `EXPORT_FILENAME_MAX`
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Applique les variables d'environnement
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(dir) = std::env::var_os("EXPORT_SCRATCH_DIR").filter(|d| !d.is_empty()) {
            self.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Ok(max) = std::env::var("EXPORT_FILENAME_MAX") {
            self.max_filename_len = max
                .parse()
                .context(format!("Invalid EXPORT_FILENAME_MAX: {}", max))?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.max_filename_len == 0 {
            anyhow::bail!("max_filename_len must be at least 1");
        }
        if let Some(dir) = &self.scratch_dir {
            if !dir.is_dir() {
                anyhow::bail!("Scratch directory does not exist: {}", dir.display());
            }
        }
        Ok(self)
    }

    /// Options passées aux encodeurs
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            scratch_root: self.scratch_dir.clone(),
            max_filename_len: self.max_filename_len,
        }
    }
}
