//! # correction-export
//!
//! Export des couches d'un projet de relevé terrain, corrections appliquées,
//! depuis PostgreSQL/PostGIS.
//!
//! ## Features
//!
//! - Dépôt PostgreSQL avec pool de connexions (TLS rustls optionnel)
//! - Dépôt en mémoire, même contrat
//! - Cinq formats: GeoJSON, GeoPackage, CSV, Shapefile (zip), KML
//! - Rapport d'export et CLI
//!
//! ## Usage CLI
//!
//! ```bash
//! # Une couche en GeoPackage, features validées uniquement
//! correction-export export --project demo --layer 42 --format gpkg --status validated
//!
//! # Toutes les couches de relevé, sans corrections
//! correction-export export --project demo --all --format shp --raw --output ./out
//!
//! # Nombre de features et couches du projet
//! correction-export meta --project demo --layer 42 --status pending
//! correction-export layers --project demo
//! ```

pub mod config;
pub mod export;
pub mod report;
pub mod repository;

pub use config::ExportSettings;
pub use export::pool::{create_pool, test_connection, DatabaseConfig, SslMode};
pub use export::{ExportError, ExportMeta, ExportRequest, ExportResult, Exporter};
pub use report::{ExportReport, ReportStatus};
pub use repository::{
    FeatureRepository, LayerQuery, LayerRows, LayerSummary, MemoryRepository, PgRepository,
    RepositoryError,
};
