//! Définition et implémentation des commandes CLI
//!
//! - `export`: couche(s) d'un projet → fichier(s) GeoJSON/GPKG/CSV/SHP/KML
//! - `meta`: nombre de features retenues par un filtre, sans encodage
//! - `layers`: couches d'un projet

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use correction_core::{safe_filename, ExportFormat, StatusFilter};
use correction_export::export::pool::{create_pool, test_connection, DatabaseConfig, SslMode};
use correction_export::report::ReportStatus;
use correction_export::{ExportReport, ExportRequest, ExportSettings, Exporter, PgRepository};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum Commands {
    /// Export one layer (or every survey layer) of a project
    Export {
        /// Project slug
        #[arg(short, long)]
        project: String,

        /// Layer identifier
        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        layer: Option<String>,

        /// Export every non-reference layer of the project
        #[arg(long)]
        all: bool,

        /// Output format: geojson, gpkg, csv, shp, kml (défaut : config / geojson)
        #[arg(short, long)]
        format: Option<ExportFormat>,

        /// Status filter: all, pending, corrected, validated, rejected, locked
        #[arg(short, long, default_value = "all")]
        status: StatusFilter,

        /// Export base features without applying corrections
        #[arg(long)]
        raw: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// JSON settings file (max_filename_len, scratch_dir, default_format, use_corrected)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Save the export report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Maximum number of layers exported concurrently
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Count the features an export would contain
    Meta {
        /// Project slug
        #[arg(short, long)]
        project: String,

        /// Layer identifier
        #[arg(short, long)]
        layer: String,

        /// Status filter: all, pending, corrected, validated, rejected, locked
        #[arg(short, long, default_value = "all")]
        status: StatusFilter,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// List the layers of a project
    Layers {
        /// Project slug
        #[arg(short, long)]
        project: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },
}

/// Surcharges de connexion PostgreSQL
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// Connection URL (défaut : env DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / corrections)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Applique les options CLI par-dessus la configuration d'environnement
///
/// Un paramètre séparé passé en ligne de commande désactive `DATABASE_URL`.
pub fn apply_database_overrides(
    mut config: DatabaseConfig,
    args: &DatabaseArgs,
) -> Result<DatabaseConfig> {
    let separate = args.host.is_some()
        || args.database.is_some()
        || args.user.is_some()
        || args.password.is_some()
        || args.port.is_some();
    if separate {
        config.url = None;
    }
    if let Some(url) = &args.database_url {
        config.url = Some(url.clone());
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(database) = &args.database {
        config.dbname = database.clone();
    }
    if let Some(user) = &args.user {
        config.user = user.clone();
    }
    if let Some(password) = &args.password {
        config.password = Some(password.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ssl) = &args.ssl {
        config.ssl_mode = ssl.parse::<SslMode>().map_err(anyhow::Error::msg)?;
    }
    Ok(config)
}

async fn connect(args: &DatabaseArgs) -> Result<PgRepository> {
    let config = apply_database_overrides(DatabaseConfig::from_env(), args)?;
    let pool = create_pool(&config)?;
    test_connection(&pool)
        .await
        .context(format!("Failed to connect to PostgreSQL ({})", config.describe()))?;
    info!(database = %config.describe(), "Connected to PostgreSQL");
    Ok(PgRepository::new(pool))
}

fn load_settings(path: Option<&Path>) -> Result<ExportSettings> {
    match path {
        Some(path) => ExportSettings::load(path)?.with_env(),
        None => ExportSettings::from_env(),
    }
}

/// Exécute la commande export
#[allow(clippy::too_many_arguments)]
pub async fn cmd_export(
    project: &str,
    layer: Option<&str>,
    all: bool,
    format: Option<ExportFormat>,
    status: StatusFilter,
    raw: bool,
    output: &Path,
    config: Option<&Path>,
    report_path: Option<&Path>,
    jobs: usize,
    db: &DatabaseArgs,
) -> Result<()> {
    let started = Instant::now();
    let settings = load_settings(config)?;
    let format = format.unwrap_or(settings.default_format);
    let use_corrected = !raw && settings.use_corrected;

    let exporter = Exporter::with_options(connect(db).await?, settings.encode_options());

    let layer_ids: Vec<String> = if all {
        exporter
            .layers(project)
            .await?
            .into_iter()
            .filter(|l| !l.is_reference)
            .map(|l| l.id)
            .collect()
    } else {
        layer.map(str::to_string).into_iter().collect()
    };
    if layer_ids.is_empty() {
        anyhow::bail!("No layer to export in project '{}'", project);
    }

    std::fs::create_dir_all(output)
        .context(format!("Failed to create output directory: {}", output.display()))?;

    println!("=== Export {} ===", project);
    println!("Layers: {}", layer_ids.len());
    println!("Format: {}", format);
    println!("Status: {}", status);
    println!("Corrections: {}", if use_corrected { "applied" } else { "ignored" });
    println!("Output: {}", output.display());

    let mut report = ExportReport::new(project, format, status, use_corrected);
    let mut used_names = HashSet::new();

    // Exports concurrents, résultats gardés dans l'ordre des couches
    let exporter = &exporter;
    let outcomes: Vec<_> = stream::iter(layer_ids.iter())
        .map(|layer_id| async move {
            let request = ExportRequest::new(project, layer_id.as_str(), format)
                .with_status(status)
                .with_corrections(use_corrected);
            (layer_id, exporter.export(&request).await)
        })
        .buffered(jobs.max(1))
        .collect()
        .await;

    for (layer_id, outcome) in outcomes {
        match outcome {
            Ok(mut result) => {
                result.filename = unique_filename(
                    &result.filename,
                    layer_id,
                    format,
                    settings.max_filename_len,
                    &mut used_names,
                );
                let path = output.join(&result.filename);
                if let Err(e) = tokio::fs::write(&path, &result.payload).await {
                    warn!(layer = %layer_id, path = %path.display(), "Write failed: {}", e);
                    report.record_write_failure(layer_id, &path, &e);
                    continue;
                }
                println!(
                    "  {} -> {} ({} features)",
                    layer_id,
                    path.display(),
                    result.feature_count
                );
                report.record_export(&result, Some(&path));
            }
            Err(e) => {
                warn!(layer = %layer_id, "Layer not exported: {}", e);
                report.record_failure(layer_id, &e);
            }
        }
    }

    report.set_duration(started.elapsed());
    report.finalize();
    report.display();

    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .context(format!("Failed to save report to {}", path.display()))?;
        println!("Report saved to {}", path.display());
    }

    info!("Export complete: {}", report.summary());

    if report.status == ReportStatus::Failed {
        anyhow::bail!("No layer exported");
    }
    Ok(())
}

/// Nom de fichier unique dans le répertoire de sortie
///
/// Deux couches dont les noms se réduisent au même nom sûr ("Zone A",
/// "Zone-A") ne doivent pas s'écraser: l'identifiant de couche est ajouté au
/// second. Comparaison sans casse, pour les systèmes de fichiers insensibles.
fn unique_filename(
    filename: &str,
    layer_id: &str,
    format: ExportFormat,
    max_len: usize,
    used: &mut HashSet<String>,
) -> String {
    if used.insert(filename.to_lowercase()) {
        return filename.to_string();
    }

    let suffix = format!(".{}", format.extension());
    let stem = filename.strip_suffix(&suffix).unwrap_or(filename);
    let base = format!("{}_{}", stem, safe_filename(layer_id, max_len));

    let mut candidate = format!("{}{}", base, suffix);
    let mut n = 2;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{}_{}{}", base, n, suffix);
        n += 1;
    }
    candidate
}

/// Exécute la commande meta
pub async fn cmd_meta(
    project: &str,
    layer: &str,
    status: StatusFilter,
    db: &DatabaseArgs,
) -> Result<()> {
    let exporter = Exporter::new(connect(db).await?);
    let meta = exporter.meta(project, layer, status).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

/// Exécute la commande layers
pub async fn cmd_layers(project: &str, db: &DatabaseArgs) -> Result<()> {
    let exporter = Exporter::new(connect(db).await?);
    let layers = exporter.layers(project).await?;

    if layers.is_empty() {
        println!("No layers in project '{}'", project);
        return Ok(());
    }

    println!("=== Layers of {} ===", project);
    for layer in &layers {
        let kind = match (&layer.group_name, layer.is_reference) {
            (Some(group), true) => format!("reference, {}", group),
            (None, true) => "reference".to_string(),
            (_, false) => "survey".to_string(),
        };
        println!(
            "- {} [{}] {} ({}): {} features",
            layer.name,
            layer.id,
            layer.geometry_type.as_deref().unwrap_or("?"),
            kind,
            layer.feature_count
        );
    }
    Ok(())
}
