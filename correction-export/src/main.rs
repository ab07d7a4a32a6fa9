//! Point d'entrée CLI pour correction-export

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Exporter les couches corrigées d'un projet
#[derive(Parser)]
#[command(name = "correction-export")]
#[command(author, version)]
#[command(about = "Exporter les couches d'un projet, corrections terrain appliquées, en GeoJSON, GeoPackage, CSV, Shapefile ou KML")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Export {
            project,
            layer,
            all,
            format,
            status,
            raw,
            output,
            config,
            report,
            jobs,
            db,
        } => {
            info!(project = %project, layer = ?layer, all, "Export");
            cli::cmd_export(
                &project,
                layer.as_deref(),
                all,
                format,
                status,
                raw,
                &output,
                config.as_deref(),
                report.as_deref(),
                jobs,
                &db,
            )
            .await?;
        }
        Commands::Meta {
            project,
            layer,
            status,
            db,
        } => {
            cli::cmd_meta(&project, &layer, status, &db).await?;
        }
        Commands::Layers { project, db } => {
            cli::cmd_layers(&project, &db).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
