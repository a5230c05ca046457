//! Point d'entrée CLI pour afecciones-pg

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use afecciones_pg::cli::{self, Commands};

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Synchroniser les capas MAPAMA vers PostGIS et analyser les afecciones
#[derive(Parser)]
#[command(name = "afecciones-pg")]
#[command(author, version)]
#[command(about = "Sincronizar capas MAPAMA en PostGIS y analizar afecciones catastrales")]
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
        Commands::Init { schema, db } => cli::cmd_init(&schema, &db).await?,
        Commands::Sync {
            collection,
            namespace,
            strategy,
            source_dir,
            source_epsg,
            page_size,
            schema,
            json,
            db,
        } => {
            cli::cmd_sync(
                collection,
                namespace,
                &strategy,
                &source_dir,
                source_epsg,
                page_size,
                &schema,
                json,
                &db,
            )
            .await?
        }
        Commands::Status {
            namespace,
            schema,
            json,
            db,
        } => cli::cmd_status(namespace.as_deref(), &schema, json, &db).await?,
        Commands::Analyze {
            refcat,
            analysis,
            schema,
            db,
        } => cli::cmd_analyze(&refcat, &analysis, &schema, &db).await?,
        Commands::Batch {
            refcats,
            analysis,
            schema,
            db,
        } => cli::cmd_batch(&refcats, &analysis, &schema, &db).await?,
        Commands::Province {
            code,
            analysis,
            schema,
            db,
        } => cli::cmd_province(&code, &analysis, &schema, &db).await?,
        Commands::LoadParcels {
            path,
            source_epsg,
            schema,
            db,
        } => cli::cmd_load_parcels(&path, source_epsg, &schema, &db).await?,
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
