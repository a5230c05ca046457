//! Définition et implémentation des commandes CLI
//!
//! CLI simplifiée:
//! - `init`: création du schéma et des tables
//! - `sync` / `status`: synchronisation des colecciones et suivi
//! - `analyze` / `batch` / `province`: analyses d'afecciones
//! - `load-parcels`: import des parcelles cadastrales

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use afecciones::{AnalysisParams, IntersectionKind, WORKING_EPSG};

use crate::backend::{DatabaseBackend, FileBackend, SpatialBackend};
use crate::config::LayerRegistry;
use crate::reproject::Reprojector;
use crate::service::AffectationService;
use crate::store::pool::{create_pool, test_connection, DatabaseConfig};
use crate::store::schema::DEFAULT_SCHEMA;
use crate::store::{parcels as parcel_store, schema};
use crate::sync::{CancelToken, GeoJsonDirSource, SyncStrategy, Synchronizer};

/// Overrides de connexion PostgreSQL (défauts: env POSTGIS_*)
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// PostgreSQL host (défaut: env POSTGIS_HOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL port (défaut: env POSTGIS_PORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// PostgreSQL database (défaut: env POSTGIS_DATABASE / gis)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut: env POSTGIS_USER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut: env POSTGIS_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// SSL mode: disable, prefer, require (défaut: env POSTGIS_SSLMODE)
    #[arg(long)]
    pub ssl: Option<String>,
}

impl DbArgs {
    fn resolve(&self) -> DatabaseConfig {
        let mut config = DatabaseConfig::from_env();
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = &self.database {
            config.dbname = database.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(ssl) = &self.ssl {
            if let Ok(mode) = ssl.parse() {
                config.ssl_mode = mode;
            }
        }
        config
    }
}

/// Paramètres d'analyse communs à analyze/batch
#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// Capas à analyser, séparées par des virgules (défaut: toutes
    /// les capas actives synchronisées)
    #[arg(long, value_delimiter = ',')]
    pub layers: Vec<String>,

    /// Buffer en mètres (distance pour --type dwithin)
    #[arg(long, default_value_t = 0.0)]
    pub buffer: f64,

    /// Type d'intersection: intersects, contains, within, dwithin
    #[arg(long = "type", default_value = "intersects")]
    pub intersection: String,

    /// Surface minimale en m² (seuil de bruit)
    #[arg(long, default_value_t = 0.0)]
    pub min_area: f64,

    /// Pourcentage minimal (seuil de bruit)
    #[arg(long, default_value_t = 0.0)]
    pub min_percent: f64,

    /// Répertoire GeoJSON local: force le backend fichier, sans base
    #[arg(long)]
    pub layers_dir: Option<PathBuf>,

    /// Registre de capas: preset (mapama) ou chemin JSON
    #[arg(long, default_value = "mapama")]
    pub registry: String,
}

impl AnalysisArgs {
    fn params(&self) -> Result<AnalysisParams> {
        let intersection: IntersectionKind = self
            .intersection
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        Ok(AnalysisParams {
            layers: self.layers.clone(),
            buffer_m: self.buffer,
            intersection,
            min_area_m2: self.min_area,
            min_percent: self.min_percent,
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialise le schéma, les tables et les index
    Init {
        /// Schéma PostgreSQL cible
        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Synchronise une colección (ou un namespace) vers PostGIS
    Sync {
        /// Colección à synchroniser (ex: biodiversidad:red_natura_2000)
        collection: Option<String>,

        /// Synchroniser toutes les colecciones d'un namespace
        #[arg(long, conflicts_with = "collection")]
        namespace: Option<String>,

        /// Stratégie d'écriture: replace, append, upsert
        #[arg(long, default_value = "replace")]
        strategy: String,

        /// Répertoire de fichiers <colección>.geojson servant de source
        #[arg(long)]
        source_dir: PathBuf,

        /// EPSG des géométries des fichiers source
        #[arg(long, default_value_t = 4326)]
        source_epsg: u32,

        /// Taille de page de la source
        #[arg(long, default_value_t = 5000)]
        page_size: u64,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        /// Sortie JSON du rapport
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// État des synchronisations (table de contrôle)
    Status {
        /// Filtrer par namespace
        #[arg(long)]
        namespace: Option<String>,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        /// Sortie JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Analyse les afecciones d'une parcelle
    Analyze {
        /// Référence cadastrale (14 ou 20 caractères)
        refcat: String,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Analyse par lot: une référence en échec n'interrompt pas les autres
    Batch {
        /// Références cadastrales
        #[arg(required = true)]
        refcats: Vec<String>,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Résumé des afecciones d'une province
    Province {
        /// Code province (ex: 04)
        code: String,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Charge des parcelles cadastrales depuis un GeoJSON
    LoadParcels {
        /// Fichier GeoJSON de parcelles (propriété refcat obligatoire)
        path: PathBuf,

        /// EPSG des géométries du fichier
        #[arg(long, default_value_t = WORKING_EPSG)]
        source_epsg: u32,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },
}

/// Exécute la commande init
pub async fn cmd_init(schema: &str, db: &DbArgs) -> Result<()> {
    let pool = connect(db).await?;
    schema::create_schema(&pool, schema).await?;
    schema::ensure_indexes(&pool, schema).await?;
    println!("Schema {} ready", schema);
    Ok(())
}

/// Exécute la commande sync
#[allow(clippy::too_many_arguments)]
pub async fn cmd_sync(
    collection: Option<String>,
    namespace: Option<String>,
    strategy: &str,
    source_dir: &PathBuf,
    source_epsg: u32,
    page_size: u64,
    schema: &str,
    json: bool,
    db: &DbArgs,
) -> Result<()> {
    let strategy: SyncStrategy = strategy.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let pool = connect(db).await?;
    let source = Arc::new(GeoJsonDirSource::new(source_dir.clone(), source_epsg));
    let synchronizer =
        Synchronizer::new(pool, source, schema.to_string()).with_page_size(page_size);
    let cancel = CancelToken::new();

    let reports = match (collection, namespace) {
        (Some(collection), _) => vec![synchronizer.sync(&collection, strategy, &cancel).await?],
        (None, Some(namespace)) => {
            synchronizer
                .sync_namespace(&namespace, strategy, &cancel)
                .await?
        }
        (None, None) => anyhow::bail!("Provide a collection or --namespace"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            report.display();
        }
    }
    Ok(())
}

/// Exécute la commande status
pub async fn cmd_status(
    namespace: Option<&str>,
    schema: &str,
    json: bool,
    db: &DbArgs,
) -> Result<()> {
    let pool = connect(db).await?;
    let records = crate::sync::status::list_records(&pool, schema, namespace).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No sync records");
        return Ok(());
    }

    println!(
        "{:<42} {:<10} {:>10}  {:<20} {}",
        "COLLECTION", "STATUS", "FEATURES", "LAST SYNC", "ERROR"
    );
    for record in records {
        println!(
            "{:<42} {:<10} {:>10}  {:<20} {}",
            record.collection_id,
            record.status.as_str(),
            record.feature_count,
            record
                .last_sync
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
            record.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Exécute la commande analyze
pub async fn cmd_analyze(
    refcat: &str,
    analysis: &AnalysisArgs,
    schema: &str,
    db: &DbArgs,
) -> Result<()> {
    let params = analysis.params()?;
    match &analysis.layers_dir {
        Some(dir) => {
            let service = file_service(dir, &analysis.registry)?;
            let summary = service.get_affectations(refcat, &params).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            let service = db_service(db, schema, &analysis.registry).await?;
            let summary = service.get_affectations(refcat, &params).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

/// Exécute la commande batch
pub async fn cmd_batch(
    refcats: &[String],
    analysis: &AnalysisArgs,
    schema: &str,
    db: &DbArgs,
) -> Result<()> {
    let params = analysis.params()?;
    match &analysis.layers_dir {
        Some(dir) => {
            let service = file_service(dir, &analysis.registry)?;
            let report = service.get_affectations_batch(refcats, &params).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => {
            let service = db_service(db, schema, &analysis.registry).await?;
            let report = service.get_affectations_batch(refcats, &params).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Exécute la commande province
pub async fn cmd_province(
    code: &str,
    analysis: &AnalysisArgs,
    schema: &str,
    db: &DbArgs,
) -> Result<()> {
    match &analysis.layers_dir {
        Some(dir) => {
            let service = file_service(dir, &analysis.registry)?;
            let summary = service.get_province_summary(code, &analysis.layers).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            let service = db_service(db, schema, &analysis.registry).await?;
            let summary = service.get_province_summary(code, &analysis.layers).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

/// Exécute la commande load-parcels
pub async fn cmd_load_parcels(
    path: &PathBuf,
    source_epsg: u32,
    schema: &str,
    db: &DbArgs,
) -> Result<()> {
    let reprojector = Reprojector::new(source_epsg, WORKING_EPSG)?;
    let reproject_ref = (source_epsg != WORKING_EPSG).then_some(&reprojector);

    let (parcels, skipped) =
        crate::backend::file::load_parcels_file(path, reproject_ref)
            .with_context(|| format!("Failed to load parcels from {}", path.display()))?;

    info!(
        parcels = parcels.len(),
        skipped = skipped,
        "Parcels parsed from {}",
        path.display()
    );

    let pool = connect(db).await?;
    schema::create_schema(&pool, schema).await?;
    let (written, write_skipped) = parcel_store::upsert_parcels(&pool, schema, &parcels).await?;
    schema::ensure_indexes(&pool, schema).await?;

    println!("\n=== Load parcels ===");
    println!("File: {}", path.display());
    println!("Parsed: {} (skipped {})", parcels.len(), skipped);
    println!("Written: {} (skipped {})", written, write_skipped);
    Ok(())
}

async fn connect(db: &DbArgs) -> Result<deadpool_postgres::Pool> {
    let config = db.resolve();
    info!(
        host = %config.host,
        port = config.port,
        dbname = %config.dbname,
        user = %config.user,
        "Connecting to PostgreSQL"
    );
    let pool = create_pool(&config).await?;
    test_connection(&pool).await?;
    Ok(pool)
}

fn file_service(dir: &PathBuf, registry_spec: &str) -> Result<AffectationService<FileBackend>> {
    let registry = LayerRegistry::resolve(registry_spec)?;
    let backend = FileBackend::open(dir, &registry)?;
    Ok(AffectationService::new(backend))
}

async fn db_service(
    db: &DbArgs,
    schema: &str,
    registry_spec: &str,
) -> Result<AffectationService<impl SpatialBackend>> {
    let config = db.resolve();
    let registry = LayerRegistry::resolve(registry_spec)?;
    let pool = create_pool(&config).await?;
    test_connection(&pool).await?;
    let backend = DatabaseBackend::new(pool, schema, registry, config.query_timeout)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(AffectationService::new(backend))
}
