//! Synchronisation de colecciones externes vers PostGIS
//!
//! Chaque page est validée, reprojetée et écrite en staging dans une
//! transaction courte; le swap final (replace/append/upsert) tient dans
//! une seule transaction, donc un sync échoué ne touche jamais la table
//! finale. Annulation coopérative entre les pages, jamais au milieu.

pub mod hash;
pub mod retry;
pub mod source;
pub mod status;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::Bytes;
use deadpool_postgres::Pool;
use futures::SinkExt;
use geo::Geometry;
use geozero::wkt::WktWriter;
use geozero::GeozeroGeometry;
use serde::Serialize;
use tracing::{error, info, warn};

use afecciones::{validate, WORKING_EPSG};

use crate::config;
use crate::report::SyncReport;
use crate::reproject::Reprojector;
use crate::store::schema;

pub use hash::geometry_hash;
pub use retry::RetryPolicy;
pub use source::{CollectionInfo, FeaturePage, FeatureSource, GeoJsonDirSource, SourceFeature};
pub use status::{SyncRecord, SyncState};

/// Stratégie d'écriture d'un sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Vide la colección puis recharge (swap atomique via staging)
    Replace,
    /// Insère sans vérifier les doublons
    Append,
    /// Insert-or-update clé (collection_id, feature_id), avec détection
    /// de changement par hash de géométrie
    Upsert,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Upsert => "upsert",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "upsert" => Ok(Self::Upsert),
            _ => Err(format!(
                "invalid sync strategy: {}. Use: replace, append, upsert",
                s
            )),
        }
    }
}

/// Jeton d'annulation coopérative, vérifié entre les pages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Ligne prête pour le COPY staging
struct StagedRow {
    feature_id: String,
    properties_json: String,
    ewkt: String,
    hash_hex: String,
}

/// Synchronisateur de colecciones
pub struct Synchronizer {
    pool: Pool,
    source: Arc<dyn FeatureSource>,
    schema: String,
    page_size: u64,
    retry: RetryPolicy,
}

impl Synchronizer {
    pub fn new(pool: Pool, source: Arc<dyn FeatureSource>, schema: impl Into<String>) -> Self {
        Self {
            pool,
            source,
            schema: schema.into(),
            page_size: 5000,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Synchronise une colección.
    ///
    /// Les échecs de sync sont rendus dans le rapport (statut `Error`),
    /// jamais propagés: seule une panne de la table de contrôle remonte
    /// en `Err`.
    pub async fn sync(
        &self,
        collection_id: &str,
        strategy: SyncStrategy,
        cancel: &CancelToken,
    ) -> Result<SyncReport> {
        config::validate_collection_id(collection_id)?;
        schema::validate_schema_name(&self.schema)?;

        let started = Instant::now();
        let mut report = SyncReport::new(collection_id, strategy);

        schema::create_schema(&self.pool, &self.schema).await?;
        status::mark_pending(&self.pool, &self.schema, collection_id).await?;

        info!(
            collection = collection_id,
            strategy = %strategy,
            "Starting collection sync"
        );

        match self.run(collection_id, strategy, cancel, &mut report).await {
            Ok(()) => {
                status::mark_synced(
                    &self.pool,
                    &self.schema,
                    collection_id,
                    report.feature_count,
                )
                .await?;
                report.finalize();
                info!(collection = collection_id, "{}", report.summary());
            }
            Err(e) => {
                error!(collection = collection_id, "Sync failed: {e:#}");
                report.record_error(format!("{e:#}"));
                report.finalize();

                // Nettoyage best-effort; la table finale n'a pas été touchée
                if let Err(cleanup) =
                    schema::clear_staging(&self.pool, &self.schema, collection_id).await
                {
                    warn!(collection = collection_id, "Staging cleanup failed: {cleanup}");
                }
                status::mark_error(&self.pool, &self.schema, collection_id, &format!("{e:#}"))
                    .await?;
            }
        }

        report.set_duration(started.elapsed());
        Ok(report)
    }

    /// Synchronise toutes les colecciones d'un namespace; une colección
    /// en échec n'interrompt pas les suivantes
    pub async fn sync_namespace(
        &self,
        namespace: &str,
        strategy: SyncStrategy,
        cancel: &CancelToken,
    ) -> Result<Vec<SyncReport>> {
        let collections = self
            .source
            .collections()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list source collections: {e}"))?;

        let ids: Vec<String> = collections
            .into_iter()
            .map(|c| c.id)
            .filter(|id| config::namespace_of(id) == Some(namespace))
            .collect();

        if ids.is_empty() {
            warn!(namespace = namespace, "No collections found for namespace");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if cancel.is_cancelled() {
                warn!(namespace = namespace, "Namespace sync cancelled");
                break;
            }
            reports.push(self.sync(&id, strategy, cancel).await?);
        }
        Ok(reports)
    }

    /// Enregistrements de contrôle, filtrables par namespace
    pub async fn list_records(&self, namespace: Option<&str>) -> Result<Vec<SyncRecord>> {
        status::list_records(&self.pool, &self.schema, namespace).await
    }

    async fn run(
        &self,
        collection_id: &str,
        strategy: SyncStrategy,
        cancel: &CancelToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let collections = self
            .source
            .collections()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list source collections: {e}"))?;
        let info = collections
            .into_iter()
            .find(|c| c.id == collection_id)
            .with_context(|| format!("Collection {} not found in source", collection_id))?;

        let reprojector = Reprojector::new(info.crs_epsg, WORKING_EPSG).with_context(|| {
            format!(
                "No reprojection path from EPSG:{} for {}",
                info.crs_epsg, collection_id
            )
        })?;

        schema::create_staging_table(&self.pool, &self.schema).await?;
        schema::clear_staging(&self.pool, &self.schema, collection_id).await?;

        let mut offset = 0u64;
        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("sync cancelled at page boundary (offset {})", offset);
            }

            let page = self
                .retry
                .fetch_page(self.source.as_ref(), collection_id, offset, self.page_size)
                .await
                .map_err(|e| anyhow::anyhow!("Page fetch failed at offset {offset}: {e}"))?;

            report.pages += 1;
            report.features_fetched += page.features.len();

            let rows = prepare_rows(collection_id, page.features, &reprojector, report);
            self.copy_into_staging(collection_id, &rows).await?;

            match page.next_offset {
                Some(next) => {
                    if next <= offset {
                        anyhow::bail!("source did not advance pagination (offset {})", offset);
                    }
                    offset = next;
                }
                None => break,
            }
        }

        report.features_written =
            apply_strategy(&self.pool, &self.schema, collection_id, strategy).await?;
        schema::clear_staging(&self.pool, &self.schema, collection_id).await?;
        schema::ensure_indexes(&self.pool, &self.schema).await?;
        report.feature_count =
            count_collection(&self.pool, &self.schema, collection_id).await?;

        Ok(())
    }

    /// COPY d'un lot de lignes en staging, une transaction courte par page
    async fn copy_into_staging(&self, collection_id: &str, rows: &[StagedRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let copy_sql = format!(
            "COPY {}._staging_layer_features (collection_id, feature_id, properties, geom, geometry_hash) \
             FROM STDIN WITH (FORMAT csv, DELIMITER '|', QUOTE '\"', ESCAPE '\"', NULL '')",
            self.schema
        );
        let copy_in = tx.copy_in(&copy_sql).await?;
        let mut pinned = std::pin::pin!(copy_in);

        for row in rows {
            let line = format!(
                "{}|{}|{}|{}|\\x{}\n",
                csv_field(collection_id),
                csv_field(&row.feature_id),
                csv_field(&row.properties_json),
                csv_field(&row.ewkt),
                row.hash_hex
            );
            pinned
                .as_mut()
                .send(Bytes::from(line))
                .await
                .context("Failed to send COPY row")?;
        }

        let staged = pinned.as_mut().finish().await.context("COPY failed")?;
        tx.commit().await.context("Failed to commit staging page")?;
        Ok(staged)
    }
}

/// Valide, reprojette et encode les features d'une page.
/// Les features invalides sont skippées et comptées, jamais fatales.
fn prepare_rows(
    collection_id: &str,
    features: Vec<SourceFeature>,
    reprojector: &Reprojector,
    report: &mut SyncReport,
) -> Vec<StagedRow> {
    let base_index = report.features_fetched - features.len();
    let mut rows = Vec::with_capacity(features.len());

    for (i, feature) in features.into_iter().enumerate() {
        let label = feature
            .id
            .clone()
            .unwrap_or_else(|| format!("{}#{}", collection_id, base_index + i));

        if let Err(e) = validate::validate_geometry(&label, &feature.geometry) {
            warn!(collection = collection_id, feature = %label, "Invalid geometry skipped: {e}");
            report.record_skip();
            continue;
        }

        let geometry = match reprojector.transform_geometry(&feature.geometry) {
            Ok(g) => g,
            Err(e) => {
                warn!(collection = collection_id, feature = %label, "Reprojection failed: {e}");
                report.record_skip();
                continue;
            }
        };

        let hash = geometry_hash(&geometry);
        let hash_hex = hex::encode(hash);
        // Sans identifiant source, le hash de géométrie sert de clé stable
        let feature_id = feature.id.unwrap_or_else(|| hash_hex.clone());

        let ewkt = match to_ewkt(&geometry) {
            Ok(w) => w,
            Err(e) => {
                warn!(collection = collection_id, feature = %feature_id, "WKT encoding failed: {e}");
                report.record_skip();
                continue;
            }
        };

        rows.push(StagedRow {
            feature_id,
            properties_json: serde_json::Value::Object(feature.properties).to_string(),
            ewkt,
            hash_hex,
        });
    }

    rows
}

/// EWKT (SRID inclus) via geozero, comme attendu par la colonne geometry
fn to_ewkt(geometry: &Geometry<f64>) -> Result<String> {
    let mut wkt_buf: Vec<u8> = Vec::with_capacity(256);
    let mut writer = WktWriter::new(&mut wkt_buf);
    geometry
        .process_geom(&mut writer)
        .map_err(|e| anyhow::anyhow!("WKT write failed: {e}"))?;
    Ok(format!(
        "SRID={};{}",
        WORKING_EPSG,
        String::from_utf8_lossy(&wkt_buf)
    ))
}

/// Échappe un champ pour le COPY CSV (délimiteur `|`, quote `"`)
fn csv_field(value: &str) -> String {
    if value.contains(['|', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Applique la stratégie de swap dans une seule transaction
async fn apply_strategy(
    pool: &Pool,
    schema: &str,
    collection_id: &str,
    strategy: SyncStrategy,
) -> Result<u64> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let written = match strategy {
        SyncStrategy::Replace => {
            tx.execute(
                &format!(
                    "DELETE FROM {}.layer_features WHERE collection_id = $1",
                    schema
                ),
                &[&collection_id],
            )
            .await
            .context("Failed to clear collection before replace")?;

            tx.execute(
                &format!(
                    r#"
                    INSERT INTO {schema}.layer_features
                        (collection_id, feature_id, properties, geom, geometry_hash)
                    SELECT collection_id, feature_id, properties, ST_MakeValid(geom), geometry_hash
                    FROM {schema}._staging_layer_features
                    WHERE collection_id = $1
                    "#,
                    schema = schema
                ),
                &[&collection_id],
            )
            .await
            .context("Failed to merge staging (replace)")?
        }
        SyncStrategy::Append => tx
            .execute(
                &format!(
                    r#"
                    INSERT INTO {schema}.layer_features
                        (collection_id, feature_id, properties, geom, geometry_hash)
                    SELECT collection_id, feature_id, properties, ST_MakeValid(geom), geometry_hash
                    FROM {schema}._staging_layer_features
                    WHERE collection_id = $1
                    "#,
                    schema = schema
                ),
                &[&collection_id],
            )
            .await
            .context("Failed to merge staging (append)")?,
        SyncStrategy::Upsert => tx
            .execute(
                &format!(
                    r#"
                    INSERT INTO {schema}.layer_features AS lf
                        (collection_id, feature_id, properties, geom, geometry_hash)
                    SELECT DISTINCT ON (feature_id)
                        collection_id, feature_id, properties, ST_MakeValid(geom), geometry_hash
                    FROM {schema}._staging_layer_features
                    WHERE collection_id = $1
                    ORDER BY feature_id, row_id DESC
                    ON CONFLICT (collection_id, feature_id) DO UPDATE SET
                        properties = EXCLUDED.properties,
                        geom = EXCLUDED.geom,
                        geometry_hash = EXCLUDED.geometry_hash,
                        updated_at = NOW()
                    WHERE lf.geometry_hash IS DISTINCT FROM EXCLUDED.geometry_hash
                       OR lf.properties IS DISTINCT FROM EXCLUDED.properties
                    "#,
                    schema = schema
                ),
                &[&collection_id],
            )
            .await
            .context("Failed to merge staging (upsert)")?,
    };

    tx.commit().await.context("Failed to commit swap")?;
    Ok(written)
}

/// Nombre de features d'une colección après swap
async fn count_collection(pool: &Pool, schema: &str, collection_id: &str) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            &format!(
                "SELECT COUNT(*) FROM {}.layer_features WHERE collection_id = $1",
                schema
            ),
            &[&collection_id],
        )
        .await
        .context("Failed to count collection features")?;
    Ok(row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Point};

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [
            SyncStrategy::Replace,
            SyncStrategy::Append,
            SyncStrategy::Upsert,
        ] {
            assert_eq!(strategy.as_str().parse::<SyncStrategy>().unwrap(), strategy);
        }
        assert!("merge".parse::<SyncStrategy>().is_err());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("simple"), "simple");
        assert_eq!(csv_field("a|b"), "\"a|b\"");
        assert_eq!(csv_field(r#"{"k":"v"}"#), r#""{""k"":""v""}""#);
    }

    #[test]
    fn test_to_ewkt_carries_srid() {
        let geom = Geometry::Point(Point::new(440_000.0, 4_474_000.0));
        let ewkt = to_ewkt(&geom).unwrap();
        assert!(ewkt.starts_with("SRID=25830;POINT"), "ewkt={}", ewkt);
    }

    #[test]
    fn test_prepare_rows_skips_invalid_geometries() {
        let reprojector = Reprojector::new(WORKING_EPSG, WORKING_EPSG).unwrap();
        let mut report = SyncReport::new("capa_test", SyncStrategy::Replace);
        report.features_fetched = 2;

        let valid = SourceFeature {
            id: Some("ok".into()),
            geometry: Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0),
            ]),
            properties: serde_json::Map::new(),
        };
        let invalid = SourceFeature {
            id: Some("nan".into()),
            geometry: Geometry::Point(Point::new(f64::NAN, 0.0)),
            properties: serde_json::Map::new(),
        };

        let rows = prepare_rows("capa_test", vec![valid, invalid], &reprojector, &mut report);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature_id, "ok");
        assert_eq!(report.features_skipped, 1);
    }

    #[test]
    fn test_prepare_rows_derives_id_from_hash() {
        let reprojector = Reprojector::new(WORKING_EPSG, WORKING_EPSG).unwrap();
        let mut report = SyncReport::new("capa_test", SyncStrategy::Upsert);
        report.features_fetched = 1;

        let feature = SourceFeature {
            id: None,
            geometry: Geometry::Point(Point::new(1.0, 2.0)),
            properties: serde_json::Map::new(),
        };

        let rows = prepare_rows("capa_test", vec![feature], &reprojector, &mut report);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature_id, rows[0].hash_hex);
        assert_eq!(rows[0].feature_id.len(), 64);
    }
}
