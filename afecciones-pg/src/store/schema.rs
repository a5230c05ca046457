//! Schéma générique unique pour les capas synchronisées
//!
//! Une seule table `layer_features` clé (collection_id, feature_id)
//! remplace les tables dynamiques par colección: aucun identifiant SQL
//! construit depuis une entrée externe, seules les géométries et valeurs
//! passent en paramètres.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use tracing::{info, warn};

use afecciones::WORKING_EPSG;

/// Schéma PostgreSQL par défaut
pub const DEFAULT_SCHEMA: &str = "afecciones";

/// Valide un nom de schéma avant interpolation dans le DDL
pub fn validate_schema_name(schema: &str) -> Result<()> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").unwrap());
    if re.is_match(schema) {
        Ok(())
    } else {
        anyhow::bail!("Invalid schema name: {}", schema)
    }
}

/// Crée le schéma, l'extension PostGIS et les tables
pub async fn create_schema(pool: &Pool, schema: &str) -> Result<()> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;

    client
        .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema), &[])
        .await
        .context("Failed to create schema")?;

    // Activer PostGIS si nécessaire (peut nécessiter des droits superuser).
    // Si l'extension existe déjà mais que l'utilisateur ne peut pas la
    // (re)créer, on dégrade gracieusement.
    match client
        .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
        .await
    {
        Ok(_) => {}
        Err(e) => {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !exists {
                return Err(anyhow::anyhow!(
                    "PostGIS extension is not installed and could not be created: {e}"
                ));
            }
        }
    }

    let parcels = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.parcels (
            refcat TEXT PRIMARY KEY,
            provincia TEXT,
            municipio TEXT,
            uso TEXT,
            geom geometry(MultiPolygon, {srid}) NOT NULL,
            created_at TIMESTAMPTZ DEFAULT NOW(),
            updated_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
        schema = schema,
        srid = WORKING_EPSG
    );
    client
        .execute(&parcels, &[])
        .await
        .context("Failed to create parcels table")?;

    let layer_features = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.layer_features (
            row_id BIGSERIAL PRIMARY KEY,
            collection_id TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            properties JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            geom geometry(Geometry, {srid}),
            geometry_hash BYTEA,
            created_at TIMESTAMPTZ DEFAULT NOW(),
            updated_at TIMESTAMPTZ DEFAULT NOW(),
            CONSTRAINT layer_features_collection_feature_unique UNIQUE (collection_id, feature_id)
        )
        "#,
        schema = schema,
        srid = WORKING_EPSG
    );
    client
        .execute(&layer_features, &[])
        .await
        .context("Failed to create layer_features table")?;

    let sync_status = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.sync_status (
            collection_id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL DEFAULT 'layer_features',
            namespace TEXT,
            last_sync TIMESTAMPTZ,
            feature_count BIGINT NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            created_at TIMESTAMPTZ DEFAULT NOW(),
            updated_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
        schema = schema
    );
    client
        .execute(&sync_status, &[])
        .await
        .context("Failed to create sync_status table")?;

    info!(schema = schema, "Schema ready");
    Ok(())
}

/// Crée la table de staging partagée (UNLOGGED, sans contraintes)
///
/// Les lignes y sont cloisonnées par collection_id: deux synchronisations
/// de colecciones différentes peuvent cohabiter.
pub async fn create_staging_table(pool: &Pool, schema: &str) -> Result<()> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;

    let sql = format!(
        r#"
        CREATE UNLOGGED TABLE IF NOT EXISTS {schema}._staging_layer_features
        (LIKE {schema}.layer_features INCLUDING DEFAULTS EXCLUDING CONSTRAINTS)
        "#,
        schema = schema
    );
    client
        .execute(&sql, &[])
        .await
        .context("Failed to create staging table")?;

    Ok(())
}

/// Purge les lignes de staging d'une colección (avant et après sync)
pub async fn clear_staging(pool: &Pool, schema: &str, collection_id: &str) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            &format!(
                "DELETE FROM {}._staging_layer_features WHERE collection_id = $1",
                schema
            ),
            &[&collection_id],
        )
        .await
        .with_context(|| format!("Failed to clear staging rows for {}", collection_id))?;
    Ok(())
}

/// Crée les index après sync (GIST spatial + btree colección), puis ANALYZE
pub async fn ensure_indexes(pool: &Pool, schema: &str) -> Result<()> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;

    client
        .execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{schema}_layer_features_geom
                 ON {schema}.layer_features USING GIST (geom)",
                schema = schema
            ),
            &[],
        )
        .await
        .context("Failed to create spatial index on layer_features")?;

    client
        .execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{schema}_layer_features_collection
                 ON {schema}.layer_features (collection_id)",
                schema = schema
            ),
            &[],
        )
        .await
        .context("Failed to create collection index on layer_features")?;

    client
        .execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{schema}_parcels_geom
                 ON {schema}.parcels USING GIST (geom)",
                schema = schema
            ),
            &[],
        )
        .await
        .context("Failed to create spatial index on parcels")?;

    client
        .execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{schema}_parcels_provincia
                 ON {schema}.parcels (provincia)",
                schema = schema
            ),
            &[],
        )
        .await
        .context("Failed to create provincia index on parcels")?;

    client
        .execute(&format!("ANALYZE {}.layer_features", schema), &[])
        .await
        .context("Failed to analyze layer_features")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_name_validation() {
        assert!(validate_schema_name("afecciones").is_ok());
        assert!(validate_schema_name("afecciones_test").is_ok());
        assert!(validate_schema_name("_staging").is_ok());
        assert!(validate_schema_name("Afecciones").is_err());
        assert!(validate_schema_name("afecciones; DROP TABLE x").is_err());
        assert!(validate_schema_name("").is_err());
    }
}
