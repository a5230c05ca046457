//! Table de contrôle des synchronisations
//!
//! Un enregistrement par colección, upserté à chaque sync. Les transitions
//! sont pending → synced | error; un enregistrement n'est jamais supprimé
//! par une synchronisation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;

use crate::config::namespace_of;
use crate::store::schema::validate_schema_name;

/// État d'une synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "synced" => Self::Synced,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// Enregistrement de contrôle persisté
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecord {
    pub collection_id: String,
    pub table_name: String,
    pub namespace: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub feature_count: i64,
    pub status: SyncState,
    pub error_message: Option<String>,
}

/// Passe (ou crée) l'enregistrement en `pending`, message d'erreur purgé
pub async fn mark_pending(pool: &Pool, schema: &str, collection_id: &str) -> Result<()> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;
    let namespace = namespace_of(collection_id).map(str::to_string);

    let sql = format!(
        r#"
        INSERT INTO {}.sync_status (collection_id, namespace, status)
        VALUES ($1, $2, 'pending')
        ON CONFLICT (collection_id) DO UPDATE SET
            status = 'pending',
            error_message = NULL,
            updated_at = NOW()
        "#,
        schema
    );
    client
        .execute(&sql, &[&collection_id, &namespace])
        .await
        .context("Failed to mark sync record pending")?;
    Ok(())
}

/// Passe l'enregistrement en `synced` avec compteur et timestamp frais
pub async fn mark_synced(
    pool: &Pool,
    schema: &str,
    collection_id: &str,
    feature_count: i64,
) -> Result<()> {
    let client = pool.get().await?;
    let sql = format!(
        r#"
        UPDATE {}.sync_status SET
            status = 'synced',
            feature_count = $2,
            last_sync = NOW(),
            error_message = NULL,
            updated_at = NOW()
        WHERE collection_id = $1
        "#,
        schema
    );
    client
        .execute(&sql, &[&collection_id, &feature_count])
        .await
        .context("Failed to mark sync record synced")?;
    Ok(())
}

/// Passe l'enregistrement en `error`; le compteur et le last_sync du
/// dernier succès sont conservés
pub async fn mark_error(
    pool: &Pool,
    schema: &str,
    collection_id: &str,
    message: &str,
) -> Result<()> {
    let client = pool.get().await?;
    let sql = format!(
        r#"
        UPDATE {}.sync_status SET
            status = 'error',
            error_message = $2,
            updated_at = NOW()
        WHERE collection_id = $1
        "#,
        schema
    );
    client
        .execute(&sql, &[&collection_id, &message])
        .await
        .context("Failed to mark sync record error")?;
    Ok(())
}

/// Enregistrement d'une colección, s'il existe
pub async fn get_record(
    pool: &Pool,
    schema: &str,
    collection_id: &str,
) -> Result<Option<SyncRecord>> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;
    let sql = format!(
        r#"
        SELECT collection_id, table_name, namespace, last_sync,
               feature_count, status, error_message
        FROM {}.sync_status
        WHERE collection_id = $1
        "#,
        schema
    );
    let row = client
        .query_opt(&sql, &[&collection_id])
        .await
        .context("Failed to read sync record")?;
    Ok(row.map(record_from_row))
}

/// Liste les enregistrements, les plus récents d'abord, filtrables par
/// namespace
pub async fn list_records(
    pool: &Pool,
    schema: &str,
    namespace: Option<&str>,
) -> Result<Vec<SyncRecord>> {
    validate_schema_name(schema)?;
    let client = pool.get().await?;

    let rows = match namespace {
        Some(ns) => {
            let sql = format!(
                r#"
                SELECT collection_id, table_name, namespace, last_sync,
                       feature_count, status, error_message
                FROM {}.sync_status
                WHERE namespace = $1
                ORDER BY last_sync DESC NULLS LAST, collection_id
                "#,
                schema
            );
            client.query(&sql, &[&ns]).await
        }
        None => {
            let sql = format!(
                r#"
                SELECT collection_id, table_name, namespace, last_sync,
                       feature_count, status, error_message
                FROM {}.sync_status
                ORDER BY last_sync DESC NULLS LAST, collection_id
                "#,
                schema
            );
            client.query(&sql, &[]).await
        }
    }
    .context("Failed to list sync records")?;

    Ok(rows.into_iter().map(|r| record_from_row(r)).collect())
}

fn record_from_row(row: tokio_postgres::Row) -> SyncRecord {
    let status: String = row.get(5);
    SyncRecord {
        collection_id: row.get(0),
        table_name: row.get(1),
        namespace: row.get(2),
        last_sync: row.get(3),
        feature_count: row.get(4),
        status: SyncState::from_db(&status),
        error_message: row.get(6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [SyncState::Pending, SyncState::Synced, SyncState::Error] {
            assert_eq!(SyncState::from_db(state.as_str()), state);
        }
        // Valeur inconnue: on retombe sur pending plutôt que de paniquer
        assert_eq!(SyncState::from_db("syncing"), SyncState::Pending);
    }
}
