//! Chargement des parcelles cadastrales dans PostGIS

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use geo::Geometry;
use tracing::{info, warn};

use afecciones::{Parcel, WORKING_EPSG};

use super::geometry_to_ewkb;

/// Insère ou met à jour des parcelles, clé refcat.
///
/// Les géométries non convertibles sont skippées avec un warning;
/// retourne (écrites, skippées).
pub async fn upsert_parcels(pool: &Pool, schema: &str, parcels: &[Parcel]) -> Result<(usize, usize)> {
    if parcels.is_empty() {
        return Ok((0, 0));
    }

    super::schema::validate_schema_name(schema)?;
    let client = pool.get().await?;

    let sql = format!(
        r#"
        INSERT INTO {}.parcels (refcat, provincia, municipio, uso, geom)
        VALUES ($1, $2, $3, $4, ST_MakeValid(ST_GeomFromEWKB($5)))
        ON CONFLICT (refcat) DO UPDATE SET
            provincia = EXCLUDED.provincia,
            municipio = EXCLUDED.municipio,
            uso = EXCLUDED.uso,
            geom = EXCLUDED.geom,
            updated_at = NOW()
        "#,
        schema
    );
    let stmt = client.prepare(&sql).await.context("Failed to prepare parcel upsert")?;

    let mut written = 0;
    let mut skipped = 0;

    for parcel in parcels {
        let geom = Geometry::MultiPolygon(parcel.geometry.clone());
        let ewkb = match geometry_to_ewkb(&geom, WORKING_EPSG) {
            Ok(b) => b,
            Err(e) => {
                warn!(refcat = %parcel.refcat, "Failed to encode parcel geometry: {e}");
                skipped += 1;
                continue;
            }
        };

        let result = client
            .execute(
                &stmt,
                &[
                    &parcel.refcat.as_str(),
                    &parcel.provincia,
                    &parcel.municipio,
                    &parcel.uso,
                    &ewkb,
                ],
            )
            .await;

        match result {
            Ok(_) => written += 1,
            Err(e) => {
                warn!(refcat = %parcel.refcat, "Failed to upsert parcel: {e}");
                skipped += 1;
            }
        }
    }

    info!(
        written = written,
        skipped = skipped,
        "Parcels loaded into {}.parcels",
        schema
    );
    Ok((written, skipped))
}
