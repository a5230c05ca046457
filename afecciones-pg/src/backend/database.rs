//! Backend PostGIS
//!
//! Requêtes paramétrées sur le schéma générique: l'empreinte passe en EWKB,
//! jamais d'identifiant construit depuis l'entrée. Le pré-filtre `&&`
//! s'appuie sur l'index GIST avant le prédicat exact.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use geo::{Geometry, MultiPolygon};
use tracing::debug;

use afecciones::{
    validate, AfeccionError, ConstraintLayer, IntersectionKind, Parcel, RefCat, WORKING_EPSG,
};

use crate::config::LayerRegistry;
use crate::store::geometry_to_ewkb;
use crate::store::schema::validate_schema_name;

use super::{LayerHit, LayerRollup, ProvinceRollup, SpatialBackend};

/// Backend adossé à PostGIS
pub struct DatabaseBackend {
    pool: Pool,
    schema: String,
    registry: LayerRegistry,
    query_timeout: Duration,
}

impl DatabaseBackend {
    pub fn new(
        pool: Pool,
        schema: impl Into<String>,
        registry: LayerRegistry,
        query_timeout: Duration,
    ) -> Result<Self, AfeccionError> {
        let schema = schema.into();
        validate_schema_name(&schema)
            .map_err(|e| AfeccionError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            pool,
            schema,
            registry,
            query_timeout,
        })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AfeccionError> {
        self.pool
            .get()
            .await
            .map_err(|e| AfeccionError::BackendUnavailable(e.to_string()))
    }

    /// Applique le timeout par requête; un dépassement est recouvrable
    /// pour l'appelant, pas retenté ici
    async fn timed<T, F>(&self, fut: F) -> Result<T, AfeccionError>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AfeccionError::BackendUnavailable(e.to_string())),
            Err(_) => Err(AfeccionError::UpstreamTimeout(self.query_timeout)),
        }
    }

    async fn synced_collections(&self) -> Result<Vec<String>, AfeccionError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT collection_id FROM {}.sync_status WHERE status = 'synced' ORDER BY collection_id",
            self.schema
        );
        let rows = self.timed(client.query(&sql, &[])).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

#[async_trait]
impl SpatialBackend for DatabaseBackend {
    async fn parcel(&self, refcat: &RefCat) -> Result<Parcel, AfeccionError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT provincia, municipio, uso, ST_AsBinary(geom) FROM {}.parcels WHERE refcat = $1",
            self.schema
        );

        let row = self
            .timed(client.query_opt(&sql, &[&refcat.as_str()]))
            .await?
            .ok_or_else(|| AfeccionError::ParcelNotFound(refcat.to_string()))?;

        let bytes: Vec<u8> = row.get(3);
        let geom = wkb::wkb_to_geom(&mut bytes.as_slice()).map_err(|e| {
            AfeccionError::invalid_geometry(refcat.as_str(), format!("unreadable WKB: {:?}", e))
        })?;
        let geometry = validate::to_polygonal(&geom).ok_or_else(|| {
            AfeccionError::invalid_geometry(refcat.as_str(), "stored geometry is not polygonal")
        })?;

        Ok(Parcel {
            refcat: refcat.clone(),
            provincia: row.get(0),
            municipio: row.get(1),
            uso: row.get(2),
            geometry,
        })
    }

    async fn layers(&self, requested: &[String]) -> Result<Vec<ConstraintLayer>, AfeccionError> {
        let synced = self.synced_collections().await?;

        if requested.is_empty() {
            return Ok(synced
                .iter()
                .map(|id| self.registry.layer_or_default(id))
                .filter(|l| l.active)
                .collect());
        }

        let mut layers = Vec::with_capacity(requested.len());
        for name in requested {
            if !synced.contains(name) {
                return Err(AfeccionError::LayerNotFound(name.clone()));
            }
            layers.push(self.registry.layer_or_default(name));
        }
        Ok(layers)
    }

    async fn candidates(
        &self,
        layer: &ConstraintLayer,
        footprint: &MultiPolygon<f64>,
        kind: IntersectionKind,
        distance_m: f64,
    ) -> Result<Vec<LayerHit>, AfeccionError> {
        let ewkb = geometry_to_ewkb(&Geometry::MultiPolygon(footprint.clone()), WORKING_EPSG)
            .map_err(|e| {
                AfeccionError::invalid_geometry("footprint", format!("EWKB encoding failed: {e}"))
            })?;

        let predicate = match kind {
            IntersectionKind::Intersects => "ST_Intersects(lf.geom, fp.g)",
            IntersectionKind::Contains => "ST_Contains(fp.g, lf.geom)",
            IntersectionKind::Within => "ST_Within(fp.g, lf.geom)",
            IntersectionKind::Dwithin => "ST_DWithin(lf.geom, fp.g, $3)",
        };

        // Filtre bbox d'abord (index GIST), prédicat exact ensuite
        let sql = format!(
            r#"
            WITH fp AS (SELECT ST_GeomFromEWKB($2) AS g)
            SELECT lf.feature_id,
                   lf.properties,
                   ST_Area(ST_Intersection(lf.geom, fp.g)) AS area_m2
            FROM {schema}.layer_features lf, fp
            WHERE lf.collection_id = $1
              AND lf.geom && fp.g
              AND {predicate}
            "#,
            schema = self.schema,
            predicate = predicate
        );

        let client = self.client().await?;
        let rows = if kind == IntersectionKind::Dwithin {
            self.timed(client.query(&sql, &[&layer.name, &ewkb, &distance_m]))
                .await?
        } else {
            self.timed(client.query(&sql, &[&layer.name, &ewkb])).await?
        };

        debug!(
            layer = %layer.name,
            kind = %kind,
            hits = rows.len(),
            "Candidate scan complete"
        );

        Ok(rows
            .iter()
            .map(|row| {
                let properties: serde_json::Value = row.get(1);
                let attributes = match properties {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                LayerHit {
                    feature_id: row.get(0),
                    area_m2: row.get::<_, f64>(2).max(0.0),
                    attributes,
                }
            })
            .collect())
    }

    async fn province_rollup(
        &self,
        provincia: &str,
        layers: &[String],
    ) -> Result<ProvinceRollup, AfeccionError> {
        let layer_ids = if layers.is_empty() {
            self.synced_collections().await?
        } else {
            layers.to_vec()
        };

        let client = self.client().await?;

        let totals_sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(ST_Area(geom)), 0.0)
             FROM {}.parcels WHERE provincia = $1",
            self.schema
        );
        let totals = self
            .timed(client.query_one(&totals_sql, &[&provincia]))
            .await?;
        let total_parcels: i64 = totals.get(0);
        let total_area_m2: f64 = totals.get(1);

        let rollup_sql = format!(
            r#"
            SELECT lf.collection_id,
                   COUNT(DISTINCT p.refcat),
                   COALESCE(SUM(ST_Area(ST_Intersection(p.geom, lf.geom))), 0.0)
            FROM {schema}.parcels p
            JOIN {schema}.layer_features lf
              ON lf.collection_id = ANY($2)
             AND p.geom && lf.geom
             AND ST_Intersects(p.geom, lf.geom)
            WHERE p.provincia = $1
            GROUP BY lf.collection_id
            ORDER BY 3 DESC
            "#,
            schema = self.schema
        );
        let rows = self
            .timed(client.query(&rollup_sql, &[&provincia, &layer_ids]))
            .await?;

        let by_layer = rows
            .iter()
            .map(|row| LayerRollup {
                layer: row.get(0),
                parcels_affected: row.get(1),
                area_m2: row.get(2),
            })
            .collect();

        Ok(ProvinceRollup {
            provincia: provincia.to_string(),
            total_parcels,
            total_area_m2,
            by_layer,
        })
    }
}
