//! Interface de capacité spatiale
//!
//! Deux implémentations du même contrat: `DatabaseBackend` (PostGIS) et
//! `FileBackend` (GeoJSON local). Le backend est choisi au démarrage et
//! injecté; l'appelant ne doit jamais pouvoir deviner lequel a servi
//! sa requête.

pub mod database;
pub mod file;

use async_trait::async_trait;
use geo::MultiPolygon;
use serde::Serialize;

use afecciones::{AfeccionError, ConstraintLayer, IntersectionKind, Parcel, RefCat};

pub use database::DatabaseBackend;
pub use file::FileBackend;

/// Une feature de capa retenue par le prédicat, surface déjà calculée
#[derive(Debug, Clone)]
pub struct LayerHit {
    pub feature_id: String,

    /// Surface d'intersection avec l'empreinte, en m²
    pub area_m2: f64,

    /// Attributs de la feature
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Agrégat provincial par capa
#[derive(Debug, Clone, Serialize)]
pub struct LayerRollup {
    pub layer: String,
    pub parcels_affected: i64,
    pub area_m2: f64,
}

/// Agrégat provincial complet
#[derive(Debug, Clone, Serialize)]
pub struct ProvinceRollup {
    pub provincia: String,
    pub total_parcels: i64,
    pub total_area_m2: f64,
    pub by_layer: Vec<LayerRollup>,
}

/// Capacités spatiales requises par l'analyseur.
///
/// `footprint` est déjà dilaté pour `intersects`/`contains`/`within`
/// (buffer appliqué par l'analyseur); pour `dwithin` il reste la parcelle
/// brute et `distance_m` porte la tolérance.
#[async_trait]
pub trait SpatialBackend: Send + Sync {
    /// Résout une parcelle par référence cadastrale
    async fn parcel(&self, refcat: &RefCat) -> Result<Parcel, AfeccionError>;

    /// Capas disponibles; liste vide = toutes les capas actives
    async fn layers(&self, requested: &[String]) -> Result<Vec<ConstraintLayer>, AfeccionError>;

    /// Features candidates d'une capa: pré-filtre bbox puis prédicat exact,
    /// surface d'intersection en m²
    async fn candidates(
        &self,
        layer: &ConstraintLayer,
        footprint: &MultiPolygon<f64>,
        kind: IntersectionKind,
        distance_m: f64,
    ) -> Result<Vec<LayerHit>, AfeccionError>;

    /// Agrégat par province: comptes de parcelles affectées et surfaces
    /// par capa (rollup en lecture seule)
    async fn province_rollup(
        &self,
        provincia: &str,
        layers: &[String],
    ) -> Result<ProvinceRollup, AfeccionError>;
}
