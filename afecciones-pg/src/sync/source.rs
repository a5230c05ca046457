//! Source de features externe
//!
//! Le client HTTP OGC Features est un collaborateur externe: ici seulement
//! le trait qu'il doit remplir, plus une source locale sur répertoire
//! GeoJSON pour le mode hors-ligne et les tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::backend::file::{read_feature_collection, RawFeature};

/// Erreurs d'une source de features
#[derive(Debug, Error)]
pub enum SourceError {
    /// Timeout de la source; retentable
    #[error("source timeout: {0}")]
    Timeout(String),

    /// Erreur réseau/service passagère; retentable
    #[error("transient source error: {0}")]
    Transient(String),

    /// Colección inconnue de la source
    #[error("collection {0} not found in source")]
    CollectionNotFound(String),

    /// Erreur définitive (payload malformé, etc.)
    #[error("source error: {0}")]
    Fatal(String),
}

impl SourceError {
    /// Seuls les timeouts et les erreurs passagères méritent un retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }
}

/// Métadonnées d'une colección côté source
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub id: String,
    pub title: Option<String>,
    /// EPSG des géométries renvoyées par la source
    pub crs_epsg: u32,
}

/// Feature brute renvoyée par la source
#[derive(Debug, Clone)]
pub struct SourceFeature {
    /// Identifiant stable fourni par la source, si elle en a un
    pub id: Option<String>,
    pub geometry: geo::Geometry<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Une page de features
#[derive(Debug)]
pub struct FeaturePage {
    pub features: Vec<SourceFeature>,
    /// Offset de la page suivante; None = dernière page
    pub next_offset: Option<u64>,
}

/// Contrat d'une source de features paginée
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Colecciones disponibles côté source
    async fn collections(&self) -> Result<Vec<CollectionInfo>, SourceError>;

    /// Une page de features d'une colección
    async fn fetch_page(
        &self,
        collection_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<FeaturePage, SourceError>;
}

/// Source locale: un fichier `<collection>.geojson` par colección.
///
/// La pagination est simulée en mémoire; chaque fichier n'est parsé
/// qu'une fois.
pub struct GeoJsonDirSource {
    dir: PathBuf,
    crs_epsg: u32,
    cache: Mutex<HashMap<String, Arc<Vec<SourceFeature>>>>,
}

impl GeoJsonDirSource {
    /// `crs_epsg`: EPSG des fichiers du répertoire (4326 pour du GeoJSON
    /// RFC 7946, 25830 pour des exports déjà projetés)
    pub fn new(dir: impl Into<PathBuf>, crs_epsg: u32) -> Self {
        Self {
            dir: dir.into(),
            crs_epsg,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn collection_path(&self, collection_id: &str) -> PathBuf {
        self.dir.join(format!("{}.geojson", collection_id))
    }

    fn load(&self, collection_id: &str) -> Result<Arc<Vec<SourceFeature>>, SourceError> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection_id)
        {
            return Ok(Arc::clone(cached));
        }

        let path = self.collection_path(collection_id);
        if !path.exists() {
            return Err(SourceError::CollectionNotFound(collection_id.to_string()));
        }

        let raw = read_feature_collection(&path).map_err(|e| SourceError::Fatal(e.to_string()))?;
        let features: Vec<SourceFeature> = raw
            .into_iter()
            .map(|RawFeature { id, geometry, properties }| SourceFeature {
                id,
                geometry,
                properties,
            })
            .collect();

        debug!(
            collection = collection_id,
            features = features.len(),
            "Collection loaded from directory source"
        );

        let features = Arc::new(features);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection_id.to_string(), Arc::clone(&features));
        Ok(features)
    }
}

#[async_trait]
impl FeatureSource for GeoJsonDirSource {
    async fn collections(&self) -> Result<Vec<CollectionInfo>, SourceError> {
        let pattern = self.dir.join("*.geojson");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| SourceError::Fatal(e.to_string()))?;

        let mut collections = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SourceError::Fatal(e.to_string()))?;
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem == "parcels" {
                    continue;
                }
                collections.push(CollectionInfo {
                    id: stem.to_string(),
                    title: None,
                    crs_epsg: self.crs_epsg,
                });
            }
        }
        collections.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(collections)
    }

    async fn fetch_page(
        &self,
        collection_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<FeaturePage, SourceError> {
        let features = self.load(collection_id)?;
        let total = features.len() as u64;
        let start = offset.min(total) as usize;
        let end = offset.saturating_add(limit).min(total) as usize;

        let page: Vec<SourceFeature> = features[start..end].to_vec();
        let next_offset = ((end as u64) < total).then_some(end as u64);

        Ok(FeaturePage {
            features: page,
            next_offset,
        })
    }
}
