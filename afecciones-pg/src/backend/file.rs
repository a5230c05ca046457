//! Backend fichier: fallback GeoJSON local
//!
//! Quand la base spatiale est indisponible, les capas sont chargées depuis
//! un répertoire de fichiers GeoJSON (`parcels.geojson` + un fichier par
//! capa) et la superposition se fait en mémoire. Le contrat observé par
//! l'appelant est identique au backend PostGIS, en plus lent.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use geo::{Geometry, MultiPolygon};
use rayon::prelude::*;
use tracing::{info, warn};

use afecciones::{
    overlay, validate, AfeccionError, ConstraintLayer, GeometryKind, IntersectionKind,
    LayerCategory, Parcel, RefCat, WORKING_EPSG,
};

use crate::config::LayerRegistry;
use crate::reproject::Reprojector;

use super::{LayerHit, LayerRollup, ProvinceRollup, SpatialBackend};

/// Feature brute lue d'un GeoJSON
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub id: Option<String>,
    pub geometry: Geometry<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Lit une FeatureCollection GeoJSON; les features sans géométrie sont
/// ignorées avec un warning.
pub fn read_feature_collection(path: &Path) -> Result<Vec<RawFeature>> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read GeoJSON file: {}", path.display()))?;
    let gj: geojson::GeoJson = content
        .parse()
        .context(format!("Failed to parse GeoJSON: {}", path.display()))?;
    let fc = geojson::FeatureCollection::try_from(gj)
        .context(format!("Not a FeatureCollection: {}", path.display()))?;

    let mut features = Vec::with_capacity(fc.features.len());
    for feature in fc.features {
        let Some(gj_geom) = feature.geometry else {
            warn!(path = %path.display(), "Feature without geometry skipped");
            continue;
        };
        let geometry = match Geometry::<f64>::try_from(&gj_geom) {
            Ok(g) => g,
            Err(e) => {
                warn!(path = %path.display(), "Unreadable geometry skipped: {e}");
                continue;
            }
        };
        let id = match feature.id {
            Some(geojson::feature::Id::String(s)) => Some(s),
            Some(geojson::feature::Id::Number(n)) => Some(n.to_string()),
            None => None,
        };
        features.push(RawFeature {
            id,
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }
    Ok(features)
}

/// Charge un fichier de parcelles; retourne (parcelles, skippées)
pub fn load_parcels_file(
    path: &Path,
    reprojector: Option<&Reprojector>,
) -> Result<(Vec<Parcel>, usize)> {
    let raw = read_feature_collection(path)?;
    let mut parcels = Vec::with_capacity(raw.len());
    let mut skipped = 0;

    for feature in raw {
        let refcat_value = feature
            .properties
            .get("refcat")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| feature.id.clone());

        let Some(refcat_raw) = refcat_value else {
            warn!(path = %path.display(), "Parcel without refcat skipped");
            skipped += 1;
            continue;
        };

        let refcat = match RefCat::parse(&refcat_raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(refcat = %refcat_raw, "Invalid refcat skipped: {e}");
                skipped += 1;
                continue;
            }
        };

        let geometry = match reprojector {
            Some(r) => match r.transform_geometry(&feature.geometry) {
                Ok(g) => g,
                Err(e) => {
                    warn!(refcat = %refcat, "Reprojection failed, parcel skipped: {e}");
                    skipped += 1;
                    continue;
                }
            },
            None => feature.geometry,
        };

        if let Err(e) = validate::validate_geometry(refcat.as_str(), &geometry) {
            warn!(refcat = %refcat, "Invalid parcel geometry skipped: {e}");
            skipped += 1;
            continue;
        }
        let Some(polygonal) = validate::to_polygonal(&geometry) else {
            warn!(refcat = %refcat, "Non-polygonal parcel skipped");
            skipped += 1;
            continue;
        };

        let prop_str = |key: &str| {
            feature
                .properties
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        parcels.push(Parcel {
            refcat,
            provincia: prop_str("provincia"),
            municipio: prop_str("municipio"),
            uso: prop_str("uso"),
            geometry: polygonal,
        });
    }

    Ok((parcels, skipped))
}

/// Une capa chargée en mémoire
#[derive(Debug, Clone)]
pub struct LayerData {
    pub layer: ConstraintLayer,
    pub features: Vec<LayerFeature>,
}

/// Feature de capa prête pour la superposition
#[derive(Debug, Clone)]
pub struct LayerFeature {
    pub id: String,
    pub geometry: Geometry<f64>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Backend de fallback sur fichiers GeoJSON locaux
pub struct FileBackend {
    parcels: HashMap<String, Parcel>,
    layers: Vec<LayerData>,
}

impl FileBackend {
    /// Charge `parcels.geojson` et chaque `<capa>.geojson` du répertoire.
    ///
    /// Les fichiers sont supposés déjà en projection de travail, sauf si le
    /// registre déclare un EPSG source différent pour la capa.
    pub fn open(dir: &Path, registry: &LayerRegistry) -> Result<Self> {
        let mut parcels = HashMap::new();
        let parcels_path = dir.join("parcels.geojson");
        if parcels_path.exists() {
            let (loaded, skipped) = load_parcels_file(&parcels_path, None)?;
            if skipped > 0 {
                warn!(skipped = skipped, "Parcels skipped while loading fallback");
            }
            for parcel in loaded {
                parcels.insert(parcel.refcat.to_string(), parcel);
            }
        }

        let mut layers = Vec::new();
        let pattern = dir.join("*.geojson");
        for entry in glob::glob(&pattern.to_string_lossy())
            .context("Invalid glob pattern for layer discovery")?
        {
            let path = entry.context("Failed to read directory entry")?;
            if path.file_name().and_then(|n| n.to_str()) == Some("parcels.geojson") {
                continue;
            }
            let Some(collection_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            // Hors registre, un fichier local est réputé déjà projeté
            let meta = registry.layer(collection_id).unwrap_or(ConstraintLayer {
                name: collection_id.to_string(),
                title: None,
                category: LayerCategory::Otros,
                geometry: GeometryKind::Polygon,
                source_epsg: WORKING_EPSG,
                active: true,
            });

            let reprojector = Reprojector::new(meta.source_epsg, WORKING_EPSG)
                .with_context(|| format!("No reprojection path for layer {}", collection_id))?;

            let raw = read_feature_collection(&path)?;
            let mut features = Vec::with_capacity(raw.len());
            let mut skipped = 0;
            for (index, feature) in raw.into_iter().enumerate() {
                let id = feature.id.unwrap_or_else(|| index.to_string());
                let geometry = match reprojector.transform_geometry(&feature.geometry) {
                    Ok(g) => g,
                    Err(e) => {
                        warn!(layer = collection_id, id = %id, "Reprojection failed: {e}");
                        skipped += 1;
                        continue;
                    }
                };
                if validate::validate_geometry(&id, &geometry).is_err() {
                    skipped += 1;
                    continue;
                }
                features.push(LayerFeature {
                    id,
                    geometry,
                    attributes: feature.properties,
                });
            }

            info!(
                layer = collection_id,
                features = features.len(),
                skipped = skipped,
                "Layer loaded from file"
            );
            layers.push(LayerData {
                layer: meta,
                features,
            });
        }

        layers.sort_by(|a, b| a.layer.name.cmp(&b.layer.name));
        Ok(Self { parcels, layers })
    }

    /// Construit un backend depuis des données déjà en mémoire
    pub fn from_parts(parcels: Vec<Parcel>, layers: Vec<LayerData>) -> Self {
        let parcels = parcels
            .into_iter()
            .map(|p| (p.refcat.to_string(), p))
            .collect();
        Self { parcels, layers }
    }

    fn layer_data(&self, name: &str) -> Option<&LayerData> {
        self.layers.iter().find(|l| l.layer.name == name)
    }
}

#[async_trait]
impl SpatialBackend for FileBackend {
    async fn parcel(&self, refcat: &RefCat) -> Result<Parcel, AfeccionError> {
        self.parcels
            .get(refcat.as_str())
            .cloned()
            .ok_or_else(|| AfeccionError::ParcelNotFound(refcat.to_string()))
    }

    async fn layers(&self, requested: &[String]) -> Result<Vec<ConstraintLayer>, AfeccionError> {
        if requested.is_empty() {
            return Ok(self
                .layers
                .iter()
                .map(|l| l.layer.clone())
                .filter(|l| l.active)
                .collect());
        }

        let mut layers = Vec::with_capacity(requested.len());
        for name in requested {
            let data = self
                .layer_data(name)
                .ok_or_else(|| AfeccionError::LayerNotFound(name.clone()))?;
            layers.push(data.layer.clone());
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
        let data = self
            .layer_data(&layer.name)
            .ok_or_else(|| AfeccionError::LayerNotFound(layer.name.clone()))?;

        // dwithin: dilater de la distance et tester l'intersection,
        // équivalent euclidien de ST_DWithin
        let (test_fp, effective_kind) = match kind {
            IntersectionKind::Dwithin => (
                overlay::dilate(footprint, distance_m.max(0.0)),
                IntersectionKind::Intersects,
            ),
            _ => (footprint.clone(), kind),
        };
        let test_geom = Geometry::MultiPolygon(test_fp);

        let hits = data
            .features
            .par_iter()
            .filter_map(|feature| {
                if !overlay::bbox_overlaps(&test_geom, &feature.geometry) {
                    return None;
                }
                if !overlay::predicate_holds(&test_geom, &feature.geometry, effective_kind) {
                    return None;
                }
                Some(LayerHit {
                    feature_id: feature.id.clone(),
                    area_m2: overlay::intersection_area_m2(footprint, &feature.geometry),
                    attributes: feature.attributes.clone(),
                })
            })
            .collect();

        Ok(hits)
    }

    async fn province_rollup(
        &self,
        provincia: &str,
        layers: &[String],
    ) -> Result<ProvinceRollup, AfeccionError> {
        let selected: Vec<&LayerData> = if layers.is_empty() {
            self.layers.iter().filter(|l| l.layer.active).collect()
        } else {
            let mut out = Vec::with_capacity(layers.len());
            for name in layers {
                out.push(
                    self.layer_data(name)
                        .ok_or_else(|| AfeccionError::LayerNotFound(name.clone()))?,
                );
            }
            out
        };

        let parcels: Vec<&Parcel> = self
            .parcels
            .values()
            .filter(|p| p.provincia.as_deref() == Some(provincia))
            .collect();

        let total_parcels = parcels.len() as i64;
        let total_area_m2: f64 = parcels.iter().map(|p| p.area_m2()).sum();

        let mut by_layer = Vec::with_capacity(selected.len());
        for data in selected {
            let (parcels_affected, area_m2) = parcels
                .par_iter()
                .map(|parcel| {
                    let fp_geom = Geometry::MultiPolygon(parcel.geometry.clone());
                    let mut area = 0.0;
                    let mut affected = false;
                    for feature in &data.features {
                        if !overlay::bbox_overlaps(&fp_geom, &feature.geometry) {
                            continue;
                        }
                        if !overlay::predicate_holds(
                            &fp_geom,
                            &feature.geometry,
                            IntersectionKind::Intersects,
                        ) {
                            continue;
                        }
                        affected = true;
                        area += overlay::intersection_area_m2(&parcel.geometry, &feature.geometry);
                    }
                    (i64::from(affected), area)
                })
                .reduce(|| (0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

            by_layer.push(LayerRollup {
                layer: data.layer.name.clone(),
                parcels_affected,
                area_m2,
            });
        }

        by_layer.sort_by(|a, b| {
            b.area_m2
                .partial_cmp(&a.area_m2)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(ProvinceRollup {
            provincia: provincia.to_string(),
            total_parcels,
            total_area_m2,
            by_layer,
        })
    }
}
