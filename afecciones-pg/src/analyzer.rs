//! Analyseur d'afecciones
//!
//! Orchestration indépendante du backend: résolution de la parcelle,
//! empreinte de test, candidats par capa, seuils de bruit, ordre final.
//! Les deux backends doivent produire la même forme de résultat.

use geo::{Area, Geometry, MultiPolygon};
use tracing::debug;

use afecciones::{
    overlay, validate, AfeccionError, AffectationResult, AnalysisParams, IntersectionKind, Parcel,
    RefCat,
};

use crate::backend::SpatialBackend;

/// Résultat complet d'une analyse mono-parcelle
#[derive(Debug)]
pub struct Analysis {
    pub parcel: Parcel,

    /// Surface de la parcelle (sans buffer)
    pub parcel_area_m2: f64,

    /// Surface de l'empreinte testée (dilatée si buffer > 0)
    pub footprint_area_m2: f64,

    /// Résultats ordonnés par pourcentage décroissant
    pub results: Vec<AffectationResult>,
}

impl Analysis {
    /// Somme des surfaces affectées, toutes capas confondues.
    /// Des capas qui se recouvrent peuvent dépasser la surface de la
    /// parcelle; seul le pourcentage par résultat est borné.
    pub fn total_affected_area_m2(&self) -> f64 {
        self.results.iter().map(|r| r.area_m2).sum()
    }

    /// Nombre de capas distinctes avec au moins une afección
    pub fn affected_layer_count(&self) -> usize {
        let mut layers: Vec<&str> = self.results.iter().map(|r| r.layer.as_str()).collect();
        layers.sort_unstable();
        layers.dedup();
        layers.len()
    }
}

/// Analyseur générique sur un backend spatial injecté
pub struct Analyzer<B> {
    backend: B,
}

impl<B: SpatialBackend> Analyzer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Analyse une parcelle contre les capas demandées.
    ///
    /// La géométrie stockée n'est jamais modifiée: le buffer ne dilate que
    /// l'empreinte de test. Pour `dwithin`, `buffer_m` est la distance du
    /// prédicat et l'empreinte reste la parcelle brute.
    pub async fn analyze(
        &self,
        refcat: &str,
        params: &AnalysisParams,
    ) -> Result<Analysis, AfeccionError> {
        let params = params.clone().normalized();
        let refcat = RefCat::parse(refcat)?;
        let parcel = self.backend.parcel(&refcat).await?;

        validate::validate_geometry(
            refcat.as_str(),
            &Geometry::MultiPolygon(parcel.geometry.clone()),
        )?;

        let footprint: MultiPolygon<f64> = match params.intersection {
            IntersectionKind::Dwithin => parcel.geometry.clone(),
            _ => overlay::dilate(&parcel.geometry, params.buffer_m),
        };
        let footprint_area_m2 = footprint.unsigned_area();

        let layers = self.backend.layers(&params.layers).await?;
        debug!(
            refcat = %refcat,
            layers = layers.len(),
            buffer_m = params.buffer_m,
            kind = %params.intersection,
            "Starting affectation analysis"
        );

        let mut results = Vec::new();
        for layer in &layers {
            let hits = self
                .backend
                .candidates(layer, &footprint, params.intersection, params.buffer_m)
                .await?;

            for hit in hits {
                let area_m2 = hit.area_m2.max(0.0);
                results.push(AffectationResult {
                    layer: layer.name.clone(),
                    feature_id: hit.feature_id,
                    intersection: params.intersection,
                    area_m2,
                    percent: overlay::percent_of(area_m2, footprint_area_m2),
                    attributes: hit.attributes,
                });
            }
        }

        overlay::rank_results(&mut results, params.min_area_m2, params.min_percent);

        Ok(Analysis {
            parcel_area_m2: parcel.area_m2(),
            footprint_area_m2,
            parcel,
            results,
        })
    }
}
