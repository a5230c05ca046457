//! Couche de présentation
//!
//! Met en forme les analyses pour un appelant: groupement par capa,
//! arrondis à 2 décimales, isolement des erreurs par élément dans les
//! traitements par lot. C'est ici, et seulement ici, que les valeurs
//! sont arrondies.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use afecciones::{overlay, AfeccionError, AnalysisParams, IntersectionKind};

use crate::analyzer::Analyzer;
use crate::backend::{ProvinceRollup, SpatialBackend};

/// Une afección présentée (valeurs arrondies)
#[derive(Debug, Clone, Serialize)]
pub struct AffectationEntry {
    pub feature_id: String,
    pub intersection: IntersectionKind,
    pub area_m2: f64,
    pub percent: f64,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Résumé d'afecciones pour une parcelle
#[derive(Debug, Clone, Serialize)]
pub struct AffectationSummary {
    pub refcat: String,
    pub provincia: Option<String>,
    pub municipio: Option<String>,
    pub parcel_area_m2: f64,
    pub footprint_area_m2: f64,
    pub layers_affected: usize,
    pub total_affected_area_m2: f64,
    /// Somme brute des pourcentages de surface; des capas qui se
    /// recouvrent peuvent dépasser 100
    pub total_affected_percent: f64,
    /// capa -> afecciones ordonnées par pourcentage décroissant
    pub afecciones: BTreeMap<String, Vec<AffectationEntry>>,
}

/// Erreur par élément d'un lot
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub kind: String,
    pub message: String,
}

/// Résultat ou erreur pour une référence d'un lot
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Success(AffectationSummary),
    Failure { error: ItemError },
}

/// Rapport d'un traitement par lot
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub results: BTreeMap<String, BatchOutcome>,
}

/// Agrégat provincial présenté
#[derive(Debug, Clone, Serialize)]
pub struct ProvinceSummary {
    pub provincia: String,
    pub total_parcels: i64,
    pub total_area_m2: f64,
    pub by_layer: Vec<ProvinceLayerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvinceLayerEntry {
    pub layer: String,
    pub parcels_affected: i64,
    pub area_m2: f64,
    /// Part de la surface provinciale affectée par cette capa
    pub percent_of_province: f64,
}

/// Service de consultation d'afecciones
pub struct AffectationService<B> {
    analyzer: Analyzer<B>,
}

impl<B: SpatialBackend> AffectationService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            analyzer: Analyzer::new(backend),
        }
    }

    /// Afecciones d'une parcelle, groupées par capa
    pub async fn get_affectations(
        &self,
        refcat: &str,
        params: &AnalysisParams,
    ) -> Result<AffectationSummary, AfeccionError> {
        let analysis = self.analyzer.analyze(refcat, params).await?;

        let mut afecciones: BTreeMap<String, Vec<AffectationEntry>> = BTreeMap::new();
        for result in &analysis.results {
            afecciones
                .entry(result.layer.clone())
                .or_default()
                .push(AffectationEntry {
                    feature_id: result.feature_id.clone(),
                    intersection: result.intersection,
                    area_m2: overlay::round2(result.area_m2),
                    percent: overlay::round2(result.percent),
                    attributes: result.attributes.clone(),
                });
        }

        let total_affected_area_m2 = analysis.total_affected_area_m2();
        let total_affected_percent = if analysis.footprint_area_m2 > 0.0 {
            total_affected_area_m2 / analysis.footprint_area_m2 * 100.0
        } else {
            0.0
        };

        Ok(AffectationSummary {
            refcat: analysis.parcel.refcat.to_string(),
            provincia: analysis.parcel.provincia.clone(),
            municipio: analysis.parcel.municipio.clone(),
            parcel_area_m2: overlay::round2(analysis.parcel_area_m2),
            footprint_area_m2: overlay::round2(analysis.footprint_area_m2),
            layers_affected: analysis.affected_layer_count(),
            total_affected_area_m2: overlay::round2(total_affected_area_m2),
            total_affected_percent: overlay::round2(total_affected_percent),
            afecciones,
        })
    }

    /// Analyse par lot: une référence en échec n'interrompt jamais les
    /// autres; seule l'indisponibilité du backend est fatale.
    pub async fn get_affectations_batch(
        &self,
        refcats: &[String],
        params: &AnalysisParams,
    ) -> Result<BatchReport, AfeccionError> {
        let mut results = BTreeMap::new();
        let mut processed = 0;
        let mut failed = 0;

        for refcat in refcats {
            match self.get_affectations(refcat, params).await {
                Ok(summary) => {
                    processed += 1;
                    results.insert(refcat.clone(), BatchOutcome::Success(summary));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(refcat = %refcat, kind = e.kind(), "Batch item failed: {e}");
                    failed += 1;
                    results.insert(
                        refcat.clone(),
                        BatchOutcome::Failure {
                            error: ItemError {
                                kind: e.kind().to_string(),
                                message: e.to_string(),
                            },
                        },
                    );
                }
            }
        }

        debug!(
            total = refcats.len(),
            processed = processed,
            failed = failed,
            "Batch analysis complete"
        );

        Ok(BatchReport {
            total: refcats.len(),
            processed,
            failed,
            results,
        })
    }

    /// Agrégat provincial (rollup en lecture seule)
    pub async fn get_province_summary(
        &self,
        provincia: &str,
        layers: &[String],
    ) -> Result<ProvinceSummary, AfeccionError> {
        let rollup: ProvinceRollup = self
            .analyzer
            .backend()
            .province_rollup(provincia, layers)
            .await?;

        let by_layer = rollup
            .by_layer
            .into_iter()
            .map(|entry| ProvinceLayerEntry {
                layer: entry.layer,
                parcels_affected: entry.parcels_affected,
                area_m2: overlay::round2(entry.area_m2),
                percent_of_province: overlay::round2(overlay::percent_of(
                    entry.area_m2,
                    rollup.total_area_m2,
                )),
            })
            .collect();

        Ok(ProvinceSummary {
            provincia: rollup.provincia,
            total_parcels: rollup.total_parcels,
            total_area_m2: overlay::round2(rollup.total_area_m2),
            by_layer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Geometry, MultiPolygon};
    use serde_json::json;

    use afecciones::{ConstraintLayer, GeometryKind, LayerCategory, Parcel, RefCat, WORKING_EPSG};

    use crate::backend::file::{FileBackend, LayerData, LayerFeature};

    fn meta(name: &str) -> ConstraintLayer {
        ConstraintLayer {
            name: name.to_string(),
            title: None,
            category: LayerCategory::Otros,
            geometry: GeometryKind::Polygon,
            source_epsg: WORKING_EPSG,
            active: true,
        }
    }

    fn square_parcel(refcat: &str, x0: f64, provincia: &str) -> Parcel {
        Parcel {
            refcat: RefCat::parse(refcat).unwrap(),
            provincia: Some(provincia.to_string()),
            municipio: Some("001".into()),
            uso: None,
            geometry: MultiPolygon::new(vec![polygon![
                (x: x0, y: 4_470_000.0),
                (x: x0 + 100.0, y: 4_470_000.0),
                (x: x0 + 100.0, y: 4_470_100.0),
                (x: x0, y: 4_470_100.0),
            ]]),
        }
    }

    fn service() -> AffectationService<FileBackend> {
        let mut attributes = serde_json::Map::new();
        attributes.insert("nombre".into(), json!("ZEC Sierra"));

        let backend = FileBackend::from_parts(
            vec![
                square_parcel("04001A00100001", 500_000.0, "04"),
                square_parcel("04001A00100002", 500_200.0, "04"),
                square_parcel("04001A00100003", 500_400.0, "04"),
                square_parcel("04001A00100004", 500_600.0, "04"),
                // Une autre province, hors de la capa
                square_parcel("18001A00100001", 900_000.0, "18"),
            ],
            vec![LayerData {
                layer: meta("biodiversidad:red_natura_2000"),
                // Recouvre entièrement les parcelles 1 et 2, pas les autres
                features: vec![LayerFeature {
                    id: "natura-1".into(),
                    geometry: Geometry::Polygon(polygon![
                        (x: 499_900.0, y: 4_469_900.0),
                        (x: 500_320.0, y: 4_469_900.0),
                        (x: 500_320.0, y: 4_470_200.0),
                        (x: 499_900.0, y: 4_470_200.0),
                    ]),
                    attributes,
                }],
            }],
        );
        AffectationService::new(backend)
    }

    #[tokio::test]
    async fn test_summary_groups_by_layer_and_rounds() {
        let service = service();
        let summary = service
            .get_affectations("04001A00100001", &AnalysisParams::default())
            .await
            .unwrap();

        assert_eq!(summary.refcat, "04001A00100001");
        assert_eq!(summary.layers_affected, 1);
        assert_eq!(summary.parcel_area_m2, 10_000.0);

        let entries = summary
            .afecciones
            .get("biodiversidad:red_natura_2000")
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].percent, 100.0);
        assert_eq!(entries[0].area_m2, 10_000.0);
        assert_eq!(
            entries[0].attributes.get("nombre").and_then(|v| v.as_str()),
            Some("ZEC Sierra")
        );
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let service = service();
        let refcats: Vec<String> = vec![
            "04001A00100001".into(),
            "04001A00100002".into(),
            "04001A00100003".into(),
            "04001A00100004".into(),
            "00000X00000000".into(), // inconnue
        ];

        let report = service
            .get_affectations_batch(&refcats, &AnalysisParams::default())
            .await
            .unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.processed, 4);
        assert_eq!(report.failed, 1);

        match report.results.get("00000X00000000").unwrap() {
            BatchOutcome::Failure { error } => {
                assert_eq!(error.kind, "not_found");
            }
            BatchOutcome::Success(_) => panic!("expected a per-item error"),
        }
        assert!(matches!(
            report.results.get("04001A00100003").unwrap(),
            BatchOutcome::Success(_)
        ));
    }

    #[tokio::test]
    async fn test_batch_with_invalid_refcat_continues() {
        let service = service();
        let refcats: Vec<String> = vec!["04001A00100001".into(), "bad".into()];

        let report = service
            .get_affectations_batch(&refcats, &AnalysisParams::default())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        match report.results.get("bad").unwrap() {
            BatchOutcome::Failure { error } => assert_eq!(error.kind, "invalid_refcat"),
            BatchOutcome::Success(_) => panic!("expected a per-item error"),
        }
    }

    #[tokio::test]
    async fn test_province_summary() {
        let service = service();
        let summary = service
            .get_province_summary("04", &[])
            .await
            .unwrap();

        assert_eq!(summary.provincia, "04");
        assert_eq!(summary.total_parcels, 4);
        assert_eq!(summary.total_area_m2, 40_000.0);

        assert_eq!(summary.by_layer.len(), 1);
        let natura = &summary.by_layer[0];
        assert_eq!(natura.parcels_affected, 2);
        assert!((natura.area_m2 - 20_000.0).abs() < 1.0);
        assert!((natura.percent_of_province - 50.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_other_province_is_empty() {
        let service = service();
        let summary = service.get_province_summary("18", &[]).await.unwrap();

        assert_eq!(summary.total_parcels, 1);
        assert_eq!(summary.by_layer[0].parcels_affected, 0);
        assert_eq!(summary.by_layer[0].area_m2, 0.0);
    }
}
