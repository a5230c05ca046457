//! Tests bout-en-bout du backend fichier
//!
//! Pas de base de données: les capas et parcelles viennent de fichiers
//! GeoJSON écrits dans un répertoire temporaire, en projection de travail.

use std::path::Path;

use afecciones::{AnalysisParams, IntersectionKind};
use afecciones_pg::backend::FileBackend;
use afecciones_pg::config::LayerRegistry;
use afecciones_pg::service::{AffectationService, BatchOutcome};

/// Carré GeoJSON [x0, y0] → [x0+size, y0+size]
fn square_coords(x0: f64, y0: f64, size: f64) -> String {
    format!(
        "[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]",
        x0 = x0,
        y0 = y0,
        x1 = x0 + size,
        y1 = y0 + size
    )
}

fn write_parcels(dir: &Path) {
    let features = [
        ("04001A00100001", 500_000.0, "04"),
        ("04001A00100002", 500_200.0, "04"),
        ("04001A00100003", 500_400.0, "04"),
        ("04001A00100004", 500_600.0, "04"),
    ]
    .iter()
    .map(|(refcat, x0, provincia)| {
        format!(
            r#"{{"type":"Feature","properties":{{"refcat":"{refcat}","provincia":"{provincia}","municipio":"001"}},"geometry":{{"type":"Polygon","coordinates":{coords}}}}}"#,
            refcat = refcat,
            provincia = provincia,
            coords = square_coords(*x0, 4_470_000.0, 100.0)
        )
    })
    .collect::<Vec<_>>()
    .join(",");

    std::fs::write(
        dir.join("parcels.geojson"),
        format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features),
    )
    .unwrap();
}

fn write_layer(dir: &Path, name: &str, features_json: &str) {
    std::fs::write(
        dir.join(format!("{}.geojson", name)),
        format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            features_json
        ),
    )
    .unwrap();
}

/// Jeu d'essai: natura recouvre la parcelle 1 en entier et la moitié
/// ouest de la parcelle 2; vía pecuaria passe à 20 m de la parcelle 1
fn service_over_tempdir() -> (tempfile::TempDir, AffectationService<FileBackend>) {
    let dir = tempfile::tempdir().unwrap();
    write_parcels(dir.path());

    write_layer(
        dir.path(),
        "natura",
        &format!(
            r#"{{"type":"Feature","id":"natura-1","properties":{{"nombre":"ZEC Sierra Alta"}},"geometry":{{"type":"Polygon","coordinates":{}}}}}"#,
            square_coords(499_900.0, 4_469_900.0, 350.0)
        ),
    );

    write_layer(
        dir.path(),
        "via_pecuaria",
        &format!(
            r#"{{"type":"Feature","id":"via-1","properties":{{"ancho_m":20}},"geometry":{{"type":"Polygon","coordinates":{}}}}}"#,
            square_coords(500_120.0, 4_470_000.0, 20.0)
        ),
    );

    let backend = FileBackend::open(dir.path(), &LayerRegistry::default()).unwrap();
    let service = AffectationService::new(backend);
    (dir, service)
}

#[tokio::test]
async fn test_full_containment_scenario() {
    let (_dir, service) = service_over_tempdir();

    let summary = service
        .get_affectations(
            "04001A00100001",
            &AnalysisParams {
                layers: vec!["natura".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.parcel_area_m2, 10_000.0);
    let entries = &summary.afecciones["natura"];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].percent, 100.0);
    assert_eq!(entries[0].area_m2, 10_000.0);
}

#[tokio::test]
async fn test_partial_coverage_scenario() {
    let (_dir, service) = service_over_tempdir();

    // natura s'arrête à x=500250: moitié ouest de la parcelle 2
    let summary = service
        .get_affectations(
            "04001A00100002",
            &AnalysisParams {
                layers: vec!["natura".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entries = &summary.afecciones["natura"];
    assert!((entries[0].percent - 50.0).abs() < 0.01);
    assert!((entries[0].area_m2 - 5_000.0).abs() < 1.0);
}

#[tokio::test]
async fn test_min_percent_filters_out_result() {
    let (_dir, service) = service_over_tempdir();

    let summary = service
        .get_affectations(
            "04001A00100002",
            &AnalysisParams {
                layers: vec!["natura".into()],
                min_percent: 60.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(summary.afecciones.is_empty());
    assert_eq!(summary.layers_affected, 0);
}

#[tokio::test]
async fn test_layers_default_to_all_active() {
    let (_dir, service) = service_over_tempdir();

    let summary = service
        .get_affectations("04001A00100001", &AnalysisParams::default())
        .await
        .unwrap();

    // natura touche la parcelle 1; via_pecuaria est disjointe
    assert!(summary.afecciones.contains_key("natura"));
    assert!(!summary.afecciones.contains_key("via_pecuaria"));
}

#[tokio::test]
async fn test_dwithin_reaches_nearby_via_pecuaria() {
    let (_dir, service) = service_over_tempdir();

    let summary = service
        .get_affectations(
            "04001A00100001",
            &AnalysisParams {
                layers: vec!["via_pecuaria".into()],
                intersection: IntersectionKind::Dwithin,
                buffer_m: 30.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entries = &summary.afecciones["via_pecuaria"];
    assert_eq!(entries.len(), 1);
    // À 20 m: le prédicat passe, la surface intersectée reste nulle
    assert_eq!(entries[0].area_m2, 0.0);
}

#[tokio::test]
async fn test_batch_isolates_bad_reference() {
    let (_dir, service) = service_over_tempdir();

    let refcats: Vec<String> = vec![
        "04001A00100001".into(),
        "04001A00100002".into(),
        "04001A00100003".into(),
        "04001A00100004".into(),
        "99999Z99999999".into(),
    ];

    let report = service
        .get_affectations_batch(&refcats, &AnalysisParams::default())
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.processed, 4);
    assert_eq!(report.failed, 1);

    match &report.results["99999Z99999999"] {
        BatchOutcome::Failure { error } => assert_eq!(error.kind, "not_found"),
        BatchOutcome::Success(_) => panic!("expected a per-item failure"),
    }
}

#[tokio::test]
async fn test_province_summary_over_files() {
    let (_dir, service) = service_over_tempdir();

    let summary = service
        .get_province_summary("04", &["natura".into()])
        .await
        .unwrap();

    assert_eq!(summary.total_parcels, 4);
    assert_eq!(summary.total_area_m2, 40_000.0);
    assert_eq!(summary.by_layer.len(), 1);
    // Parcelles 1 (entière) et 2 (moitié): 15 000 m² sur 40 000
    assert_eq!(summary.by_layer[0].parcels_affected, 2);
    assert!((summary.by_layer[0].area_m2 - 15_000.0).abs() < 1.0);
    assert!((summary.by_layer[0].percent_of_province - 37.5).abs() < 0.1);
}

#[tokio::test]
async fn test_unknown_layer_reported_not_found() {
    let (_dir, service) = service_over_tempdir();

    let err = service
        .get_affectations(
            "04001A00100001",
            &AnalysisParams {
                layers: vec!["no_existe".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "not_found");
}
