//! Moteur de superposition en mémoire
//!
//! Même sémantique que le chemin PostGIS: pré-filtre bbox, prédicat exact,
//! surface d'intersection en projection métrique. Utilisé par le backend
//! fichier et par les tests; les deux backends doivent rester
//! indistinguables pour l'appelant.

use std::cmp::Ordering;

use geo::{Area, BooleanOps, BoundingRect, Geometry, Intersects, MultiPolygon, Relate};

use crate::types::{AffectationResult, IntersectionKind};

/// Dilate une empreinte polygonale de `distance_m` mètres.
///
/// `distance_m <= 0` est l'identité: bufferiser à 0 doit produire
/// exactement les mêmes résultats que ne pas bufferiser.
pub fn dilate(footprint: &MultiPolygon<f64>, distance_m: f64) -> MultiPolygon<f64> {
    if distance_m <= 0.0 {
        footprint.clone()
    } else {
        geo_buffer::buffer_multi_polygon(footprint, distance_m)
    }
}

/// Pré-filtre grossier par rectangles englobants, l'équivalent de
/// l'opérateur `&&` de PostGIS avant le prédicat exact.
pub fn bbox_overlaps(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

/// Évalue le prédicat exact entre l'empreinte de test et une feature.
///
/// `Dwithin` ne passe pas par ici: l'appelant dilate l'empreinte de la
/// distance demandée et teste `Intersects`.
pub fn predicate_holds(
    footprint: &Geometry<f64>,
    feature: &Geometry<f64>,
    kind: IntersectionKind,
) -> bool {
    let matrix = footprint.relate(feature);
    match kind {
        IntersectionKind::Intersects | IntersectionKind::Dwithin => matrix.is_intersects(),
        IntersectionKind::Contains => matrix.is_contains(),
        IntersectionKind::Within => matrix.is_within(),
    }
}

/// Surface d'intersection en m² entre l'empreinte et une feature.
///
/// Les features non surfaciques (lignes, points) ont une surface nulle,
/// comme `ST_Area` côté base.
pub fn intersection_area_m2(footprint: &MultiPolygon<f64>, feature: &Geometry<f64>) -> f64 {
    match crate::validate::to_polygonal(feature) {
        Some(mp) => footprint.intersection(&mp).unsigned_area(),
        None => 0.0,
    }
}

/// Pourcentage de l'empreinte couvert par `area_m2`, borné à [0,100].
///
/// Non arrondi: les comparaisons de seuil utilisent la valeur exacte.
pub fn percent_of(area_m2: f64, footprint_area_m2: f64) -> f64 {
    if footprint_area_m2 <= 0.0 {
        return 0.0;
    }
    (area_m2 / footprint_area_m2 * 100.0).clamp(0.0, 100.0)
}

/// Arrondi à 2 décimales, réservé à la présentation
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Applique les seuils de bruit puis ordonne par pourcentage décroissant
/// (surface puis capa/feature comme départage, pour un ordre stable).
pub fn rank_results(results: &mut Vec<AffectationResult>, min_area_m2: f64, min_percent: f64) {
    results.retain(|r| r.area_m2 >= min_area_m2 && r.percent >= min_percent);
    results.sort_by(|a, b| {
        b.percent
            .partial_cmp(&a.percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.area_m2.partial_cmp(&a.area_m2).unwrap_or(Ordering::Equal))
            .then_with(|| a.layer.cmp(&b.layer))
            .then_with(|| a.feature_id.cmp(&b.feature_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    /// Parcelle carrée de 100 m × 100 m = 10 000 m²
    fn parcel() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ]])
    }

    fn result(layer: &str, feature_id: &str, area_m2: f64, percent: f64) -> AffectationResult {
        AffectationResult {
            layer: layer.to_string(),
            feature_id: feature_id.to_string(),
            intersection: IntersectionKind::Intersects,
            area_m2,
            percent,
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_full_containment_is_100_percent() {
        let parcel = parcel();
        let layer = Geometry::Polygon(polygon![
            (x: -50.0, y: -50.0),
            (x: 200.0, y: -50.0),
            (x: 200.0, y: 200.0),
            (x: -50.0, y: 200.0),
        ]);

        assert!(predicate_holds(
            &Geometry::MultiPolygon(parcel.clone()),
            &layer,
            IntersectionKind::Intersects
        ));

        let area = intersection_area_m2(&parcel, &layer);
        assert!((area - 10_000.0).abs() < 1.0, "area={}", area);
        assert!((percent_of(area, parcel.unsigned_area()) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_half_coverage_is_50_percent() {
        let parcel = parcel();
        // Couvre exactement la moitié est de la parcelle
        let layer = Geometry::Polygon(polygon![
            (x: 50.0, y: -10.0),
            (x: 300.0, y: -10.0),
            (x: 300.0, y: 110.0),
            (x: 50.0, y: 110.0),
        ]);

        let area = intersection_area_m2(&parcel, &layer);
        let percent = percent_of(area, parcel.unsigned_area());
        assert!((area - 5_000.0).abs() < 1.0, "area={}", area);
        assert!((round2(percent) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disjoint_is_zero() {
        let parcel = parcel();
        let far = Geometry::Polygon(polygon![
            (x: 1000.0, y: 1000.0),
            (x: 1010.0, y: 1000.0),
            (x: 1010.0, y: 1010.0),
            (x: 1000.0, y: 1010.0),
        ]);

        assert!(!bbox_overlaps(&Geometry::MultiPolygon(parcel.clone()), &far));
        assert_eq!(intersection_area_m2(&parcel, &far), 0.0);
    }

    #[test]
    fn test_non_areal_feature_has_zero_area() {
        let parcel = parcel();
        let line = Geometry::LineString(geo::LineString::new(vec![
            geo::Coord { x: -10.0, y: 50.0 },
            geo::Coord { x: 110.0, y: 50.0 },
        ]));

        assert!(predicate_holds(
            &Geometry::MultiPolygon(parcel.clone()),
            &line,
            IntersectionKind::Intersects
        ));
        assert_eq!(intersection_area_m2(&parcel, &line), 0.0);
    }

    #[test]
    fn test_contains_and_within_orientation() {
        let parcel = parcel();
        let inner = Geometry::Polygon(polygon![
            (x: 10.0, y: 10.0),
            (x: 20.0, y: 10.0),
            (x: 20.0, y: 20.0),
            (x: 10.0, y: 20.0),
        ]);
        let outer = Geometry::Polygon(polygon![
            (x: -50.0, y: -50.0),
            (x: 200.0, y: -50.0),
            (x: 200.0, y: 200.0),
            (x: -50.0, y: 200.0),
        ]);

        let fp = Geometry::MultiPolygon(parcel);
        assert!(predicate_holds(&fp, &inner, IntersectionKind::Contains));
        assert!(!predicate_holds(&fp, &inner, IntersectionKind::Within));
        assert!(predicate_holds(&fp, &outer, IntersectionKind::Within));
        assert!(!predicate_holds(&fp, &outer, IntersectionKind::Contains));
    }

    #[test]
    fn test_dilate_zero_is_identity() {
        let parcel = parcel();
        let dilated = dilate(&parcel, 0.0);
        assert_eq!(dilated, parcel);
        let dilated = dilate(&parcel, -5.0);
        assert_eq!(dilated, parcel);
    }

    #[test]
    fn test_dilate_grows_intersected_area() {
        let parcel = parcel();
        // Feature adjacente: touche la parcelle en x=100 et s'étend au-delà
        let layer = Geometry::Polygon(polygon![
            (x: 100.0, y: 0.0),
            (x: 300.0, y: 0.0),
            (x: 300.0, y: 100.0),
            (x: 100.0, y: 100.0),
        ]);

        let base = intersection_area_m2(&parcel, &layer);
        let buffered_10 = intersection_area_m2(&dilate(&parcel, 10.0), &layer);
        let buffered_50 = intersection_area_m2(&dilate(&parcel, 50.0), &layer);

        // Monotonie: plus de buffer, jamais moins de surface
        assert!(buffered_10 >= base);
        assert!(buffered_50 >= buffered_10);
        // 10 m de dilatation vers une feature adjacente de 100 m de haut:
        // environ 1 000 m² de recouvrement nouveau
        assert!(buffered_10 > 900.0, "buffered_10={}", buffered_10);
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(percent_of(200.0, 100.0), 100.0);
        assert_eq!(percent_of(-1.0, 100.0), 0.0);
        assert_eq!(percent_of(50.0, 0.0), 0.0);
    }

    #[test]
    fn test_round2_is_presentation_only() {
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn test_rank_filters_noise_and_orders() {
        let mut results = vec![
            result("capa_a", "f1", 500.0, 5.0),
            result("capa_b", "f2", 9_000.0, 90.0),
            result("capa_c", "f3", 2_000.0, 20.0),
        ];

        rank_results(&mut results, 0.0, 10.0);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].layer, "capa_b");
        assert_eq!(results[1].layer, "capa_c");
    }

    #[test]
    fn test_rank_min_area_threshold() {
        let mut results = vec![
            result("capa_a", "f1", 0.5, 80.0),
            result("capa_b", "f2", 100.0, 1.0),
        ];

        rank_results(&mut results, 1.0, 0.0);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].layer, "capa_b");
    }

    #[test]
    fn test_rank_stable_tie_break() {
        let mut results = vec![
            result("capa_b", "f2", 100.0, 10.0),
            result("capa_a", "f1", 100.0, 10.0),
        ];

        rank_results(&mut results, 0.0, 0.0);

        assert_eq!(results[0].layer, "capa_a");
        assert_eq!(results[1].layer, "capa_b");
    }
}
