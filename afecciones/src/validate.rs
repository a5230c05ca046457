//! Validation de géométries avant stockage ou analyse
//!
//! Les features invalides sont skippées et comptées pendant une
//! synchronisation; en analyse mono-parcelle elles sont signalées.

use geo::{CoordsIter, Geometry, LineString, MultiPolygon, Polygon};
use tracing::warn;

use crate::AfeccionError;

/// Valide une géométrie: coordonnées finies, non vide, anneaux fermés
/// d'au moins 4 points pour les polygones.
pub fn validate_geometry(entity_id: &str, geom: &Geometry<f64>) -> Result<(), AfeccionError> {
    if geom.coords_count() == 0 {
        return Err(AfeccionError::invalid_geometry(entity_id, "empty geometry"));
    }

    for coord in geom.coords_iter() {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(AfeccionError::invalid_geometry(
                entity_id,
                "non-finite coordinate",
            ));
        }
    }

    match geom {
        Geometry::Polygon(p) => validate_polygon(entity_id, p),
        Geometry::MultiPolygon(mp) => {
            if mp.0.is_empty() {
                return Err(AfeccionError::invalid_geometry(
                    entity_id,
                    "empty multipolygon",
                ));
            }
            for p in &mp.0 {
                validate_polygon(entity_id, p)?;
            }
            Ok(())
        }
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                validate_geometry(entity_id, g)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_polygon(entity_id: &str, polygon: &Polygon<f64>) -> Result<(), AfeccionError> {
    validate_ring(entity_id, polygon.exterior())?;
    for interior in polygon.interiors() {
        validate_ring(entity_id, interior)?;
    }
    Ok(())
}

fn validate_ring(entity_id: &str, ring: &LineString<f64>) -> Result<(), AfeccionError> {
    if ring.0.len() < 4 {
        return Err(AfeccionError::invalid_geometry(
            entity_id,
            format!("ring with {} points (minimum 4)", ring.0.len()),
        ));
    }
    if ring.0.first() != ring.0.last() {
        // Les constructeurs geo ferment les anneaux; un anneau ouvert ici
        // vient d'une source qui a contourné la validation amont.
        warn!(entity_id = entity_id, "Unclosed ring rejected");
        return Err(AfeccionError::invalid_geometry(entity_id, "unclosed ring"));
    }
    Ok(())
}

/// Extrait la partie polygonale d'une géométrie, si elle en a une
pub fn to_polygonal(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => (!mp.0.is_empty()).then(|| mp.clone()),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<Polygon<f64>> = gc
                .0
                .iter()
                .filter_map(to_polygonal)
                .flat_map(|mp| mp.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}
