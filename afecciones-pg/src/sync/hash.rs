//! Hash stable de géométrie pour la détection de changement en upsert
//!
//! Les anneaux de polygones sont normalisés pour commencer au vertex
//! lexicographiquement le plus petit: un polygone qui démarre à un vertex
//! différent entre deux syncs garde le même hash.

use blake3::Hasher;
use geo::{Coord, Geometry, LineString};

/// Calcule un hash stable d'une géométrie
pub fn geometry_hash(geom: &Geometry<f64>) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hash_geometry(&mut hasher, geom);
    *hasher.finalize().as_bytes()
}

fn hash_geometry(hasher: &mut Hasher, geom: &Geometry<f64>) {
    match geom {
        Geometry::Point(p) => {
            hasher.update(b"POINT");
            hash_coord(hasher, p.0);
        }
        Geometry::LineString(ls) => {
            hasher.update(b"LINESTRING");
            for coord in &ls.0 {
                hash_coord(hasher, *coord);
            }
        }
        Geometry::Polygon(p) => {
            hasher.update(b"POLYGON");
            hasher.update(b"EXT");
            hash_ring_normalized(hasher, p.exterior());
            for interior in p.interiors() {
                hasher.update(b"INT");
                hash_ring_normalized(hasher, interior);
            }
        }
        Geometry::MultiPoint(mp) => {
            hasher.update(b"MULTIPOINT");
            for point in &mp.0 {
                hash_coord(hasher, point.0);
            }
        }
        Geometry::MultiLineString(mls) => {
            hasher.update(b"MULTILINESTRING");
            for ls in &mls.0 {
                hasher.update(b"LS");
                for coord in &ls.0 {
                    hash_coord(hasher, *coord);
                }
            }
        }
        Geometry::MultiPolygon(mp) => {
            hasher.update(b"MULTIPOLYGON");
            for poly in &mp.0 {
                hasher.update(b"POLY");
                hasher.update(b"EXT");
                hash_ring_normalized(hasher, poly.exterior());
                for interior in poly.interiors() {
                    hasher.update(b"INT");
                    hash_ring_normalized(hasher, interior);
                }
            }
        }
        Geometry::GeometryCollection(gc) => {
            hasher.update(b"COLLECTION");
            for g in &gc.0 {
                hash_geometry(hasher, g);
            }
        }
        _ => {
            hasher.update(format!("{:?}", geom).as_bytes());
        }
    }
}

/// Hash un anneau en le normalisant pour commencer au vertex
/// lexicographiquement le plus petit (min x, puis min y)
fn hash_ring_normalized(hasher: &mut Hasher, ring: &LineString<f64>) {
    if ring.0.is_empty() {
        return;
    }

    // Ignorer le dernier point, identique au premier pour un anneau fermé
    let len = if ring.0.len() > 1 && ring.0.first() == ring.0.last() {
        ring.0.len() - 1
    } else {
        ring.0.len()
    };

    let mut min_idx = 0;
    for i in 1..len {
        let c = ring.0[i];
        let min = ring.0[min_idx];
        if (c.x, c.y) < (min.x, min.y) {
            min_idx = i;
        }
    }

    for i in 0..len {
        hash_coord(hasher, ring.0[(min_idx + i) % len]);
    }
}

fn hash_coord(hasher: &mut Hasher, coord: Coord<f64>) {
    hasher.update(&coord.x.to_le_bytes());
    hasher.update(&coord.y.to_le_bytes());
}
