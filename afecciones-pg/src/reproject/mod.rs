//! Reprojection des géométries sources vers la projection de travail
//!
//! Chemin pur Rust pour les sources géographiques (EPSG:4326/4258) vers les
//! zones UTM espagnoles (EPSG:25828-25831); PROJ en fallback pour tout le
//! reste, derrière le feature `reproject`.

pub mod utm;

use anyhow::{bail, Result};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

/// EPSG géographiques acceptés par le chemin pur Rust.
/// ETRS89 (4258) et WGS84 (4326) sont traités identiquement à cette
/// précision (GRS80 ≈ WGS84).
const GEOGRAPHIC_SOURCES: [u32; 2] = [4326, 4258];

/// Reprojection source → projection de travail
pub enum Reprojector {
    /// Pas de reprojection (source == cible)
    Identity,
    /// Géographique → UTM nord (pure Rust)
    Utm { zone: u32 },
    /// Reprojection via PROJ (si feature activée)
    #[cfg(feature = "reproject")]
    Proj(ProjReprojector),
}

impl Reprojector {
    /// Crée un reprojector entre deux EPSG
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        if source_epsg == target_epsg {
            return Ok(Self::Identity);
        }

        if GEOGRAPHIC_SOURCES.contains(&source_epsg) && (25828..=25831).contains(&target_epsg) {
            return Ok(Self::Utm {
                zone: target_epsg - 25800,
            });
        }

        #[cfg(feature = "reproject")]
        {
            return Ok(Self::Proj(ProjReprojector::new(source_epsg, target_epsg)?));
        }

        #[cfg(not(feature = "reproject"))]
        bail!(
            "Reprojection EPSG:{} → EPSG:{} not supported.\n\
             Supported without PROJ: sources 4326/4258 (geographic), targets 25828-25831 (UTM ETRS89).\n\
             For other projections, build with: cargo build --features reproject",
            source_epsg,
            target_epsg
        );
    }

    /// Transforme une géométrie
    pub fn transform_geometry(&self, geom: &Geometry<f64>) -> Result<Geometry<f64>> {
        match self {
            Self::Identity => Ok(geom.clone()),
            Self::Utm { zone } => transform_with(geom, &|c| {
                let (x, y) = utm::geographic_to_utm(c.x, c.y, *zone)?;
                Ok(Coord { x, y })
            }),
            #[cfg(feature = "reproject")]
            Self::Proj(p) => transform_with(geom, &|c| p.transform_coord(c)),
        }
    }

    /// Description du chemin de reprojection utilisé
    pub fn description(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Utm { .. } => "transverse mercator (pure Rust)",
            #[cfg(feature = "reproject")]
            Self::Proj(_) => "proj (PROJ library)",
        }
    }
}

/// Reprojection via la bibliothèque PROJ
#[cfg(feature = "reproject")]
pub struct ProjReprojector {
    proj: proj::Proj,
}

#[cfg(feature = "reproject")]
impl ProjReprojector {
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        use anyhow::Context;
        let source = format!("EPSG:{}", source_epsg);
        let target = format!("EPSG:{}", target_epsg);
        let proj = proj::Proj::new_known_crs(&source, &target, None).context(format!(
            "Failed to create projection from {} to {}",
            source, target
        ))?;
        Ok(Self { proj })
    }

    fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        use anyhow::Context;
        let (x, y) = self
            .proj
            .convert((coord.x, coord.y))
            .context("Coordinate transformation failed")?;
        Ok(Coord { x, y })
    }
}

type CoordFn<'a> = &'a dyn Fn(Coord<f64>) -> Result<Coord<f64>>;

/// Applique une transformation de coordonnées à chaque type de géométrie
fn transform_with(geom: &Geometry<f64>, f: CoordFn<'_>) -> Result<Geometry<f64>> {
    match geom {
        Geometry::Point(p) => Ok(Geometry::Point(Point::from(f(p.0)?))),
        Geometry::LineString(ls) => Ok(Geometry::LineString(transform_linestring(ls, f)?)),
        Geometry::Polygon(p) => Ok(Geometry::Polygon(transform_polygon(p, f)?)),
        Geometry::MultiPoint(mp) => {
            let points: Result<Vec<Point<f64>>> =
                mp.0.iter().map(|p| Ok(Point::from(f(p.0)?))).collect();
            Ok(Geometry::MultiPoint(MultiPoint::new(points?)))
        }
        Geometry::MultiLineString(mls) => {
            let lines: Result<Vec<LineString<f64>>> =
                mls.0.iter().map(|ls| transform_linestring(ls, f)).collect();
            Ok(Geometry::MultiLineString(MultiLineString::new(lines?)))
        }
        Geometry::MultiPolygon(mp) => {
            let polys: Result<Vec<Polygon<f64>>> =
                mp.0.iter().map(|p| transform_polygon(p, f)).collect();
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polys?)))
        }
        // Types non supportés: retourner tel quel
        _ => Ok(geom.clone()),
    }
}

fn transform_linestring(ls: &LineString<f64>, f: CoordFn<'_>) -> Result<LineString<f64>> {
    let coords: Result<Vec<Coord<f64>>> = ls.0.iter().map(|c| f(*c)).collect();
    Ok(LineString::new(coords?))
}

fn transform_polygon(p: &Polygon<f64>, f: CoordFn<'_>) -> Result<Polygon<f64>> {
    let exterior = transform_linestring(p.exterior(), f)?;
    let interiors: Result<Vec<LineString<f64>>> = p
        .interiors()
        .iter()
        .map(|ls| transform_linestring(ls, f))
        .collect();
    Ok(Polygon::new(exterior, interiors?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_identity() {
        let r = Reprojector::new(25830, 25830).unwrap();
        assert!(matches!(r, Reprojector::Identity));
        let p = Geometry::Point(Point::new(440_000.0, 4_474_000.0));
        assert_eq!(r.transform_geometry(&p).unwrap(), p);
    }

    #[test]
    fn test_geographic_to_working_projection() {
        let r = Reprojector::new(4326, 25830).unwrap();
        assert!(matches!(r, Reprojector::Utm { zone: 30 }));

        let madrid = Geometry::Point(Point::new(-3.7038, 40.4168));
        let projected = r.transform_geometry(&madrid).unwrap();
        if let Geometry::Point(p) = projected {
            assert!((p.x() - 440_300.0).abs() < 500.0, "x={}", p.x());
            assert!((p.y() - 4_474_200.0).abs() < 1000.0, "y={}", p.y());
        } else {
            panic!("expected a point");
        }
    }

    #[test]
    fn test_etrs89_geographic_accepted() {
        let r = Reprojector::new(4258, 25830).unwrap();
        assert!(matches!(r, Reprojector::Utm { zone: 30 }));
    }

    #[test]
    fn test_polygon_rings_preserved() {
        let r = Reprojector::new(4326, 25830).unwrap();
        let square = Geometry::Polygon(polygon![
            (x: -3.71, y: 40.41),
            (x: -3.70, y: 40.41),
            (x: -3.70, y: 40.42),
            (x: -3.71, y: 40.42),
        ]);
        let projected = r.transform_geometry(&square).unwrap();
        if let Geometry::Polygon(p) = projected {
            assert_eq!(p.exterior().0.len(), 5);
            // ~850 m de large à cette latitude
            let width = p.exterior().0[1].x - p.exterior().0[0].x;
            assert!((width - 850.0).abs() < 30.0, "width={}", width);
        } else {
            panic!("expected a polygon");
        }
    }

    #[cfg(not(feature = "reproject"))]
    #[test]
    fn test_unsupported_pair_rejected_without_proj() {
        assert!(Reprojector::new(2154, 25830).is_err());
    }
}
