//! Accès PostgreSQL/PostGIS (pool, schéma, parcelles)

pub mod parcels;
pub mod pool;
pub mod schema;

use anyhow::Result;
use geo::Geometry;
use wkb::geom_to_wkb;

/// Convertit une géométrie geo en EWKB PostGIS (WKB + flag SRID)
pub fn geometry_to_ewkb(geom: &Geometry<f64>, srid: u32) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geom)
        .map_err(|e| anyhow::anyhow!("Failed to convert geometry to WKB: {:?}", e))?;

    if wkb.len() < 5 {
        anyhow::bail!("WKB too short: {} bytes", wkb.len());
    }

    let mut ewkb = Vec::with_capacity(wkb.len() + 4);
    ewkb.push(wkb[0]); // Byte order

    // Type avec flag SRID (0x20000000)
    let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];
    if wkb[0] == 1 {
        // Little endian
        let geom_type = u32::from_le_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_le_bytes());
        ewkb.extend_from_slice(&srid.to_le_bytes());
    } else {
        // Big endian
        let geom_type = u32::from_be_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_be_bytes());
        ewkb.extend_from_slice(&srid.to_be_bytes());
    }

    ewkb.extend_from_slice(&wkb[5..]);
    Ok(ewkb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Point};

    #[test]
    fn test_ewkb_carries_srid_flag() {
        let geom = Geometry::Point(Point::new(440_000.0, 4_474_000.0));
        let ewkb = geometry_to_ewkb(&geom, 25830).unwrap();

        // Little endian: type à l'offset 1, SRID à l'offset 5
        assert_eq!(ewkb[0], 1);
        let geom_type = u32::from_le_bytes([ewkb[1], ewkb[2], ewkb[3], ewkb[4]]);
        assert_ne!(geom_type & 0x2000_0000, 0);
        let srid = u32::from_le_bytes([ewkb[5], ewkb[6], ewkb[7], ewkb[8]]);
        assert_eq!(srid, 25830);
    }
}
