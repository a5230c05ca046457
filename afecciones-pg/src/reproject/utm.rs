//! Projection transverse de Mercator directe (géographique → UTM)
//!
//! Couvre les zones UTM espagnoles sur ellipsoïde GRS80 (ETRS89):
//! - Zone 28N (EPSG:25828) - Canarias occidentales
//! - Zone 29N (EPSG:25829) - Galicia, Canarias orientales
//! - Zone 30N (EPSG:25830) - Péninsule, projection de travail
//! - Zone 31N (EPSG:25831) - Cataluña, Baleares

use anyhow::Result;

/// Ellipsoïde GRS80 (ETRS89)
/// Note: quasi identique à WGS84, différence < 0.1mm
pub struct GRS80;

impl GRS80 {
    /// Demi-grand axe (rayon équatorial) en mètres
    pub const A: f64 = 6378137.0;

    /// Aplatissement
    pub const F: f64 = 1.0 / 298.257222101;

    /// Première excentricité au carré
    pub const E2: f64 = 2.0 * Self::F - Self::F * Self::F;

    /// Deuxième excentricité au carré
    pub const EP2: f64 = Self::E2 / (1.0 - Self::E2);
}

/// Convertit des coordonnées géographiques (degrés) vers UTM nord
pub fn geographic_to_utm(lon_deg: f64, lat_deg: f64, zone: u32) -> Result<(f64, f64)> {
    if !(1..=60).contains(&zone) {
        anyhow::bail!("Invalid UTM zone: {}", zone);
    }

    let a = GRS80::A;
    let e2 = GRS80::E2;
    let ep2 = GRS80::EP2;

    // Paramètres UTM
    let k0 = 0.9996; // Facteur d'échelle
    let x0 = 500000.0; // False easting

    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();

    // Longitude centrale de la zone
    let lon0 = ((zone as f64) * 6.0 - 183.0).to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = a / (1.0 - e2 * sin_lat.powi(2)).sqrt();
    let t = tan_lat.powi(2);
    let c = ep2 * cos_lat.powi(2);
    let big_a = (lon - lon0) * cos_lat;

    // Arc méridien depuis l'équateur
    let m = a
        * ((1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e2.powi(2) / 32.0 + 45.0 * e2.powi(3) / 1024.0)
                * (2.0 * lat).sin()
            + (15.0 * e2.powi(2) / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e2.powi(3) / 3072.0) * (6.0 * lat).sin());

    let x = k0
        * n
        * (big_a
            + (1.0 - t + c) * big_a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t.powi(2) + 72.0 * c - 58.0 * ep2) * big_a.powi(5) / 120.0)
        + x0;

    let y = k0
        * (m + n
            * tan_lat
            * (big_a.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c.powi(2)) * big_a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t.powi(2) + 600.0 * c - 330.0 * ep2) * big_a.powi(6)
                    / 720.0));

    Ok((x, y))
}
