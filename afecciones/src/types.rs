//! Types de données pour l'analyse d'afecciones

use std::fmt;
use std::str::FromStr;

use geo::{Area, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::RefCat;

/// Projection de travail: ETRS89 / UTM 30N, métrique, Espagne péninsulaire
pub const WORKING_EPSG: u32 = 25830;

/// Une parcelle cadastrale résolue, géométrie en projection de travail
#[derive(Debug, Clone)]
pub struct Parcel {
    /// Référence cadastrale
    pub refcat: RefCat,

    /// Province (attribut descriptif)
    pub provincia: Option<String>,

    /// Municipio (attribut descriptif)
    pub municipio: Option<String>,

    /// Usage du sol
    pub uso: Option<String>,

    /// Géométrie polygonale, EPSG:25830
    pub geometry: MultiPolygon<f64>,
}

impl Parcel {
    /// Surface en m², toujours dérivée de la géométrie
    pub fn area_m2(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Catégorie réglementaire d'une capa
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCategory {
    Biodiversidad,
    Hidrografia,
    ViasPecuarias,
    MontesPublicos,
    Planeamiento,
    Otros,
}

impl Default for LayerCategory {
    fn default() -> Self {
        Self::Otros
    }
}

/// Type de géométrie dominant d'une capa
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    #[default]
    Polygon,
    Line,
    Point,
}

/// Une capa de restriction (colección sincronizada)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintLayer {
    /// Identifiant stable de la colección (ex: `biodiversidad:habitat_art17`)
    pub name: String,

    /// Titre lisible
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub category: LayerCategory,

    #[serde(default)]
    pub geometry: GeometryKind,

    /// EPSG de la source externe
    #[serde(default = "default_source_epsg")]
    pub source_epsg: u32,

    /// Capa incluse dans les analyses "toutes capas"
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_source_epsg() -> u32 {
    4326
}

fn default_active() -> bool {
    true
}

/// Prédicat spatial demandé par l'appelant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntersectionKind {
    /// La parcelle (éventuellement bufferisée) intersecte la feature
    #[default]
    Intersects,
    /// La parcelle contient la feature
    Contains,
    /// La parcelle est contenue dans la feature
    Within,
    /// La feature est à moins de `buffer_m` mètres de la parcelle
    Dwithin,
}

impl IntersectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intersects => "intersects",
            Self::Contains => "contains",
            Self::Within => "within",
            Self::Dwithin => "dwithin",
        }
    }
}

impl fmt::Display for IntersectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntersectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intersects" => Ok(Self::Intersects),
            "contains" => Ok(Self::Contains),
            "within" => Ok(Self::Within),
            "dwithin" => Ok(Self::Dwithin),
            _ => Err(format!(
                "invalid intersection type: {}. Use: intersects, contains, within, dwithin",
                s
            )),
        }
    }
}

/// Paramètres d'une analyse d'afecciones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Capas demandées; vide = toutes les capas actives synchronisées
    #[serde(default)]
    pub layers: Vec<String>,

    /// Buffer en mètres (dilatation pour intersects/contains/within,
    /// distance pour dwithin)
    #[serde(default)]
    pub buffer_m: f64,

    #[serde(default)]
    pub intersection: IntersectionKind,

    /// Seuil de bruit: surface minimale en m²
    #[serde(default)]
    pub min_area_m2: f64,

    /// Seuil de bruit: pourcentage minimal
    #[serde(default)]
    pub min_percent: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            buffer_m: 0.0,
            intersection: IntersectionKind::Intersects,
            min_area_m2: 0.0,
            min_percent: 0.0,
        }
    }
}

impl AnalysisParams {
    /// Normalise les valeurs numériques (les négatifs comptent comme 0)
    pub fn normalized(mut self) -> Self {
        self.buffer_m = self.buffer_m.max(0.0);
        self.min_area_m2 = self.min_area_m2.max(0.0);
        self.min_percent = self.min_percent.clamp(0.0, 100.0);
        self
    }
}

/// Résultat d'afección pour un couple parcelle × feature de capa
///
/// `percent` est borné à [0,100] mais non arrondi: l'arrondi à 2 décimales
/// appartient à la couche de présentation.
#[derive(Debug, Clone, Serialize)]
pub struct AffectationResult {
    /// Nom de la capa
    pub layer: String,

    /// Identifiant de la feature dans la capa
    pub feature_id: String,

    /// Prédicat ayant produit ce résultat
    pub intersection: IntersectionKind,

    /// Surface intersectée en m²
    pub area_m2: f64,

    /// Pourcentage de la surface (éventuellement bufferisée) de la parcelle
    pub percent: f64,

    /// Attributs de la feature de capa
    pub attributes: serde_json::Map<String, serde_json::Value>,
}
