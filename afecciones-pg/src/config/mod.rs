//! Registre des capas réglementaires
//!
//! Le registre porte ce que le stockage ne connaît pas: catégorie, type de
//! géométrie, EPSG source et flag d'activité de chaque colección. Preset
//! embarqué `mapama` + fichier JSON pour les déploiements qui en dévient.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use afecciones::{ConstraintLayer, GeometryKind, LayerCategory};

/// Registre principal: collection_id -> métadonnées de capa
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LayerRegistry {
    #[serde(flatten)]
    pub layers: HashMap<String, LayerEntry>,
}

/// Métadonnées d'une capa
#[derive(Debug, Deserialize, Serialize)]
pub struct LayerEntry {
    /// Titre lisible (ex: "Red Natura 2000")
    pub title: Option<String>,

    #[serde(default)]
    pub category: LayerCategory,

    #[serde(default)]
    pub geometry: GeometryKind,

    /// EPSG de la source externe
    #[serde(default = "default_source_epsg")]
    pub source_epsg: u32,

    /// Capa incluse quand l'analyse ne liste pas de capas
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_source_epsg() -> u32 {
    4326
}

fn default_active() -> bool {
    true
}

impl LayerRegistry {
    /// Charge un registre depuis un fichier JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read registry file: {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse registry JSON")
    }

    /// Charge un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "mapama" => serde_json::from_str(include_str!("presets/mapama.json"))
                .context("Failed to parse embedded registry"),
            _ => anyhow::bail!("Unknown preset: {}. Use: mapama", preset),
        }
    }

    /// Preset ou chemin de fichier, comme l'option `--registry` de la CLI
    pub fn resolve(spec: &str) -> Result<Self> {
        match spec {
            "mapama" => Self::from_preset(spec),
            _ => Self::load(Path::new(spec)),
        }
    }

    /// Capa connue du registre
    pub fn layer(&self, collection_id: &str) -> Option<ConstraintLayer> {
        self.layers.get(collection_id).map(|e| ConstraintLayer {
            name: collection_id.to_string(),
            title: e.title.clone(),
            category: e.category,
            geometry: e.geometry,
            source_epsg: e.source_epsg,
            active: e.active,
        })
    }

    /// Capa du registre, ou défauts raisonnables pour une colección
    /// synchronisée hors registre
    pub fn layer_or_default(&self, collection_id: &str) -> ConstraintLayer {
        self.layer(collection_id).unwrap_or(ConstraintLayer {
            name: collection_id.to_string(),
            title: None,
            category: LayerCategory::Otros,
            geometry: GeometryKind::Polygon,
            source_epsg: default_source_epsg(),
            active: true,
        })
    }
}

/// Valide la forme d'un identifiant de colección (`namespace:nombre` ou nom nu)
pub fn validate_collection_id(collection_id: &str) -> Result<()> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_-]+(:[A-Za-z0-9_-]+)?$").unwrap()
    });
    if re.is_match(collection_id) {
        Ok(())
    } else {
        anyhow::bail!(
            "Invalid collection id '{}': expected 'namespace:name' or a bare name",
            collection_id
        )
    }
}

/// Namespace d'un identifiant de colección (`biodiversidad:x` -> `biodiversidad`)
pub fn namespace_of(collection_id: &str) -> Option<&str> {
    collection_id.split_once(':').map(|(ns, _)| ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_preset_parses() {
        let registry = LayerRegistry::from_preset("mapama").unwrap();
        assert!(!registry.layers.is_empty());

        let natura = registry.layer("biodiversidad:red_natura_2000").unwrap();
        assert_eq!(natura.category, LayerCategory::Biodiversidad);
        assert!(natura.active);

        let vias = registry.layer("ganaderia:vias_pecuarias").unwrap();
        assert_eq!(vias.geometry, GeometryKind::Line);
    }

    #[test]
    fn test_unknown_preset_rejected() {
        assert!(LayerRegistry::from_preset("full").is_err());
    }

    #[test]
    fn test_layer_or_default() {
        let registry = LayerRegistry::default();
        let layer = registry.layer_or_default("agua:embalses");
        assert_eq!(layer.name, "agua:embalses");
        assert_eq!(layer.source_epsg, 4326);
        assert!(layer.active);
    }

    #[test]
    fn test_collection_id_validation() {
        assert!(validate_collection_id("biodiversidad:red_natura_2000").is_ok());
        assert!(validate_collection_id("habitats").is_ok());
        assert!(validate_collection_id("a:b:c").is_err());
        assert!(validate_collection_id("drop table;").is_err());
        assert!(validate_collection_id("").is_err());
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("biodiversidad:habitat_art17"), Some("biodiversidad"));
        assert_eq!(namespace_of("habitats"), None);
    }
}
