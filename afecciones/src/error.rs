//! Types d'erreurs pour le crate afecciones

use std::time::Duration;

use thiserror::Error;

/// Erreurs pouvant survenir lors d'une analyse d'afecciones
#[derive(Debug, Error)]
pub enum AfeccionError {
    /// Parcelle absente du stockage
    #[error("parcel {0} not found")]
    ParcelNotFound(String),

    /// Capa demandée absente ou jamais synchronisée
    #[error("layer {0} not found")]
    LayerNotFound(String),

    /// Référence cadastrale mal formée
    #[error("invalid cadastral reference '{value}': {reason}")]
    InvalidRefcat { value: String, reason: String },

    /// Géométrie invalide ou dégénérée
    #[error("invalid geometry for {entity_id}: {reason}")]
    InvalidGeometry { entity_id: String, reason: String },

    /// Ni la base spatiale ni le fallback fichier ne répondent
    #[error("spatial backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Requête interrompue par le timeout par requête
    #[error("query timed out after {0:?}")]
    UpstreamTimeout(Duration),
}

impl AfeccionError {
    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de référence cadastrale invalide
    pub fn invalid_refcat(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRefcat {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Kind machine-readable, stable pour les appelants
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParcelNotFound(_) | Self::LayerNotFound(_) => "not_found",
            Self::InvalidRefcat { .. } => "invalid_refcat",
            Self::InvalidGeometry { .. } => "invalid_geometry",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::UpstreamTimeout(_) => "upstream_timeout",
        }
    }

    /// Seul `BackendUnavailable` est fatal pour la requête courante;
    /// tout le reste s'isole par élément dans les traitements par lot.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AfeccionError::ParcelNotFound("x".into()).kind(), "not_found");
        assert_eq!(AfeccionError::LayerNotFound("x".into()).kind(), "not_found");
        assert_eq!(
            AfeccionError::invalid_refcat("zz", "too short").kind(),
            "invalid_refcat"
        );
        assert_eq!(
            AfeccionError::invalid_geometry("f1", "empty ring").kind(),
            "invalid_geometry"
        );
        assert_eq!(
            AfeccionError::UpstreamTimeout(Duration::from_secs(30)).kind(),
            "upstream_timeout"
        );
    }

    #[test]
    fn test_only_backend_unavailable_is_fatal() {
        assert!(AfeccionError::BackendUnavailable("down".into()).is_fatal());
        assert!(!AfeccionError::ParcelNotFound("x".into()).is_fatal());
        assert!(!AfeccionError::UpstreamTimeout(Duration::from_secs(1)).is_fatal());
    }
}
