//! Référence cadastrale espagnole (refcat)
//!
//! Deux formats valides:
//! - 14 caractères: parcelle (ex: `04001A00100001`)
//! - 20 caractères: bien immobilier complet, parcelle + charge + contrôle
//!
//! Les références rustiques commencent par le code province (2 chiffres)
//! suivi du code municipio (3 chiffres).

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::AfeccionError;

/// Référence cadastrale validée, toujours en majuscules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RefCat(String);

impl RefCat {
    /// Parse et valide une référence cadastrale
    pub fn parse(raw: &str) -> Result<Self, AfeccionError> {
        let value = raw.trim().to_ascii_uppercase();

        if value.len() != 14 && value.len() != 20 {
            return Err(AfeccionError::invalid_refcat(
                raw,
                format!("expected 14 or 20 characters, got {}", value.len()),
            ));
        }

        if let Some(bad) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(AfeccionError::invalid_refcat(
                raw,
                format!("non-alphanumeric character '{}'", bad),
            ));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Référence du bien immobilier complet (20 caractères)
    pub fn is_full(&self) -> bool {
        self.0.len() == 20
    }

    /// Les 14 premiers caractères: la parcelle porteuse
    pub fn parcel_ref(&self) -> &str {
        &self.0[..14]
    }

    /// Code province (2 chiffres) pour les références rustiques
    pub fn provincia_code(&self) -> Option<&str> {
        let code = &self.0[..2];
        code.chars().all(|c| c.is_ascii_digit()).then_some(code)
    }

    /// Code municipio (3 chiffres) pour les références rustiques
    pub fn municipio_code(&self) -> Option<&str> {
        self.provincia_code()?;
        let code = &self.0[2..5];
        code.chars().all(|c| c.is_ascii_digit()).then_some(code)
    }
}

impl fmt::Display for RefCat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefCat {
    type Err = AfeccionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rustic_14() {
        let r = RefCat::parse("04001A00100001").unwrap();
        assert_eq!(r.as_str(), "04001A00100001");
        assert!(!r.is_full());
        assert_eq!(r.provincia_code(), Some("04"));
        assert_eq!(r.municipio_code(), Some("001"));
    }

    #[test]
    fn test_parse_full_20() {
        let r = RefCat::parse("9872023VH5797S0001WX").unwrap();
        assert!(r.is_full());
        assert_eq!(r.parcel_ref(), "9872023VH5797S");
    }

    #[test]
    fn test_lowercase_normalized() {
        let r = RefCat::parse("04001a00100001").unwrap();
        assert_eq!(r.as_str(), "04001A00100001");
    }

    #[test]
    fn test_urban_has_no_provincia_code() {
        // Les références urbaines commencent par les coordonnées de la manzana
        let r = RefCat::parse("9872023VH5797S").unwrap();
        assert_eq!(r.provincia_code(), Some("98"));
        let r = RefCat::parse("A872023VH5797S").unwrap();
        assert_eq!(r.provincia_code(), None);
        assert_eq!(r.municipio_code(), None);
    }

    #[test]
    fn test_reject_wrong_length() {
        let err = RefCat::parse("04001A001").unwrap_err();
        assert_eq!(err.kind(), "invalid_refcat");
    }

    #[test]
    fn test_reject_bad_characters() {
        let err = RefCat::parse("04001A001000-1").unwrap_err();
        assert_eq!(err.kind(), "invalid_refcat");
    }

    #[test]
    fn test_trims_whitespace() {
        let r = RefCat::parse("  04001A00100001 ").unwrap();
        assert_eq!(r.as_str(), "04001A00100001");
    }
}
