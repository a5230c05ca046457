//! # afecciones
//!
//! Types de domaine et moteur de superposition pour l'analyse d'afecciones
//! cadastrales espagnoles (croisement parcelle × capas réglementaires).
//!
//! ## Features
//!
//! - Référence cadastrale validée ([`RefCat`], 14 ou 20 caractères)
//! - Validation de géométries avant stockage ou analyse
//! - Superposition en mémoire avec la même sémantique que PostGIS
//!   (pré-filtre bbox, prédicat exact, surfaces en EPSG:25830)
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust
//! use afecciones::{overlay, RefCat};
//! use geo::{polygon, Area, Geometry, MultiPolygon};
//!
//! let refcat = RefCat::parse("04001A00100001").unwrap();
//! assert_eq!(refcat.provincia_code(), Some("04"));
//!
//! let parcel = MultiPolygon::new(vec![polygon![
//!     (x: 0.0, y: 0.0), (x: 100.0, y: 0.0),
//!     (x: 100.0, y: 100.0), (x: 0.0, y: 100.0),
//! ]]);
//! let capa = Geometry::Polygon(polygon![
//!     (x: 50.0, y: 0.0), (x: 150.0, y: 0.0),
//!     (x: 150.0, y: 100.0), (x: 50.0, y: 100.0),
//! ]);
//!
//! let area = overlay::intersection_area_m2(&parcel, &capa);
//! let percent = overlay::percent_of(area, parcel.unsigned_area());
//! assert_eq!(overlay::round2(percent), 50.0);
//! ```

pub mod error;
pub mod overlay;
pub mod refcat;
pub mod types;
pub mod validate;

pub use error::AfeccionError;
pub use refcat::RefCat;
pub use types::{
    AffectationResult, AnalysisParams, ConstraintLayer, GeometryKind, IntersectionKind,
    LayerCategory, Parcel, WORKING_EPSG,
};
