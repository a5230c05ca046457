//! # afecciones-pg
//!
//! Synchronisation de colecciones MAPAMA vers PostGIS et analyse
//! d'afecciones cadastrales (croisement parcelle × capas réglementaires).
//!
//! ## Features
//!
//! - Sync paginé avec retry/backoff, staging UNLOGGED et swap atomique
//! - Schéma générique unique (une table clé collection/feature, pas de
//!   tables dynamiques)
//! - Analyseur avec buffer, prédicats intersects/contains/within/dwithin
//!   et seuils de bruit
//! - Backend PostGIS et fallback fichier GeoJSON, même contrat observable
//! - CLI simple
//!
//! ## Usage CLI
//!
//! ```bash
//! # Sync d'une colección depuis un répertoire GeoJSON
//! afecciones-pg sync biodiversidad:red_natura_2000 --source-dir ./descargas
//!
//! # Analyse d'une parcelle
//! afecciones-pg analyze 04001A00100001 --layers biodiversidad:red_natura_2000 --buffer 100
//!
//! # État des synchronisations
//! afecciones-pg status --namespace biodiversidad
//! ```

pub mod analyzer;
pub mod backend;
pub mod cli;
pub mod config;
pub mod report;
pub mod reproject;
pub mod service;
pub mod store;
pub mod sync;

pub use analyzer::{Analysis, Analyzer};
pub use backend::{DatabaseBackend, FileBackend, SpatialBackend};
pub use report::{SyncOutcome, SyncReport};
pub use service::AffectationService;
pub use store::pool::{create_pool, DatabaseConfig};
pub use sync::{CancelToken, SyncStrategy, Synchronizer};
