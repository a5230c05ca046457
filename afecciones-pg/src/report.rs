//! Rapport de synchronisation avec graceful degradation
//!
//! Collecte les compteurs et erreurs d'un sync pour l'affichage console
//! et la sortie JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::sync::SyncStrategy;

/// Statut global d'une synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Sync réussi sans perte
    Synced,
    /// Sync réussi mais des features ont été skippées
    PartialSuccess,
    /// Sync échoué; la table finale n'a pas été touchée
    Error,
}

/// Rapport complet d'une synchronisation de colección
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Colección synchronisée
    pub collection_id: String,
    /// Stratégie d'écriture utilisée
    pub strategy: SyncStrategy,
    /// Durée totale
    pub duration_secs: f64,
    /// Statut global
    pub status: SyncOutcome,

    /// Nombre de pages récupérées
    pub pages: usize,
    /// Features reçues de la source
    pub features_fetched: usize,
    /// Lignes écrites dans la table finale par le swap
    pub features_written: u64,
    /// Features skippées (géométrie invalide, reprojection impossible)
    pub features_skipped: usize,
    /// Nombre de features de la colección après le swap
    pub feature_count: i64,

    /// Erreurs rencontrées
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Crée un rapport vierge pour une colección
    pub fn new(collection_id: &str, strategy: SyncStrategy) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            strategy,
            duration_secs: 0.0,
            status: SyncOutcome::Synced,
            pages: 0,
            features_fetched: 0,
            features_written: 0,
            features_skipped: 0,
            feature_count: 0,
            errors: Vec::new(),
        }
    }

    /// Enregistre une feature skippée
    pub fn record_skip(&mut self) {
        self.features_skipped += 1;
    }

    /// Enregistre une erreur
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Définit la durée du sync
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = if !self.errors.is_empty() {
            SyncOutcome::Error
        } else if self.features_skipped > 0 {
            SyncOutcome::PartialSuccess
        } else {
            SyncOutcome::Synced
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SYNC REPORT - {}", self.collection_id);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Strategy: {}", self.strategy);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!("Pages: {}", self.pages);
        println!(
            "Features: {} fetched, {} written, {} skipped",
            self.features_fetched, self.features_written, self.features_skipped
        );
        println!("Collection rows after swap: {}", self.feature_count);

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                println!("  {}", e);
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Résumé compact sur une ligne
    pub fn summary(&self) -> String {
        format!(
            "{}: {:?}, {} fetched, {} written, {} skipped, {} errors",
            self.collection_id,
            self.status,
            self.features_fetched,
            self.features_written,
            self.features_skipped,
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_synced() {
        let mut report = SyncReport::new("biodiversidad:enp", SyncStrategy::Replace);
        report.features_fetched = 10;
        report.features_written = 10;
        report.finalize();
        assert_eq!(report.status, SyncOutcome::Synced);
    }

    #[test]
    fn test_finalize_partial_on_skips() {
        let mut report = SyncReport::new("biodiversidad:enp", SyncStrategy::Replace);
        report.features_fetched = 10;
        report.features_written = 8;
        report.record_skip();
        report.record_skip();
        report.finalize();
        assert_eq!(report.status, SyncOutcome::PartialSuccess);
        assert_eq!(report.features_skipped, 2);
    }

    #[test]
    fn test_finalize_error() {
        let mut report = SyncReport::new("biodiversidad:enp", SyncStrategy::Upsert);
        report.record_error("page fetch failed at offset 15000");
        report.finalize();
        assert_eq!(report.status, SyncOutcome::Error);
    }

    #[test]
    fn test_summary_mentions_collection() {
        let mut report = SyncReport::new("ganaderia:vias_pecuarias", SyncStrategy::Append);
        report.features_fetched = 100;
        let summary = report.summary();
        assert!(summary.contains("ganaderia:vias_pecuarias"));
        assert!(summary.contains("100 fetched"));
    }
}
