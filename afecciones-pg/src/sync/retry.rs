//! Retry avec backoff exponentiel pour les fetchs de pages
//!
//! Seules les erreurs passagères (timeout, réseau) sont retentées; une
//! erreur définitive remonte immédiatement. Le backoff double à chaque
//! tentative.

use std::time::Duration;

use tracing::warn;

use super::source::{FeaturePage, FeatureSource, SourceError};

/// Politique de retry bornée
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Nombre maximal de tentatives avant abandon
    pub max_attempts: u32,

    /// Backoff initial (doublé à chaque tentative)
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Fetch d'une page avec retries
    pub async fn fetch_page(
        &self,
        source: &dyn FeatureSource,
        collection_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<FeaturePage, SourceError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1u32;

        loop {
            match source.fetch_page(collection_id, offset, limit).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        collection = collection_id,
                        offset = offset,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Page fetch failed, retrying: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::sync::source::CollectionInfo;

    /// Source scriptée: échoue `failures` fois puis renvoie une page vide
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        error_kind: fn(String) -> SourceError,
    }

    impl FlakySource {
        fn new(failures: u32, error_kind: fn(String) -> SourceError) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error_kind,
            }
        }
    }

    #[async_trait]
    impl FeatureSource for FlakySource {
        async fn collections(&self) -> Result<Vec<CollectionInfo>, SourceError> {
            Ok(vec![])
        }

        async fn fetch_page(
            &self,
            _collection_id: &str,
            _offset: u64,
            _limit: u64,
        ) -> Result<FeaturePage, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error_kind)("boom".to_string()))
            } else {
                Ok(FeaturePage {
                    features: vec![],
                    next_offset: None,
                })
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let source = FlakySource::new(2, SourceError::Transient);
        let page = fast_policy()
            .fetch_page(&source, "capa", 0, 100)
            .await
            .unwrap();
        assert!(page.features.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_the_error() {
        let source = FlakySource::new(10, SourceError::Timeout);
        let err = fast_policy()
            .fetch_page(&source, "capa", 0, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Timeout(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let source = FlakySource::new(10, SourceError::Fatal);
        let err = fast_policy()
            .fetch_page(&source, "capa", 0, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Fatal(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
