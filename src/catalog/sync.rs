//! Consistency sync between job outcomes and catalog flags.
//!
//! Flag writes go through [`retry_with_backoff`], which retries storage
//! contention with exponential backoff plus jitter and lets every other
//! error through on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::models::CatalogError;
use super::store::CatalogStore;
use crate::config::CatalogSyncSettings;
use crate::server::metrics;

#[derive(Debug, Clone)]
pub struct ContentionRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ContentionRetry {
    pub fn new(settings: &CatalogSyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), jitter excluded.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_ceiling = self.base_delay.as_millis() as u64;
        let jitter = if jitter_ceiling > 0 {
            Duration::from_millis(rand::rng().random_range(0..jitter_ceiling))
        } else {
            Duration::ZERO
        };
        (base + jitter).min(self.max_delay)
    }
}

impl Default for ContentionRetry {
    fn default() -> Self {
        Self::new(&CatalogSyncSettings::default())
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &ContentionRetry,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.backoff_with_jitter(attempt);
                debug!(
                    "Retryable error on attempt {}/{}: {} (retrying in {:?})",
                    attempt, policy.max_attempts, err, delay
                );
                metrics::record_catalog_contention_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Flag writer used by the worker after every job outcome.
#[derive(Clone)]
pub struct CatalogSync {
    store: Arc<dyn CatalogStore>,
    retry: ContentionRetry,
}

impl CatalogSync {
    pub fn new(store: Arc<dyn CatalogStore>, retry: ContentionRetry) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub async fn set_downloaded(&self, song_id: &str, downloaded: bool) -> Result<(), CatalogError> {
        retry_with_backoff(&self.retry, CatalogError::is_contention, || {
            let store = self.store.clone();
            let song_id = song_id.to_string();
            async move { store.set_downloaded(&song_id, downloaded) }
        })
        .await
    }

    pub async fn set_local(&self, song_id: &str, local: bool) -> Result<(), CatalogError> {
        retry_with_backoff(&self.retry, CatalogError::is_contention, || {
            let store = self.store.clone();
            let song_id = song_id.to_string();
            async move { store.set_local(&song_id, local) }
        })
        .await
    }

    /// Writes both flags. The first failure is returned after both writes
    /// have been attempted.
    pub async fn mark(&self, song_id: &str, downloaded: bool, local: bool) -> Result<(), CatalogError> {
        let downloaded_result = self.set_downloaded(song_id, downloaded).await;
        let local_result = self.set_local(song_id, local).await;
        if let Err(e) = &downloaded_result {
            warn!("Failed to set downloaded={} for song {}: {}", downloaded, song_id, e);
        }
        if let Err(e) = &local_result {
            warn!("Failed to set local={} for song {}: {}", local, song_id, e);
        }
        downloaded_result.and(local_result)
    }
}
