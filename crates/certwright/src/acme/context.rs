//! Per-run state shared by the issuance components
//!
//! A [`RunContext`] is created for every run (one job invocation or one tick
//! of the scheduled loop) and passed to each operation. It owns the hosted
//! zone cache and the cancellation token that every wait races against.
//!
//! The cache keeps the provider's zone listing per registrable domain, so
//! every name under that domain picks its own zone from a single lookup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dns::HostedZone;
use super::error::AcmeError;

/// State scoped to a single run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Registrable domain -> zones listed by the provider
    zones: Arc<DashMap<String, Vec<HostedZone>>>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Create a context with its own cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context cancelled together with `cancel`
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            zones: Arc::default(),
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cached zone listing for a registrable domain
    pub fn cached_zones(&self, domain: &str) -> Option<Vec<HostedZone>> {
        self.zones.get(domain).map(|entry| entry.value().clone())
    }

    pub fn cache_zones(&self, domain: &str, zones: &[HostedZone]) {
        debug!(domain = %domain, zones = zones.len(), "Caching hosted zones");
        self.zones.insert(domain.to_string(), zones.to_vec());
    }

    pub fn cached_zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Sleep unless the run is cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<(), AcmeError> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Drive `future` to completion unless the run is cancelled first
    pub async fn guard<T, F>(&self, future: F) -> Result<T, AcmeError>
    where
        F: Future<Output = Result<T, AcmeError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AcmeError::Cancelled),
            result = future => result,
        }
    }
}
