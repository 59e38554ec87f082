//! Certificate renewal scheduler
//!
//! Finds stored certificates that expire inside the renewal window and hands
//! them to the orchestrator as one batch. Used once per job invocation or
//! periodically in watch mode.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::RunContext;
use super::error::AcmeError;
use super::orchestrator::Orchestrator;

/// Default check interval (12 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Certificates expiring before `now` (rounded to the hour) plus
/// `renew_before` are due
pub fn threshold(now: DateTime<Utc>, renew_before: TimeDelta) -> DateTime<Utc> {
    let rounded = now.duration_round(TimeDelta::hours(1)).unwrap_or(now);
    rounded + renew_before
}

/// Renews every stored certificate that is close to expiry
#[derive(Debug)]
pub struct RenewalScheduler {
    orchestrator: Arc<Orchestrator>,
    renew_before: TimeDelta,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, renew_before_days: u32) -> Self {
        Self {
            orchestrator,
            renew_before: TimeDelta::days(i64::from(renew_before_days)),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval used by [`run_periodic`](Self::run_periodic)
    ///
    /// The interval is clamped to a minimum of 1 hour.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Due threshold for a run starting now
    pub fn current_threshold(&self) -> DateTime<Utc> {
        threshold(Utc::now(), self.renew_before)
    }

    /// Known domains whose certificate expires strictly before `threshold`
    ///
    /// Domains whose expiry cannot be read are logged and left out.
    pub async fn due_domains(&self, threshold: DateTime<Utc>) -> Result<Vec<String>, AcmeError> {
        let domains = self.orchestrator.credentials().list_known_domains().await?;
        Ok(self.due_among(domains, threshold).await)
    }

    async fn due_among(&self, domains: Vec<String>, threshold: DateTime<Utc>) -> Vec<String> {
        let credentials = self.orchestrator.credentials();
        let mut due = Vec::new();

        for fqdn in domains {
            match credentials.expiry_of(&fqdn).await {
                Ok(expiry) if expiry < threshold => {
                    debug!(fqdn = %fqdn, expiry = %expiry, "Certificate due for renewal");
                    due.push(fqdn);
                }
                Ok(expiry) => {
                    debug!(fqdn = %fqdn, expiry = %expiry, "Certificate is still valid");
                }
                Err(e) => {
                    warn!(fqdn = %fqdn, error = %e, "Failed to read certificate expiry, skipping");
                }
            }
        }

        due
    }

    /// Renew everything that is due at `threshold`
    pub async fn run(&self, ctx: &RunContext, threshold: DateTime<Utc>) -> Result<(), AcmeError> {
        let domains = self.orchestrator.credentials().list_known_domains().await?;
        let known = domains.len();
        let due = self.due_among(domains, threshold).await;

        if due.is_empty() {
            info!(
                threshold = %threshold,
                "All of {} certificates are up to date", known
            );
            return Ok(());
        }

        info!(
            threshold = %threshold,
            "{} of {} certificates need refreshing", due.len(), known
        );
        self.orchestrator.renew_batch(ctx, &due).await
    }

    /// Check immediately, then every interval, until `cancel` fires
    ///
    /// Each check gets a fresh [`RunContext`]. Failures are logged and the
    /// loop carries on.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Running scheduled certificate renewal check");
            let ctx = RunContext::with_cancellation(cancel.child_token());

            if let Err(e) = self.run(&ctx, self.current_threshold()).await {
                error!(error = %e, "Certificate renewal check failed");
            }
        }

        info!("Certificate renewal scheduler stopped");
    }
}
