//! Job entry point
//!
//! A job event names one domain to issue, or none to renew everything that
//! is due:
//!
//! ```json
//! { "fqdn": "www.example.com" }
//! { "fqdn": "" }
//! ```
//!
//! Failures are reported through the configured [`Notifier`] and returned.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::acme::dns::{HickoryTxtResolver, PropagationSettings, WebhookDnsProvider};
use crate::acme::{
    AcmeClient, AcmeError, ChallengeRecordManager, CredentialStore, Orchestrator,
    RenewalScheduler, RunContext,
};
use crate::notify::{self, notify_error, Notifier};
use crate::store::FsObjectStore;
use certwright_config::Config;

/// Subject used when a renewal run fails
pub const RENEWAL_FAILED_SUBJECT: &str = "Error renewing certificates";

/// Request handled by one job invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Domain to issue; empty renews all due certificates
    #[serde(default)]
    pub fqdn: String,
}

impl JobEvent {
    pub fn renew_all() -> Self {
        Self::default()
    }

    pub fn issue(fqdn: impl Into<String>) -> Self {
        Self { fqdn: fqdn.into() }
    }

    pub fn is_renewal(&self) -> bool {
        self.fqdn.trim().is_empty()
    }
}

/// Fully wired renewal job
#[derive(Debug)]
pub struct Job {
    orchestrator: Arc<Orchestrator>,
    scheduler: RenewalScheduler,
    notifier: Box<dyn Notifier>,
}

impl Job {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        scheduler: RenewalScheduler,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            notifier,
        }
    }

    /// Build the production job: filesystem storage, ACME account, webhook
    /// DNS provider and system resolvers
    pub async fn from_config(config: &Config) -> Result<Self> {
        let objects = FsObjectStore::new(&config.storage.path).with_context(|| {
            format!("Failed to open storage at {}", config.storage.path.display())
        })?;
        let credentials = CredentialStore::new(Arc::new(objects));

        let authority = AcmeClient::connect(&config.acme, &credentials)
            .await
            .context("Failed to set up ACME account")?;

        let provider = WebhookDnsProvider::from_config(&config.dns_provider)
            .context("Failed to set up DNS provider")?;
        let resolver = HickoryTxtResolver::new(&config.propagation.nameservers)
            .context("Failed to set up DNS resolver")?;

        let challenges = ChallengeRecordManager::new(
            Arc::new(provider),
            Arc::new(resolver),
            PropagationSettings::from(&config.propagation),
        )
        .with_record_ttl(config.dns_provider.record_ttl_secs);

        let orchestrator = Arc::new(
            Orchestrator::new(Arc::new(authority), Arc::new(challenges), credentials)
                .with_challenge_withdrawal(config.acme.withdraw_challenges),
        );
        let scheduler = RenewalScheduler::new(orchestrator.clone(), config.acme.renew_before_days);
        let notifier =
            notify::from_config(&config.notifications).context("Failed to set up notifications")?;

        info!(
            directory = %config.acme.directory_url,
            storage = %config.storage.path.display(),
            renew_before_days = config.acme.renew_before_days,
            "Renewal job ready"
        );

        Ok(Self::new(orchestrator, scheduler, notifier))
    }

    /// Use `interval` for [`watch`](Self::watch)
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.scheduler = self.scheduler.with_interval(interval);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Handle one event, notifying on failure
    pub async fn handle(&self, ctx: &RunContext, event: &JobEvent) -> Result<(), AcmeError> {
        if event.is_renewal() {
            let result = self
                .scheduler
                .run(ctx, self.scheduler.current_threshold())
                .await;
            return notify_error(self.notifier.as_ref(), RENEWAL_FAILED_SUBJECT, result).await;
        }

        let fqdn = event.fqdn.trim();
        let result = self.orchestrator.issue(ctx, fqdn).await;
        let subject = format!("Error creating certificate for {}", fqdn);
        notify_error(self.notifier.as_ref(), &subject, result).await
    }

    /// Renew periodically until `cancel` fires
    pub async fn watch(&self, cancel: tokio_util::sync::CancellationToken) {
        self.scheduler.run_periodic(cancel).await;
    }
}
