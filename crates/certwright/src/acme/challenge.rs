//! DNS-01 challenge record lifecycle
//!
//! Publishes the `_acme-challenge` TXT record in the hosted zone owning the
//! domain, waits until public resolvers return it and removes it again once
//! the authority is done with it.
//!
//! # Propagation
//!
//! After the upsert, the manager sleeps one check interval, queries the TXT
//! records and repeats until the answer is exactly the expected value.
//! Lookup errors count as "not yet visible". Once visible it waits a settle
//! margin so resolvers behind other caches catch up as well. Every wait
//! races the run's cancellation token and the optional propagation timeout.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::context::RunContext;
use super::dns::{
    challenge_record_name, registrable_domain, DnsProvider, HostedZone, PropagationSettings,
    RecordChange, TxtResolver,
};
use super::error::{AcmeError, DnsProviderError};

/// Default TTL for challenge records
pub const DEFAULT_CHALLENGE_TTL: u32 = 60;

/// Manages the challenge TXT record of each domain
#[derive(Debug)]
pub struct ChallengeRecordManager {
    provider: Arc<dyn DnsProvider>,
    resolver: Arc<dyn TxtResolver>,
    settings: PropagationSettings,
    record_ttl: u32,
}

impl ChallengeRecordManager {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        resolver: Arc<dyn TxtResolver>,
        settings: PropagationSettings,
    ) -> Self {
        Self {
            provider,
            resolver,
            settings,
            record_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }

    /// Set the TTL used for challenge records
    pub fn with_record_ttl(mut self, ttl: u32) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Provider zone id owning `fqdn`
    ///
    /// The provider is queried by the registrable domain once per run. The
    /// zone is picked from that listing against the full name, so an apex
    /// domain resolves to its own zone.
    pub async fn resolve_zone(&self, ctx: &RunContext, fqdn: &str) -> Result<String, AcmeError> {
        let domain = registrable_domain(fqdn);

        let candidates = match ctx.cached_zones(domain) {
            Some(zones) => {
                trace!(domain = %domain, zones = zones.len(), "Hosted zone cache hit");
                zones
            }
            None => {
                let zones = self.provider.find_zones_by_name(domain).await?;
                ctx.cache_zones(domain, &zones);
                zones
            }
        };

        let zone = select_zone(fqdn, &candidates).ok_or_else(|| DnsProviderError::ZoneNotFound {
            domain: fqdn.to_string(),
        })?;

        debug!(
            fqdn = %fqdn,
            zone_id = %zone.id,
            zone = %zone.name,
            candidates = candidates.len(),
            "Resolved hosted zone"
        );

        Ok(zone.id.clone())
    }

    /// Upsert the challenge record and wait until it is publicly visible
    pub async fn publish_challenge(
        &self,
        ctx: &RunContext,
        fqdn: &str,
        value: &str,
    ) -> Result<(), AcmeError> {
        let zone_id = self.resolve_zone(ctx, fqdn).await?;
        let record = challenge_record_name(fqdn);

        self.provider
            .change_records(
                &zone_id,
                &[RecordChange::upsert_txt(&record, value, self.record_ttl)],
            )
            .await?;

        info!(
            fqdn = %fqdn,
            record = %record,
            zone_id = %zone_id,
            "Published challenge record"
        );

        self.wait_for_propagation(ctx, &record, value).await?;

        debug!(
            record = %record,
            settle_secs = self.settings.settle.as_secs(),
            "Challenge record visible, settling"
        );
        ctx.sleep(self.settings.settle).await
    }

    /// Delete the challenge record
    ///
    /// Deleting a record that is already gone succeeds.
    pub async fn withdraw_challenge(
        &self,
        ctx: &RunContext,
        fqdn: &str,
        value: &str,
    ) -> Result<(), AcmeError> {
        let zone_id = self.resolve_zone(ctx, fqdn).await?;
        let record = challenge_record_name(fqdn);

        self.provider
            .change_records(
                &zone_id,
                &[RecordChange::delete_txt(&record, value, self.record_ttl)],
            )
            .await?;

        info!(fqdn = %fqdn, record = %record, "Withdrew challenge record");
        Ok(())
    }

    async fn wait_for_propagation(
        &self,
        ctx: &RunContext,
        record: &str,
        value: &str,
    ) -> Result<(), AcmeError> {
        let start = Instant::now();

        debug!(
            record = %record,
            timeout_secs = self.settings.timeout.map(|t| t.as_secs()),
            "Waiting for DNS propagation"
        );

        loop {
            ctx.sleep(self.settings.check_interval).await?;

            let lookup = ctx
                .guard(async { Ok(self.resolver.lookup_txt(record).await) })
                .await?;

            match lookup {
                Ok(values) if values.len() == 1 && values[0] == value => {
                    debug!(
                        record = %record,
                        elapsed_secs = start.elapsed().as_secs(),
                        "DNS propagation confirmed"
                    );
                    return Ok(());
                }
                Ok(values) => {
                    trace!(record = %record, found = ?values, "Record not yet propagated");
                }
                Err(e) => {
                    warn!(record = %record, error = %e, "TXT lookup failed, retrying");
                }
            }

            if let Some(timeout) = self.settings.timeout {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(AcmeError::PropagationTimeout {
                        record: record.to_string(),
                        elapsed,
                    });
                }
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Pick the zone owning `fqdn`: an exact name match, otherwise the longest
/// zone name that `fqdn` ends with on a label boundary
fn select_zone<'a>(fqdn: &str, candidates: &'a [HostedZone]) -> Option<&'a HostedZone> {
    let fqdn = normalize(fqdn);

    if let Some(zone) = candidates.iter().find(|z| normalize(&z.name) == fqdn) {
        return Some(zone);
    }

    candidates
        .iter()
        .filter(|z| {
            let name = normalize(&z.name);
            !name.is_empty() && fqdn.ends_with(&format!(".{}", name))
        })
        .max_by_key(|z| normalize(&z.name).len())
}
