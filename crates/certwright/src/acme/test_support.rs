//! In-process fakes for the external capabilities

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};

use super::authority::{
    Authorization, AuthorizationStatus, CertificateAuthority, Challenge, ChallengeKind,
};
use super::context::RunContext;
use super::dns::{ChangeAction, DnsProvider, DnsResult, HostedZone, RecordChange, TxtResolver};
use super::error::{AcmeError, DnsProviderError};

/// Self-signed DER certificate for `name` expiring at midnight UTC of
/// `not_after`'s date
pub(crate) fn self_signed_der(name: &str, not_after: DateTime<Utc>) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
    params.self_signed(&key).unwrap().der().to_vec()
}

/// DNS provider keeping zones and records in memory
#[derive(Debug, Default)]
pub(crate) struct MockDnsProvider {
    zones: Vec<HostedZone>,
    records: Mutex<HashMap<String, Vec<String>>>,
    changes: Mutex<Vec<(String, RecordChange)>>,
    lookups: AtomicUsize,
    fail_changes: AtomicBool,
}

impl MockDnsProvider {
    pub(crate) fn with_zones(zones: &[(&str, &str)]) -> Self {
        let mut zones: Vec<HostedZone> = zones
            .iter()
            .map(|(id, name)| HostedZone {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            zones,
            ..Self::default()
        }
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn changes(&self) -> Vec<(String, RecordChange)> {
        self.changes.lock().clone()
    }

    pub(crate) fn record(&self, name: &str) -> Option<Vec<String>> {
        self.records.lock().get(name).cloned()
    }

    pub(crate) fn fail_changes(&self) {
        self.fail_changes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    /// Zones from `name` onwards in name order, like a paged listing
    async fn find_zones_by_name(&self, name: &str) -> DnsResult<Vec<HostedZone>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .zones
            .iter()
            .filter(|zone| zone.name.trim_end_matches('.') >= name)
            .cloned()
            .collect())
    }

    async fn change_records(&self, zone_id: &str, changes: &[RecordChange]) -> DnsResult<()> {
        if self.fail_changes.load(Ordering::SeqCst) {
            return Err(DnsProviderError::RecordChange {
                zone_id: zone_id.to_string(),
                message: "rejected".to_string(),
            });
        }

        let mut records = self.records.lock();
        for change in changes {
            match change.action {
                ChangeAction::Upsert => {
                    records.insert(change.name.clone(), change.values.clone());
                }
                ChangeAction::Delete => {
                    records.remove(&change.name);
                }
            }
            self.changes
                .lock()
                .push((zone_id.to_string(), change.clone()));
        }
        Ok(())
    }
}

/// Resolver answering from a script, falling back to a fixed answer
#[derive(Debug, Default)]
pub(crate) struct MockTxtResolver {
    script: Mutex<VecDeque<Result<Vec<String>, String>>>,
    fallback: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockTxtResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resolver that always returns `values` once the script is used up
    pub(crate) fn answering(values: &[&str]) -> Self {
        let resolver = Self::new();
        *resolver.fallback.lock() = values.iter().map(|v| v.to_string()).collect();
        resolver
    }

    pub(crate) fn push_answer(&self, values: &[&str]) {
        self.script
            .lock()
            .push_back(Ok(values.iter().map(|v| v.to_string()).collect()));
    }

    pub(crate) fn push_error(&self, message: &str) {
        self.script.lock().push_back(Err(message.to_string()));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxtResolver for MockTxtResolver {
    async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>, DnsProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Ok(values)) => Ok(values),
            Some(Err(message)) => Err(DnsProviderError::ApiRequest(message)),
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

/// Value the mock authority expects in the challenge record
pub(crate) const MOCK_RECORD_VALUE: &str = "mock-dns-value";

/// Certificate authority answering from per-domain settings
#[derive(Debug)]
pub(crate) struct MockAuthority {
    not_after: DateTime<Utc>,
    initial: Mutex<HashMap<String, AuthorizationStatus>>,
    outcome: Mutex<HashMap<String, AuthorizationStatus>>,
    without_dns01: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    empty_chain: AtomicBool,
    calls: Mutex<Vec<String>>,
    csrs: Mutex<Vec<Vec<u8>>>,
}

impl MockAuthority {
    /// Authority issuing certificates that expire at `not_after`
    pub(crate) fn new(not_after: DateTime<Utc>) -> Self {
        Self {
            not_after,
            initial: Mutex::default(),
            outcome: Mutex::default(),
            without_dns01: Mutex::default(),
            failing: Mutex::default(),
            empty_chain: AtomicBool::new(false),
            calls: Mutex::default(),
            csrs: Mutex::default(),
        }
    }

    /// Status reported by `authorize`, `Pending` by default
    pub(crate) fn set_initial_status(&self, fqdn: &str, status: AuthorizationStatus) {
        self.initial.lock().insert(fqdn.to_string(), status);
    }

    /// Status reported by `wait_authorization`, `Valid` by default
    pub(crate) fn set_outcome(&self, fqdn: &str, status: AuthorizationStatus) {
        self.outcome.lock().insert(fqdn.to_string(), status);
    }

    pub(crate) fn offer_no_dns01(&self, fqdn: &str) {
        self.without_dns01.lock().insert(fqdn.to_string());
    }

    /// Make `authorize` fail for a domain
    pub(crate) fn fail_for(&self, fqdn: &str) {
        self.failing.lock().insert(fqdn.to_string());
    }

    pub(crate) fn return_empty_chain(&self) {
        self.empty_chain.store(true, Ordering::SeqCst);
    }

    /// Calls made so far, as `operation:fqdn`
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn csrs(&self) -> Vec<Vec<u8>> {
        self.csrs.lock().clone()
    }

    fn record(&self, operation: &str, fqdn: &str) {
        self.calls.lock().push(format!("{}:{}", operation, fqdn));
    }
}

#[async_trait]
impl CertificateAuthority for MockAuthority {
    async fn authorize(&self, fqdn: &str) -> Result<Authorization, AcmeError> {
        self.record("authorize", fqdn);

        if self.failing.lock().contains(fqdn) {
            return Err(AcmeError::OrderCreation(format!("order for {} refused", fqdn)));
        }

        let status = self
            .initial
            .lock()
            .get(fqdn)
            .copied()
            .unwrap_or(AuthorizationStatus::Pending);

        let mut challenges = vec![Challenge {
            kind: ChallengeKind::Http01,
            url: format!("https://acme.test/chall/{}/http", fqdn),
            token: "http-token".to_string(),
        }];
        if !self.without_dns01.lock().contains(fqdn) {
            challenges.push(Challenge {
                kind: ChallengeKind::Dns01,
                url: format!("https://acme.test/chall/{}/dns", fqdn),
                token: "dns-token".to_string(),
            });
        }

        Ok(Authorization {
            fqdn: fqdn.to_string(),
            url: format!("https://acme.test/authz/{}", fqdn),
            status,
            challenges,
        })
    }

    async fn dns01_record_value(
        &self,
        fqdn: &str,
        _challenge: &Challenge,
    ) -> Result<String, AcmeError> {
        self.record("record-value", fqdn);
        Ok(MOCK_RECORD_VALUE.to_string())
    }

    async fn accept_challenge(&self, fqdn: &str, _challenge: &Challenge) -> Result<(), AcmeError> {
        self.record("accept", fqdn);
        Ok(())
    }

    async fn wait_authorization(
        &self,
        _ctx: &RunContext,
        authorization: &Authorization,
    ) -> Result<AuthorizationStatus, AcmeError> {
        self.record("wait", &authorization.fqdn);
        Ok(self
            .outcome
            .lock()
            .get(&authorization.fqdn)
            .copied()
            .unwrap_or(AuthorizationStatus::Valid))
    }

    async fn release(&self, fqdn: &str) {
        self.record("release", fqdn);
    }

    async fn create_certificate(
        &self,
        _ctx: &RunContext,
        fqdn: &str,
        csr_der: &[u8],
    ) -> Result<Vec<Vec<u8>>, AcmeError> {
        self.record("certificate", fqdn);
        self.csrs.lock().push(csr_der.to_vec());

        if self.empty_chain.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(vec![
            self_signed_der(fqdn, self.not_after),
            self_signed_der("issuer.example.net", self.not_after + chrono::Duration::days(365)),
        ])
    }
}
