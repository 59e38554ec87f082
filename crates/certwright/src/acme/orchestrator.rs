//! Domain authorization and certificate issuance
//!
//! # Authorization States
//!
//! ```text
//! Unauthorized -> Pending -> ChallengePublished -> ChallengeAccepted -> Valid
//!       |            |                                        |
//!       +-> Valid    +-> Invalid                              +-> Invalid
//! ```
//!
//! `Valid` and `Invalid` are terminal. Transport and storage failures abort
//! the attempt without a state of their own.

use std::fmt;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::authority::{Authorization, AuthorizationStatus, CertificateAuthority, Challenge};
use super::challenge::ChallengeRecordManager;
use super::context::RunContext;
use super::error::{AcmeError, DnsProviderError};
use super::storage::{CertificateChain, CredentialStore};

/// Progress of one domain authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Unauthorized,
    Pending,
    ChallengePublished,
    ChallengeAccepted,
    Valid,
    Invalid,
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthorized => "unauthorized",
            Self::Pending => "pending",
            Self::ChallengePublished => "challenge-published",
            Self::ChallengeAccepted => "challenge-accepted",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one authorization attempt
struct StateTracker<'a> {
    fqdn: &'a str,
    state: AuthorizationState,
}

impl<'a> StateTracker<'a> {
    fn new(fqdn: &'a str) -> Self {
        Self {
            fqdn,
            state: AuthorizationState::Unauthorized,
        }
    }

    fn advance(&mut self, next: AuthorizationState) {
        debug!(
            fqdn = %self.fqdn,
            from = %self.state,
            to = %next,
            "Authorization state changed"
        );
        self.state = next;
    }
}

/// Drives authorization and issuance for single domains and batches
#[derive(Debug)]
pub struct Orchestrator {
    authority: Arc<dyn CertificateAuthority>,
    challenges: Arc<ChallengeRecordManager>,
    credentials: CredentialStore,
    withdraw_challenges: bool,
}

impl Orchestrator {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        challenges: Arc<ChallengeRecordManager>,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            authority,
            challenges,
            credentials,
            withdraw_challenges: true,
        }
    }

    /// Whether challenge records are deleted once validation is over
    pub fn with_challenge_withdrawal(mut self, enabled: bool) -> Self {
        self.withdraw_challenges = enabled;
        self
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Prove control of `fqdn` to the certificate authority
    ///
    /// Returns immediately when the authority already considers the domain
    /// authorized. Otherwise publishes the dns-01 record, hands the
    /// challenge to the authority and waits for its verdict.
    pub async fn authorize(&self, ctx: &RunContext, fqdn: &str) -> Result<(), AcmeError> {
        let mut tracker = StateTracker::new(fqdn);
        let authorization = self.authority.authorize(fqdn).await?;

        match authorization.status {
            AuthorizationStatus::Valid => {
                tracker.advance(AuthorizationState::Valid);
                info!(fqdn = %fqdn, "Domain already authorized");
                return Ok(());
            }
            AuthorizationStatus::Invalid => {
                tracker.advance(AuthorizationState::Invalid);
                return Err(invalid(&authorization));
            }
            AuthorizationStatus::Pending => tracker.advance(AuthorizationState::Pending),
        }

        let challenge =
            authorization
                .dns01_challenge()
                .ok_or_else(|| AcmeError::NoChallengeOffered {
                    fqdn: fqdn.to_string(),
                })?;
        let value = self.authority.dns01_record_value(fqdn, challenge).await?;

        let result = self
            .complete_challenge(ctx, &mut tracker, &authorization, challenge, &value)
            .await;

        if self.withdraw_challenges && !is_missing_zone(&result) {
            if let Err(e) = self.challenges.withdraw_challenge(ctx, fqdn, &value).await {
                warn!(fqdn = %fqdn, error = %e, "Failed to withdraw challenge record");
            }
        }

        result
    }

    async fn complete_challenge(
        &self,
        ctx: &RunContext,
        tracker: &mut StateTracker<'_>,
        authorization: &Authorization,
        challenge: &Challenge,
        value: &str,
    ) -> Result<(), AcmeError> {
        let fqdn = authorization.fqdn.as_str();

        self.challenges.publish_challenge(ctx, fqdn, value).await?;
        tracker.advance(AuthorizationState::ChallengePublished);

        self.authority.accept_challenge(fqdn, challenge).await?;
        tracker.advance(AuthorizationState::ChallengeAccepted);

        match self.authority.wait_authorization(ctx, authorization).await? {
            AuthorizationStatus::Valid => {
                tracker.advance(AuthorizationState::Valid);
                info!(fqdn = %fqdn, "Domain authorized");
                Ok(())
            }
            _ => {
                tracker.advance(AuthorizationState::Invalid);
                Err(invalid(authorization))
            }
        }
    }

    /// Authorize `fqdn`, request a certificate and store the chain
    pub async fn issue(&self, ctx: &RunContext, fqdn: &str) -> Result<(), AcmeError> {
        let start = Instant::now();

        let csr = match self.prepare_request(ctx, fqdn).await {
            Ok(csr) => csr,
            Err(e) => {
                self.authority.release(fqdn).await;
                return Err(e);
            }
        };
        let certificates = self.authority.create_certificate(ctx, fqdn, &csr).await?;
        let chain = CertificateChain::from_der(fqdn, certificates)?;

        self.credentials.store_certificate_chain(fqdn, &chain).await?;

        info!(
            fqdn = %fqdn,
            not_after = %chain.not_after(),
            elapsed_secs = start.elapsed().as_secs(),
            "Certificate issued"
        );
        Ok(())
    }

    /// Authorize `fqdn` and build the signing request for its stored key
    async fn prepare_request(&self, ctx: &RunContext, fqdn: &str) -> Result<Vec<u8>, AcmeError> {
        self.authorize(ctx, fqdn).await?;
        let key = self.credentials.get_or_create_key(fqdn).await?;
        build_csr(fqdn, &key)
    }

    /// Issue certificates for every domain in order
    ///
    /// A failing domain does not stop the batch. Any failure turns the
    /// result into [`AcmeError::BatchFailed`].
    pub async fn renew_batch(&self, ctx: &RunContext, fqdns: &[String]) -> Result<(), AcmeError> {
        let total = fqdns.len();
        let mut failed = 0;

        for (index, fqdn) in fqdns.iter().enumerate() {
            if ctx.is_cancelled() {
                let skipped = total - index;
                warn!(skipped, "Run cancelled, skipping remaining domains");
                failed += skipped;
                break;
            }

            match self.issue(ctx, fqdn).await {
                Ok(()) => debug!(fqdn = %fqdn, "Renewal succeeded"),
                Err(e) => {
                    error!(fqdn = %fqdn, error = %e, "Certificate renewal failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            error!(failed, total, "Errors occurred during certificate renewal");
            return Err(AcmeError::BatchFailed { failed, total });
        }

        info!(total, "Renewed all due certificates");
        Ok(())
    }
}

fn invalid(authorization: &Authorization) -> AcmeError {
    AcmeError::AuthorizationInvalid {
        fqdn: authorization.fqdn.clone(),
        url: authorization.url.clone(),
    }
}

fn is_missing_zone(result: &Result<(), AcmeError>) -> bool {
    matches!(
        result,
        Err(AcmeError::DnsProvider(DnsProviderError::ZoneNotFound { .. }))
    )
}

/// DER signing request naming `fqdn` as common name and only SAN
pub fn build_csr(fqdn: &str, key: &KeyPair) -> Result<Vec<u8>, AcmeError> {
    let mut params = CertificateParams::new(vec![fqdn.to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, fqdn);

    let csr = params.serialize_request(key)?;
    Ok(csr.der().as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::dns::{ChangeAction, PropagationSettings};
    use crate::acme::test_support::{
        MockAuthority, MockDnsProvider, MockTxtResolver, MOCK_RECORD_VALUE,
    };
    use crate::store::{MemoryObjectStore, ObjectStore};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use x509_parser::prelude::{FromDer, X509CertificationRequest};

    struct Fixture {
        authority: Arc<MockAuthority>,
        provider: Arc<MockDnsProvider>,
        resolver: Arc<MockTxtResolver>,
        objects: Arc<MemoryObjectStore>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let not_after = Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).unwrap();
        let authority = Arc::new(MockAuthority::new(not_after));
        let provider = Arc::new(MockDnsProvider::with_zones(&[("Z1", "example.com.")]));
        let resolver = Arc::new(MockTxtResolver::answering(&[MOCK_RECORD_VALUE]));
        let objects = Arc::new(MemoryObjectStore::new());

        let challenges = Arc::new(ChallengeRecordManager::new(
            provider.clone(),
            resolver.clone(),
            PropagationSettings {
                check_interval: Duration::from_secs(5),
                settle: Duration::from_secs(10),
                timeout: Some(Duration::from_secs(60)),
            },
        ));
        let orchestrator = Orchestrator::new(
            authority.clone(),
            challenges,
            CredentialStore::new(objects.clone()),
        );

        Fixture {
            authority,
            provider,
            resolver,
            objects,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_stores_chain() {
        let f = fixture();

        f.orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        assert_eq!(
            f.authority.calls(),
            vec![
                "authorize:a.example.com",
                "record-value:a.example.com",
                "accept:a.example.com",
                "wait:a.example.com",
                "certificate:a.example.com",
            ]
        );
        assert_eq!(f.objects.put_count("keys/a.example.com.key"), 1);
        assert_eq!(f.objects.put_count("certs/a.example.com.crt"), 1);

        let expiry = f
            .orchestrator
            .credentials()
            .expiry_of("a.example.com")
            .await
            .unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).unwrap());

        let chain = f
            .orchestrator
            .credentials()
            .load_certificate_chain("a.example.com")
            .await
            .unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_published_then_withdrawn() {
        let f = fixture();

        f.orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        let actions: Vec<ChangeAction> =
            f.provider.changes().iter().map(|(_, c)| c.action).collect();
        assert_eq!(actions, vec![ChangeAction::Upsert, ChangeAction::Delete]);
        assert!(f.provider.record("_acme-challenge.a.example.com.").is_none());
        assert_eq!(f.provider.lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawal_can_be_disabled() {
        let mut f = fixture();
        f.orchestrator = f.orchestrator.with_challenge_withdrawal(false);

        f.orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        assert_eq!(f.provider.changes().len(), 1);
        assert_eq!(
            f.provider.record("_acme-challenge.a.example.com."),
            Some(vec![MOCK_RECORD_VALUE.to_string()])
        );
    }

    #[tokio::test]
    async fn test_already_valid_makes_no_dns_calls() {
        let f = fixture();
        f.authority
            .set_initial_status("a.example.com", AuthorizationStatus::Valid);

        f.orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        assert_eq!(f.provider.lookups(), 0);
        assert!(f.provider.changes().is_empty());
        assert_eq!(f.resolver.calls(), 0);
        assert_eq!(f.authority.calls(), vec!["authorize:a.example.com"]);
    }

    #[tokio::test]
    async fn test_initially_invalid_is_terminal() {
        let f = fixture();
        f.authority
            .set_initial_status("a.example.com", AuthorizationStatus::Invalid);

        let err = f
            .orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::AuthorizationInvalid { .. }));
        assert!(f.provider.changes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dns01_challenge() {
        let f = fixture();
        f.authority.offer_no_dns01("a.example.com");

        let err = f
            .orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::NoChallengeOffered { .. }));
        assert!(f.provider.changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_outcome_still_withdraws() {
        let f = fixture();
        f.authority
            .set_outcome("a.example.com", AuthorizationStatus::Invalid);

        let err = f
            .orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::AuthorizationInvalid { .. }));
        let actions: Vec<ChangeAction> =
            f.provider.changes().iter().map(|(_, c)| c.action).collect();
        assert_eq!(actions, vec![ChangeAction::Upsert, ChangeAction::Delete]);
        assert_eq!(f.objects.total_puts(), 0);

        let calls = f.authority.calls();
        assert_eq!(calls.last().map(String::as_str), Some("release:a.example.com"));
        assert!(!calls.contains(&"certificate:a.example.com".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_timeout_withdraws_record() {
        let f = fixture();
        let resolver = Arc::new(MockTxtResolver::new());
        let challenges = Arc::new(ChallengeRecordManager::new(
            f.provider.clone(),
            resolver,
            PropagationSettings {
                check_interval: Duration::from_secs(5),
                settle: Duration::from_secs(10),
                timeout: Some(Duration::from_secs(30)),
            },
        ));
        let orchestrator = Orchestrator::new(
            f.authority.clone(),
            challenges,
            CredentialStore::new(f.objects.clone()),
        );

        let err = orchestrator
            .authorize(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::PropagationTimeout { .. }));
        assert!(f.provider.record("_acme-challenge.a.example.com.").is_none());
        assert!(!f.authority.calls().contains(&"accept:a.example.com".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_chain_never_reaches_store() {
        let f = fixture();
        f.authority.return_empty_chain();

        let err = f
            .orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::EmptyChain { .. }));
        assert_eq!(f.objects.put_count("certs/a.example.com.crt"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_survives_failed_certificate_write() {
        let f = fixture();
        f.objects.fail_puts_under("certs/");

        let err = f
            .orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::Storage(_)));
        assert!(f.objects.contains("keys/a.example.com.key"));

        f.objects.clear_failures();
        f.orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        assert_eq!(f.objects.put_count("keys/a.example.com.key"), 1);
        assert_eq!(f.objects.put_count("certs/a.example.com.crt"), 1);

        let csrs = f.authority.csrs();
        let (_, first) = X509CertificationRequest::from_der(&csrs[0]).unwrap();
        let (_, second) = X509CertificationRequest::from_der(&csrs[1]).unwrap();
        assert_eq!(
            first.certification_request_info.subject_pki.raw,
            second.certification_request_info.subject_pki.raw
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_csr_names_domain() {
        let f = fixture();

        f.orchestrator
            .issue(&RunContext::new(), "a.example.com")
            .await
            .unwrap();

        let csrs = f.authority.csrs();
        let (_, csr) = X509CertificationRequest::from_der(&csrs[0]).unwrap();
        let common_name = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        assert_eq!(common_name, Some("a.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_counts_failures() {
        let f = fixture();
        f.authority.fail_for("b.example.com");
        f.authority
            .set_outcome("d.example.com", AuthorizationStatus::Invalid);

        let domains: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|label| format!("{}.example.com", label))
            .collect();

        let err = f
            .orchestrator
            .renew_batch(&RunContext::new(), &domains)
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::BatchFailed { failed: 2, total: 5 }));
        let authorized: Vec<String> = f
            .authority
            .calls()
            .into_iter()
            .filter(|call| call.starts_with("authorize:"))
            .collect();
        assert_eq!(authorized.len(), 5);
        assert_eq!(f.objects.list("certs/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_remaining() {
        let f = fixture();
        let ctx = RunContext::new();
        ctx.cancellation().cancel();

        let domains = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let err = f.orchestrator.renew_batch(&ctx, &domains).await.unwrap_err();

        assert!(matches!(err, AcmeError::BatchFailed { failed: 2, total: 2 }));
        assert!(f.authority.calls().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AuthorizationState::ChallengePublished.to_string(), "challenge-published");
        assert_eq!(AuthorizationState::Invalid.to_string(), "invalid");
    }
}
