//! ACME client backed by `instant-acme`
//!
//! Opens one order per domain. The order and its authorizations stay in
//! memory between [`CertificateAuthority::authorize`] and
//! [`CertificateAuthority::create_certificate`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType,
    Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::authority::{
    Authorization, AuthorizationStatus, CertificateAuthority, Challenge, ChallengeKind,
};
use super::context::RunContext;
use super::error::{AcmeError, StorageError};
use super::storage::CredentialStore;
use certwright_config::AcmeConfig;

/// Attempts at downloading a certificate from a valid order
const CERTIFICATE_DOWNLOAD_ATTEMPTS: u32 = 5;

struct PendingOrder {
    order: Order,
    authorizations: Vec<instant_acme::Authorization>,
}

/// ACME client for DNS-01 issuance
pub struct AcmeClient {
    account: Account,
    orders: Mutex<HashMap<String, PendingOrder>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl AcmeClient {
    /// Load the stored account for the configured contact or register a new
    /// one and store its credentials
    pub async fn connect(config: &AcmeConfig, store: &CredentialStore) -> Result<Self, AcmeError> {
        let account = match store.load_account_credentials(&config.contact).await? {
            Some(json) => {
                let credentials: AccountCredentials =
                    serde_json::from_str(&json).map_err(StorageError::from)?;
                let account = Account::from_credentials(credentials).await?;
                info!(contact = %config.contact, "Using stored ACME account");
                account
            }
            None => {
                let contact = format!("mailto:{}", config.contact);
                let (account, credentials) = Account::create(
                    &NewAccount {
                        contact: &[&contact],
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    &config.directory_url,
                    None,
                )
                .await
                .map_err(|e| AcmeError::Account(format!("Failed to register account: {}", e)))?;

                let json = serde_json::to_string(&credentials).map_err(StorageError::from)?;
                store
                    .save_account_credentials(&config.contact, &json)
                    .await?;

                info!(
                    contact = %config.contact,
                    directory = %config.directory_url,
                    "Registered new ACME account"
                );
                account
            }
        };

        Ok(Self {
            account,
            orders: Mutex::new(HashMap::new()),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.authorization_timeout_secs),
        })
    }

    fn missing_order(fqdn: &str) -> AcmeError {
        AcmeError::OrderCreation(format!("No open order for '{}'", fqdn))
    }

    /// Poll until the authorization leaves the pending state or the deadline
    /// passes
    async fn poll_authorization(
        &self,
        ctx: &RunContext,
        pending: &mut PendingOrder,
        fqdn: &str,
    ) -> Result<AuthorizationStatus, AcmeError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            ctx.sleep(self.poll_interval).await?;

            let authorizations = ctx
                .guard(async { Ok::<_, AcmeError>(pending.order.authorizations().await?) })
                .await?;
            let status = authorization_for(&authorizations, fqdn)
                .map(|authz| map_status(&authz.status))
                .unwrap_or(AuthorizationStatus::Invalid);
            pending.authorizations = authorizations;

            trace!(fqdn = %fqdn, status = ?status, "Polled authorization");

            if status != AuthorizationStatus::Pending {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(AcmeError::Timeout(format!(
                    "authorization for '{}' still pending after {}s",
                    fqdn,
                    self.timeout.as_secs()
                )));
            }
        }
    }

    fn raw_challenge<'a>(
        pending: &'a PendingOrder,
        challenge: &Challenge,
    ) -> Option<&'a instant_acme::Challenge> {
        pending
            .authorizations
            .iter()
            .flat_map(|authz| authz.challenges.iter())
            .find(|raw| raw.url == challenge.url)
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn map_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        _ => AuthorizationStatus::Invalid,
    }
}

fn map_kind(kind: &ChallengeType) -> ChallengeKind {
    match kind {
        ChallengeType::Dns01 => ChallengeKind::Dns01,
        ChallengeType::Http01 => ChallengeKind::Http01,
        ChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
        other => ChallengeKind::Other(format!("{:?}", other)),
    }
}

fn authorization_for<'a>(
    authorizations: &'a [instant_acme::Authorization],
    fqdn: &str,
) -> Option<&'a instant_acme::Authorization> {
    authorizations
        .iter()
        .find(|authz| matches!(&authz.identifier, Identifier::Dns(name) if name == fqdn))
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    async fn authorize(&self, fqdn: &str) -> Result<Authorization, AcmeError> {
        let identifiers = [Identifier::Dns(fqdn.to_string())];
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("{}: {}", fqdn, e)))?;

        let authorizations = order.authorizations().await?;
        let raw = authorization_for(&authorizations, fqdn).ok_or_else(|| {
            AcmeError::OrderCreation(format!("Order carries no authorization for '{}'", fqdn))
        })?;

        let authorization = Authorization {
            fqdn: fqdn.to_string(),
            url: order.url().to_string(),
            status: map_status(&raw.status),
            challenges: raw
                .challenges
                .iter()
                .map(|c| Challenge {
                    kind: map_kind(&c.r#type),
                    url: c.url.clone(),
                    token: c.token.clone(),
                })
                .collect(),
        };

        debug!(
            fqdn = %fqdn,
            order = %order.url(),
            status = ?authorization.status,
            challenges = authorization.challenges.len(),
            "Opened ACME order"
        );

        if authorization.status != AuthorizationStatus::Invalid {
            self.orders.lock().await.insert(
                fqdn.to_string(),
                PendingOrder {
                    order,
                    authorizations,
                },
            );
        }

        Ok(authorization)
    }

    async fn dns01_record_value(
        &self,
        fqdn: &str,
        challenge: &Challenge,
    ) -> Result<String, AcmeError> {
        let orders = self.orders.lock().await;
        let pending = orders.get(fqdn).ok_or_else(|| Self::missing_order(fqdn))?;
        let raw = Self::raw_challenge(pending, challenge).ok_or_else(|| {
            AcmeError::NoChallengeOffered {
                fqdn: fqdn.to_string(),
            }
        })?;

        Ok(pending.order.key_authorization(raw).dns_value())
    }

    async fn accept_challenge(&self, fqdn: &str, challenge: &Challenge) -> Result<(), AcmeError> {
        let mut orders = self.orders.lock().await;
        let pending = orders
            .get_mut(fqdn)
            .ok_or_else(|| Self::missing_order(fqdn))?;

        pending.order.set_challenge_ready(&challenge.url).await?;
        debug!(fqdn = %fqdn, challenge = %challenge.url, "Challenge marked ready");
        Ok(())
    }

    async fn wait_authorization(
        &self,
        ctx: &RunContext,
        authorization: &Authorization,
    ) -> Result<AuthorizationStatus, AcmeError> {
        let fqdn = authorization.fqdn.as_str();
        let mut orders = self.orders.lock().await;
        let pending = orders
            .get_mut(fqdn)
            .ok_or_else(|| Self::missing_order(fqdn))?;

        let result = self.poll_authorization(ctx, pending, fqdn).await;
        if !matches!(result, Ok(AuthorizationStatus::Valid)) {
            orders.remove(fqdn);
            debug!(fqdn = %fqdn, "Dropped order after failed authorization");
        }
        result
    }

    async fn create_certificate(
        &self,
        ctx: &RunContext,
        fqdn: &str,
        csr_der: &[u8],
    ) -> Result<Vec<Vec<u8>>, AcmeError> {
        let Some(mut pending) = self.orders.lock().await.remove(fqdn) else {
            return Err(Self::missing_order(fqdn));
        };
        let order = &mut pending.order;
        let deadline = Instant::now() + self.timeout;
        let mut finalized = false;

        loop {
            let status = ctx
                .guard(async {
                    order.refresh().await?;
                    Ok::<_, AcmeError>(order.state().status)
                })
                .await?;

            match status {
                OrderStatus::Ready if !finalized => {
                    debug!(fqdn = %fqdn, "Order ready, submitting CSR");
                    order.finalize(csr_der).await?;
                    finalized = true;
                    continue;
                }
                OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization(format!(
                        "order for '{}' became invalid",
                        fqdn
                    )));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(AcmeError::Timeout(format!(
                    "order for '{}' not valid after {}s",
                    fqdn,
                    self.timeout.as_secs()
                )));
            }
            ctx.sleep(self.poll_interval).await?;
        }

        for _ in 0..CERTIFICATE_DOWNLOAD_ATTEMPTS {
            if let Some(chain_pem) = order.certificate().await? {
                let blocks = pem::parse_many(&chain_pem)
                    .map_err(|e| AcmeError::CertificateParse(e.to_string()))?;

                info!(fqdn = %fqdn, certificates = blocks.len(), "Downloaded certificate chain");
                return Ok(blocks
                    .into_iter()
                    .filter(|block| block.tag() == "CERTIFICATE")
                    .map(|block| block.into_contents())
                    .collect());
            }
            ctx.sleep(self.poll_interval).await?;
        }

        Err(AcmeError::Finalization(format!(
            "certificate for '{}' not available",
            fqdn
        )))
    }

    async fn release(&self, fqdn: &str) {
        if self.orders.lock().await.remove(fqdn).is_some() {
            debug!(fqdn = %fqdn, "Released ACME order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_authorization(fqdn: &str, status: &str) -> instant_acme::Authorization {
        serde_json::from_value(serde_json::json!({
            "identifier": { "type": "dns", "value": fqdn },
            "status": status,
            "challenges": [
                {
                    "type": "http-01",
                    "url": format!("https://acme.test/chall/{}/http", fqdn),
                    "token": "http-token",
                    "status": "pending"
                },
                {
                    "type": "dns-01",
                    "url": format!("https://acme.test/chall/{}/dns", fqdn),
                    "token": "dns-token",
                    "status": "pending"
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_only_pending_and_valid_survive_status_mapping() {
        assert_eq!(
            map_status(&AcmeAuthorizationStatus::Pending),
            AuthorizationStatus::Pending
        );
        assert_eq!(
            map_status(&AcmeAuthorizationStatus::Valid),
            AuthorizationStatus::Valid
        );

        for status in [
            AcmeAuthorizationStatus::Invalid,
            AcmeAuthorizationStatus::Revoked,
            AcmeAuthorizationStatus::Expired,
        ] {
            assert_eq!(map_status(&status), AuthorizationStatus::Invalid, "{:?}", status);
        }
    }

    #[test]
    fn test_challenge_kind_mapping() {
        assert_eq!(map_kind(&ChallengeType::Dns01), ChallengeKind::Dns01);
        assert_eq!(map_kind(&ChallengeType::Http01), ChallengeKind::Http01);
        assert_eq!(map_kind(&ChallengeType::TlsAlpn01), ChallengeKind::TlsAlpn01);

        match map_kind(&ChallengeType::Unknown("dns-account-01".to_string())) {
            ChallengeKind::Other(name) => assert!(name.contains("dns-account-01")),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_authorization_for_matches_identifier() {
        let authorizations = vec![
            raw_authorization("a.example.com", "valid"),
            raw_authorization("b.example.com", "pending"),
        ];

        let found = authorization_for(&authorizations, "b.example.com").unwrap();
        assert_eq!(map_status(&found.status), AuthorizationStatus::Pending);
        assert_eq!(found.challenges.len(), 2);
        assert_eq!(map_kind(&found.challenges[1].r#type), ChallengeKind::Dns01);

        assert!(authorization_for(&authorizations, "example.com").is_none());
        assert!(authorization_for(&[], "a.example.com").is_none());
    }
}
