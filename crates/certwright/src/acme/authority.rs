//! Certificate authority interface
//!
//! The orchestrator only sees these types. [`AcmeClient`](super::AcmeClient)
//! maps them onto `instant-acme`.

use std::fmt::{self, Debug};

use async_trait::async_trait;

use super::context::RunContext;
use super::error::AcmeError;

/// Status of one domain authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Validation has not completed yet
    Pending,
    /// The domain is authorized
    Valid,
    /// Validation failed or the authorization can no longer be used
    Invalid,
}

/// Challenge types an authority may offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    Dns01,
    Http01,
    TlsAlpn01,
    Other(String),
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns01 => write!(f, "dns-01"),
            Self::Http01 => write!(f, "http-01"),
            Self::TlsAlpn01 => write!(f, "tls-alpn-01"),
            Self::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// One challenge of an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    /// Challenge URL, used to tell the authority it may validate
    pub url: String,
    pub token: String,
}

/// Authorization of one domain within an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub fqdn: String,
    /// URL identifying the authorization (or its order) at the authority
    pub url: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The dns-01 challenge, if offered
    pub fn dns01_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|challenge| challenge.kind == ChallengeKind::Dns01)
    }
}

/// Certificate authority operations needed to issue one certificate
#[async_trait]
pub trait CertificateAuthority: Send + Sync + Debug {
    /// Open an order for `fqdn` and return its authorization
    async fn authorize(&self, fqdn: &str) -> Result<Authorization, AcmeError>;

    /// TXT record value proving control for a dns-01 challenge
    async fn dns01_record_value(&self, fqdn: &str, challenge: &Challenge)
        -> Result<String, AcmeError>;

    /// Tell the authority the challenge can be validated
    async fn accept_challenge(&self, fqdn: &str, challenge: &Challenge) -> Result<(), AcmeError>;

    /// Wait until the authorization leaves the pending state
    async fn wait_authorization(
        &self,
        ctx: &RunContext,
        authorization: &Authorization,
    ) -> Result<AuthorizationStatus, AcmeError>;

    /// Submit a DER signing request and return the DER chain, leaf first
    async fn create_certificate(
        &self,
        ctx: &RunContext,
        fqdn: &str,
        csr_der: &[u8],
    ) -> Result<Vec<Vec<u8>>, AcmeError>;

    /// Forget any order state kept for `fqdn` after a failed attempt
    async fn release(&self, _fqdn: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns01_challenge_selection() {
        let authorization = Authorization {
            fqdn: "a.example.com".to_string(),
            url: "https://acme.test/authz/1".to_string(),
            status: AuthorizationStatus::Pending,
            challenges: vec![
                Challenge {
                    kind: ChallengeKind::Http01,
                    url: "https://acme.test/chall/http".to_string(),
                    token: "t1".to_string(),
                },
                Challenge {
                    kind: ChallengeKind::Dns01,
                    url: "https://acme.test/chall/dns".to_string(),
                    token: "t2".to_string(),
                },
            ],
        };

        let challenge = authorization.dns01_challenge().unwrap();
        assert_eq!(challenge.token, "t2");
        assert_eq!(challenge.kind.to_string(), "dns-01");
    }
}
