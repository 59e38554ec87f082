//! Error types for certificate issuance and renewal

use std::time::Duration;

use thiserror::Error;

/// Errors raised while authorizing domains or issuing certificates
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The authority rejected the authorization for this domain
    #[error("Authorization for '{fqdn}' is invalid ({url})")]
    AuthorizationInvalid { fqdn: String, url: String },

    /// The authorization carries no dns-01 challenge
    #[error("No dns-01 challenge offered for '{fqdn}'")]
    NoChallengeOffered { fqdn: String },

    /// The authority returned a certificate without any certificate in it
    #[error("Certificate authority returned an empty chain for '{fqdn}'")]
    EmptyChain { fqdn: String },

    /// The challenge record never became visible to resolvers
    #[error("Challenge record '{record}' not visible after {}s", elapsed.as_secs())]
    PropagationTimeout { record: String, elapsed: Duration },

    /// The run was cancelled while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// ACME protocol error reported by the client library
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    /// Waiting on the authority exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No order could be opened for the domain
    #[error("Failed to create order: {0}")]
    OrderCreation(String),

    /// The order could not be finalized or its certificate downloaded
    #[error("Failed to finalize order: {0}")]
    Finalization(String),

    /// The signing request could not be built
    #[error("Failed to build certificate signing request: {0}")]
    Csr(#[from] rcgen::Error),

    /// A fresh signing key could not be generated
    #[error("Failed to generate key for '{fqdn}': {message}")]
    KeyGeneration { fqdn: String, message: String },

    /// A certificate returned by the authority could not be decoded
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Account registration or credential handling failed
    #[error("Account error: {0}")]
    Account(String),

    /// Some domains in a batch could not be renewed
    #[error("{failed} of {total} failed")]
    BatchFailed { failed: usize, total: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    DnsProvider(#[from] DnsProviderError),
}

/// Errors from the object store and the credential store on top of it
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// Stored key bytes exist but are not a usable ECDSA key
    #[error("Stored key for '{fqdn}' cannot be decoded: {message}")]
    KeyDecode { fqdn: String, message: String },

    /// Certificate metadata is missing or malformed
    #[error("Certificate metadata for '{fqdn}' is unusable: {message}")]
    Metadata { fqdn: String, message: String },

    /// Persisting an object failed
    #[error("Failed to write '{path}': {message}")]
    Write { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether the error means the object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from the managed DNS API
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// No hosted zone owns the domain
    #[error("No hosted zone found for '{domain}'")]
    ZoneNotFound { domain: String },

    /// The HTTP request itself failed
    #[error("DNS API request failed: {0}")]
    ApiRequest(String),

    /// The API rejected our credentials
    #[error("DNS API authentication failed: {0}")]
    Authentication(String),

    /// The API refused the record change
    #[error("Failed to change records in zone '{zone_id}': {message}")]
    RecordChange { zone_id: String, message: String },

    #[error("DNS API request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    #[error("DNS provider configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_failed_message() {
        let err = AcmeError::BatchFailed {
            failed: 2,
            total: 5,
        };
        assert_eq!(err.to_string(), "2 of 5 failed");
    }

    #[test]
    fn test_storage_error_converts() {
        let err: AcmeError = StorageError::NotFound {
            path: "keys/a.example.com.key".to_string(),
        }
        .into();
        assert!(matches!(err, AcmeError::Storage(ref e) if e.is_not_found()));
        assert!(err.to_string().contains("keys/a.example.com.key"));
    }

    #[test]
    fn test_propagation_timeout_message() {
        let err = AcmeError::PropagationTimeout {
            record: "_acme-challenge.a.example.com.".to_string(),
            elapsed: Duration::from_secs(600),
        };
        assert_eq!(
            err.to_string(),
            "Challenge record '_acme-challenge.a.example.com.' not visible after 600s"
        );
    }
}
