//! Key and certificate persistence on top of an object store
//!
//! # Layout
//!
//! ```text
//! bucket/
//! ├── accounts/<contact>.json   # ACME account credentials
//! ├── keys/<fqdn>.key           # ECDSA P-256 key, PKCS#8 DER
//! └── certs/<fqdn>.crt          # PEM chain, leaf first, `Not-After` metadata
//! ```
//!
//! Keys and certificates are written independently. A run that stops after
//! writing a key but before writing the certificate leaves the key behind,
//! and the next run picks it up again.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rcgen::KeyPair;
use tracing::{debug, info, trace};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::error::{AcmeError, StorageError};
use crate::store::{Metadata, ObjectStore};

/// Metadata entry holding the leaf certificate's expiry
pub const NOT_AFTER_METADATA: &str = "Not-After";

const KEYS_PREFIX: &str = "keys/";
const CERTS_PREFIX: &str = "certs/";
const ACCOUNTS_PREFIX: &str = "accounts/";
const CERT_SUFFIX: &str = ".crt";

fn key_path(fqdn: &str) -> String {
    format!("{}{}.key", KEYS_PREFIX, fqdn)
}

fn cert_path(fqdn: &str) -> String {
    format!("{}{}{}", CERTS_PREFIX, fqdn, CERT_SUFFIX)
}

fn account_path(contact: &str) -> String {
    format!("{}{}.json", ACCOUNTS_PREFIX, contact)
}

/// An issued certificate chain, leaf first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<Vec<u8>>,
    not_after: DateTime<Utc>,
}

impl CertificateChain {
    /// Build a chain from DER certificates, reading the leaf's expiry
    pub fn from_der(fqdn: &str, certificates: Vec<Vec<u8>>) -> Result<Self, AcmeError> {
        let leaf = certificates.first().ok_or_else(|| AcmeError::EmptyChain {
            fqdn: fqdn.to_string(),
        })?;
        let not_after = leaf_not_after(leaf)?;

        Ok(Self {
            certificates,
            not_after,
        })
    }

    /// Build a chain from PEM text, ignoring blocks that are not certificates
    pub fn from_pem(fqdn: &str, text: &str) -> Result<Self, AcmeError> {
        let blocks =
            pem::parse_many(text).map_err(|e| AcmeError::CertificateParse(e.to_string()))?;
        let certificates = blocks
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| block.into_contents())
            .collect();

        Self::from_der(fqdn, certificates)
    }

    /// PEM encoding of the whole chain
    pub fn to_pem(&self) -> String {
        let blocks: Vec<pem::Pem> = self
            .certificates
            .iter()
            .map(|der| pem::Pem::new("CERTIFICATE", der.clone()))
            .collect();
        pem::encode_many(&blocks)
    }

    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Expiry of the leaf certificate
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

fn leaf_not_after(der: &[u8]) -> Result<DateTime<Utc>, AcmeError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| AcmeError::CertificateParse(e.to_string()))?;
    let timestamp = cert.validity().not_after.timestamp();

    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        AcmeError::CertificateParse(format!("not-after {} is out of range", timestamp))
    })
}

/// Per-domain keys, certificate chains and account credentials
#[derive(Debug, Clone)]
pub struct CredentialStore {
    store: Arc<dyn ObjectStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Return the signing key for `fqdn`, generating and persisting one if
    /// none is stored yet
    ///
    /// A stored key that cannot be decoded is an error and is never
    /// replaced.
    pub async fn get_or_create_key(&self, fqdn: &str) -> Result<KeyPair, AcmeError> {
        let path = key_path(fqdn);

        match self.store.get(&path).await {
            Ok(der) => {
                trace!(fqdn = %fqdn, "Loaded stored key");
                Ok(decode_key(fqdn, &der)?)
            }
            Err(e) if e.is_not_found() => {
                let key = KeyPair::generate().map_err(|e| AcmeError::KeyGeneration {
                    fqdn: fqdn.to_string(),
                    message: e.to_string(),
                })?;

                self.store
                    .put(&path, key.serialize_der(), Metadata::new())
                    .await?;

                info!(fqdn = %fqdn, "Generated new private key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// Persist a chain, replacing any previous one
    ///
    /// The leaf's expiry is written as `Not-After` metadata in the same put.
    pub async fn store_certificate_chain(
        &self,
        fqdn: &str,
        chain: &CertificateChain,
    ) -> Result<(), StorageError> {
        let path = cert_path(fqdn);
        let mut metadata = Metadata::new();
        metadata.insert(
            NOT_AFTER_METADATA.to_string(),
            chain.not_after().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        self.store
            .put(&path, chain.to_pem().into_bytes(), metadata)
            .await
            .map_err(|e| match e {
                StorageError::Write { .. } => e,
                other => StorageError::Write {
                    path: path.clone(),
                    message: other.to_string(),
                },
            })?;

        info!(
            fqdn = %fqdn,
            not_after = %chain.not_after(),
            certificates = chain.len(),
            "Stored certificate chain"
        );
        Ok(())
    }

    /// Domains with a stored certificate, in no particular order
    pub async fn list_known_domains(&self) -> Result<Vec<String>, StorageError> {
        let paths = self.store.list(CERTS_PREFIX).await?;

        Ok(paths
            .iter()
            .filter_map(|path| {
                path.strip_prefix(CERTS_PREFIX)
                    .and_then(|name| name.strip_suffix(CERT_SUFFIX))
            })
            .filter(|fqdn| !fqdn.is_empty() && !fqdn.contains('/'))
            .map(str::to_string)
            .collect())
    }

    /// Expiry of the stored certificate, read from metadata only
    pub async fn expiry_of(&self, fqdn: &str) -> Result<DateTime<Utc>, StorageError> {
        let metadata = self.store.head(&cert_path(fqdn)).await?;

        let value = metadata
            .get(NOT_AFTER_METADATA)
            .ok_or_else(|| StorageError::Metadata {
                fqdn: fqdn.to_string(),
                message: format!("{} is missing", NOT_AFTER_METADATA),
            })?;

        let expiry = DateTime::parse_from_rfc3339(value)
            .map_err(|e| StorageError::Metadata {
                fqdn: fqdn.to_string(),
                message: format!("{} '{}' is not RFC 3339: {}", NOT_AFTER_METADATA, value, e),
            })?
            .with_timezone(&Utc);

        trace!(fqdn = %fqdn, expiry = %expiry, "Read certificate expiry");
        Ok(expiry)
    }

    /// Fetch and decode the stored chain
    pub async fn load_certificate_chain(&self, fqdn: &str) -> Result<CertificateChain, AcmeError> {
        let body = self.store.get(&cert_path(fqdn)).await?;
        let text = String::from_utf8(body)
            .map_err(|e| AcmeError::CertificateParse(e.to_string()))?;

        CertificateChain::from_pem(fqdn, &text)
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Load account credentials JSON for a contact, if stored
    pub async fn load_account_credentials(
        &self,
        contact: &str,
    ) -> Result<Option<String>, StorageError> {
        match self.store.get(&account_path(contact)).await {
            Ok(body) => {
                debug!(contact = %contact, "Loaded ACME account credentials");
                String::from_utf8(body)
                    .map(Some)
                    .map_err(|e| StorageError::Backend(e.to_string()))
            }
            Err(e) if e.is_not_found() => {
                trace!(contact = %contact, "No stored ACME account");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Save account credentials JSON for a contact
    pub async fn save_account_credentials(
        &self,
        contact: &str,
        json: &str,
    ) -> Result<(), StorageError> {
        self.store
            .put(
                &account_path(contact),
                json.as_bytes().to_vec(),
                Metadata::new(),
            )
            .await?;

        info!(contact = %contact, "Saved ACME account credentials");
        Ok(())
    }
}

fn decode_key(fqdn: &str, der: &[u8]) -> Result<KeyPair, StorageError> {
    let key = KeyPair::try_from(der).map_err(|e| StorageError::KeyDecode {
        fqdn: fqdn.to_string(),
        message: e.to_string(),
    })?;

    if key.algorithm() != &rcgen::PKCS_ECDSA_P256_SHA256 {
        return Err(StorageError::KeyDecode {
            fqdn: fqdn.to_string(),
            message: "not an ECDSA P-256 key".to_string(),
        });
    }

    Ok(key)
}
