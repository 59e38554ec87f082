//! ACME certificate issuance over DNS-01
//!
//! # Architecture
//!
//! - [`CredentialStore`] - Per-domain keys, certificate chains and account
//!   credentials on top of an [`ObjectStore`](crate::store::ObjectStore)
//! - [`ChallengeRecordManager`] - Publishes `_acme-challenge` TXT records
//!   through a [`DnsProvider`] and waits for propagation
//! - [`Orchestrator`] - Authorizes domains and issues certificates through a
//!   [`CertificateAuthority`]
//! - [`RenewalScheduler`] - Finds certificates close to expiry and renews
//!   them as one batch
//! - [`AcmeClient`] - [`CertificateAuthority`] backed by `instant-acme`
//!
//! # Challenge Flow
//!
//! For each domain:
//!
//! 1. [`AcmeClient`] opens an order and reports the domain authorization
//! 2. If the authorization is already valid, issuance continues at step 6
//! 3. [`ChallengeRecordManager`] upserts the TXT record in the hosted zone
//!    and polls resolvers until the record is visible
//! 4. The authority is told to validate and polled until it decides
//! 5. The challenge record is withdrawn
//! 6. The stored key (created on first use) signs a CSR, the order is
//!    finalized and the returned chain is stored with its expiry as metadata
//!
//! All waits race the [`RunContext`] cancellation token.

mod authority;
mod challenge;
mod client;
mod context;
pub mod dns;
mod error;
mod orchestrator;
mod scheduler;
mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use authority::{
    Authorization, AuthorizationStatus, CertificateAuthority, Challenge, ChallengeKind,
};
pub use challenge::{ChallengeRecordManager, DEFAULT_CHALLENGE_TTL};
pub use client::AcmeClient;
pub use context::RunContext;
pub use error::{AcmeError, DnsProviderError, StorageError};
pub use orchestrator::{build_csr, AuthorizationState, Orchestrator};
pub use scheduler::{threshold, RenewalScheduler, DEFAULT_CHECK_INTERVAL, MIN_CHECK_INTERVAL};
pub use storage::{CertificateChain, CredentialStore, NOT_AFTER_METADATA};
