//! Certwright certificate renewal library
//!
//! Issues and renews TLS certificates through an ACME authority, proving
//! domain control with DNS-01 challenges published via a managed DNS API.
//! Keys and certificate chains are kept in an object store, with each
//! certificate's expiry attached as metadata so renewal scans never download
//! a chain.
//!
//! # Example
//!
//! ```ignore
//! use certwright::{Job, JobEvent, RunContext};
//! use certwright_config::Config;
//!
//! let config = Config::load(Some("/etc/certwright/config.kdl".as_ref()))?;
//! let job = Job::from_config(&config).await?;
//!
//! // Renew everything expiring within the renewal window
//! job.handle(&RunContext::new(), &JobEvent::renew_all()).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod job;
pub mod notify;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Issuance and renewal
pub use acme::{
    AcmeClient, AcmeError, CertificateAuthority, CertificateChain, ChallengeRecordManager,
    CredentialStore, Orchestrator, RenewalScheduler, RunContext,
};

// Storage
pub use store::{FsObjectStore, MemoryObjectStore, Metadata, ObjectStore};

// Notifications
pub use notify::{Notifier, NotifyError, NoopNotifier, WebhookNotifier};

// Entry point
pub use job::{Job, JobEvent};
