//! DNS-01 support: managed DNS providers and propagation lookups

mod propagation;
mod provider;
mod webhook;

pub use propagation::{HickoryTxtResolver, PropagationSettings, TxtResolver};
pub use provider::{
    challenge_record_name, registrable_domain, ChangeAction, DnsProvider, DnsResult, HostedZone,
    RecordChange, ACME_CHALLENGE_RECORD,
};
pub use webhook::WebhookDnsProvider;
