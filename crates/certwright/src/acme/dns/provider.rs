//! DNS provider trait for DNS-01 challenges
//!
//! A provider exposes the two capabilities the challenge lifecycle needs:
//! finding hosted zones by name and applying a batch of record changes to a
//! zone.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::acme::error::DnsProviderError;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// A provider's container for a domain's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// Provider-assigned identifier
    pub id: String,
    /// Zone apex, with or without the trailing dot
    pub name: String,
}

/// Record change action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    /// Create the record or replace its values
    Upsert,
    /// Remove the record
    Delete,
}

/// A single record change within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    pub action: ChangeAction,
    /// Fully-qualified record name with trailing dot
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub ttl: u32,
    pub values: Vec<String>,
}

impl RecordChange {
    /// Upsert a single-valued TXT record
    pub fn upsert_txt(name: &str, value: &str, ttl: u32) -> Self {
        Self::txt(ChangeAction::Upsert, name, value, ttl)
    }

    /// Delete a single-valued TXT record
    pub fn delete_txt(name: &str, value: &str, ttl: u32) -> Self {
        Self::txt(ChangeAction::Delete, name, value, ttl)
    }

    fn txt(action: ChangeAction, name: &str, value: &str, ttl: u32) -> Self {
        Self {
            action,
            name: name.to_string(),
            record_type: "TXT".to_string(),
            ttl,
            values: vec![value.to_string()],
        }
    }
}

/// Managed DNS API
///
/// Implementations must be thread-safe.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Returns the provider name (e.g., "webhook")
    fn name(&self) -> &'static str;

    /// Hosted zones whose name matches or follows `name`
    ///
    /// Providers may return more than the owning zone (for example the
    /// next zones in lexicographic order); callers pick the right one.
    async fn find_zones_by_name(&self, name: &str) -> DnsResult<Vec<HostedZone>>;

    /// Apply a batch of record changes to a zone
    ///
    /// Deleting a record that does not exist succeeds.
    async fn change_records(&self, zone_id: &str, changes: &[RecordChange]) -> DnsResult<()>;
}

/// Challenge record name for a domain: `_acme-challenge.<fqdn>.`
pub fn challenge_record_name(fqdn: &str) -> String {
    format!("{}.{}.", ACME_CHALLENGE_RECORD, fqdn.trim_end_matches('.'))
}

/// The domain with its leftmost label removed
///
/// `www.example.com` becomes `example.com`. A single label is returned
/// unchanged.
pub fn registrable_domain(fqdn: &str) -> &str {
    let fqdn = fqdn.trim_end_matches('.');
    fqdn.split_once('.').map(|(_, rest)| rest).unwrap_or(fqdn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_record_name() {
        assert_eq!(
            challenge_record_name("x.example.com"),
            "_acme-challenge.x.example.com."
        );
        assert_eq!(
            challenge_record_name("x.example.com."),
            "_acme-challenge.x.example.com."
        );
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.co.uk"), "b.example.co.uk");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_record_change_wire_format() {
        let change = RecordChange::upsert_txt("_acme-challenge.a.example.com.", "tok", 60);
        let json = serde_json::to_value(&change).unwrap();

        assert_eq!(json["action"], "UPSERT");
        assert_eq!(json["type"], "TXT");
        assert_eq!(json["values"][0], "tok");
    }
}
