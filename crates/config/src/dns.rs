//! DNS provider and propagation settings.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use validator::Validate;

use crate::defaults::*;
use crate::validate_http_url;

/// Managed DNS API used to publish challenge records
///
/// ```kdl
/// dns-provider {
///     url "https://dns-api.internal/v1"
///     token "secret"
///     auth-header "X-Api-Key"
///     timeout-secs 30
///     record-ttl-secs 60
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DnsProviderConfig {
    /// Base URL of the DNS webhook API
    #[validate(custom(function = "validate_http_url"))]
    pub url: String,

    /// API token, sent as bearer token unless `auth_header` is set
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Custom header name carrying the token
    pub auth_header: Option<String>,

    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// TTL of the challenge TXT record
    #[validate(range(min = 1, max = 3600))]
    pub record_ttl_secs: u32,
}

impl Default for DnsProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            auth_header: None,
            timeout_secs: default_api_timeout(),
            record_ttl_secs: default_record_ttl(),
        }
    }
}

/// Propagation checking against public resolvers
///
/// ```kdl
/// propagation {
///     check-interval-secs 5
///     settle-secs 10
///     timeout-secs 600
///     nameservers "8.8.8.8" "1.1.1.1"
/// }
/// ```
///
/// A `timeout-secs` of 0 disables the deadline.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PropagationConfig {
    #[validate(range(min = 1))]
    pub check_interval_secs: u64,

    pub settle_secs: u64,

    pub timeout_secs: Option<u64>,

    /// Empty means the system resolver configuration
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            settle_secs: default_settle(),
            timeout_secs: default_propagation_timeout(),
            nameservers: Vec::new(),
        }
    }
}
