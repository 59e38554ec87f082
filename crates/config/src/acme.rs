//! ACME account, storage and notification settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::defaults::*;
use crate::validate_http_url;

/// Certificate authority settings
///
/// ```kdl
/// acme {
///     directory-url "https://acme-v02.api.letsencrypt.org/directory"
///     contact "admin@example.com"
///     renew-before-days 14
///     withdraw-challenges #true
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// ACME directory URL
    #[validate(custom(function = "validate_http_url"))]
    pub directory_url: String,

    /// Account contact email, registered as `mailto:` URI
    #[validate(email)]
    pub contact: String,

    /// Renew certificates expiring within this many days
    #[validate(range(min = 1, max = 365))]
    pub renew_before_days: u32,

    /// Delete the challenge TXT record once validation has completed
    pub withdraw_challenges: bool,

    /// Upper bound for waiting on the authority's validation result
    #[validate(range(min = 1))]
    pub authorization_timeout_secs: u64,

    /// Interval between authority status polls
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: default_directory_url(),
            contact: String::new(),
            renew_before_days: default_renew_before_days(),
            withdraw_challenges: default_withdraw_challenges(),
            authorization_timeout_secs: default_authorization_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Object storage settings
///
/// Keys, certificates and account credentials live below `path` as
/// `keys/<fqdn>.key`, `certs/<fqdn>.crt` and `accounts/<contact>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Failure notification settings
///
/// Notifications are disabled when no webhook URL is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NotificationConfig {
    #[validate(custom(function = "validate_http_url"))]
    pub webhook_url: Option<String>,
}
