//! Default values shared by the KDL parser and the `Default` impls.

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

pub fn default_directory_url() -> String {
    LETSENCRYPT_PRODUCTION.to_string()
}

pub fn default_renew_before_days() -> u32 {
    14
}

pub fn default_withdraw_challenges() -> bool {
    true
}

pub fn default_authorization_timeout() -> u64 {
    120
}

pub fn default_poll_interval() -> u64 {
    2
}

pub fn default_storage_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/certwright")
}

pub fn default_api_timeout() -> u64 {
    30
}

pub fn default_record_ttl() -> u32 {
    60
}

pub fn default_check_interval() -> u64 {
    5
}

pub fn default_settle() -> u64 {
    10
}

pub fn default_propagation_timeout() -> Option<u64> {
    Some(600)
}
