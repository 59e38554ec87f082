//! Environment variable overrides.
//!
//! Every variable carries the `CERTWRIGHT_` prefix, e.g.
//! `CERTWRIGHT_CONTACT=admin@example.com`. Values present in the environment
//! win over the configuration file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use crate::Config;

/// Prefix shared by all recognised variables
pub const ENV_PREFIX: &str = "CERTWRIGHT_";

/// Overrides read from the process environment
#[derive(Debug, Default, Deserialize)]
pub struct EnvOverrides {
    pub acme_url: Option<String>,
    pub contact: Option<String>,
    pub renew_before_days: Option<u32>,
    pub storage_path: Option<PathBuf>,
    pub dns_webhook_url: Option<String>,
    pub dns_webhook_token: Option<String>,
    pub notification_url: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("Failed to read CERTWRIGHT_* environment variables")
    }

    /// Read overrides from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("Failed to parse CERTWRIGHT_* variables")
    }

    /// Apply the overrides on top of a loaded configuration
    pub fn apply(self, config: &mut Config) {
        if let Some(url) = self.acme_url {
            debug!(directory_url = %url, "ACME directory overridden from environment");
            config.acme.directory_url = url;
        }
        if let Some(contact) = self.contact {
            config.acme.contact = contact;
        }
        if let Some(days) = self.renew_before_days {
            config.acme.renew_before_days = days;
        }
        if let Some(path) = self.storage_path {
            config.storage.path = path;
        }
        if let Some(url) = self.dns_webhook_url {
            config.dns_provider.url = url;
        }
        if let Some(token) = self.dns_webhook_token {
            config.dns_provider.token = Some(token);
        }
        if let Some(url) = self.notification_url {
            config.notifications.webhook_url = Some(url);
        }
    }
}
