//! Configuration for the certwright renewal job
//!
//! Configuration is read from a KDL file, overlaid with `CERTWRIGHT_*`
//! environment variables and validated before use.
//!
//! # Module Organization
//!
//! - [`acme`]: Certificate authority, storage and notification settings
//! - [`dns`]: DNS provider and propagation settings
//! - [`env`]: Environment variable overrides
//! - `kdl`: KDL format parsing
//!
//! # Example
//!
//! ```kdl
//! acme {
//!     contact "admin@example.com"
//!     renew-before-days 14
//! }
//!
//! storage {
//!     path "/var/lib/certwright"
//! }
//!
//! dns-provider {
//!     url "https://dns-api.internal/v1"
//!     token "secret"
//! }
//!
//! propagation {
//!     check-interval-secs 5
//!     settle-secs 10
//!     timeout-secs 600
//! }
//!
//! notifications {
//!     webhook-url "https://alerts.internal/hooks/certificates"
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use validator::{Validate, ValidationError};

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod defaults;
pub mod dns;
pub mod env;
mod kdl;

pub use acme::{AcmeConfig, NotificationConfig, StorageConfig};
pub use dns::{DnsProviderConfig, PropagationConfig};
pub use env::EnvOverrides;

/// Configuration errors surfaced after parsing
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field-level validation failed
    #[error("Configuration validation failed: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Complete job configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub acme: AcmeConfig,

    pub storage: StorageConfig,

    #[validate(nested)]
    pub dns_provider: DnsProviderConfig,

    #[validate(nested)]
    pub propagation: PropagationConfig,

    #[validate(nested)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_kdl(&content)
    }

    /// Load configuration for a run
    ///
    /// Reads the file if one is given, otherwise starts from defaults, then
    /// applies environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults and environment");
                Self::default()
            }
        };

        EnvOverrides::from_env()?.apply(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
            use miette::Diagnostic;

            let mut error_msg = String::new();
            error_msg.push_str("KDL configuration parse error:\n\n");

            let mut found_details = false;
            if let Some(related) = e.related() {
                for diagnostic in related {
                    error_msg.push_str(&format!("  {}\n", diagnostic));
                    found_details = true;

                    if let Some(labels) = diagnostic.labels() {
                        for label in labels {
                            let (line, col) = kdl::offset_to_line_col(content, label.offset());
                            error_msg
                                .push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                            if let Some(line_content) = content.lines().nth(line.saturating_sub(1))
                            {
                                error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                                error_msg.push_str(&format!(
                                    "     | {}^",
                                    " ".repeat(col.saturating_sub(1))
                                ));
                                if let Some(label_msg) = label.label() {
                                    error_msg.push_str(&format!(" {}", label_msg));
                                }
                                error_msg.push('\n');
                            }
                        }
                    }

                    if let Some(help) = diagnostic.help() {
                        error_msg.push_str(&format!("\n  Help: {}\n", help));
                    }
                }
            }

            if !found_details {
                error_msg.push_str(&format!("  {}\n", e));
            }

            anyhow::anyhow!("{}", error_msg)
        })?;

        kdl::parse_kdl_document(doc)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;
        Ok(())
    }
}

/// Accept only absolute `http` or `https` URLs
pub(crate) fn validate_http_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(ValidationError::new("http_url")),
    }
}
