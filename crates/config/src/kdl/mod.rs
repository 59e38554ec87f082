//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `sections`: One parser per top-level block

mod helpers;
mod sections;

pub use helpers::offset_to_line_col;
pub use sections::{
    parse_acme_config, parse_dns_provider_config, parse_notification_config,
    parse_propagation_config, parse_storage_config,
};

use anyhow::Result;
use tracing::warn;

use crate::Config;

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();
    let mut saw_acme = false;
    let mut saw_dns_provider = false;

    for node in doc.nodes() {
        match node.name().value() {
            "acme" => {
                config.acme = parse_acme_config(node)?;
                saw_acme = true;
            }
            "storage" => {
                config.storage = parse_storage_config(node)?;
            }
            "dns-provider" => {
                config.dns_provider = parse_dns_provider_config(node)?;
                saw_dns_provider = true;
            }
            "propagation" => {
                config.propagation = parse_propagation_config(node)?;
            }
            "notifications" => {
                config.notifications = parse_notification_config(node)?;
            }
            other => {
                warn!(node = %other, "Ignoring unknown top-level configuration block");
            }
        }
    }

    if !saw_acme {
        return Err(anyhow::anyhow!(
            "Configuration requires an 'acme' block, e.g., acme {{ contact \"admin@example.com\" }}"
        ));
    }
    if !saw_dns_provider {
        return Err(anyhow::anyhow!(
            "Configuration requires a 'dns-provider' block, e.g., dns-provider {{ url \"https://dns-api.internal/v1\" }}"
        ));
    }

    Ok(config)
}
