//! Section-level KDL parsing.

use anyhow::Result;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::trace;

use crate::acme::{AcmeConfig, NotificationConfig, StorageConfig};
use crate::dns::{DnsProviderConfig, PropagationConfig};

use super::helpers::{get_bool_entry, get_bounded_entry, get_string_args, get_string_entry};

/// Parse the `acme` block
pub fn parse_acme_config(node: &kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");

    let defaults = AcmeConfig::default();
    let config = AcmeConfig {
        directory_url: get_string_entry(node, "directory-url").unwrap_or(defaults.directory_url),
        contact: get_string_entry(node, "contact").ok_or_else(|| {
            anyhow::anyhow!(
                "The 'acme' block requires a 'contact' field, e.g., contact \"admin@example.com\""
            )
        })?,
        renew_before_days: get_bounded_entry(node, "renew-before-days")?
            .unwrap_or(defaults.renew_before_days),
        withdraw_challenges: get_bool_entry(node, "withdraw-challenges")
            .unwrap_or(defaults.withdraw_challenges),
        authorization_timeout_secs: get_bounded_entry(node, "authorization-timeout-secs")?
            .unwrap_or(defaults.authorization_timeout_secs),
        poll_interval_secs: get_bounded_entry(node, "poll-interval-secs")?
            .unwrap_or(defaults.poll_interval_secs),
    };

    trace!(
        directory_url = %config.directory_url,
        renew_before_days = config.renew_before_days,
        withdraw_challenges = config.withdraw_challenges,
        "Parsed acme configuration"
    );

    Ok(config)
}

/// Parse the `storage` block
pub fn parse_storage_config(node: &kdl::KdlNode) -> Result<StorageConfig> {
    let path = get_string_entry(node, "path").ok_or_else(|| {
        anyhow::anyhow!(
            "The 'storage' block requires a 'path' field, e.g., path \"/var/lib/certwright\""
        )
    })?;

    Ok(StorageConfig {
        path: PathBuf::from(path),
    })
}

/// Parse the `dns-provider` block
pub fn parse_dns_provider_config(node: &kdl::KdlNode) -> Result<DnsProviderConfig> {
    trace!("Parsing dns-provider configuration block");

    let defaults = DnsProviderConfig::default();
    let url = get_string_entry(node, "url").ok_or_else(|| {
        anyhow::anyhow!(
            "The 'dns-provider' block requires a 'url' field, e.g., url \"https://dns-api.internal/v1\""
        )
    })?;

    Ok(DnsProviderConfig {
        url,
        token: get_string_entry(node, "token"),
        auth_header: get_string_entry(node, "auth-header"),
        timeout_secs: get_bounded_entry(node, "timeout-secs")?.unwrap_or(defaults.timeout_secs),
        record_ttl_secs: get_bounded_entry(node, "record-ttl-secs")?
            .unwrap_or(defaults.record_ttl_secs),
    })
}

/// Parse the `propagation` block
pub fn parse_propagation_config(node: &kdl::KdlNode) -> Result<PropagationConfig> {
    trace!("Parsing propagation configuration block");

    let defaults = PropagationConfig::default();

    let timeout_secs = match get_bounded_entry::<u64>(node, "timeout-secs")? {
        Some(0) => None,
        Some(secs) => Some(secs),
        None => defaults.timeout_secs,
    };

    let nameservers = get_string_args(node, "nameservers")
        .into_iter()
        .map(|s| {
            s.parse::<IpAddr>().map_err(|_| {
                anyhow::anyhow!("Invalid nameserver address '{}' in 'propagation' block", s)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PropagationConfig {
        check_interval_secs: get_bounded_entry(node, "check-interval-secs")?
            .unwrap_or(defaults.check_interval_secs),
        settle_secs: get_bounded_entry(node, "settle-secs")?.unwrap_or(defaults.settle_secs),
        timeout_secs,
        nameservers,
    })
}

/// Parse the `notifications` block
pub fn parse_notification_config(node: &kdl::KdlNode) -> Result<NotificationConfig> {
    Ok(NotificationConfig {
        webhook_url: get_string_entry(node, "webhook-url"),
    })
}
