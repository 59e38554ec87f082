//! TXT lookups for DNS propagation checking
//!
//! The challenge manager polls a [`TxtResolver`] until the published value
//! is visible. The production resolver goes through hickory with its cache
//! disabled so every poll reaches the network.

use std::fmt::Debug;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::trace;

use super::provider::DnsProviderError;
use certwright_config::PropagationConfig;

/// Plain TXT lookup against the public resolver chain
#[async_trait]
pub trait TxtResolver: Send + Sync + Debug {
    /// Every TXT record at `name`, each record's strings concatenated
    ///
    /// A name without TXT records yields an empty list.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsProviderError>;
}

/// Timing of propagation checks
#[derive(Debug, Clone)]
pub struct PropagationSettings {
    /// Delay before each lookup
    pub check_interval: Duration,
    /// Extra wait once the record is visible
    pub settle: Duration,
    /// Upper bound on the whole wait, `None` waits until cancelled
    pub timeout: Option<Duration>,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            settle: Duration::from_secs(10),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl From<&PropagationConfig> for PropagationSettings {
    fn from(config: &PropagationConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval_secs),
            settle: Duration::from_secs(config.settle_secs),
            timeout: config
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Resolver backed by hickory
pub struct HickoryTxtResolver {
    resolver: TokioAsyncResolver,
    nameservers: Vec<IpAddr>,
}

impl HickoryTxtResolver {
    /// Query the given nameservers, or the system configuration when empty
    pub fn new(nameservers: &[IpAddr]) -> Result<Self, DnsProviderError> {
        let (config, mut opts) = if nameservers.is_empty() {
            hickory_resolver::system_conf::read_system_conf().map_err(|e| {
                DnsProviderError::Configuration(format!(
                    "Failed to read system resolver configuration: {}",
                    e
                ))
            })?
        } else {
            let group = NameServerConfigGroup::from_ips_clear(nameservers, 53, true);
            (
                ResolverConfig::from_parts(None, vec![], group),
                ResolverOpts::default(),
            )
        };

        opts.timeout = Duration::from_secs(5);
        opts.attempts = 3;
        opts.cache_size = 0;

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            nameservers: nameservers.to_vec(),
        })
    }
}

impl Debug for HickoryTxtResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryTxtResolver")
            .field("nameservers", &self.nameservers)
            .finish()
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsProviderError> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => {
                let values: Vec<String> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data))
                            .collect()
                    })
                    .collect();

                trace!(name = %name, records = values.len(), "TXT lookup answered");
                Ok(values)
            }
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                trace!(name = %name, "No TXT records yet");
                Ok(Vec::new())
            }
            Err(e) => Err(DnsProviderError::ApiRequest(format!(
                "DNS lookup failed for '{}': {}",
                name, e
            ))),
        }
    }
}
