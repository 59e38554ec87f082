//! Certwright - Main entry point
//!
//! Issues and renews certificates over DNS-01, once per invocation or on a
//! schedule.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use certwright::{CredentialStore, FsObjectStore, Job, JobEvent, RunContext};
use certwright_config::Config;

/// Certwright - DNS-01 certificate issuance and renewal
#[derive(Parser, Debug)]
#[command(name = "certwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWRIGHT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue one certificate, or renew all due certificates when no domain is given
    Run {
        /// Domain to issue a certificate for
        #[arg(long = "fqdn", env = "FQDN", default_value = "")]
        fqdn: String,
    },
    /// Renew due certificates periodically until interrupted
    Watch {
        /// Hours between renewal checks (minimum 1)
        #[arg(long = "interval-hours", default_value_t = 12)]
        interval_hours: u64,
    },
    /// Show the stored certificate for a domain
    Show {
        /// Domain to show
        fqdn: String,
    },
    /// Validate configuration and exit
    Test,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Commands::Test => test_config(cli.config.as_deref()),
        Commands::Show { fqdn } => runtime.block_on(show(cli.config.as_deref(), &fqdn)),
        Commands::Run { fqdn } => runtime.block_on(run(cli.config.as_deref(), fqdn)),
        Commands::Watch { interval_hours } => {
            runtime.block_on(watch(cli.config.as_deref(), interval_hours))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("No configuration file specified, using defaults and environment"),
    }
    Config::load(path).context("Failed to load configuration")
}

/// Test configuration and exit
fn test_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;

    info!("Configuration test successful:");
    info!("  - directory: {}", config.acme.directory_url);
    info!("  - contact: {}", config.acme.contact);
    info!("  - storage: {}", config.storage.path.display());
    info!("  - dns provider: {}", config.dns_provider.url);
    info!(
        "  - notifications: {}",
        config.notifications.webhook_url.as_deref().unwrap_or("disabled")
    );

    println!(
        "certwright: configuration {} test is successful",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    );
    Ok(())
}

/// Handle a single job event
async fn run(path: Option<&Path>, fqdn: String) -> Result<()> {
    let config = load_config(path)?;
    let job = Job::from_config(&config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let event = JobEvent { fqdn };
    let ctx = RunContext::with_cancellation(cancel);
    job.handle(&ctx, &event).await?;

    info!("Run completed successfully");
    Ok(())
}

/// Renew on a schedule until SIGINT or SIGTERM
async fn watch(path: Option<&Path>, interval_hours: u64) -> Result<()> {
    let config = load_config(path)?;
    let job = Job::from_config(&config)
        .await?
        .with_check_interval(Duration::from_secs(interval_hours * 3600));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    job.watch(cancel).await;
    Ok(())
}

/// Print expiry and chain length of a stored certificate
async fn show(path: Option<&Path>, fqdn: &str) -> Result<()> {
    let config = load_config(path)?;
    let objects = FsObjectStore::new(&config.storage.path)?;
    let credentials = CredentialStore::new(Arc::new(objects));

    let expiry = credentials
        .expiry_of(fqdn)
        .await
        .with_context(|| format!("No readable certificate stored for {}", fqdn))?;
    let chain = credentials.load_certificate_chain(fqdn).await?;

    println!("{}", fqdn);
    println!("  not after:    {}", expiry.to_rfc3339());
    println!("  certificates: {}", chain.len());
    Ok(())
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = sigterm => info!("Received SIGTERM, stopping"),
    }
    cancel.cancel();
}
