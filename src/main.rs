//! rsocks - Reverse SOCKS5 over a multiplexed rendezvous tunnel
//!
//! Run with `--socks <addr>` on the trusted side to accept the agent and serve
//! SOCKS5 clients; run with `--socks ""` on the restricted side to dial the
//! rendezvous and resolve SOCKS5 requests from there.

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use rsocks_lib::{derive_identifier, ReconnectConfig, ReverseSocks5, SessionConfig};
use settings::{CliValues, ConfigFile, Mode, Settings};
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rsocks - reverse SOCKS5 server/agent
#[derive(Parser, Debug)]
#[command(name = "rsocks")]
#[command(about = "rsocks - reverse SOCKS5 server/agent")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(long_about = r#"
rsocks exposes a SOCKS5 proxy that resolves connections on a machine which
cannot accept inbound connections. That machine dials out to the relay and
carries every SOCKS5 client as a stream inside one multiplexed tunnel.

USAGE:
  1) Start the relay on the trusted machine:
       rsocks --socks 127.0.0.1:1080 --rendezvous 0.0.0.0:9001 --key $KEY
  2) Start the agent on the restricted machine:
       rsocks --socks "" --rendezvous relay.example.com:9001 --key $KEY
  3) Point any SOCKS5 client at 127.0.0.1:1080 with
       username = sha1hex($KEY), password = $KEY

ENVIRONMENT VARIABLES:
  RSOCKS_SOCKS       Public SOCKS5 listen address (empty = agent mode)
  RSOCKS_KEY         Shared secret
  RSOCKS_RENDEZVOUS  Rendezvous address
"#)]
struct Cli {
    /// Public SOCKS5 listen address [default: 0.0.0.0:1080]; empty runs the agent
    #[arg(long, env = "RSOCKS_SOCKS")]
    socks: Option<String>,

    /// Shared secret both ends must agree on (required)
    #[arg(long, env = "RSOCKS_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Rendezvous address; the relay binds it, the agent dials it
    #[arg(long, env = "RSOCKS_RENDEZVOUS")]
    rendezvous: Option<String>,

    /// Agent dial timeout in seconds (0 = none)
    #[arg(long, env = "RSOCKS_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Agent: re-dial the rendezvous with backoff instead of exiting
    #[arg(long)]
    reconnect: bool,

    /// Maximum reconnection attempts in a row (0 = infinite)
    #[arg(long)]
    max_reconnect_attempts: Option<usize>,

    /// Initial reconnection delay in seconds
    #[arg(long)]
    reconnect_delay: Option<u64>,

    /// Maximum reconnection delay in seconds
    #[arg(long)]
    max_reconnect_delay: Option<u64>,

    /// Tunnel keepalive ping interval in seconds (0 = off)
    #[arg(long, env = "RSOCKS_KEEPALIVE")]
    keepalive: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) or any tracing filter directive
    #[arg(long, env = "RSOCKS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Disable logging entirely
    #[arg(long, short = 'q')]
    quiet: bool,
}

impl Cli {
    fn values(&self) -> CliValues {
        CliValues {
            socks: self.socks.clone(),
            key: self.key.clone(),
            rendezvous: self.rendezvous.clone(),
            connect_timeout: self.connect_timeout,
            keepalive: self.keepalive,
            reconnect: self.reconnect,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
        }
    }
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

async fn run_relay(tunnel: ReverseSocks5, public_addr: &str) -> Result<()> {
    let bind_addr = tokio::net::lookup_host(public_addr)
        .await
        .with_context(|| format!("Failed to resolve SOCKS5 address {}", public_addr))?
        .next()
        .with_context(|| format!("SOCKS5 address {} did not resolve", public_addr))?;

    let relay = tunnel
        .start_relay(bind_addr)
        .await
        .context("Failed to start relay")?;

    info!("SOCKS5 clients can connect to {}", relay.public_addr());
    debug!(
        "SOCKS5 username: {}",
        derive_identifier(tunnel.config().secret())
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        result = relay.wait() => {
            result.context("Public front stopped")
        }
    }
}

async fn run_agent(tunnel: ReverseSocks5, reconnect: Option<ReconnectConfig>) -> Result<()> {
    let agent = tunnel.agent().context("Failed to create agent")?;

    let run = async {
        match reconnect {
            Some(policy) => {
                info!("Reconnect enabled: {:?}", policy);
                agent.run_with_reconnect(policy).await
            }
            None => agent.run().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        result = run => {
            if let Err(e) = &result {
                error!("Agent stopped: {}", e);
            }
            result.context("Agent failed")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let log_level = if cli.quiet {
        "off".to_string()
    } else {
        cli.log_level
            .clone()
            .or_else(|| file.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    setup_logging(&log_level)?;

    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {}", path.display());
    }

    let settings = Settings::build(cli.values(), file).context("Invalid configuration")?;

    let session = SessionConfig {
        keepalive_interval: settings.keepalive,
        ..SessionConfig::default()
    };
    let mut tunnel = ReverseSocks5::new(settings.tunnel).with_session_config(session);
    if let Some(timeout) = settings.connect_timeout {
        tunnel = tunnel.with_connect_timeout(timeout);
    }

    match settings.mode {
        Mode::Relay { public_addr } => {
            info!("Starting relay");
            run_relay(tunnel, &public_addr).await
        }
        Mode::Agent => {
            info!("Starting agent for rendezvous {}", tunnel.config().rendezvous_addr());
            run_agent(tunnel, settings.reconnect).await
        }
    }
}
