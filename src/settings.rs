//! Command-line settings merged with the optional YAML config file

use anyhow::{Context, Result};
use rsocks_lib::{validate_address, ReconnectConfig, TunnelConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Public listen address used when neither the CLI nor the file sets one
pub const DEFAULT_SOCKS_ADDR: &str = "0.0.0.0:1080";

/// Host the relay binds its rendezvous listener on when no address is given
const DEFAULT_RENDEZVOUS_HOST: &str = "127.0.0.1";

/// Configuration file format
///
/// Every field mirrors a command-line flag; values given on the command line
/// win over values from the file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendezvous: Option<String>,

    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Seconds; 0 turns keepalive off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectFile {
    pub enabled: bool,

    /// 0 = infinite
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,

    /// Initial delay in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Maximum delay in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Values taken from the command line, before merging
#[derive(Debug, Default)]
pub struct CliValues {
    pub socks: Option<String>,
    pub key: Option<String>,
    pub rendezvous: Option<String>,
    pub connect_timeout: Option<u64>,
    pub keepalive: Option<u64>,
    pub reconnect: bool,
    pub max_reconnect_attempts: Option<usize>,
    pub reconnect_delay: Option<u64>,
    pub max_reconnect_delay: Option<u64>,
}

/// Which end of the tunnel this process runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Trusted side: rendezvous listener plus public SOCKS5 front
    Relay { public_addr: String },
    /// Restricted side: dial the rendezvous and serve SOCKS5
    Agent,
}

/// Fully merged and validated settings
#[derive(Debug)]
pub struct Settings {
    pub mode: Mode,
    pub tunnel: TunnelConfig,
    pub connect_timeout: Option<Duration>,
    pub keepalive: Option<Duration>,
    pub reconnect: Option<ReconnectConfig>,
}

impl Settings {
    /// Merge CLI values over the config file and validate the result
    pub fn build(cli: CliValues, file: ConfigFile) -> Result<Self> {
        let socks = cli
            .socks
            .or(file.socks)
            .unwrap_or_else(|| DEFAULT_SOCKS_ADDR.to_string());

        let key = cli
            .key
            .or(file.key)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow::anyhow!("A key is required (use --key or config file)"))?;

        let rendezvous = cli.rendezvous.or(file.rendezvous).filter(|r| !r.is_empty());

        let mode = if socks.is_empty() {
            Mode::Agent
        } else {
            validate_address(&socks, "socks")?;
            Mode::Relay { public_addr: socks }
        };

        let tunnel = match (&mode, rendezvous) {
            (_, Some(rendezvous)) => TunnelConfig::new(rendezvous, key)?,
            (Mode::Relay { .. }, None) => {
                let config = TunnelConfig::with_free_port(DEFAULT_RENDEZVOUS_HOST, key)?;
                info!("No rendezvous address given, using {}", config.rendezvous_addr());
                config
            }
            (Mode::Agent, None) => {
                anyhow::bail!("A rendezvous address is required in agent mode (use --rendezvous)")
            }
        };

        let connect_timeout = cli
            .connect_timeout
            .or(file.connect_timeout)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let keepalive = cli
            .keepalive
            .or(file.keepalive)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let file_reconnect = file.reconnect.unwrap_or_default();
        let reconnect = if cli.reconnect || file_reconnect.enabled {
            let defaults = ReconnectConfig::default();
            let delay = cli.reconnect_delay.or(file_reconnect.delay);
            let max_delay = cli.max_reconnect_delay.or(file_reconnect.max_delay);
            let max_attempts = cli
                .max_reconnect_attempts
                .or(file_reconnect.max_attempts)
                .filter(|attempts| *attempts > 0);

            Some(ReconnectConfig {
                initial_backoff: delay.map(Duration::from_secs).unwrap_or(defaults.initial_backoff),
                max_backoff: max_delay.map(Duration::from_secs).unwrap_or(defaults.max_backoff),
                max_attempts,
                ..defaults
            })
        } else {
            None
        };

        Ok(Self {
            mode,
            tunnel,
            connect_timeout,
            keepalive,
            reconnect,
        })
    }
}
