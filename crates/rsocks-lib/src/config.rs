//! Tunnel configuration shared by both ends

use crate::port::allocate_free_port;
use rsocks_auth::DerivedCredentials;
use rsocks_proto::{validate_address, AddressError};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("The shared secret cannot be empty")]
    EmptySecret,
}

/// Rendezvous address plus shared secret; both ends must agree on both
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    rendezvous_addr: String,
    secret: String,
}

impl TunnelConfig {
    pub fn new(
        rendezvous_addr: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let rendezvous_addr = rendezvous_addr.into();
        let secret = secret.into();

        validate_address(&rendezvous_addr, "rendezvous")?;
        if secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        Ok(Self {
            rendezvous_addr,
            secret,
        })
    }

    /// Use a freshly allocated free port on `host` for the rendezvous
    ///
    /// If no port can be allocated the port falls back to 0, which lets the
    /// rendezvous listener pick any port when it binds.
    pub fn with_free_port(host: &str, secret: impl Into<String>) -> Result<Self, ConfigError> {
        let port = allocate_free_port().unwrap_or_else(|e| {
            warn!("Failed to allocate a rendezvous port, binding any port instead: {}", e);
            0
        });

        let address = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        Self::new(address, secret)
    }

    pub fn rendezvous_addr(&self) -> &str {
        &self.rendezvous_addr
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// SOCKS5 username/password pair derived from the secret
    pub fn credentials(&self) -> DerivedCredentials {
        DerivedCredentials::from_secret(self.secret.clone())
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("rendezvous_addr", &self.rendezvous_addr)
            .field("secret", &"<redacted>")
            .finish()
    }
}
