//! Reverse SOCKS5 library - Public API for both ends of the tunnel
//!
//! This library re-exports the rsocks crates and adds [`ReverseSocks5`], a
//! small facade that builds either end from one [`TunnelConfig`].
//!
//! # Trusted side
//!
//! ```no_run
//! use rsocks_lib::{ReverseSocks5, TunnelConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TunnelConfig::new("0.0.0.0:9001", "hunter2")?;
//! let relay = ReverseSocks5::new(config)
//!     .start_relay("127.0.0.1:1080".parse()?)
//!     .await?;
//!
//! println!("SOCKS5 on {}", relay.public_addr());
//! relay.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Restricted side
//!
//! ```no_run
//! use rsocks_lib::{ReverseSocks5, TunnelConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TunnelConfig::new("relay.example.com:9001", "hunter2")?;
//! let agent = ReverseSocks5::new(config).agent()?;
//! agent.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Operators then point their tools at the public address and authenticate
//! with [`derive_identifier`]`(secret)` as the username and the secret as the
//! password.

pub mod config;
pub mod port;
mod tunnel;

pub use config::{ConfigError, TunnelConfig};
pub use port::allocate_free_port;
pub use tunnel::{ReverseSocks5, RunningRelay, TunnelError};

// Re-export the building blocks
pub use rsocks_agent::{
    AgentConfig, AgentError, AgentState, ReconnectConfig, ReconnectError, TunnelAgent,
};
pub use rsocks_auth::{derive_identifier, CredentialStore, DerivedCredentials, StaticCredentials};
pub use rsocks_mux::{AcceptPolicy, MuxError, MuxSession, MuxStream, Role, SessionConfig};
pub use rsocks_proto::{validate_address, AddressError};
pub use rsocks_relay::{
    bridge, BridgeStats, PublicFront, PublicFrontConfig, RelayError, RendezvousConfig,
    RendezvousListener, SessionRegistry,
};
pub use rsocks_socks5::{Socks5Config, Socks5Error, Socks5Server, TargetAddr};

// Re-export the runtime for callers that don't depend on tokio directly
pub use tokio;
