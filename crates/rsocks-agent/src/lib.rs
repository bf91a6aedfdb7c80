//! Tunnel Agent - restricted side of a reverse SOCKS5 tunnel
//!
//! The agent runs on a machine that cannot accept inbound connections. It
//! dials *out* to the relay's rendezvous address, turns that single
//! connection into a mux session in the **server** role, and serves SOCKS5 on
//! every stream the relay opens.
//!
//! # Example Usage
//!
//! ```no_run
//! use rsocks_agent::{AgentConfig, TunnelAgent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::new("relay.example.com:9001", "hunter2");
//!
//!     let agent = TunnelAgent::new(config)?;
//!     agent.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! `Idle -> Dialing -> SessionEstablished -> Serving -> Failed`
//!
//! Any dial or session failure is terminal for [`TunnelAgent::run`]. Callers
//! that want the agent to come back on its own use
//! [`TunnelAgent::run_with_reconnect`].

mod agent;
mod reconnect;

pub use agent::{AgentConfig, AgentError, AgentState, TunnelAgent};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
