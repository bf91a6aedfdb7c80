//! Trusted side of the tunnel
//!
//! Two listeners share one [`SessionRegistry`]:
//! - [`RendezvousListener`] accepts the agent's outbound connection, wraps it
//!   in a mux session (client role) and publishes it.
//! - [`PublicFront`] accepts operator connections and bridges each one onto a
//!   fresh stream of the current session.

mod accept;
pub mod bridge;
pub mod error;
pub mod front;
pub mod registry;
pub mod rendezvous;

pub use bridge::{bridge, BridgeStats};
pub use error::RelayError;
pub use front::{PublicFront, PublicFrontConfig};
pub use registry::SessionRegistry;
pub use rendezvous::{RendezvousConfig, RendezvousListener};

pub use rsocks_mux::AcceptPolicy;
