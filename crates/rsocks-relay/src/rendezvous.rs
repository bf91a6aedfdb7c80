//! Listener the agent dials into

use crate::accept::accept_failed;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use rsocks_mux::{AcceptPolicy, MuxSession, Role, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

const ROLE: &str = "rendezvous listener";

#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    pub bind_addr: SocketAddr,
    /// Tuning for every session built from an agent connection
    pub session: SessionConfig,
    pub accept_policy: AcceptPolicy,
}

impl RendezvousConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            session: SessionConfig::default(),
            accept_policy: AcceptPolicy::Continue,
        }
    }
}

/// Accepts agent connections and publishes each one as the current session
///
/// The relay end plays the mux *client*: it opens streams on connections it
/// accepted. Every new agent connection replaces the current session
/// outright.
pub struct RendezvousListener {
    listener: TcpListener,
    config: RendezvousConfig,
    registry: SessionRegistry,
}

impl RendezvousListener {
    pub async fn bind(
        config: RendezvousConfig,
        registry: SessionRegistry,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| RelayError::BindError {
                role: ROLE,
                address: config.bind_addr,
                source,
            })?;

        Ok(Self {
            listener,
            config,
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept agent connections until a fatal accept error
    pub async fn run(self) -> Result<(), RelayError> {
        info!("Waiting for the agent on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((conn, peer_addr)) => self.install(conn, peer_addr),
                Err(e) => accept_failed(ROLE, self.config.accept_policy, e).await?,
            }
        }
    }

    fn install(&self, conn: TcpStream, peer_addr: SocketAddr) {
        let _ = conn.set_nodelay(true);

        let session = Arc::new(MuxSession::new(
            conn,
            Role::Client,
            self.config.session.clone(),
        ));

        match self.registry.publish(session.clone()) {
            Some(_previous) => info!(
                "Agent connected from {}, replacing the previous tunnel session",
                peer_addr
            ),
            None => info!("Agent connected from {}, tunnel session established", peer_addr),
        }

        // Retire the session when its transport goes away, unless it was replaced
        let registry = self.registry.clone();
        tokio::spawn(async move {
            session.closed().await;
            if registry.retire(&session) {
                info!("Tunnel session from {} closed, waiting for the agent", peer_addr);
            } else {
                debug!("Superseded tunnel session from {} closed", peer_addr);
            }
        });
    }
}
