//! Operator-facing listener

use crate::accept::accept_failed;
use crate::bridge::bridge;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use rsocks_mux::AcceptPolicy;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const ROLE: &str = "public front";

#[derive(Debug, Clone)]
pub struct PublicFrontConfig {
    pub bind_addr: SocketAddr,
    pub accept_policy: AcceptPolicy,
}

impl PublicFrontConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            accept_policy: AcceptPolicy::Fatal,
        }
    }
}

/// Bridges every accepted client onto a new stream of the current session
///
/// Clients arriving before any agent has connected are closed immediately.
pub struct PublicFront {
    listener: TcpListener,
    config: PublicFrontConfig,
    registry: SessionRegistry,
}

impl PublicFront {
    pub async fn bind(
        config: PublicFrontConfig,
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

    /// Accept clients until a fatal accept error
    pub async fn run(self) -> Result<(), RelayError> {
        info!("Waiting for SOCKS5 clients on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((client, peer_addr)) => self.handle_client(client, peer_addr).await,
                Err(e) => accept_failed(ROLE, self.config.accept_policy, e).await?,
            }
        }
    }

    async fn handle_client(&self, client: TcpStream, peer_addr: SocketAddr) {
        let Some(session) = self.registry.current() else {
            warn!(
                "Refusing client {}: the agent has not connected yet",
                peer_addr
            );
            return;
        };

        let stream = match session.open().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open tunnel stream for client {}: {}", peer_addr, e);
                if self.registry.retire(&session) {
                    info!("Dropped dead tunnel session, waiting for the agent");
                }
                return;
            }
        };

        let _ = client.set_nodelay(true);
        let stream_id = stream.id();
        debug!("Client {} bridged onto tunnel stream {}", peer_addr, stream_id);

        tokio::spawn(async move {
            let stats = bridge(client, stream).await;
            debug!(
                "Client {} disconnected from tunnel stream {} ({} bytes up, {} bytes down)",
                peer_addr, stream_id, stats.client_to_tunnel, stats.tunnel_to_client
            );
        });
    }
}
