//! One-stop API for running either end of the tunnel

use crate::config::TunnelConfig;
use rsocks_agent::{AgentConfig, AgentError, TunnelAgent};
use rsocks_mux::SessionConfig;
use rsocks_relay::{
    PublicFront, PublicFrontConfig, RelayError, RendezvousConfig, RendezvousListener,
    SessionRegistry,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Relay task failed: {0}")]
    TaskFailed(String),
}

/// Reverse SOCKS5 tunnel
///
/// The trusted side calls [`start_relay`](Self::start_relay); the restricted
/// side calls [`agent`](Self::agent) and runs the returned agent. Both sides
/// are built from the same [`TunnelConfig`].
#[derive(Debug, Clone)]
pub struct ReverseSocks5 {
    config: TunnelConfig,
    session: SessionConfig,
    connect_timeout: Option<Duration>,
}

impl ReverseSocks5 {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            session: SessionConfig::default(),
            connect_timeout: None,
        }
    }

    /// Mux tuning applied on both ends
    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Bound the agent's rendezvous dial
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Start the rendezvous listener and the public front
    ///
    /// Only a public front bind failure is returned. A rendezvous listener
    /// that cannot bind is logged and left out; the front then refuses every
    /// client.
    pub async fn start_relay(&self, public_addr: SocketAddr) -> Result<RunningRelay, TunnelError> {
        let registry = SessionRegistry::new();

        let listener = match self.bind_rendezvous(registry.clone()).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!("{}", e);
                None
            }
        };
        let rendezvous_addr = match &listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        let front = PublicFront::bind(PublicFrontConfig::new(public_addr), registry.clone()).await?;
        let public_addr = front.local_addr()?;

        let rendezvous = listener.map(|listener| {
            tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    error!("Rendezvous listener stopped: {}", e);
                }
            })
        });
        let front = tokio::spawn(front.run());

        if let Some(addr) = rendezvous_addr {
            info!("Agents should dial {}", addr);
        }

        Ok(RunningRelay {
            public_addr,
            rendezvous_addr,
            registry,
            front,
            rendezvous,
        })
    }

    async fn bind_rendezvous(
        &self,
        registry: SessionRegistry,
    ) -> Result<RendezvousListener, RelayError> {
        let bind_addr = tokio::net::lookup_host(self.config.rendezvous_addr())
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve", self.config.rendezvous_addr()),
                )
            })?;

        let mut config = RendezvousConfig::new(bind_addr);
        config.session = self.session.clone();
        RendezvousListener::bind(config, registry).await
    }

    /// Build the agent for the restricted side
    pub fn agent(&self) -> Result<TunnelAgent, AgentError> {
        let mut config = AgentConfig::new(self.config.rendezvous_addr(), self.config.secret());
        config.connect_timeout = self.connect_timeout;
        config.session = self.session.clone();
        TunnelAgent::new(config)
    }
}

/// Handle on a started relay
pub struct RunningRelay {
    public_addr: SocketAddr,
    rendezvous_addr: Option<SocketAddr>,
    registry: SessionRegistry,
    front: JoinHandle<Result<(), RelayError>>,
    rendezvous: Option<JoinHandle<()>>,
}

impl RunningRelay {
    /// Address operators point their SOCKS5 tools at
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// Address the agent dials, if the rendezvous listener is up
    pub fn rendezvous_addr(&self) -> Option<SocketAddr> {
        self.rendezvous_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Wait for the public front to stop, which only happens on a fatal error
    pub async fn wait(mut self) -> Result<(), TunnelError> {
        let result = (&mut self.front).await;
        if let Some(rendezvous) = self.rendezvous.take() {
            rendezvous.abort();
        }

        match result {
            Ok(result) => Ok(result?),
            Err(e) => Err(TunnelError::TaskFailed(e.to_string())),
        }
    }

    /// Stop both listeners and close the current session
    pub fn shutdown(&self) {
        self.front.abort();
        if let Some(rendezvous) = &self.rendezvous {
            rendezvous.abort();
        }
        if let Some(session) = self.registry.current() {
            session.close();
        }
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.front.abort();
        if let Some(rendezvous) = &self.rendezvous {
            rendezvous.abort();
        }
    }
}
