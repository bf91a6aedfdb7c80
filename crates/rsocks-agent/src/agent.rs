use crate::reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
use rsocks_auth::{DerivedCredentials, StaticCredentials};
use rsocks_mux::{MuxError, MuxSession, Role, SessionConfig};
use rsocks_proto::{validate_address, AddressError};
use rsocks_socks5::{Socks5Config, Socks5Error, Socks5Server};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors that can occur in the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Failed to connect to rendezvous {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to rendezvous {address} after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    #[error("Tunnel session ended: {0}")]
    SessionAccept(#[source] MuxError),

    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

/// Where the agent is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Dialing,
    SessionEstablished,
    Serving,
    Failed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::Dialing => "dialing",
            AgentState::SessionEstablished => "session established",
            AgentState::Serving => "serving",
            AgentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for the agent
#[derive(Clone)]
pub struct AgentConfig {
    /// Relay rendezvous address to dial (host:port)
    pub rendezvous_addr: String,

    /// Shared secret; the SOCKS5 credentials are derived from it
    pub secret: String,

    /// Bound on the rendezvous dial (no bound by default)
    pub connect_timeout: Option<Duration>,

    /// Mux session tuning
    pub session: SessionConfig,

    /// Bound on each SOCKS5 destination dial
    pub socks_connect_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn new(rendezvous_addr: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            rendezvous_addr: rendezvous_addr.into(),
            secret: secret.into(),
            connect_timeout: None,
            session: SessionConfig::default(),
            socks_connect_timeout: None,
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("rendezvous_addr", &self.rendezvous_addr)
            .field("secret", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("session", &self.session)
            .field("socks_connect_timeout", &self.socks_connect_timeout)
            .finish()
    }
}

/// Restricted-side agent: dials the rendezvous and serves SOCKS5 on every stream
pub struct TunnelAgent {
    config: AgentConfig,
    socks: Socks5Server,
    state_tx: watch::Sender<AgentState>,
}

impl TunnelAgent {
    /// Validate the configuration and build the SOCKS5 engine
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        validate_address(&config.rendezvous_addr, "rendezvous")?;

        let credentials = DerivedCredentials::from_secret(config.secret.clone());
        debug!("SOCKS5 username derived from secret: {}", credentials.identifier);

        let mut socks_config =
            Socks5Config::default().with_credentials(StaticCredentials::from(credentials));
        socks_config.connect_timeout = config.socks_connect_timeout;

        let (state_tx, _) = watch::channel(AgentState::Idle);

        Ok(Self {
            config,
            socks: Socks5Server::new(socks_config),
            state_tx,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: AgentState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Agent state: {} -> {}", previous, state);
        }
    }

    /// Dial the rendezvous and start a mux session in the server role
    pub async fn connect(&self) -> Result<MuxSession, AgentError> {
        self.set_state(AgentState::Dialing);
        let address = &self.config.rendezvous_addr;
        info!("Connecting to rendezvous {}", address);

        let dial = TcpStream::connect(address.as_str());
        let result = match self.config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dial).await {
                Ok(result) => result,
                Err(_) => {
                    self.set_state(AgentState::Failed);
                    return Err(AgentError::DialTimeout {
                        address: address.clone(),
                        timeout,
                    });
                }
            },
            None => dial.await,
        };

        let conn = match result {
            Ok(conn) => conn,
            Err(source) => {
                self.set_state(AgentState::Failed);
                return Err(AgentError::Dial {
                    address: address.clone(),
                    source,
                });
            }
        };
        let _ = conn.set_nodelay(true);

        let session = MuxSession::new(conn, Role::Server, self.config.session.clone());
        self.set_state(AgentState::SessionEstablished);
        info!("Tunnel session established with {}", address);

        Ok(session)
    }

    /// Serve SOCKS5 on every stream the relay opens
    ///
    /// Only returns once accepting fails, which includes the session closing.
    pub async fn serve(&self, session: MuxSession) -> Result<(), AgentError> {
        self.set_state(AgentState::Serving);

        loop {
            let stream = match session.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    self.set_state(AgentState::Failed);
                    warn!("Tunnel session ended: {}", e);
                    return Err(AgentError::SessionAccept(e));
                }
            };

            let stream_id = stream.id();
            debug!("Serving SOCKS5 on stream {}", stream_id);

            let socks = self.socks.clone();
            tokio::spawn(async move {
                match socks.serve(stream).await {
                    Ok(()) => debug!("Stream {} finished", stream_id),
                    Err(e @ Socks5Error::AuthenticationFailed(_)) => {
                        warn!("Stream {} rejected: {}", stream_id, e)
                    }
                    Err(e) => debug!("Stream {} failed: {}", stream_id, e),
                }
            });
        }
    }

    /// Connect, then serve until the session fails
    pub async fn run(&self) -> Result<(), AgentError> {
        let session = self.connect().await?;
        self.serve(session).await
    }

    /// Like [`run`](Self::run), but re-dial with backoff after any failure
    ///
    /// Returns only once `policy` runs out of attempts.
    pub async fn run_with_reconnect(&self, policy: ReconnectConfig) -> Result<(), AgentError> {
        let mut backoff = ReconnectManager::new(policy);

        loop {
            match self.connect().await {
                Ok(session) => {
                    backoff.reset();
                    if let Err(e) = self.serve(session).await {
                        warn!("Lost tunnel session: {}", e);
                    }
                }
                Err(e) => warn!("{}", e),
            }

            backoff.wait().await?;
        }
    }
}
