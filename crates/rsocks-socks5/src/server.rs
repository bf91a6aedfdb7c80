//! Server side of a SOCKS5 conversation

use crate::error::Socks5Error;
use crate::protocol::{
    write_reply, Reply, TargetAddr, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_FAILURE,
    AUTH_SUCCESS, AUTH_VERSION, CMD_CONNECT, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
    METHOD_USER_PASS, SOCKS_VERSION,
};
use rsocks_auth::CredentialStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// SOCKS5 server configuration
#[derive(Clone, Default)]
pub struct Socks5Config {
    /// Required username/password pairs; `None` accepts unauthenticated callers
    pub credentials: Option<Arc<dyn CredentialStore>>,

    /// Bound on each outbound dial (no bound by default)
    pub connect_timeout: Option<Duration>,
}

impl Socks5Config {
    pub fn with_credentials(mut self, credentials: impl CredentialStore + 'static) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for Socks5Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Config")
            .field("auth_required", &self.credentials.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// SOCKS5 protocol engine
///
/// Cheap to clone; every served stream only borrows the configuration.
#[derive(Debug, Clone)]
pub struct Socks5Server {
    config: Socks5Config,
}

impl Socks5Server {
    pub fn new(config: Socks5Config) -> Self {
        Self { config }
    }

    pub fn requires_auth(&self) -> bool {
        self.config.credentials.is_some()
    }

    /// Serve one SOCKS5 conversation on `stream` until the relay finishes
    ///
    /// Failures are reported to the caller with the matching reply code when
    /// the protocol allows one; nothing is forwarded unless the handshake and
    /// dial succeeded.
    pub async fn serve<S>(&self, mut stream: S) -> Result<(), Socks5Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.negotiate(&mut stream).await?;

        let target = read_request(&mut stream).await?;
        debug!("SOCKS5 CONNECT to {}", target);

        let mut upstream = match self.connect(&target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                let reply = match &e {
                    Socks5Error::ConnectFailed { source, .. } => Reply::from_io_error(source),
                    Socks5Error::ConnectTimeout { .. } => Reply::HostUnreachable,
                    _ => Reply::GeneralFailure,
                };
                let _ = write_reply(&mut stream, reply, &TargetAddr::unspecified()).await;
                return Err(e);
            }
        };

        let bound = upstream.local_addr()?;
        write_reply(&mut stream, Reply::Succeeded, &TargetAddr::from(bound)).await?;

        let (to_target, to_client) =
            tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
        debug!(
            "SOCKS5 relay to {} finished ({} bytes out, {} bytes in)",
            target, to_target, to_client
        );

        Ok(())
    }

    /// Method selection plus the optional username/password exchange
    async fn negotiate<S>(&self, stream: &mut S) -> Result<(), Socks5Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let version = stream.read_u8().await?;
        if version != SOCKS_VERSION {
            return Err(Socks5Error::UnsupportedVersion(version));
        }

        let count = stream.read_u8().await? as usize;
        let mut methods = vec![0u8; count];
        stream.read_exact(&mut methods).await?;

        let wanted = if self.requires_auth() {
            METHOD_USER_PASS
        } else {
            METHOD_NO_AUTH
        };

        if !methods.contains(&wanted) {
            stream
                .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
                .await?;
            return Err(Socks5Error::NoAcceptableMethod);
        }

        stream.write_all(&[SOCKS_VERSION, wanted]).await?;
        trace!("SOCKS5 method {:#04x} selected", wanted);

        match &self.config.credentials {
            Some(store) => authenticate(stream, store.as_ref()).await,
            None => Ok(()),
        }
    }

    async fn connect(&self, target: &TargetAddr) -> Result<TcpStream, Socks5Error> {
        let dial = async {
            match target {
                TargetAddr::Ip(addr) => TcpStream::connect(*addr).await,
                TargetAddr::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
            }
        };

        let result = match self.config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dial).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Socks5Error::ConnectTimeout {
                        target: target.to_string(),
                        timeout,
                    })
                }
            },
            None => dial.await,
        };

        let upstream = result.map_err(|source| Socks5Error::ConnectFailed {
            target: target.to_string(),
            source,
        })?;
        let _ = upstream.set_nodelay(true);

        Ok(upstream)
    }
}

/// RFC 1929 username/password sub-negotiation
async fn authenticate<S>(stream: &mut S, store: &dyn CredentialStore) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        return Err(Socks5Error::UnsupportedAuthVersion(version));
    }

    let username = read_field(stream).await?;
    let password = read_field(stream).await?;

    if store.valid(&username, &password) {
        stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
        trace!("SOCKS5 user {} authenticated", username);
        return Ok(());
    }

    stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
    let _ = stream.shutdown().await;
    Err(Socks5Error::AuthenticationFailed(username))
}

async fn read_field<S>(stream: &mut S) -> Result<String, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u8().await? as usize;
    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read the request and reject anything but a CONNECT with a known address type
async fn read_request<S>(stream: &mut S) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, atyp] = header;

    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    if !matches!(atyp, ATYP_IPV4 | ATYP_DOMAIN | ATYP_IPV6) {
        write_reply(
            stream,
            Reply::AddressTypeNotSupported,
            &TargetAddr::unspecified(),
        )
        .await?;
        return Err(Socks5Error::UnsupportedAddressType(atyp));
    }

    let target = TargetAddr::read_from(stream, atyp).await?;

    if command != CMD_CONNECT {
        write_reply(stream, Reply::CommandNotSupported, &TargetAddr::unspecified()).await?;
        return Err(Socks5Error::UnsupportedCommand(command));
    }

    Ok(target)
}
