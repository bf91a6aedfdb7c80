//! Wire constants and message pieces shared by the server and client

use crate::error::Socks5Error;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SOCKS_VERSION: u8 = 0x05;
/// Username/password sub-negotiation version (RFC 1929)
pub const AUTH_VERSION: u8 = 0x01;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const AUTH_SUCCESS: u8 = 0x00;
pub const AUTH_FAILURE: u8 = 0x01;

/// Reply codes sent in answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Map a failed outbound dial to the closest reply code
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            io::ErrorKind::TimedOut => Reply::HostUnreachable,
            _ => {
                let message = err.to_string().to_lowercase();
                if message.contains("network is unreachable") {
                    Reply::NetworkUnreachable
                } else if message.contains("unreachable") || message.contains("no route to host") {
                    Reply::HostUnreachable
                } else {
                    Reply::GeneralFailure
                }
            }
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Destination named in a request (or bound address in a reply)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    /// All-zero IPv4 address used in failure replies
    pub fn unspecified() -> Self {
        TargetAddr::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// Read an address of type `atyp` followed by a port
    pub async fn read_from<R>(reader: &mut R, atyp: u8) -> Result<Self, Socks5Error>
    where
        R: AsyncRead + Unpin,
    {
        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(TargetAddr::Ip(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(octets),
                    port,
                ))))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(TargetAddr::Ip(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    0,
                    0,
                ))))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await?;
                let port = reader.read_u16().await?;

                let host = String::from_utf8(name).map_err(|_| Socks5Error::InvalidDomain)?;
                if host.is_empty() {
                    return Err(Socks5Error::InvalidDomain);
                }
                Ok(TargetAddr::Domain(host, port))
            }
            other => Err(Socks5Error::UnsupportedAddressType(other)),
        }
    }

    /// Encode as `ATYP | ADDR | PORT`
    pub fn to_bytes(&self) -> Result<Vec<u8>, Socks5Error> {
        let mut out = Vec::with_capacity(22);
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(host, port) => {
                let len = u8::try_from(host.len()).map_err(|_| Socks5Error::InvalidDomain)?;
                if len == 0 {
                    return Err(Socks5Error::InvalidDomain);
                }
                out.push(ATYP_DOMAIN);
                out.push(len);
                out.extend_from_slice(host.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

/// Write `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`
pub async fn write_reply<W>(
    writer: &mut W,
    reply: Reply,
    bound: &TargetAddr,
) -> Result<(), Socks5Error>
where
    W: AsyncWrite + Unpin,
{
    let mut msg = vec![SOCKS_VERSION, reply.as_u8(), 0x00];
    msg.extend_from_slice(&bound.to_bytes()?);
    writer.write_all(&msg).await?;
    writer.flush().await?;
    Ok(())
}
