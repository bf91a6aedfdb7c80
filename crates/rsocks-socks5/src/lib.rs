//! SOCKS5 protocol engine (RFC 1928, RFC 1929)
//!
//! [`Socks5Server::serve`] runs the whole server side of one SOCKS5
//! conversation over any byte stream: method negotiation, optional
//! username/password authentication, the CONNECT request, the outbound dial
//! and finally the byte relay. Only CONNECT is supported.
//!
//! The [`client`] module holds the matching client handshake.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::Socks5Error;
pub use protocol::{Reply, TargetAddr};
pub use server::{Socks5Config, Socks5Server};
