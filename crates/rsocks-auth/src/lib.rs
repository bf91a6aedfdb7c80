//! Credential handling for the SOCKS5 front of the tunnel
//!
//! Both ends of a tunnel share one secret. Rather than exchanging a username
//! out of band, each end derives the SOCKS5 username from the secret itself
//! and uses the secret as the password.
//!
//! This is a shared-secret gate, not strong authentication: the password
//! travels in plaintext inside the SOCKS5 handshake.

pub mod credentials;
pub mod store;

pub use credentials::{derive_identifier, DerivedCredentials};
pub use store::{CredentialStore, StaticCredentials};
