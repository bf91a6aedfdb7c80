//! `host:port` address validation shared by both ends of the tunnel

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid {kind} address format: '{address}' (expected format: host:port)")]
    MissingPort { kind: &'static str, address: String },

    #[error("Invalid {kind} address format: '{address}' (host cannot be empty)")]
    EmptyHost { kind: &'static str, address: String },

    #[error("Invalid port in {kind} address: {address}")]
    InvalidPort { kind: &'static str, address: String },
}

/// Validate address format (should be host:port)
///
/// `kind` names the address in error messages ("rendezvous", "socks", ...).
/// IPv6 hosts must be bracketed (`[::1]:1080`).
pub fn validate_address(address: &str, kind: &'static str) -> Result<(), AddressError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort {
            kind,
            address: address.to_string(),
        })?;

    if host.is_empty() {
        return Err(AddressError::EmptyHost {
            kind,
            address: address.to_string(),
        });
    }

    port.parse::<u16>()
        .map_err(|_| AddressError::InvalidPort {
            kind,
            address: address.to_string(),
        })?;

    Ok(())
}
