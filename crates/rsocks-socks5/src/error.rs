use std::time::Duration;
use thiserror::Error;

/// SOCKS5 errors
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    #[error("Unsupported authentication version: {0}")]
    UnsupportedAuthVersion(u8),

    #[error("Authentication failed for user {0}")]
    AuthenticationFailed(String),

    #[error("Username or password longer than 255 bytes")]
    CredentialsTooLong,

    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("Invalid domain name")]
    InvalidDomain,

    #[error("Failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("Request rejected by proxy (reply {0:#04x})")]
    Rejected(u8),
}
