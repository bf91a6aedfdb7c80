use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind {role} to {address}: {source}\n\nTroubleshooting:\n  - Check if another process is using this port: lsof -i :{port}\n  - Try using a different address or port", port = .address.port())]
    BindError {
        role: &'static str,
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} failed to accept a connection: {source}")]
    AcceptError {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}
