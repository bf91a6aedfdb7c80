//! Splicing a client connection onto a tunnel stream

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Bytes moved in each direction by one bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub client_to_tunnel: u64,
    pub tunnel_to_client: u64,
}

/// Copy bytes both ways between `client` and `tunnel` until both directions end
///
/// Each direction runs in its own task and copies until EOF or error, then
/// shuts down the write side of its destination. The two directions are
/// independent: one finishing does not cancel the other.
pub async fn bridge<C, T>(client: C, tunnel: T) -> BridgeStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel);

    let client_to_tunnel = tokio::spawn(async move {
        let result = tokio::io::copy(&mut client_read, &mut tunnel_write).await;
        let _ = tunnel_write.shutdown().await;
        result
    });

    let tunnel_to_client = tokio::spawn(async move {
        let result = tokio::io::copy(&mut tunnel_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        result
    });

    let (upstream, downstream) = tokio::join!(client_to_tunnel, tunnel_to_client);

    BridgeStats {
        client_to_tunnel: transferred("client -> tunnel", upstream),
        tunnel_to_client: transferred("tunnel -> client", downstream),
    }
}

fn transferred(direction: &str, outcome: Result<std::io::Result<u64>, JoinError>) -> u64 {
    match outcome {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!("Bridge {} ended with error: {}", direction, e);
            0
        }
        Err(e) => {
            warn!("Bridge {} task failed: {}", direction, e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_bridge_copies_both_ways() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (tunnel, mut tunnel_peer) = tokio::io::duplex(1024);

        let handle = tokio::spawn(bridge(client, tunnel));

        client_peer.write_all(b"request").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut request = Vec::new();
        tunnel_peer.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        tunnel_peer.write_all(b"response!").await.unwrap();
        tunnel_peer.shutdown().await.unwrap();

        let mut response = Vec::new();
        client_peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"response!");

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            BridgeStats {
                client_to_tunnel: 7,
                tunnel_to_client: 9,
            }
        );
    }

    #[tokio::test]
    async fn test_one_direction_ending_keeps_the_other() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (tunnel, mut tunnel_peer) = tokio::io::duplex(1024);

        let _handle = tokio::spawn(bridge(client, tunnel));

        // Tunnel side finishes first
        tunnel_peer.shutdown().await.unwrap();
        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // Client can still send
        client_peer.write_all(b"late").await.unwrap();
        let mut late = [0u8; 4];
        tunnel_peer.read_exact(&mut late).await.unwrap();
        assert_eq!(&late, b"late");
    }
}
