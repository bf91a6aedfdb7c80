//! End-to-end acceptance tests - Full system integration
//!
//! These tests run the whole path on loopback:
//! 1. Echo server (the destination the operator wants to reach)
//! 2. Relay: rendezvous listener and public front
//! 3. Agent dialing the rendezvous and serving SOCKS5
//! 4. SOCKS5 client on the public front, CONNECTing to the echo server

use rsocks_lib::{derive_identifier, ReverseSocks5, RunningRelay, TargetAddr, TunnelConfig};
use rsocks_socks5::{client, Socks5Error};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SECRET: &str = "hunter2";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Start an echo server; the counter tracks how many connections it accepted
async fn start_echo_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, accepted)
}

/// Relay plus a connected agent, both built from the same config
async fn start_tunnel() -> RunningRelay {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = TunnelConfig::with_free_port("127.0.0.1", SECRET).unwrap();
    let tunnel = ReverseSocks5::new(config);

    let relay = tunnel
        .start_relay("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    assert!(relay.rendezvous_addr().is_some());

    let agent = tunnel.agent().unwrap();
    tokio::spawn(async move { agent.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !relay.registry().is_established() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("agent should establish a session");

    relay
}

/// Connect to the public front and finish the SOCKS5 handshake
async fn socks_connect(
    public_addr: SocketAddr,
    target: SocketAddr,
    password: &str,
) -> Result<TcpStream, Socks5Error> {
    let mut stream = TcpStream::connect(public_addr).await?;
    let username = derive_identifier(SECRET);
    client::connect(
        &mut stream,
        &TargetAddr::from(target),
        Some((username.as_str(), password)),
    )
    .await?;
    Ok(stream)
}

/// Send `payload` and read everything back, writing and reading concurrently
async fn round_trip(stream: TcpStream, payload: Vec<u8>) -> Vec<u8> {
    let (mut reader, mut writer) = stream.into_split();

    let write = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), reader.read_to_end(&mut received))
        .await
        .expect("echo should finish")
        .unwrap();
    write.await.unwrap();

    received
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ping_echoed_through_tunnel() {
    let (echo, _) = start_echo_server().await;
    let relay = start_tunnel().await;

    let mut stream = socks_connect(relay.public_addr(), echo, SECRET)
        .await
        .unwrap();

    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("ping should come back")
        .unwrap();
    assert_eq!(&buf, b"ping");

    relay.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_password_never_reaches_destination() {
    let (echo, accepted) = start_echo_server().await;
    let relay = start_tunnel().await;

    let result = socks_connect(relay.public_addr(), echo, "hunter3").await;
    assert!(matches!(result, Err(Socks5Error::AuthenticationFailed(_))));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 0);

    // The session survives a rejected stream
    let stream = socks_connect(relay.public_addr(), echo, SECRET)
        .await
        .unwrap();
    assert_eq!(round_trip(stream, b"after".to_vec()).await, b"after");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_payload() {
    let (echo, _) = start_echo_server().await;
    let relay = start_tunnel().await;

    let stream = socks_connect(relay.public_addr(), echo, SECRET)
        .await
        .unwrap();
    assert!(round_trip(stream, Vec::new()).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_payload_in_order() {
    let (echo, _) = start_echo_server().await;
    let relay = start_tunnel().await;

    let payload: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let stream = socks_connect(relay.public_addr(), echo, SECRET)
        .await
        .unwrap();

    let received = round_trip(stream, payload.clone()).await;
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "payload corrupted in transit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    let (echo, accepted) = start_echo_server().await;
    let relay = start_tunnel().await;
    let public_addr = relay.public_addr();

    let mut handles = Vec::new();
    for i in 0..16u8 {
        handles.push(tokio::spawn(async move {
            let payload = vec![i; 64 * 1024];
            let stream = socks_connect(public_addr, echo, SECRET).await.unwrap();
            let received = round_trip(stream, payload.clone()).await;
            assert_eq!(received, payload);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn test_client_refused_without_agent() {
    let config = TunnelConfig::with_free_port("127.0.0.1", SECRET).unwrap();
    let relay = ReverseSocks5::new(config)
        .start_relay("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(relay.public_addr()).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("client should be closed promptly");

    // Either a clean EOF or a reset, but never any bytes
    if read.is_ok() {
        assert!(buf.is_empty());
    }
}

#[tokio::test]
async fn test_rendezvous_bind_failure_keeps_front_running() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TunnelConfig::new(taken.local_addr().unwrap().to_string(), SECRET).unwrap();

    let relay = ReverseSocks5::new(config)
        .start_relay("127.0.0.1:0".parse().unwrap())
        .await
        .expect("public front should still start");
    assert!(relay.rendezvous_addr().is_none());

    // The front is up and refuses clients
    let mut stream = TcpStream::connect(relay.public_addr()).await.unwrap();
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("client should be closed promptly");
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_public_front_bind_failure_is_fatal() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TunnelConfig::with_free_port("127.0.0.1", SECRET).unwrap();

    let result = ReverseSocks5::new(config)
        .start_relay(taken.local_addr().unwrap())
        .await;
    assert!(matches!(result, Err(rsocks_lib::TunnelError::Relay(_))));
}
