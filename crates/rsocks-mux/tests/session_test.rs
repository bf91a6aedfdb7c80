/// Integration tests for the multiplexed session over in-memory transports
use rsocks_mux::{MuxError, MuxSession, Role, SessionConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn session_pair() -> (Arc<MuxSession>, Arc<MuxSession>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        Arc::new(MuxSession::client(a)),
        Arc::new(MuxSession::server(b)),
    )
}

#[tokio::test]
async fn test_open_and_accept() {
    let (client, server) = session_pair();

    let opened = client.open().await.unwrap();
    let accepted = tokio::time::timeout(Duration::from_secs(1), server.accept())
        .await
        .expect("accept timed out")
        .unwrap();

    assert_eq!(opened.id(), accepted.id());
    assert_eq!(opened.id() % 2, 1, "client streams use odd IDs");
    assert_eq!(client.role(), Role::Client);
    assert_eq!(server.role(), Role::Server);
}

#[tokio::test]
async fn test_stream_ids_increase() {
    let (client, _server) = session_pair();

    let first = client.open().await.unwrap();
    let second = client.open().await.unwrap();
    let third = client.open().await.unwrap();

    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 3);
    assert_eq!(third.id(), 5);
}

#[tokio::test]
async fn test_bidirectional_round_trip() {
    let (client, server) = session_pair();

    let echo = tokio::spawn(async move {
        let mut stream = server.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let mut stream = client.open().await.unwrap();
    stream.write_all(b"hello through the tunnel").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"hello through the tunnel");

    echo.await.unwrap();
}

#[tokio::test]
async fn test_half_close_keeps_other_direction_open() {
    let (client, server) = session_pair();

    let mut outbound = client.open().await.unwrap();
    let mut inbound = server.accept().await.unwrap();

    outbound.write_all(b"request").await.unwrap();
    outbound.shutdown().await.unwrap();

    let mut request = Vec::new();
    inbound.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"request");

    // The accepting side can still answer after seeing EOF
    inbound.write_all(b"response").await.unwrap();
    inbound.shutdown().await.unwrap();

    let mut response = Vec::new();
    outbound.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"response");

    // Writing after shutdown is refused
    assert!(outbound.write_all(b"more").await.is_err());
}

#[tokio::test]
async fn test_dropping_stream_resets_peer() {
    let (client, server) = session_pair();

    let mut outbound = client.open().await.unwrap();
    let inbound = server.accept().await.unwrap();
    drop(inbound);

    let mut buf = [0u8; 16];
    let result = tokio::time::timeout(Duration::from_secs(1), outbound.read(&mut buf))
        .await
        .expect("read should not hang after reset");

    let err = result.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
}

#[tokio::test]
async fn test_large_payload_respects_flow_control() {
    let (client, server) = session_pair();

    // Several times the per-stream window, so window updates must flow
    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let receiver = tokio::spawn(async move {
        let mut stream = server.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let mut stream = client.open().await.unwrap();
    stream.write_all(&payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(10), receiver)
        .await
        .expect("transfer timed out")
        .unwrap();

    assert_eq!(received.len(), expected.len());
    assert!(received == expected, "payload corrupted in transit");
}

#[tokio::test]
async fn test_close_resets_streams_and_ends_accept() {
    let (client, server) = session_pair();

    let mut outbound = client.open().await.unwrap();
    let _inbound = server.accept().await.unwrap();

    server.close();
    assert!(server.is_closed());

    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .expect("client should observe the close");
    assert!(client.is_closed());

    let mut buf = [0u8; 8];
    assert!(outbound.read(&mut buf).await.is_err());

    assert!(matches!(client.open().await, Err(MuxError::SessionClosed)));
    assert!(matches!(server.accept().await, Err(MuxError::SessionClosed)));
}

#[tokio::test]
async fn test_transport_loss_closes_session() {
    let (a, b) = tokio::io::duplex(1024);
    let session = MuxSession::server(a);

    drop(b);

    tokio::time::timeout(Duration::from_secs(1), session.closed())
        .await
        .expect("session should close when the transport goes away");
    assert!(matches!(session.accept().await, Err(MuxError::SessionClosed)));
}

#[tokio::test]
async fn test_many_concurrent_streams() {
    let (client, server) = session_pair();

    let acceptor = tokio::spawn(async move {
        let mut handles = Vec::new();
        for _ in 0..32 {
            let mut stream = server.accept().await.unwrap();
            handles.push(tokio::spawn(async move {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await.unwrap();
                stream.write_all(&buf).await.unwrap();
                stream.shutdown().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    });

    let mut clients = Vec::new();
    for i in 0..32u32 {
        let client = client.clone();
        clients.push(tokio::spawn(async move {
            let message = format!("stream-{}", i).repeat(100);
            let mut stream = client.open().await.unwrap();
            stream.write_all(message.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            assert_eq!(reply, message.as_bytes());
        }));
    }

    for handle in clients {
        handle.await.unwrap();
    }
    acceptor.await.unwrap();
}

#[tokio::test]
async fn test_finished_streams_are_released() {
    let (client, server) = session_pair();

    let mut outbound = client.open().await.unwrap();
    let mut inbound = server.accept().await.unwrap();
    assert_eq!(client.active_streams(), 1);

    outbound.shutdown().await.unwrap();
    inbound.shutdown().await.unwrap();

    let mut buf = Vec::new();
    inbound.read_to_end(&mut buf).await.unwrap();
    outbound.read_to_end(&mut buf).await.unwrap();

    drop(outbound);
    drop(inbound);

    assert_eq!(client.active_streams(), 0);
    assert_eq!(server.active_streams(), 0);
}

#[tokio::test]
async fn test_keepalive_session_stays_usable() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let config = SessionConfig {
        keepalive_interval: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let client = MuxSession::new(a, Role::Client, config.clone());
    let server = MuxSession::new(b, Role::Server, config);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!client.is_closed());
    assert!(!server.is_closed());

    let mut outbound = client.open().await.unwrap();
    let mut inbound = server.accept().await.unwrap();
    outbound.write_all(b"still alive").await.unwrap();

    let mut buf = [0u8; 11];
    inbound.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still alive");
}
