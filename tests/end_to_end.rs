//! End-to-end tunnel tests over loopback sockets
//!
//! Each test stands up a real server (and usually a real client service)
//! against a canned UDP "upstream resolver" on loopback, then drives the
//! relay with stub-resolver datagrams or raw WebSocket peers.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;

use dnsveil::client::ClientService;
use dnsveil::config::{ClientConfig, LogLevel, ServerConfig};
use dnsveil::frame::Frame;
use dnsveil::server::ServerService;

const TOKEN: &str = "e2e-secret";

/// Upstream that answers every datagram with `ans:` + the query bytes.
async fn spawn_echo_upstream() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let mut reply = b"ans:".to_vec();
            reply.extend_from_slice(&buf[..len]);
            let _ = socket.send_to(&reply, peer).await;
        }
    });
    (addr, task)
}

/// Upstream that receives but never replies.
async fn spawn_blackhole_upstream() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            if socket.recv_from(&mut buf).await.is_err() {
                return;
            }
        }
    });
    (addr, task)
}

/// Upstream that only answers datagrams starting with `B:`.
async fn spawn_selective_upstream() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if buf[..len].starts_with(b"B:") {
                let mut reply = b"ans:".to_vec();
                reply.extend_from_slice(&buf[..len]);
                let _ = socket.send_to(&reply, peer).await;
            }
        }
    });
    (addr, task)
}

fn server_config(upstream: SocketAddr) -> ServerConfig {
    ServerConfig {
        urls: vec!["127.0.0.1:0".to_string()],
        resolver: upstream.to_string(),
        auth_token: vec![TOKEN.to_string()],
        log_file: None,
        log_level: LogLevel::Info,
    }
}

fn client_config(server_addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        end_points: vec!["127.0.0.1:0".to_string()],
        resolver: format!("ws://{server_addr}/"),
        resolver_auth_token: TOKEN.to_string(),
        log_file: None,
        log_level: LogLevel::Info,
    }
}

async fn start_pair(upstream: SocketAddr) -> (ServerService, ClientService) {
    let server = ServerService::start(&server_config(upstream)).await.unwrap();
    let client = ClientService::start(&client_config(server.local_addrs()[0]))
        .await
        .unwrap();
    (server, client)
}

/// Raw authenticated WebSocket peer for protocol-level tests.
async fn connect_raw(
    server_addr: SocketAddr,
    token: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{server_addr}/"))
        .await
        .unwrap();
    ws.send(Message::Text(token.to_string())).await.unwrap();
    ws
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_single_query() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let (server, client) = start_pair(upstream).await;
    let endpoint = client.local_addrs()[0];

    let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    stub.send_to(b"query-one", endpoint).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let (len, from) = timeout(Duration::from_secs(1), stub.recv_from(&mut buf))
        .await
        .expect("reply within the deadline")
        .unwrap();
    assert_eq!(&buf[..len], b"ans:query-one");
    assert_eq!(from, endpoint);

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_route_to_their_sources() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let (server, client) = start_pair(upstream).await;
    let endpoint = client.local_addrs()[0];

    let mut tasks = Vec::new();
    for i in 0..50u32 {
        tasks.push(tokio::spawn(async move {
            let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let query = format!("query-{i}");
            stub.send_to(query.as_bytes(), endpoint).await.unwrap();

            let mut buf = vec![0u8; 1024];
            let (len, _) = timeout(Duration::from_secs(2), stub.recv_from(&mut buf))
                .await
                .expect("reply within the deadline")
                .unwrap();
            assert_eq!(&buf[..len], format!("ans:{query}").as_bytes());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(client.pending_queries(), 0);
    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstream_silence_expires_pending_query() {
    let (upstream, _upstream_task) = spawn_blackhole_upstream().await;
    let (server, client) = start_pair(upstream).await;
    let endpoint = client.local_addrs()[0];

    let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    stub.send_to(b"into-the-void", endpoint).await.unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pending_queries(), 1);

    // Past the deadline the slot is gone and no reply ever arrives.
    sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.pending_queries(), 0);

    let mut buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(200), stub.recv_from(&mut buf))
            .await
            .is_err(),
        "no datagram may be delivered for an expired query"
    );

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_displacement_closes_prior_session() {
    let (upstream, _upstream_task) = spawn_selective_upstream().await;
    let server = ServerService::start(&server_config(upstream)).await.unwrap();
    let server_addr = server.local_addrs()[0];

    // Session A with one in-flight query the upstream will never answer.
    let mut peer_a = connect_raw(server_addr, TOKEN).await;
    peer_a
        .send(Message::Binary(Frame::new(7, b"A:stuck".to_vec()).encode()))
        .await
        .unwrap();

    // Session B presents the same token and displaces A.
    let mut peer_b = connect_raw(server_addr, TOKEN).await;

    let a_end = timeout(Duration::from_secs(3), peer_a.next())
        .await
        .expect("prior session closed within bounded time");
    match a_end {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close for displaced session, got {other:?}"),
    }
    assert_eq!(server.session_count(), 1);

    // The winning session relays normally.
    peer_b
        .send(Message::Binary(Frame::new(9, b"B:works".to_vec()).encode()))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(1), peer_b.next())
        .await
        .expect("reply within the deadline")
        .unwrap()
        .unwrap();
    let frame = match reply {
        Message::Binary(bytes) => Frame::decode(&bytes).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    };
    assert_eq!(frame.id, 9);
    assert_eq!(frame.payload, b"ans:B:works");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_token_is_rejected_with_policy_violation() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let server = ServerService::start(&server_config(upstream)).await.unwrap();

    let mut peer = connect_raw(server.local_addrs()[0], "wrong-token").await;
    let message = timeout(Duration::from_secs(2), peer.next())
        .await
        .expect("server answers the bad token")
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected Policy Violation close, got {other:?}"),
    }
    assert_eq!(server.session_count(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_after_auth_ends_session() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let server = ServerService::start(&server_config(upstream)).await.unwrap();

    let mut peer = connect_raw(server.local_addrs()[0], TOKEN).await;

    // Give the acceptor a beat to admit the session.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.session_count(), 1);

    peer.send(Message::Text("chatter".to_string())).await.unwrap();

    let message = timeout(Duration::from_secs(2), peer.next())
        .await
        .expect("server closes the violating session")
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Protocol),
        other => panic!("expected Protocol Error close, got {other:?}"),
    }

    // The registry entry is removed once the session loop ends.
    for _ in 0..20 {
        if server.session_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(server.session_count(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_shutdown_finishes_promptly() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let (server, client) = start_pair(upstream).await;
    let endpoint = client.local_addrs()[0];

    // Leave one query in flight during shutdown.
    let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    stub.send_to(b"mid-flight", endpoint).await.unwrap();

    timeout(Duration::from_secs(5), client.stop())
        .await
        .expect("client stops promptly");
    timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("server stops promptly");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_session_death_stops_service() {
    let (upstream, _upstream_task) = spawn_echo_upstream().await;
    let (server, client) = start_pair(upstream).await;

    // Stopping the server closes the client's session, which is terminal
    // for the client service.
    server.stop().await;

    let shutdown = client.shutdown_signal();
    let mut stopped = shutdown.subscribe();
    timeout(Duration::from_secs(3), stopped.recv())
        .await
        .expect("client initiates its own shutdown");
    timeout(Duration::from_secs(5), client.join())
        .await
        .expect("client joins promptly");
}
