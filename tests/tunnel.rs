//! End-to-end loopback scenarios: a client-mode tunnel paired with a
//! server-mode tunnel, fronting a TCP echo backend, exercised over both
//! transports and with mismatched secrets.

use std::net::SocketAddr;
use std::sync::atomic::AtomicI32;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use qtunnel::config::{Endpoint, LogSink, Role, Transport, TunnelConfig};
use qtunnel::supervisor::Supervisor;

fn cfg(
    frontend: SocketAddr,
    backend: SocketAddr,
    role: Role,
    transport: Transport,
    crypto: &str,
    secret: &[u8],
) -> TunnelConfig {
    TunnelConfig {
        frontend: Endpoint(frontend),
        backend: Endpoint(backend),
        role,
        crypto_method: crypto.to_string(),
        secret: secret.to_vec(),
        buffer_size: 4096,
        transport,
        logto: LogSink::Stdout,
        cert_material: None,
        sessions_count: AtomicI32::new(0),
    }
}

/// Accepts exactly one connection, reads until the peer half-closes its
/// write side, then echoes the bytes back and shuts down.
async fn spawn_echo_backend(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.expect("bind echo backend");
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept echo client");
        let mut received = Vec::new();
        stream
            .read_to_end(&mut received)
            .await
            .expect("read from tunnel");
        stream.write_all(&received).await.expect("echo back");
        stream.shutdown().await.ok();
    });
}

async fn run_tcp_pair(server_cfg: TunnelConfig, client_cfg: TunnelConfig) {
    let server = Supervisor::new(server_cfg);
    let client = Supervisor::new(client_cfg);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::spawn(async move {
        let _ = client.run().await;
    });
    // Give both accept loops a moment to bind before dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn send_and_receive(client_listen: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(client_listen)
        .await
        .expect("connect to client-mode frontend");
    stream.write_all(payload).await.expect("write payload");
    stream.shutdown().await.expect("half-close write");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read echoed response");
    response
}

#[tokio::test]
async fn tcp_rc4_round_trip() {
    let backend_addr: SocketAddr = "127.0.0.1:19481".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19440".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19441".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Tcp,
        "rc4",
        b"secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Tcp,
        "rc4",
        b"secret",
    );
    run_tcp_pair(server_cfg, client_cfg).await;

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let echoed = send_and_receive(client_listen, &payload).await;
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn tcp_aes256cfb_round_trip() {
    let backend_addr: SocketAddr = "127.0.0.1:19482".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19442".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19443".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Tcp,
        "aes-256-cfb",
        b"another secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Tcp,
        "aes-256-cfb",
        b"another secret",
    );
    run_tcp_pair(server_cfg, client_cfg).await;

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let echoed = send_and_receive(client_listen, &payload).await;
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn mismatched_secret_corrupts_but_does_not_crash() {
    let backend_addr: SocketAddr = "127.0.0.1:19485".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19444".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19445".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Tcp,
        "rc4",
        b"a",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Tcp,
        "rc4",
        b"b",
    );
    run_tcp_pair(server_cfg, client_cfg).await;

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let echoed = send_and_receive(client_listen, &payload).await;
    assert_eq!(echoed.len(), payload.len());
    assert_ne!(echoed, payload);
}

#[tokio::test]
async fn quic_rc4_round_trip() {
    let backend_addr: SocketAddr = "127.0.0.1:19582".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19550".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19551".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Quic,
        "rc4",
        b"secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Quic,
        "rc4",
        b"secret",
    );

    let server = Supervisor::new(server_cfg);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    let client = Supervisor::new(client_cfg);
    tokio::spawn(async move {
        let _ = client.run().await;
    });
    // Self-signed cert generation (2048-bit RSA) and QUIC endpoint bring-up
    // take longer than the plain TCP accept loops.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let echoed = send_and_receive(client_listen, &payload).await;
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn quic_aes256cfb_round_trip() {
    let backend_addr: SocketAddr = "127.0.0.1:19583".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19552".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19553".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Quic,
        "aes-256-cfb",
        b"another secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Quic,
        "aes-256-cfb",
        b"another secret",
    );

    let server = Supervisor::new(server_cfg);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    let client = Supervisor::new(client_cfg);
    tokio::spawn(async move {
        let _ = client.run().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let echoed = send_and_receive(client_listen, &payload).await;
    assert_eq!(echoed, payload);
}

/// Two independent sessions dialed back to back over the same client-side
/// QUIC frontend exercise the listener's per-connection stream
/// multiplexing (§4.6): the server side must keep accepting streams on one
/// QUIC connection, not just the first.
#[tokio::test]
async fn quic_multiple_sessions_round_trip() {
    let backend_addr: SocketAddr = "127.0.0.1:19584".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19554".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19555".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Quic,
        "rc4",
        b"secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Quic,
        "rc4",
        b"secret",
    );

    let server = Supervisor::new(server_cfg);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    let client = Supervisor::new(client_cfg);
    tokio::spawn(async move {
        let _ = client.run().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let first = send_and_receive(client_listen, &[9u8, 8, 7, 6, 5, 4, 3, 2, 1]).await;
    assert_eq!(first, [9u8, 8, 7, 6, 5, 4, 3, 2, 1]);

    let second = send_and_receive(client_listen, &[1u8, 1, 2, 3, 5, 8, 13]).await;
    assert_eq!(second, [1u8, 1, 2, 3, 5, 8, 13]);
}

#[tokio::test]
async fn live_session_counter_returns_to_zero_after_session() {
    let backend_addr: SocketAddr = "127.0.0.1:19486".parse().unwrap();
    let server_listen: SocketAddr = "127.0.0.1:19446".parse().unwrap();
    let client_listen: SocketAddr = "127.0.0.1:19447".parse().unwrap();

    spawn_echo_backend(backend_addr).await;

    let server_cfg = cfg(
        server_listen,
        backend_addr,
        Role::Server,
        Transport::Tcp,
        "rc4",
        b"secret",
    );
    let client_cfg = cfg(
        client_listen,
        server_listen,
        Role::Client,
        Transport::Tcp,
        "rc4",
        b"secret",
    );

    let server = Supervisor::new(server_cfg);
    let counter = server.config();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let client = Supervisor::new(client_cfg);
    tokio::spawn(async move {
        let _ = client.run().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let payload = [9u8, 8, 7, 6, 5, 4, 3, 2, 1];
    let _ = send_and_receive(client_listen, &payload).await;

    // The session's two copy tasks and logging finish asynchronously right
    // after the client observes EOF; give them a brief moment to settle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
}
