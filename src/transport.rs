//! Transport adapter: a uniform listen/accept/dial surface over plain TCP
//! and QUIC, so the session relay and supervisor never branch on which
//! transport a session actually uses.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;
use crate::stream::{ReadSide, WriteSide};

/// One accepted or dialed leg, already split into independent read/write
/// halves the way `TcpStream::into_split` and `quinn`'s `SendStream`/
/// `RecvStream` naturally are.
pub type SplitStream = (Box<dyn ReadSide>, Box<dyn WriteSide>);

/// Accepts incoming connections and hands back a split [`SplitStream`] plus
/// the peer's address.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<(SplitStream, SocketAddr), TransportError>;
}

/// Dials an outbound connection, producing a split [`SplitStream`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<SplitStream, TransportError>;
}

pub struct TcpTransportListener(TcpListener);

impl TcpTransportListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: addr.to_string(),
                    source,
                })?;
        Ok(Self(listener))
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    async fn accept(&self) -> Result<(SplitStream, SocketAddr), TransportError> {
        let (stream, peer) = self.0.accept().await.map_err(TransportError::Accept)?;
        let (rd, wr) = stream.into_split();
        Ok(((Box::new(rd), Box::new(wr)), peer))
    }
}

#[derive(Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, addr: SocketAddr) -> Result<SplitStream, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::Dial)?;
        let (rd, wr) = stream.into_split();
        Ok((Box::new(rd), Box::new(wr)))
    }
}

#[async_trait]
impl ReadSide for quinn::RecvStream {
    async fn close_read(&mut self) -> std::io::Result<()> {
        // Error code 0: no application-specific reason, matches a plain
        // half-close rather than an abnormal reset.
        let _ = self.stop(0u32.into());
        Ok(())
    }
}

/// Accepts QUIC connections on `endpoint` and flattens every stream opened
/// on any of them into a single `accept()` surface, so one peer can open
/// many sessions over one QUIC connection (§4.6) while the supervisor's
/// accept loop stays identical to the plain-TCP case.
///
/// A background task loops `endpoint.accept()`; each accepted connection
/// gets its own task looping `accept_bi()` until the connection closes, and
/// every resulting stream is funneled into a shared channel.
pub struct QuicTransportListener {
    streams: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<QuicAcceptResult>>,
}

type QuicAcceptResult = Result<(SplitStream, SocketAddr), TransportError>;

impl QuicTransportListener {
    pub fn new(endpoint: quinn::Endpoint) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let connection = match incoming.await {
                        Ok(connection) => connection,
                        Err(e) => {
                            let _ = tx.send(Err(TransportError::from(e))).await;
                            return;
                        }
                    };
                    let peer = connection.remote_address();
                    loop {
                        match connection.accept_bi().await {
                            Ok((send, recv)) => {
                                let item = Ok(((Box::new(recv) as _, Box::new(send) as _), peer));
                                if tx.send(item).await.is_err() {
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                });
            }
        });

        Self {
            streams: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Listener for QuicTransportListener {
    async fn accept(&self) -> Result<(SplitStream, SocketAddr), TransportError> {
        let mut streams = self.streams.lock().await;
        streams
            .recv()
            .await
            .ok_or_else(|| TransportError::Quic("endpoint closed".into()))?
    }
}

/// Dials a fresh QUIC connection per session and opens exactly one
/// bidirectional stream on it, matching the 1:1 session-to-stream mapping
/// used for the TCP leg.
pub struct QuicConnector {
    endpoint: quinn::Endpoint,
    server_name: String,
}

impl QuicConnector {
    pub fn new(endpoint: quinn::Endpoint, server_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            server_name: server_name.into(),
        }
    }
}

#[async_trait]
impl Connector for QuicConnector {
    async fn dial(&self, addr: SocketAddr) -> Result<SplitStream, TransportError> {
        let connecting = self
            .endpoint
            .connect(addr, &self.server_name)
            .map_err(|e| TransportError::Quic(e.to_string()))?;
        let connection = connecting.await?;
        let (send, recv) = connection.open_bi().await?;
        Ok((Box::new(recv), Box::new(send)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Opening two bidirectional streams on one QUIC connection must surface
    /// as two independent `accept()` results, not just the first (§4.6:
    /// "for each accepted QUIC connection, accept an unbounded number of
    /// streams, each handled as an independent session").
    #[tokio::test]
    async fn quic_listener_multiplexes_streams_on_one_connection() {
        let (cert, key) = crate::tls::generate_self_signed_cert().unwrap();
        let server_config = crate::tls::server_config(cert, key).unwrap();
        let server_endpoint =
            quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server_endpoint.local_addr().unwrap();
        let listener = QuicTransportListener::new(server_endpoint);

        let mut client_endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
        client_endpoint.set_default_client_config(crate::tls::insecure_client_config());
        let connection = client_endpoint
            .connect(server_addr, "localhost")
            .unwrap()
            .await
            .unwrap();

        let (mut send_a, _recv_a) = connection.open_bi().await.unwrap();
        send_a.write_all(b"first").await.unwrap();
        let (mut send_b, _recv_b) = connection.open_bi().await.unwrap();
        send_b.write_all(b"second").await.unwrap();

        let ((mut rd1, _wr1), _peer1) = listener.accept().await.unwrap();
        let ((mut rd2, _wr2), _peer2) = listener.accept().await.unwrap();

        let mut buf1 = vec![0u8; 5];
        rd1.read_exact(&mut buf1).await.unwrap();
        let mut buf2 = vec![0u8; 6];
        rd2.read_exact(&mut buf2).await.unwrap();

        let mut seen = vec![buf1, buf2];
        seen.sort();
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec()]);
    }
}
