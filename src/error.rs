use std::net::AddrParseError;

use thiserror::Error;

/// Errors that can only ever occur while parsing flags or building the
/// immutable [`crate::config::TunnelConfig`]. All of these are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve listen address {addr:?}: {source}")]
    ResolveListen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not resolve backend address {addr:?}: {source}")]
    ResolveBackend {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid address: {0}")]
    Addr(#[from] AddrParseError),
    #[error("unknown crypto method {0:?}")]
    UnknownCipher(String),
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,
    #[error("quic server mode requires a TLS certificate: {0}")]
    Certificate(String),
    #[error("failed to install log sink: {0}")]
    Logging(String),
}

/// Errors surfaced by the transport adapter (listen/accept/dial).
///
/// Dial and accept errors are not fatal by themselves, but the adapter
/// still reports them with enough detail for the caller to log and decide.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("dial failed: {0}")]
    Dial(#[source] std::io::Error),
    #[error("quic endpoint error: {0}")]
    Quic(String),
    #[error("quic connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),
    #[error("quic connect error: {0}")]
    QuicConnect(#[from] quinn::ConnectError),
}
