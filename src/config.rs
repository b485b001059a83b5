use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicI32;

use structopt::StructOpt;

use crate::error::ConfigError;

/// Default buffer size for the recycling buffer pool, matching the
/// source's `4096` byte default.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Where log lines should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Stdout,
    Syslog,
}

impl FromStr for LogSink {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogSink::Stdout),
            "syslog" => Ok(LogSink::Syslog),
            other => Err(ConfigError::Logging(format!("unknown log sink {other:?}"))),
        }
    }
}

/// Command-line flags.
#[derive(Debug, StructOpt)]
#[structopt(name = "qtunnel", about = "Bidirectional encrypted TCP/QUIC tunnel")]
pub struct Opt {
    /// host:port qtunnel listens on
    #[structopt(long = "listen", default_value = ":9001")]
    pub listen: String,

    /// host:port of the backend
    #[structopt(long = "backend", default_value = "127.0.0.1:6400")]
    pub backend: String,

    /// encryption method (rc4, rc4-md5, aes-128-cfb, aes-192-cfb, aes-256-cfb)
    #[structopt(long = "crypto", default_value = "rc4")]
    pub crypto: String,

    /// password used to encrypt the data
    #[structopt(long = "secret", default_value = "secret")]
    pub secret: String,

    /// if running in client mode
    #[structopt(long = "clientmode")]
    pub clientmode: bool,

    /// use QUIC instead of TCP for the encrypted leg
    #[structopt(long = "quic")]
    pub quic: bool,

    /// stdout or syslog
    #[structopt(long = "logto", default_value = "stdout")]
    pub logto: String,

    /// byte size of pooled relay buffers
    #[structopt(long = "buffer-size", default_value = "4096")]
    pub buffer_size: usize,

    /// optional path to a PEM certificate for the QUIC listener (self-signed
    /// one is generated if omitted)
    #[structopt(long = "cert", parse(from_os_str), requires = "key")]
    pub cert: Option<PathBuf>,

    /// optional path to the PEM private key matching `--cert`
    #[structopt(long = "key", parse(from_os_str), requires = "cert")]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Quic,
}

/// A resolved host/port pair. Immutable once built.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint(pub SocketAddr);

impl Endpoint {
    fn resolve(raw: &str) -> std::io::Result<SocketAddr> {
        use std::net::ToSocketAddrs;

        // `:9001` style addresses (no host) bind all interfaces.
        let normalized = if raw.starts_with(':') {
            format!("0.0.0.0{raw}")
        } else {
            raw.to_owned()
        };

        normalized
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no addresses"))
    }
}

/// Immutable configuration for the process lifetime, plus the one piece of
/// mutable shared state: the live-session counter.
pub struct TunnelConfig {
    pub frontend: Endpoint,
    pub backend: Endpoint,
    pub role: Role,
    pub crypto_method: String,
    pub secret: Vec<u8>,
    pub buffer_size: usize,
    pub transport: Transport,
    pub logto: LogSink,
    pub cert_material: Option<(PathBuf, PathBuf)>,
    pub sessions_count: AtomicI32,
}

impl TunnelConfig {
    pub fn from_opt(opt: Opt) -> Result<Self, ConfigError> {
        let frontend =
            Endpoint::resolve(&opt.listen).map_err(|source| ConfigError::ResolveListen {
                addr: opt.listen.clone(),
                source,
            })?;
        let backend =
            Endpoint::resolve(&opt.backend).map_err(|source| ConfigError::ResolveBackend {
                addr: opt.backend.clone(),
                source,
            })?;

        if opt.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        crate::cipher::validate_method(&opt.crypto)
            .map_err(|_| ConfigError::UnknownCipher(opt.crypto.clone()))?;

        let role = if opt.clientmode {
            Role::Client
        } else {
            Role::Server
        };
        let transport = if opt.quic { Transport::Quic } else { Transport::Tcp };
        let logto: LogSink = opt.logto.parse()?;

        let cert_material = match (opt.cert, opt.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        };

        Ok(Self {
            frontend: Endpoint(frontend),
            backend: Endpoint(backend),
            role,
            crypto_method: opt.crypto,
            secret: opt.secret.into_bytes(),
            buffer_size: opt.buffer_size,
            transport,
            logto,
            cert_material,
            sessions_count: AtomicI32::new(0),
        })
    }

    /// True when the frontend accept loop itself needs to speak QUIC
    /// (server-mode QUIC tunnels); every other combination listens on TCP
    /// and dials (or relays over) QUIC for the backend leg instead.
    pub fn frontend_is_quic(&self) -> bool {
        self.transport == Transport::Quic && self.role == Role::Server
    }
}
