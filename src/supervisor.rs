//! Tunnel Supervisor: owns the immutable configuration, runs the frontend
//! accept loop, and dispatches each accepted stream to its own concurrent
//! session relay.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cert;
use crate::config::{Role, TunnelConfig, Transport};
use crate::error::TransportError;
use crate::pool::BufferPool;
use crate::session::run_session;
use crate::transport::{
    Connector, Listener, QuicConnector, QuicTransportListener, TcpConnector, TcpTransportListener,
};

pub struct Supervisor {
    cfg: Arc<TunnelConfig>,
    pool: BufferPool,
}

impl Supervisor {
    pub fn new(cfg: TunnelConfig) -> Self {
        let pool = BufferPool::new(cfg.buffer_size);
        Self {
            cfg: Arc::new(cfg),
            pool,
        }
    }

    /// Returns a shared handle to the configuration, including the
    /// live-session counter, independent of the supervisor's own lifetime.
    pub fn config(&self) -> Arc<TunnelConfig> {
        self.cfg.clone()
    }

    /// Runs the accept loop until the process is asked to shut down.
    /// Bind failures are fatal and propagate out; transient accept errors
    /// are logged and the loop continues.
    pub async fn run(&self) -> Result<(), TransportError> {
        if self.cfg.frontend_is_quic() {
            self.run_quic_frontend().await
        } else {
            self.run_tcp_frontend().await
        }
    }

    async fn run_tcp_frontend(&self) -> Result<(), TransportError> {
        let listener = TcpTransportListener::bind(self.cfg.frontend.0).await?;
        let connector = self.backend_connector().await?;
        let label = if self.cfg.transport == Transport::Quic {
            "QUIC "
        } else {
            ""
        };

        loop {
            match listener.accept().await {
                Ok((inbound, peer)) => {
                    debug!("accepted connection from {peer}");
                    let cfg = self.cfg.clone();
                    let pool = self.pool.clone();
                    let connector = connector.clone();
                    tokio::spawn(async move {
                        run_session(&cfg, &pool, connector.as_ref(), inbound, label).await;
                    });
                }
                Err(e) => {
                    warn!("accept failed, continuing: {e}");
                }
            }
        }
    }

    async fn run_quic_frontend(&self) -> Result<(), TransportError> {
        let (cert, key) = cert::load_or_generate(&self.cfg)?;
        let server_config = crate::tls::server_config(cert, key)
            .map_err(|e| TransportError::Quic(e.to_string()))?;
        let endpoint = quinn::Endpoint::server(server_config, self.cfg.frontend.0).map_err(|e| {
            TransportError::Bind {
                addr: self.cfg.frontend.0.to_string(),
                source: e,
            }
        })?;
        let listener = QuicTransportListener::new(endpoint);
        let connector: Arc<dyn Connector> = Arc::new(TcpConnector);

        loop {
            match listener.accept().await {
                Ok((inbound, peer)) => {
                    debug!("accepted QUIC stream from {peer}");
                    let cfg = self.cfg.clone();
                    let pool = self.pool.clone();
                    let connector = connector.clone();
                    tokio::spawn(async move {
                        run_session(&cfg, &pool, connector.as_ref(), inbound, "QUIC-Server ")
                            .await;
                    });
                }
                Err(e) => {
                    warn!("QUIC accept failed, continuing: {e}");
                }
            }
        }
    }

    /// Builds the connector used to dial the backend leg. QUIC is used
    /// when the configured transport is QUIC and this side is in
    /// client-mode (egress onto the encrypted leg); every other
    /// combination dials the backend over plain TCP.
    async fn backend_connector(&self) -> Result<Arc<dyn Connector>, TransportError> {
        if self.cfg.transport == Transport::Quic && self.cfg.role == Role::Client {
            let bind_addr = "0.0.0.0:0".parse().expect("static bind addr parses");
            let mut endpoint =
                quinn::Endpoint::client(bind_addr).map_err(|e| TransportError::Bind {
                    addr: bind_addr.to_string(),
                    source: e,
                })?;
            endpoint.set_default_client_config(crate::tls::insecure_client_config());
            Ok(Arc::new(QuicConnector::new(endpoint, "localhost")))
        } else {
            Ok(Arc::new(TcpConnector))
        }
    }
}
