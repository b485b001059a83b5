//! Per-session bidirectional copy engine: dials the backend, attaches the
//! session cipher to whichever leg the role names, and runs both
//! directions concurrently to completion.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::cipher::Cipher;
use crate::config::{Role, TunnelConfig};
use crate::pool::BufferPool;
use crate::stream::relay_copy;
use crate::transport::{Connector, SplitStream};

/// Runs one session end to end: dial, cipher attach, concurrent copy,
/// teardown, logging. Never surfaces an error out of the task — every
/// failure is logged and the session is simply torn down.
pub async fn run_session(
    cfg: &TunnelConfig,
    pool: &BufferPool,
    connector: &dyn Connector,
    inbound: SplitStream,
    log_prefix: &str,
) {
    let t_start = Instant::now();
    let (inbound_rd, inbound_wr) = inbound;

    let backend = match connector.dial(cfg.backend.0).await {
        Ok(backend) => backend,
        Err(e) => {
            warn!(target: "qtunnel::session", "{log_prefix}dial {} failed: {e}", cfg.backend.0);
            return;
        }
    };
    let (backend_rd, backend_wr) = backend;

    let t_connect = t_start.elapsed();
    let t_transfer_start = Instant::now();

    let cipher = Cipher::new(&cfg.crypto_method, &cfg.secret, cfg.role)
        .expect("crypto method was validated when TunnelConfig was built");
    let (mut encrypt, mut decrypt) = cipher.into_halves();

    // Client mode: the inbound->backend leg carries egress traffic onto the
    // encrypted remote peer, so it encrypts; backend->inbound decrypts what
    // comes back. Server mode is the mirror image: inbound is the encrypted
    // leg to the remote peer.
    let (mut transform_to_backend, mut transform_to_inbound): (
        Box<dyn FnMut(&mut [u8]) + Send>,
        Box<dyn FnMut(&mut [u8]) + Send>,
    ) = match cfg.role {
        Role::Client => (
            Box::new(move |b: &mut [u8]| encrypt.apply(b)),
            Box::new(move |b: &mut [u8]| decrypt.apply(b)),
        ),
        Role::Server => (
            Box::new(move |b: &mut [u8]| decrypt.apply(b)),
            Box::new(move |b: &mut [u8]| encrypt.apply(b)),
        ),
    };

    cfg.sessions_count.fetch_add(1, Ordering::SeqCst);

    let pool_a = pool.clone();
    let pool_b = pool.clone();

    let to_backend = async move {
        let mut inbound_rd = inbound_rd;
        let mut backend_wr = backend_wr;
        let result =
            relay_copy(&mut inbound_rd, &mut backend_wr, &pool_a, |b| transform_to_backend(b))
                .await;
        let _ = backend_wr.shutdown().await;
        let _ = inbound_rd.close_read().await;
        result
    };

    let to_inbound = async move {
        let mut backend_rd = backend_rd;
        let mut inbound_wr = inbound_wr;
        let result =
            relay_copy(&mut backend_rd, &mut inbound_wr, &pool_b, |b| transform_to_inbound(b))
                .await;
        let _ = inbound_wr.shutdown().await;
        let _ = backend_rd.close_read().await;
        result
    };

    let (w_result, r_result) = tokio::join!(to_backend, to_inbound);

    if let Err(e) = &w_result {
        warn!(target: "qtunnel::session", "{log_prefix}inbound->backend copy error: {e}");
    }
    if let Err(e) = &r_result {
        warn!(target: "qtunnel::session", "{log_prefix}backend->inbound copy error: {e}");
    }

    let w = w_result.unwrap_or(0);
    let r = r_result.unwrap_or(0);
    let t_transfer = t_transfer_start.elapsed();
    let live = cfg.sessions_count.load(Ordering::SeqCst);

    info!(
        "{log_prefix}r:{r} w:{w} ct:{:.3} t:{:.3} [#{live}]",
        t_connect.as_secs_f64(),
        t_transfer.as_secs_f64(),
    );

    cfg.sessions_count.fetch_sub(1, Ordering::SeqCst);
}
