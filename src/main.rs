use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing::{error, info, warn};

use qtunnel::config::{Opt, TunnelConfig};
use qtunnel::logging;
use qtunnel::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let cfg = match TunnelConfig::from_opt(opt) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("qtunnel: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let _logging_guard = match logging::install(cfg.logto) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("qtunnel: failed to install log sink: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "qtunnel starting: frontend={} backend={} role={:?} transport={:?} crypto={}",
        cfg.frontend.0, cfg.backend.0, cfg.role, cfg.transport, cfg.crypto_method
    );

    if let Err(e) = run(cfg).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Runs the frontend accept loop until a shutdown signal arrives or the
/// supervisor itself gives up (a bind failure, which is fatal per §7).
async fn run(cfg: TunnelConfig) -> Result<()> {
    let supervisor = Supervisor::new(cfg);

    tokio::select! {
        result = supervisor.run() => result.context("supervisor exited")?,
        _ = wait_for_shutdown() => info!("shutdown signal received, exiting"),
    }

    Ok(())
}

/// Waits for SIGINT or SIGTERM; any other delivered signal is logged and
/// ignored rather than treated as a shutdown request.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return,
                _ = sigterm.recv() => return,
                _ = sighup.recv() => {
                    warn!("ignoring SIGHUP");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
