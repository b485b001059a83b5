//! Installs the `tracing` subscriber selected by the `--logto` flag:
//! `stdout` writes ANSI-formatted lines to standard out; `syslog` writes to
//! the local syslog daemon on Unix, falling back to a rotating file sink on
//! platforms (or syslog daemons) that are not reachable, so the process
//! never fails to start solely because a log sink is unavailable.

use tracing_subscriber::EnvFilter;

use crate::config::LogSink;
use crate::error::ConfigError;

/// Held by `main` for the process lifetime; dropping it stops the
/// non-blocking writer thread used by the file-sink fallback.
pub struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

pub fn install(sink: LogSink) -> Result<LoggingGuard, ConfigError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match sink {
        LogSink::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(true)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
            Ok(LoggingGuard(None))
        }
        LogSink::Syslog => install_syslog_or_file(filter),
    }
}

#[cfg(unix)]
fn install_syslog_or_file(filter: EnvFilter) -> Result<LoggingGuard, ConfigError> {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_DAEMON,
        hostname: None,
        process: "qtunnel".into(),
        pid: std::process::id(),
    };

    match syslog::unix(formatter) {
        Ok(logger) => {
            let writer = SyslogMakeWriter(std::sync::Arc::new(std::sync::Mutex::new(logger)));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
            Ok(LoggingGuard(None))
        }
        Err(e) => {
            eprintln!("syslog unavailable ({e}), falling back to file logging");
            install_file_fallback(filter)
        }
    }
}

#[cfg(not(unix))]
fn install_syslog_or_file(filter: EnvFilter) -> Result<LoggingGuard, ConfigError> {
    install_file_fallback(filter)
}

fn install_file_fallback(filter: EnvFilter) -> Result<LoggingGuard, ConfigError> {
    let appender = tracing_appender::rolling::never(".", "qtunnel.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(non_blocking)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    Ok(LoggingGuard(Some(guard)))
}

type SyslogHandle = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

#[cfg(unix)]
#[derive(Clone)]
struct SyslogMakeWriter(std::sync::Arc<std::sync::Mutex<SyslogHandle>>);

#[cfg(unix)]
struct SyslogWriter(std::sync::Arc<std::sync::Mutex<SyslogHandle>>);

#[cfg(unix)]
impl std::io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let mut logger = self.0.lock().expect("syslog logger mutex poisoned");
        logger
            .info(line.trim_end())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter(self.0.clone())
    }
}
