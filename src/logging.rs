use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::SyncError;

/// Flushes buffered events when the run ends; hold it in `main`.
pub struct LoggingGuard(WorkerGuard);

/// `RUST_LOG` wins over the configured directives.
fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, SyncError> {
    let (writer, guard) = non_blocking(std::io::stdout());
    let registry = tracing_subscriber::registry().with(env_filter(&cfg.filter_directives));

    // Scheduled runs ship JSON to a collector; pretty is for a terminal.
    let installed = match cfg.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_target(false).with_writer(writer))
            .try_init(),
    };
    installed.map_err(|e| SyncError::Config(format!("logging already initialised: {e}")))?;

    Ok(LoggingGuard(guard))
}
