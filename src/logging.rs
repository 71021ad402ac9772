//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::path::Path;

/// Initialize tracing to stderr, plus a daily rolling file under `log_dir`
/// when given.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// process lifetime.
pub fn init_tracing(debug: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact();

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "channel-archiver.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact();

            tracing_subscriber::registry()
                .with(build_env_filter(debug))
                .with(stderr_layer)
                .with(file_layer)
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(build_env_filter(debug))
                .with(stderr_layer)
                .try_init()?;
            Ok(None)
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
}
