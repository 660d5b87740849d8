//! Logging initialization with file output support

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "hostlink.log";

/// Install the global subscriber: console output plus, when `log_dir` is
/// given, a daily-rolling file. The returned guard flushes the file writer
/// on drop and must outlive all logging.
///
/// `RUST_LOG` refines the default `info` level. A second call is a no-op
/// that still returns a guard for its own writer.
pub fn init_logging(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let console_layer = fmt::layer().with_target(true).with_thread_ids(false);

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);

            if let Err(e) = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
            {
                tracing::debug!("Logging already initialized: {}", e);
            }

            Some(guard)
        }
        None => {
            if let Err(e) = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()
            {
                tracing::debug!("Logging already initialized: {}", e);
            }
            None
        }
    }
}
