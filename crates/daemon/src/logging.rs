//! Tracing setup for the daemon.
//!
//! Logs always go to stdout. When a log directory is configured, a second
//! layer writes plain-text logs to a daily-rotated file through a
//! non-blocking writer.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix for rotated log files.
const LOG_FILE_PREFIX: &str = "bindle.log";

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(log_level: &str, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        log_level.to_lowercase()
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// flushes the file writer on drop and must be held for the life of the
/// process.
pub fn init(log_level: &str, verbose: bool, log_dir: &Path) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level, verbose)));

    let (file_layer, guard) = if log_dir.as_os_str().is_empty() {
        (None, None)
    } else {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_uses_level() {
        assert_eq!(default_directive("warn", false), "warn");
        assert_eq!(default_directive("INFO", false), "info");
    }

    #[test]
    fn test_verbose_forces_debug() {
        assert_eq!(default_directive("error", true), "debug");
    }
}
