/*!
 * Logging and tracing initialization
 */

use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::KeeperConfig;
use crate::error::{KeeperError, Result};

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(config: &KeeperConfig) -> String {
    format!(
        "snapkeeper={},keeper_observability={}",
        config.effective_log_level().to_tracing_level(),
        config.effective_log_level().to_tracing_level()
    )
}

/// Initialize structured logging based on configuration
pub fn init_logging(config: &KeeperConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))
        .map_err(|e| KeeperError::config(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_stdout_logging(env_filter);
    }

    Ok(())
}

/// Initialize logging to stdout
fn init_stdout_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize JSON logging to a file, appending across restarts
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| KeeperError::config(format!("Failed to open log file {}: {}", log_path.display(), e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false) // No ANSI colors in file
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Initialize logging for tests
///
/// Safe to call from every test; only the first call installs a subscriber.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snapkeeper=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_default_directive() {
        let config = KeeperConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert!(default_directive(&config).starts_with("snapkeeper=WARN"));
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let config = KeeperConfig {
            log_level: LogLevel::Error,
            debug: true,
            ..Default::default()
        };
        assert!(default_directive(&config).starts_with("snapkeeper=DEBUG"));
    }

    #[test]
    fn test_directive_parses() {
        let config = KeeperConfig::default();
        assert!(EnvFilter::try_new(default_directive(&config)).is_ok());
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!("logging initialized twice without panicking");
    }
}
