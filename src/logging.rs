//! Process-wide `tracing` setup
//!
//! Lines go to a rolling file (JSON or text) and, in text mode, to stdout.
//! Target `settlement` carries the record of every remote diamond transfer
//! that could not be committed locally; it stays at `info` whatever the
//! configured level, unless the level string names it explicitly.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target of settlement audit lines
pub const SETTLEMENT_TARGET: &str = "settlement";

/// Directive string for `log_level`, with the settlement target pinned
fn filter_directives(log_level: &str) -> String {
    if log_level.contains(SETTLEMENT_TARGET) {
        log_level.to_string()
    } else {
        format!("{},{}=info", log_level, SETTLEMENT_TARGET)
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
///
/// `RUST_LOG` overrides `log_level` when set.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // audit lines are queried by target
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}
