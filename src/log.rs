//! Structured logging for the farm.
//!
//! Log levels:
//! - ERROR: Failures that stop an ant, a job or the farm from doing its work
//! - WARN: Unexpected conditions that are recoverable (transient API errors)
//! - INFO: Lifecycle notifications (ant started, job started, sync reports)
//! - DEBUG: Detailed operation traces (API calls, readiness polling)
//! - TRACE: Very detailed traces (per-poll observations)
//!
//! Debug mode can be enabled with `--debug` flag or `ANTFARM_DEBUG=1` env var.
//! `RUST_LOG` overrides both when set.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "antfarm.log";

/// Name of the environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "ANTFARM_DEBUG";

/// Initialize logging to stderr only, at INFO.
pub fn init() -> Option<WorkerGuard> {
    init_with_debug(false, None)
}

/// Initialize logging with explicit debug mode setting.
///
/// When `log_dir` is given, a plain-text copy of every event is written to
/// `log_dir/antfarm.log`, truncated on startup. The returned guard flushes
/// the file writer on drop and must be held until the process exits.
pub fn init_with_debug(debug: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false);
    let level = default_level(debug || env_debug);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir.and_then(open_log_file) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (tests, embedding) keeps whichever subscriber won.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn open_log_file(dir: &Path) -> Option<tracing_appender::rolling::RollingFileAppender> {
    std::fs::create_dir_all(dir).ok()?;
    // Truncate file on startup
    std::fs::write(dir.join(LOG_FILE), "").ok()?;
    Some(tracing_appender::rolling::never(dir, LOG_FILE))
}

fn default_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
