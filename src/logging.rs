//! Per-session file logging.
//!
//! stdout carries hook JSON and stderr carries user-visible diagnostics, so
//! log events only ever go to `session-{id}.log` under the log directory.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::state::sanitize_session_id;

/// Overrides the log directory (tests, unusual homes).
pub const LOG_DIR_ENV: &str = "BUMPER_LANES_LOG_DIR";
/// An `EnvFilter` directive, e.g. `debug` or `bumper_lanes=trace`.
pub const LOG_FILTER_ENV: &str = "BUMPER_LANES_LOG";
/// `1` switches the default level to debug.
pub const DEBUG_ENV: &str = "BUMPER_LANES_DEBUG";

fn log_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".claude").join("logs").join("bumper-lanes"))
}

fn filter() -> EnvFilter {
    let default = if std::env::var(DEBUG_ENV).is_ok_and(|v| v == "1") {
        "debug"
    } else {
        "info"
    };
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber for `session_id`. Logging is silently
/// disabled when the log file cannot be opened.
pub fn init(session_id: &str) {
    let Some(dir) = log_dir() else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join(format!("session-{}.log", sanitize_session_id(session_id)));
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
