//! Mycelia Logging
//!
//! Shared tracing-subscriber initialization for the oracle services.
//! `MYCELIA_LOG` overrides the default level with a full env-filter
//! directive string.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initialize the global subscriber. Safe to call once per process;
/// repeated calls are ignored.
pub fn init(default_level: LogLevel) {
    let filter = EnvFilter::try_from_env("MYCELIA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
