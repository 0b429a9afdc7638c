//! Process logging setup.
//!
//! The filter sits behind a reload layer so the `LOG_LEVEL` runtime setting
//! can change verbosity without a restart. `RUST_LOG` pins the filter.

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::config::LogFormat;

const TARGETS: &[&str] = &["bitwit_server", "bitwit_core", "tower_http"];

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter directives for a `LOG_LEVEL` value, or `None` if it is not a level.
pub fn directives(level: &str) -> Option<String> {
    let level = match level.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => return None,
    };
    Some(
        TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Applies `LOG_LEVEL` changes to the installed subscriber.
#[derive(Clone)]
pub struct LogLevelControl {
    handle: Option<FilterHandle>,
    pinned: bool,
}

impl LogLevelControl {
    pub fn new(handle: FilterHandle, pinned: bool) -> Self {
        Self {
            handle: Some(handle),
            pinned,
        }
    }

    /// No subscriber to adjust.
    pub fn disabled() -> Self {
        Self {
            handle: None,
            pinned: false,
        }
    }

    /// Swap in the filter for `level`. Returns whether the filter changed.
    pub fn apply(&self, level: &str) -> anyhow::Result<bool> {
        let Some(handle) = &self.handle else {
            return Ok(false);
        };
        if self.pinned {
            return Ok(false);
        }
        let Some(directives) = directives(level) else {
            warn!(level, "Ignoring unknown log level");
            return Ok(false);
        };

        handle.reload(EnvFilter::try_new(&directives)?)?;
        info!(level, "Log level changed");
        Ok(true)
    }
}

/// Install the global subscriber at INFO.
pub fn init(format: LogFormat) -> anyhow::Result<LogLevelControl> {
    let (filter, pinned) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::try_new(directives("INFO").unwrap_or_default())?, false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
    Ok(LogLevelControl::new(handle, pinned))
}
