//! Server configuration.

use bitwit_core::runlog::DEFAULT_RETAINED_LINES;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RUN_DELAY_SECS: u64 = 5;

/// Process log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format '{}' (expected text or json)", other),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Data root
    pub data_dir: PathBuf,
    /// Optional server configuration file
    pub config_path: PathBuf,
    /// Persisted runtime settings
    pub settings_path: PathBuf,
    /// Run log file
    pub log_file: PathBuf,
    /// Where rotated run logs go on reset
    pub archive_dir: PathBuf,
    /// Listen address for the control API
    pub bind: SocketAddr,
    /// Pause between iterations of a batch
    pub run_delay: Duration,
    /// Per-iteration deadline
    pub run_timeout: Option<Duration>,
    /// Lines kept in the in-memory tail window
    pub log_retain_lines: usize,
    pub log_format: LogFormat,
}

/// Overlay read from `server.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind: Option<SocketAddr>,
    run_delay_secs: Option<u64>,
    run_timeout_secs: Option<u64>,
    log_retain_lines: Option<usize>,
    log_format: Option<LogFormat>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_data_dir(home.join(".bitwit"))
    }
}

impl Config {
    fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("server.toml"),
            settings_path: data_dir.join("settings.toml"),
            log_file: data_dir.join("logs").join(bitwit_core::runlog::LOG_FILE_NAME),
            archive_dir: data_dir.join("logs_archive"),
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            run_delay: Duration::from_secs(DEFAULT_RUN_DELAY_SECS),
            run_timeout: None,
            log_retain_lines: DEFAULT_RETAINED_LINES,
            log_format: LogFormat::Text,
            data_dir,
        }
    }

    /// Load configuration from defaults, `server.toml` and the environment
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.bitwit/
    /// ├── server.toml           # Optional server configuration
    /// ├── settings.toml         # Persisted runtime settings
    /// ├── logs/
    /// │   └── bitwit_ai.log     # Run log tailed by the dashboard
    /// └── logs_archive/         # Run logs rotated by reset
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_env(|key| std::env::var(key).ok())
    }

    pub(crate) fn load_with_env<F>(env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Use BITWIT_DIR env var if set, otherwise ~/.bitwit
        let mut config = match env("BITWIT_DIR") {
            Some(dir) => Self::with_data_dir(PathBuf::from(dir)),
            None => Self::default(),
        };

        if config.config_path.exists() {
            config.apply_file(&Self::read_file(&config.config_path)?);
        }
        config.apply_env(env)?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        if let Some(parent) = config.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&config.archive_dir)?;

        Ok(config)
    }

    fn read_file(path: &Path) -> anyhow::Result<FileConfig> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", path.display(), e))
    }

    fn apply_file(&mut self, file: &FileConfig) {
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(secs) = file.run_delay_secs {
            self.run_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = file.run_timeout_secs {
            self.run_timeout = match secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
        }
        if let Some(lines) = file.log_retain_lines {
            self.log_retain_lines = lines.max(1);
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
    }

    fn apply_env<F>(&mut self, env: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = env("BITWIT_BIND") {
            self.bind = bind
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid BITWIT_BIND '{}': {}", bind, e))?;
        }
        if let Some(secs) = env("BITWIT_RUN_DELAY_SECS") {
            self.run_delay = Duration::from_secs(parse_number("BITWIT_RUN_DELAY_SECS", &secs)?);
        }
        if let Some(secs) = env("BITWIT_RUN_TIMEOUT_SECS") {
            self.run_timeout = match parse_number("BITWIT_RUN_TIMEOUT_SECS", &secs)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
        }
        if let Some(lines) = env("BITWIT_LOG_RETAIN_LINES") {
            self.log_retain_lines = parse_number::<usize>("BITWIT_LOG_RETAIN_LINES", &lines)?.max(1);
        }
        if let Some(format) = env("BITWIT_LOG_FORMAT") {
            self.log_format = LogFormat::parse(&format)?;
        }
        Ok(())
    }
}

fn parse_number<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, raw, e))
}
