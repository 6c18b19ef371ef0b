use facedeck_core::DEFAULT_HISTORY_CAPACITY;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE: &str = "http://127.0.0.1:5000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid API base URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },
}

/// Client configuration: config file, then `FACEDECK_*` environment
/// variables, then command-line overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Origin of the dashboard API (default: http://127.0.0.1:5000).
    pub api_base: Url,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Timeout in seconds for opening the live subscription.
    pub connect_timeout_secs: u64,
    /// Number of live recognitions kept in the on-screen history.
    pub history_capacity: usize,
    /// Interval of the background health and camera refresh.
    pub refresh_interval_secs: u64,
    /// Interval between snapshot fetches when following a camera.
    pub snapshot_interval_ms: u64,
}

/// On-disk form. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_base: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    history_capacity: Option<usize>,
    refresh_interval_secs: Option<u64>,
    snapshot_interval_ms: Option<u64>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path(|key| std::env::var(key).ok());
        let file = FileConfig::read(&path)?;
        tracing::debug!(path = %path.display(), "loaded config file layer");
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_base = env("FACEDECK_API_BASE")
            .or(file.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let mut history_capacity = env_parse(&env, "FACEDECK_HISTORY_CAPACITY")
            .or(file.history_capacity)
            .unwrap_or(DEFAULT_HISTORY_CAPACITY);
        if history_capacity == 0 {
            tracing::warn!(
                default = DEFAULT_HISTORY_CAPACITY,
                "history capacity must be at least 1; using default"
            );
            history_capacity = DEFAULT_HISTORY_CAPACITY;
        }

        Ok(Self {
            api_base: parse_base(&api_base)?,
            timeout_secs: at_least_one_sec(
                "timeout_secs",
                env_parse(&env, "FACEDECK_TIMEOUT_SECS")
                    .or(file.timeout_secs)
                    .unwrap_or(10),
            ),
            connect_timeout_secs: at_least_one_sec(
                "connect_timeout_secs",
                env_parse(&env, "FACEDECK_CONNECT_TIMEOUT_SECS")
                    .or(file.connect_timeout_secs)
                    .unwrap_or(10),
            ),
            history_capacity,
            refresh_interval_secs: env_parse(&env, "FACEDECK_REFRESH_SECS")
                .or(file.refresh_interval_secs)
                .unwrap_or(30),
            snapshot_interval_ms: env_parse(&env, "FACEDECK_SNAPSHOT_INTERVAL_MS")
                .or(file.snapshot_interval_ms)
                .unwrap_or(1000),
        })
    }

    /// Replace the API base (e.g. from `--api`).
    pub fn with_api_base(mut self, value: &str) -> Result<Self, ConfigError> {
        self.api_base = parse_base(value)?;
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms.max(100))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(FileConfig::default(), |_| None)
            .unwrap_or_else(|_| unreachable!("default API base is a valid URL"))
    }
}

/// `FACEDECK_CONFIG`, else `$XDG_CONFIG_HOME/facedeck/config.toml`.
fn config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = env("FACEDECK_CONFIG") {
        return PathBuf::from(path);
    }
    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facedeck/config.toml")
}

fn parse_base(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
    })
}

/// A zero timeout would fail every request, so it is raised to one second.
fn at_least_one_sec(key: &str, secs: u64) -> u64 {
    if secs == 0 {
        tracing::warn!(key, "timeout must be at least 1 second; using 1");
        return 1;
    }
    secs
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}
