//! Config - デーモン設定（TOML）
//!
//! 既定のパスは `~/.taskd/config.toml`。全てのセクション・フィールドは省略可能で、
//! 省略したものは既定値になる。
//!
//! ```toml
//! [scheduler]
//! tick_millis = 1000
//! calendar = "local"
//!
//! [supervisor]
//! stop_grace_secs = 5
//!
//! [storage]
//! snapshot = "~/.taskd/tasks.json"
//! relaunch_running = true
//!
//! [http]
//! listen = "127.0.0.1:1949"
//!
//! [log]
//! level = "info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::CalendarZone;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub supervisor: SupervisorConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_millis: u64,
    pub calendar: CalendarZone,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            calendar: CalendarZone::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// SIGTERM から SIGKILL までの猶予
    pub stop_grace_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { stop_grace_secs: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file. `None` keeps tasks in memory only.
    pub snapshot: Option<String>,
    /// Relaunch Async tasks that were running when the previous daemon stopped.
    pub relaunch_running: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            relaunch_running: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1949".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist. Without one, the default path is used when present
    /// and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_millis == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_millis must be greater than 0".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_millis)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.supervisor.stop_grace_secs)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.storage
            .snapshot
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| PathBuf::from(expand_home(p)))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("http.listen '{}': {e}", self.http.listen)))
    }
}

/// `~/.taskd/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".taskd").join("config.toml"))
}

/// Expand a leading `$HOME` or `~/` to the user's home directory.
pub fn expand_home(input: &str) -> String {
    let Some(home) = dirs::home_dir() else {
        return input.to_string();
    };
    let home = home.to_string_lossy();
    let home = home.trim_end_matches('/');
    if let Some(rest) = input.strip_prefix("$HOME") {
        format!("{home}{rest}")
    } else if let Some(rest) = input.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else if input == "~" {
        home.to_string()
    } else {
        input.to_string()
    }
}
