// TOML config adapter - Configuration hierarchy: CLI > Env > File > Defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::session::SessionConfig;

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub start_timeout_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 30_000,
            progress_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encode parallelism hint; unset lets the encoder decide
    pub threads: Option<u32>,
    /// Preset applied when a command names none
    pub default_preset: Option<String>,
}

impl EncoderConfig {
    /// Configured thread count, else one per logical CPU
    pub fn effective_threads(&self) -> u32 {
        self.threads
            .filter(|&n| n > 0)
            .unwrap_or_else(|| num_cpus::get() as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub watchdog: WatchdogConfig,
    pub encoder: EncoderConfig,
    pub ffmpeg: FfmpegConfig,
}

const CONFIG_FILE_NAME: &str = "clipbridge.toml";

impl AppConfig {
    /// Defaults, then the first config file found, then environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::search_paths().into_iter().find(|p| p.is_file()),
        };

        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Candidate files, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("config").join(CONFIG_FILE_NAME),
        ];
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("clipbridge").join("config.toml"));
        } else if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("clipbridge")
                    .join("config.toml"),
            );
        }
        paths
    }

    /// Apply `CLIPBRIDGE_*` overrides from the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = 0;

        if let Some(level) = lookup("CLIPBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
            overrides += 1;
        }
        if let Some(value) = lookup("CLIPBRIDGE_LOG_JSON") {
            self.logging.json = parse_value("CLIPBRIDGE_LOG_JSON", &value)?;
            overrides += 1;
        }
        if let Some(value) = lookup("CLIPBRIDGE_START_TIMEOUT_MS") {
            self.watchdog.start_timeout_ms = parse_value("CLIPBRIDGE_START_TIMEOUT_MS", &value)?;
            overrides += 1;
        }
        if let Some(value) = lookup("CLIPBRIDGE_THREADS") {
            self.encoder.threads = Some(parse_value("CLIPBRIDGE_THREADS", &value)?);
            overrides += 1;
        }
        if let Some(path) = lookup("CLIPBRIDGE_FFMPEG") {
            self.ffmpeg.ffmpeg = PathBuf::from(path);
            overrides += 1;
        }
        if let Some(path) = lookup("CLIPBRIDGE_FFPROBE") {
            self.ffmpeg.ffprobe = PathBuf::from(path);
            overrides += 1;
        }

        if overrides > 0 {
            debug!("Applied {} environment variable overrides", overrides);
        }
        Ok(())
    }

    /// Session tuning derived from the watchdog and encoder sections
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            start_timeout: Duration::from_millis(self.watchdog.start_timeout_ms),
            progress_interval: Duration::from_millis(self.watchdog.progress_interval_ms),
            threads: Some(self.encoder.effective_threads()),
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
