//! ---
//! bmq_section: "01-core-functionality"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Session configuration model, TOML loading and validation."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

fn default_broker_uri() -> String {
    "tcp://localhost:30114".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Compression applied by the client to every posted message.
///
/// Configuration may name the algorithm or give the client's integer code.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase", try_from = "CompressionSetting")]
pub enum CompressionAlgorithm {
    #[default]
    None = 0,
    Zlib = 1,
}

impl CompressionAlgorithm {
    pub const LOWEST_SUPPORTED: i32 = CompressionAlgorithm::None as i32;
    pub const HIGHEST_SUPPORTED: i32 = CompressionAlgorithm::Zlib as i32;

    /// Integer code understood by the native client.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Zlib),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CompressionSetting {
    Code(i32),
    Name(String),
}

impl TryFrom<CompressionSetting> for CompressionAlgorithm {
    type Error = String;

    fn try_from(setting: CompressionSetting) -> std::result::Result<Self, Self::Error> {
        match setting {
            CompressionSetting::Code(code) => (Self::LOWEST_SUPPORTED..=Self::HIGHEST_SUPPORTED)
                .contains(&code)
                .then(|| Self::from_code(code))
                .flatten()
                .ok_or_else(|| format!("Invalid message compression type {code}")),
            CompressionSetting::Name(name) => match name.to_ascii_lowercase().as_str() {
                "none" => Ok(CompressionAlgorithm::None),
                "zlib" => Ok(CompressionAlgorithm::Zlib),
                _ => Err(format!("Invalid message compression type '{name}'")),
            },
        }
    }
}

/// Per-request timeouts. `None` leaves the client default in place.
#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub connect: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub disconnect: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub open_queue: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub configure_queue: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub close_queue: Option<Duration>,
}

impl Timeouts {
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("connect", self.connect),
            ("disconnect", self.disconnect),
            ("open_queue", self.open_queue),
            ("configure_queue", self.configure_queue),
            ("close_queue", self.close_queue),
        ];
        for (name, value) in named {
            if let Some(timeout) = value {
                if timeout.is_zero() {
                    return Err(anyhow!(
                        "{name} timeout must be greater than 0.0, was {}",
                        timeout.as_secs_f64()
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write a rolling daily file next to the stdout stream.
    #[serde(default)]
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_output: false,
        }
    }
}

/// Options used to construct a broker session.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_broker_uri")]
    pub broker_uri: String,
    #[serde(default)]
    pub process_name_override: Option<String>,
    #[serde(default)]
    pub message_compression: CompressionAlgorithm,
    #[serde(default)]
    pub num_processing_threads: Option<i32>,
    #[serde(default)]
    pub blob_buffer_size: Option<i32>,
    #[serde(default)]
    pub channel_high_watermark: Option<i32>,
    /// `(low, high)` watermarks of the client's event queue.
    #[serde(default)]
    pub event_queue_watermarks: Option<(i32, i32)>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub stats_dump_interval: Option<Duration>,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Let the client watch host health; required by queues that suspend on
    /// bad host health.
    #[serde(default)]
    pub monitor_host_health: bool,
    /// Escalate the stop-before-drop warning into an error.
    #[serde(default)]
    pub warnings_as_errors: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`SessionConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedSessionConfig {
    pub config: SessionConfig,
    pub source: PathBuf,
}

impl SessionConfig {
    pub const ENV_CONFIG_PATH: &str = "BMQ_BRIDGE_CONFIG";

    /// Load configuration from disk, respecting the `BMQ_BRIDGE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedSessionConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedSessionConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedSessionConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading session configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<SessionConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Process name reported to the broker, defaulting to the running executable.
    pub fn effective_process_name(&self) -> String {
        if let Some(name) = &self.process_name_override {
            return name.clone();
        }
        std::env::args()
            .next()
            .and_then(|arg0| {
                Path::new(&arg0)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_default()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.broker_uri.trim().is_empty() {
            return Err(anyhow!("broker_uri must not be empty"));
        }
        for (name, value) in [
            ("num_processing_threads", self.num_processing_threads),
            ("blob_buffer_size", self.blob_buffer_size),
            ("channel_high_watermark", self.channel_high_watermark),
        ] {
            if let Some(value) = value {
                if value <= 0 {
                    return Err(anyhow!("{name} must be positive, was {value}"));
                }
            }
        }
        if let Some((low, high)) = self.event_queue_watermarks {
            if low < 0 || high <= low {
                return Err(anyhow!(
                    "event_queue_watermarks must satisfy 0 <= low < high, got ({low}, {high})"
                ));
            }
        }
        self.timeouts.validate()?;
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_uri: default_broker_uri(),
            process_name_override: None,
            message_compression: CompressionAlgorithm::default(),
            num_processing_threads: None,
            blob_buffer_size: None,
            channel_high_watermark: None,
            event_queue_watermarks: None,
            stats_dump_interval: None,
            timeouts: Timeouts::default(),
            monitor_host_health: false,
            warnings_as_errors: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for SessionConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: SessionConfig =
            toml::from_str(content).with_context(|| "failed to parse session configuration")?;
        config.validate()?;
        Ok(config)
    }
}
