//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Per-session streaming limits: queue sizing, backpressure, framing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Capacity of the bounded frame queue between producer and consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long the producer waits for queue space before counting a timeout.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    /// Consecutive push timeouts that escalate into a backpressure error.
    #[serde(default = "default_max_push_timeouts")]
    pub max_push_timeouts: u32,
    /// Maximum accepted NDJSON line length in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Tool names whose results are never scanned for markers.
    #[serde(default = "default_skip_marker_tools")]
    pub skip_marker_tools: Vec<String>,
}

impl StreamConfig {
    /// Push timeout as a [`Duration`].
    #[must_use]
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            push_timeout_ms: default_push_timeout_ms(),
            max_push_timeouts: default_max_push_timeouts(),
            max_line_bytes: default_max_line_bytes(),
            skip_marker_tools: default_skip_marker_tools(),
        }
    }
}

/// Heartbeat turn behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// All-clear token; a heartbeat reply containing it is discarded.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
        }
    }
}

/// Limits for marker-triggered background jobs (charts, research).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobsConfig {
    /// Maximum concurrent jobs of one kind per user.
    #[serde(default = "default_max_concurrent_per_user")]
    pub max_concurrent_per_user: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_user: default_max_concurrent_per_user(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_push_timeout_ms() -> u64 {
    5_000
}

fn default_max_push_timeouts() -> u32 {
    1
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

fn default_skip_marker_tools() -> Vec<String> {
    vec!["Read".into(), "NotebookRead".into()]
}

fn default_sentinel() -> String {
    "HEARTBEAT_OK".into()
}

fn default_max_concurrent_per_user() -> usize {
    2
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    8765
}

fn default_init_timeout_ms() -> u64 {
    10_000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the WebSocket endpoint binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// Port the WebSocket endpoint binds to.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Time allowed for the poller to send its init envelope.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    /// Streaming limits.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Heartbeat turn settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Background job limits.
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            init_timeout_ms: default_init_timeout_ms(),
            stream: StreamConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Init envelope deadline as a [`Duration`].
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.queue_capacity == 0 {
            return Err(AppError::Config(
                "stream.queue_capacity must be greater than zero".into(),
            ));
        }

        if self.stream.push_timeout_ms == 0 {
            return Err(AppError::Config(
                "stream.push_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.stream.max_push_timeouts == 0 {
            return Err(AppError::Config(
                "stream.max_push_timeouts must be greater than zero".into(),
            ));
        }

        if self.stream.max_line_bytes == 0 {
            return Err(AppError::Config(
                "stream.max_line_bytes must be greater than zero".into(),
            ));
        }

        if self.heartbeat.sentinel.trim().is_empty() {
            return Err(AppError::Config(
                "heartbeat.sentinel must not be empty".into(),
            ));
        }

        if self.jobs.max_concurrent_per_user == 0 {
            return Err(AppError::Config(
                "jobs.max_concurrent_per_user must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
