//! Subscriber configuration

use cloudmask_core::{Channel, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Telemetry subscriber configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Event bus connection
    #[serde(default)]
    pub transport: TransportConfig,

    /// Channels to subscribe to
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Buffering and batch dispatch
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Local diagnostics raised from inbound events
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SubscriberConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Invalid subscriber config: {}", e)))
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Reject configurations the subscriber cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transport.host.trim().is_empty() {
            return Err(Error::config("transport.host must not be empty"));
        }
        if self.processing.buffer_size == 0 {
            return Err(Error::config("processing.buffer_size must be at least 1"));
        }
        if self.processing.batch_size == 0 {
            return Err(Error::config("processing.batch_size must be at least 1"));
        }
        if self.processing.interval_ms == 0 {
            return Err(Error::config("processing.interval_ms must be at least 1"));
        }
        if self.enabled_channels().is_empty() {
            return Err(Error::config("at least one channel must be enabled"));
        }
        Ok(())
    }

    /// Enabled channels in subscription order
    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.channels.is_enabled(*c))
            .collect()
    }
}

/// Event bus connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: i64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Attempts per command after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// `host:port/db`, safe to log
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            db: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Per-channel subscription switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub masking: bool,

    #[serde(default = "default_true")]
    pub unmasking: bool,

    #[serde(default = "default_true")]
    pub alerts: bool,

    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl ChannelConfig {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Masking => self.masking,
            Channel::Unmasking => self.unmasking,
            Channel::Alerts => self.alerts,
            Channel::Metrics => self.metrics,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            masking: true,
            unmasking: true,
            alerts: true,
            metrics: true,
        }
    }
}

/// Buffering and batch dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum buffered messages; the oldest are dropped beyond this
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum messages dispatched per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tick period
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl ProcessingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Diagnostic thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Masking events slower than this raise a slow-masking diagnostic
    #[serde(default = "default_slow_masking_threshold_ms")]
    pub slow_masking_threshold_ms: u64,

    /// Scan masked samples for identifiers that survived masking
    #[serde(default = "default_true")]
    pub check_leaks: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            slow_masking_threshold_ms: default_slow_masking_threshold_ms(),
            check_leaks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_buffer_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_slow_masking_threshold_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
