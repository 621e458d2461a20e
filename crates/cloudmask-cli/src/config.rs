//! CLI configuration
//!
//! Layered from, lowest to highest precedence: built-in defaults, the YAML
//! file named by `--config`, `CLOUDMASK__*` environment variables (for
//! example `CLOUDMASK__TRANSPORT__HOST`), and command line flags.

use cloudmask_masking::MaskingConfig;
use cloudmask_telemetry::{
    ChannelConfig, DiagnosticsConfig, LoggingConfig, ProcessingConfig, SubscriberConfig,
    TransportConfig,
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CLOUDMASK";

/// Complete CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Catalog adjustments for `mask` and `scan`
    #[serde(default)]
    pub masking: MaskingConfig,
}

impl AppConfig {
    /// Load from an optional file plus the environment
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// The subscriber portion of the configuration
    pub fn subscriber(&self) -> SubscriberConfig {
        SubscriberConfig {
            transport: self.transport.clone(),
            channels: self.channels.clone(),
            processing: self.processing.clone(),
            diagnostics: self.diagnostics.clone(),
            logging: self.logging.clone(),
        }
    }
}
