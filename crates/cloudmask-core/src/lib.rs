//! cloudmask Core
//!
//! Types shared across cloudmask components.
//!
//! This crate provides:
//! - Error types and result handling
//! - The telemetry event model published on the event bus
//! - Channel names for the four event kinds

pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{
    AlertType, Channel, DemoData, MaskingEvent, MetricType, MetricsEvent, SecurityAlert,
    Severity, TelemetryEvent, UnmaskingEvent,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        Channel, MaskingEvent, MetricsEvent, SecurityAlert, TelemetryEvent, UnmaskingEvent,
    };
}
