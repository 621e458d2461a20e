//! cloudmask Telemetry
//!
//! Event bus plumbing for the masking gateway.
//!
//! Provides:
//! - [`TelemetrySubscriber`]: buffered, batch-dispatching consumer of
//!   masking, unmasking, alert and metrics events
//! - [`EventPublisher`]: builds events from masking reports and publishes them
//! - Local diagnostics for suspected masking failures, slow masking and
//!   leaked identifiers
//! - Transports: an in-process bus and Redis pub/sub (`redis` feature)

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod handlers;
pub mod publisher;
#[cfg(feature = "redis")]
pub mod redis_transport;
pub mod stats;
pub mod subscriber;
pub mod transport;

pub use buffer::{BufferedMessage, EventBuffer, InboundMessage};
pub use config::{
    ChannelConfig, DiagnosticsConfig, LoggingConfig, ProcessingConfig, SubscriberConfig,
    TransportConfig,
};
pub use diagnostics::{Diagnostic, DiagnosticsEngine};
pub use handlers::{CallbackHandler, EventHandler, LoggingHandler};
pub use publisher::EventPublisher;
#[cfg(feature = "redis")]
pub use redis_transport::RedisTransport;
pub use stats::{StatsCollector, StatsSnapshot};
pub use subscriber::{BatchSummary, HealthReport, HealthStatus, TelemetrySubscriber};
pub use transport::{MemoryTransport, MessageStream, Transport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::handlers::EventHandler;
    pub use crate::subscriber::TelemetrySubscriber;
    pub use crate::transport::{MemoryTransport, Transport};
}
