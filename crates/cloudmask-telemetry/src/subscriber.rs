//! Telemetry subscriber
//!
//! Consumes masking, unmasking, alert and metrics events from the event bus.
//! Two background tasks run while connected:
//!
//! - the receive task appends every inbound message to the [`EventBuffer`]
//!   and never calls handlers;
//! - the batch task wakes every `processing.interval_ms`, drains at most
//!   `processing.batch_size` messages, decodes them and calls the registered
//!   handlers in arrival order.
//!
//! The tasks share only the buffer and the atomic statistics.

use crate::buffer::{EventBuffer, InboundMessage};
use crate::config::SubscriberConfig;
use crate::diagnostics::DiagnosticsEngine;
use crate::handlers::{dispatch, EventHandler};
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::transport::{MessageStream, Transport};
use cloudmask_core::{Channel, Error, Result, TelemetryEvent};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long disconnect waits for a background task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one batch tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Messages taken from the buffer
    pub drained: usize,
    /// Messages decoded and delivered to handlers
    pub dispatched: usize,
    /// Messages dropped because they could not be decoded
    pub failed: usize,
    /// Messages ignored because their channel is unknown
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: StatsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// State shared with the background tasks
struct Shared {
    config: SubscriberConfig,
    transport: Arc<dyn Transport>,
    buffer: EventBuffer,
    stats: StatsCollector,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    diagnostics: DiagnosticsEngine,
    /// Keeps batches from interleaving so delivery order matches arrival order
    dispatch: Mutex<()>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Buffered, batch-dispatching consumer of telemetry events
pub struct TelemetrySubscriber {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl TelemetrySubscriber {
    /// Create a subscriber; nothing is opened until [`connect`](Self::connect)
    pub fn new(config: SubscriberConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let diagnostics = DiagnosticsEngine::new(config.diagnostics.clone())?;
        Ok(Self::with_diagnostics(config, transport, diagnostics))
    }

    /// Create a subscriber with a preconfigured diagnostics engine
    pub fn with_diagnostics(
        config: SubscriberConfig,
        transport: Arc<dyn Transport>,
        diagnostics: DiagnosticsEngine,
    ) -> Self {
        let buffer = EventBuffer::new(config.processing.buffer_size);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                buffer,
                stats: StatsCollector::new(),
                handlers: RwLock::new(Vec::new()),
                diagnostics,
                dispatch: Mutex::new(()),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Add a handler; handlers are called in registration order
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.shared.handlers.write().push(handler);
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.shared.config
    }

    /// Connect the transport, subscribe to the enabled channels and start
    /// the receive and batch tasks.
    ///
    /// A failure is returned as is; retrying is left to the caller.
    /// Connecting an already connected subscriber is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.cancel.is_some() {
            if self.shared.stats.is_connected() {
                debug!("Subscriber already connected");
                return Ok(());
            }
            // The previous stream ended on its own; reap its tasks first.
            stop_tasks(&mut lifecycle).await;
        }

        let channels = self.shared.config.enabled_channels();
        let stream = match self.open(&channels).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    transport = self.shared.transport.name(),
                    error = %e,
                    "Failed to connect telemetry subscriber"
                );
                if let Err(close_error) = self.shared.transport.close().await {
                    debug!(error = %close_error, "Close after failed connect also failed");
                }
                return Err(e);
            }
        };

        self.shared.stats.set_connected(true);
        for handler in self.shared.handlers_snapshot() {
            handler.on_connect().await;
        }

        let cancel = CancellationToken::new();
        lifecycle.tasks = vec![
            tokio::spawn(receive_loop(
                Arc::clone(&self.shared),
                stream,
                cancel.clone(),
            )),
            tokio::spawn(batch_loop(Arc::clone(&self.shared), cancel.clone())),
        ];
        lifecycle.cancel = Some(cancel);

        info!(
            transport = self.shared.transport.name(),
            channels = ?channels.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            interval_ms = self.shared.config.processing.interval_ms,
            batch_size = self.shared.config.processing.batch_size,
            "Telemetry subscriber connected"
        );
        Ok(())
    }

    async fn open(&self, channels: &[Channel]) -> Result<MessageStream> {
        let transport = &self.shared.transport;
        transport.connect().await?;
        let stream = transport.subscribe(channels).await?;
        transport.ping().await?;
        Ok(stream)
    }

    /// Feed a message through the receive path, as if it came from the bus
    pub fn ingest(&self, message: InboundMessage) {
        self.shared.ingest(message);
    }

    /// Run one batch tick now
    pub async fn run_batch(&self) -> BatchSummary {
        self.shared.process_batch().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot(self.shared.buffer.len())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.stats.is_connected()
    }

    /// Ping the transport and report health with current statistics
    pub async fn health_check(&self) -> HealthReport {
        let result = if self.is_connected() {
            self.shared.transport.ping().await
        } else {
            Err(Error::transport("subscriber is not connected"))
        };

        match result {
            Ok(()) => HealthReport {
                status: HealthStatus::Healthy,
                error: None,
                stats: self.stats(),
            },
            Err(e) => {
                warn!(error = %e, "Telemetry health check failed");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    error: Some(e.to_string()),
                    stats: self.stats(),
                }
            }
        }
    }

    /// Stop both tasks and close the transport.
    ///
    /// Safe to call repeatedly, before `connect`, or concurrently with it.
    /// Messages still buffered stay in the buffer and can be drained with
    /// [`run_batch`](Self::run_batch).
    pub async fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.cancel.is_none() {
            debug!("Subscriber not connected, nothing to disconnect");
            return Ok(());
        }

        stop_tasks(&mut lifecycle).await;

        let was_connected = self.shared.stats.is_connected();
        self.shared.stats.set_connected(false);
        let closed = self.shared.transport.close().await;

        if was_connected {
            for handler in self.shared.handlers_snapshot() {
                handler.on_disconnect().await;
            }
        }

        info!(
            buffered = self.shared.buffer.len(),
            "Telemetry subscriber disconnected"
        );
        closed
    }
}

impl Drop for TelemetrySubscriber {
    fn drop(&mut self) {
        if let Some(cancel) = self.lifecycle.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

async fn stop_tasks(lifecycle: &mut Lifecycle) {
    if let Some(cancel) = lifecycle.cancel.take() {
        cancel.cancel();
    }

    for mut task in lifecycle.tasks.drain(..) {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Subscriber task ended abnormally"),
            Err(_) => {
                warn!("Subscriber task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Shared {
    fn handlers_snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers.read().clone()
    }

    fn ingest(&self, message: InboundMessage) {
        self.stats.record_received();
        if let Some(evicted) = self.buffer.push(message.into()) {
            self.stats.record_dropped(1);
            warn!(
                channel = %evicted.channel,
                capacity = self.buffer.capacity(),
                "Event buffer full, dropped oldest event"
            );
        }
    }

    async fn process_batch(&self) -> BatchSummary {
        let _ordered = self.dispatch.lock().await;

        let batch = self.buffer.drain(self.config.processing.batch_size);
        let mut summary = BatchSummary {
            drained: batch.len(),
            ..BatchSummary::default()
        };
        if batch.is_empty() {
            return summary;
        }

        let handlers = self.handlers_snapshot();

        for message in batch {
            let Some(channel) = Channel::from_name(&message.channel) else {
                warn!(channel = %message.channel, "Ignoring event from unknown channel");
                summary.ignored += 1;
                continue;
            };

            let event = match TelemetryEvent::decode(channel, &message.payload) {
                Ok(event) => event,
                Err(e) => {
                    self.stats.record_error();
                    summary.failed += 1;
                    warn!(channel = %channel, error = %e, "Dropping unparsable event");
                    for handler in &handlers {
                        handler.on_error(&e, channel.as_str()).await;
                    }
                    continue;
                }
            };

            let diagnostics = match &event {
                TelemetryEvent::Masking(masking) => self.diagnostics.inspect(masking),
                _ => Vec::new(),
            };

            self.stats.record_processed(channel);
            for handler in &handlers {
                dispatch(handler.as_ref(), &event).await;
            }

            for diagnostic in &diagnostics {
                self.stats.record_diagnostic(diagnostic.kind());
                warn!(
                    kind = diagnostic.kind(),
                    request_id = %diagnostic.request_id(),
                    "Masking diagnostic raised"
                );
                for handler in &handlers {
                    handler.on_diagnostic(diagnostic).await;
                }
            }

            summary.dispatched += 1;
        }

        debug!(
            drained = summary.drained,
            dispatched = summary.dispatched,
            failed = summary.failed,
            remaining = self.buffer.len(),
            "Processed event batch"
        );
        summary
    }
}

async fn receive_loop(shared: Arc<Shared>, mut stream: MessageStream, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(message)) => shared.ingest(message),
                Some(Err(e)) => {
                    shared.stats.record_error();
                    warn!(error = %e, "Error receiving event");
                }
                None => {
                    warn!("Event stream ended");
                    shared.stats.set_connected(false);
                    for handler in shared.handlers_snapshot() {
                        handler.on_disconnect().await;
                    }
                    break;
                }
            },
        }
    }
    debug!("Receive task stopped");
}

async fn batch_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.processing.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.process_batch().await;
            }
        }
    }
    debug!("Batch task stopped");
}
