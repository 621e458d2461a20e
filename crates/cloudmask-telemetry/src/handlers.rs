//! Event handlers
//!
//! Handlers are registered on the subscriber and invoked from its batch
//! loop, one event at a time, in arrival order. Every method has a no-op
//! default so a handler implements only what it cares about.

use crate::diagnostics::Diagnostic;
use async_trait::async_trait;
use cloudmask_core::{
    Error, MaskingEvent, MetricsEvent, SecurityAlert, Severity, TelemetryEvent, UnmaskingEvent,
};
use tracing::{debug, error, info, warn};

/// Receiver of decoded telemetry
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_masking(&self, _event: &MaskingEvent) {}

    async fn on_unmasking(&self, _event: &UnmaskingEvent) {}

    async fn on_alert(&self, _alert: &SecurityAlert) {}

    async fn on_metrics(&self, _metric: &MetricsEvent) {}

    /// A diagnostic derived locally from a masking event
    async fn on_diagnostic(&self, _diagnostic: &Diagnostic) {}

    /// A payload could not be processed; `channel` is where it arrived
    async fn on_error(&self, _error: &Error, _channel: &str) {}

    async fn on_connect(&self) {}

    async fn on_disconnect(&self) {}
}

/// Route a decoded event to the matching handler method
pub async fn dispatch(handler: &dyn EventHandler, event: &TelemetryEvent) {
    match event {
        TelemetryEvent::Masking(e) => handler.on_masking(e).await,
        TelemetryEvent::Unmasking(e) => handler.on_unmasking(e).await,
        TelemetryEvent::Alert(a) => handler.on_alert(a).await,
        TelemetryEvent::Metrics(m) => handler.on_metrics(m).await,
    }
}

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&Error, &str) + Send + Sync>;
type LifecycleCallback = Box<dyn Fn() + Send + Sync>;

/// Handler assembled from closures
///
/// ```
/// use cloudmask_telemetry::CallbackHandler;
///
/// let handler = CallbackHandler::new()
///     .with_masking(|event| println!("{} masked {}", event.request_id, event.total_patterns));
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    masking: Option<Callback<MaskingEvent>>,
    unmasking: Option<Callback<UnmaskingEvent>>,
    alert: Option<Callback<SecurityAlert>>,
    metrics: Option<Callback<MetricsEvent>>,
    diagnostic: Option<Callback<Diagnostic>>,
    error: Option<ErrorCallback>,
    connect: Option<LifecycleCallback>,
    disconnect: Option<LifecycleCallback>,
}

impl CallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_masking(mut self, f: impl Fn(&MaskingEvent) + Send + Sync + 'static) -> Self {
        self.masking = Some(Box::new(f));
        self
    }

    pub fn with_unmasking(mut self, f: impl Fn(&UnmaskingEvent) + Send + Sync + 'static) -> Self {
        self.unmasking = Some(Box::new(f));
        self
    }

    pub fn with_alert(mut self, f: impl Fn(&SecurityAlert) + Send + Sync + 'static) -> Self {
        self.alert = Some(Box::new(f));
        self
    }

    pub fn with_metrics(mut self, f: impl Fn(&MetricsEvent) + Send + Sync + 'static) -> Self {
        self.metrics = Some(Box::new(f));
        self
    }

    pub fn with_diagnostic(mut self, f: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        self.diagnostic = Some(Box::new(f));
        self
    }

    pub fn with_error(mut self, f: impl Fn(&Error, &str) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn with_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connect = Some(Box::new(f));
        self
    }

    pub fn with_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnect = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl EventHandler for CallbackHandler {
    async fn on_masking(&self, event: &MaskingEvent) {
        if let Some(f) = &self.masking {
            f(event);
        }
    }

    async fn on_unmasking(&self, event: &UnmaskingEvent) {
        if let Some(f) = &self.unmasking {
            f(event);
        }
    }

    async fn on_alert(&self, alert: &SecurityAlert) {
        if let Some(f) = &self.alert {
            f(alert);
        }
    }

    async fn on_metrics(&self, metric: &MetricsEvent) {
        if let Some(f) = &self.metrics {
            f(metric);
        }
    }

    async fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        if let Some(f) = &self.diagnostic {
            f(diagnostic);
        }
    }

    async fn on_error(&self, error: &Error, channel: &str) {
        if let Some(f) = &self.error {
            f(error, channel);
        }
    }

    async fn on_connect(&self) {
        if let Some(f) = &self.connect {
            f();
        }
    }

    async fn on_disconnect(&self) {
        if let Some(f) = &self.disconnect {
            f();
        }
    }
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_masking(&self, event: &MaskingEvent) {
        info!(
            event_id = %event.event_id,
            request_id = %event.request_id,
            success = event.success,
            total_patterns = event.total_patterns,
            processing_time_ms = event.processing_time_ms,
            request_size_bytes = event.request_size_bytes,
            "Masking event"
        );
    }

    async fn on_unmasking(&self, event: &UnmaskingEvent) {
        info!(
            event_id = %event.event_id,
            request_id = %event.request_id,
            patterns_restored = event.patterns_restored,
            processing_time_ms = event.processing_time_ms,
            "Unmasking event"
        );
    }

    async fn on_alert(&self, alert: &SecurityAlert) {
        match alert.severity {
            Severity::High | Severity::Critical => error!(
                alert_id = %alert.alert_id,
                alert_type = ?alert.alert_type,
                severity = ?alert.severity,
                message = %alert.message,
                "Security alert"
            ),
            Severity::Low | Severity::Medium => warn!(
                alert_id = %alert.alert_id,
                alert_type = ?alert.alert_type,
                severity = ?alert.severity,
                message = %alert.message,
                "Security alert"
            ),
        }
    }

    async fn on_metrics(&self, metric: &MetricsEvent) {
        debug!(
            metric_type = ?metric.metric_type,
            value = metric.value,
            unit = %metric.unit,
            "Metrics event"
        );
    }

    async fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        warn!(
            kind = diagnostic.kind(),
            request_id = %diagnostic.request_id(),
            "Diagnostic raised"
        );
    }

    async fn on_error(&self, error: &Error, channel: &str) {
        warn!(channel, error = %error, "Dropped unprocessable event");
    }

    async fn on_connect(&self) {
        info!("Subscriber connected");
    }

    async fn on_disconnect(&self) {
        info!("Subscriber disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmask_core::{AlertType, MetricType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let alerts = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(AtomicUsize::new(0));
        let (a, m) = (Arc::clone(&alerts), Arc::clone(&metrics));

        let handler = CallbackHandler::new()
            .with_alert(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .with_metrics(move |_| {
                m.fetch_add(1, Ordering::SeqCst);
            });

        let alert = TelemetryEvent::Alert(SecurityAlert {
            alert_id: "alert_1".to_string(),
            alert_type: AlertType::SecurityBreach,
            severity: Severity::High,
            timestamp: 0,
            request_id: None,
            message: "unmasked key".to_string(),
            details: Default::default(),
            recommended_action: None,
        });
        let metric = TelemetryEvent::Metrics(MetricsEvent {
            metric_type: MetricType::Throughput,
            timestamp: 0,
            value: 12.0,
            unit: "rps".to_string(),
            labels: Default::default(),
        });

        dispatch(&handler, &alert).await;
        dispatch(&handler, &metric).await;
        dispatch(&handler, &metric).await;

        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unset_callbacks_are_no_ops() {
        let handler = CallbackHandler::new();
        handler.on_connect().await;
        handler.on_error(&Error::Timeout, "events:masking").await;
        LoggingHandler.on_disconnect().await;
    }
}
