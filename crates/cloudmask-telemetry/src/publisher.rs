//! Event publisher
//!
//! Turns masking engine reports into bus events and publishes them on the
//! matching channel.

use crate::transport::Transport;
use cloudmask_core::events::now_millis;
use cloudmask_core::{
    AlertType, Channel, DemoData, MaskingEvent, MetricType, MetricsEvent, Result, SecurityAlert,
    Severity, UnmaskingEvent,
};
use cloudmask_masking::{MaskingReport, UnmaskingReport};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Maximum characters kept from each text sample
pub const SAMPLE_LIMIT: usize = 500;

/// Cut `text` to at most [`SAMPLE_LIMIT`] characters; the flag reports a cut
pub fn truncate_sample(text: &str) -> (String, bool) {
    match text.char_indices().nth(SAMPLE_LIMIT) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Publishes telemetry for masking activity
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    source: String,
    version: String,
    include_samples: bool,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            source: "cloudmask".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            include_samples: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Attach truncated original/masked samples to masking events.
    /// Samples contain raw identifiers; enable only for demos.
    pub fn with_samples(mut self, include_samples: bool) -> Self {
        self.include_samples = include_samples;
        self
    }

    /// Build the event describing one masking call
    pub fn masking_event(
        &self,
        request_id: &str,
        original: &str,
        report: &MaskingReport,
    ) -> MaskingEvent {
        let demo_data = self.include_samples.then(|| {
            let (original_text, original_cut) = truncate_sample(original);
            let (masked_text, masked_cut) = truncate_sample(&report.masked);
            DemoData {
                original_text: Some(original_text),
                masked_text: Some(masked_text),
                is_demo_mode: true,
                truncated: original_cut || masked_cut,
            }
        });

        MaskingEvent {
            event_id: format!("mask_{}", Uuid::new_v4()),
            event_type: Some("masking_applied".to_string()),
            timestamp: now_millis(),
            request_id: request_id.to_string(),
            success: true,
            patterns_applied: report.patterns_applied.clone(),
            total_patterns: report.total_patterns,
            processing_time_ms: report.processing_time.as_millis() as u64,
            request_size_bytes: report.input_bytes as u64,
            demo_data,
            source: Some(self.source.clone()),
            version: Some(self.version.clone()),
        }
    }

    /// Build the event describing one unmasking call
    pub fn unmasking_event(&self, request_id: &str, report: &UnmaskingReport) -> UnmaskingEvent {
        UnmaskingEvent {
            event_id: format!("unmask_{}", Uuid::new_v4()),
            event_type: Some("unmasking_applied".to_string()),
            timestamp: now_millis(),
            request_id: request_id.to_string(),
            success: true,
            patterns_restored: report.patterns_restored,
            processing_time_ms: report.processing_time.as_millis() as u64,
            response_size_bytes: report.input_bytes as u64,
            source: Some(self.source.clone()),
            version: Some(self.version.clone()),
        }
    }

    /// Build an alert with a fresh id and the current time
    pub fn alert(
        &self,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
    ) -> SecurityAlert {
        SecurityAlert {
            alert_id: format!("alert_{}", Uuid::new_v4()),
            alert_type,
            severity,
            timestamp: now_millis(),
            request_id: None,
            message: message.into(),
            details: serde_json::Map::new(),
            recommended_action: None,
        }
    }

    /// Build a metric sample stamped with the current time
    pub fn metric(&self, metric_type: MetricType, value: f64, unit: impl Into<String>) -> MetricsEvent {
        MetricsEvent {
            metric_type,
            timestamp: now_millis(),
            value,
            unit: unit.into(),
            labels: [("source".to_string(), self.source.clone())].into_iter().collect(),
        }
    }

    pub async fn publish_masking(&self, event: &MaskingEvent) -> Result<()> {
        self.publish(Channel::Masking, event).await
    }

    pub async fn publish_unmasking(&self, event: &UnmaskingEvent) -> Result<()> {
        self.publish(Channel::Unmasking, event).await
    }

    pub async fn publish_alert(&self, alert: &SecurityAlert) -> Result<()> {
        self.publish(Channel::Alerts, alert).await
    }

    pub async fn publish_metric(&self, metric: &MetricsEvent) -> Result<()> {
        self.publish(Channel::Metrics, metric).await
    }

    async fn publish<T: Serialize + Sync>(&self, channel: Channel, event: &T) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.transport.publish(channel, &payload).await?;
        debug!(channel = %channel, bytes = payload.len(), "Published telemetry event");
        metrics::counter!("cloudmask_events_published_total", "channel" => channel.as_str())
            .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use cloudmask_masking::MaskingEngine;

    #[test]
    fn test_truncate_sample() {
        let short = "i-1234567890abcdef0";
        assert_eq!(truncate_sample(short), (short.to_string(), false));

        let exact = "a".repeat(SAMPLE_LIMIT);
        assert!(!truncate_sample(&exact).1);

        let long = "é".repeat(SAMPLE_LIMIT + 20);
        let (cut, truncated) = truncate_sample(&long);
        assert!(truncated);
        assert_eq!(cut.chars().count(), SAMPLE_LIMIT);
    }

    #[test]
    fn test_masking_event_from_report() {
        let engine = MaskingEngine::new().unwrap();
        let original = "Instance i-1234567890abcdef0 in vpc-12345678";
        let report = engine.mask_with_report(original).unwrap();

        let publisher = EventPublisher::new(Arc::new(MemoryTransport::default()));
        let event = publisher.masking_event("req-7", original, &report);
        assert!(event.event_id.starts_with("mask_"));
        assert_eq!(event.total_patterns, 2);
        assert_eq!(event.request_size_bytes, original.len() as u64);
        assert!(event.demo_data.is_none());

        let event = publisher
            .with_samples(true)
            .masking_event("req-7", original, &report);
        let demo = event.demo_data.unwrap();
        assert_eq!(demo.original_text.as_deref(), Some(original));
        assert_eq!(demo.masked_text.as_deref(), Some("Instance AWS_EC2_001 in AWS_VPC_001"));
        assert!(!demo.truncated);
    }

    #[tokio::test]
    async fn test_publish_alert_on_alert_channel() {
        use futures::StreamExt;

        let transport = Arc::new(MemoryTransport::new(8));
        let mut stream = transport.subscribe(&[Channel::Alerts]).await.unwrap();
        let publisher = EventPublisher::new(transport.clone());

        let alert = publisher.alert(AlertType::MaskingFailure, Severity::High, "ARN leaked");
        publisher.publish_alert(&alert).await.unwrap();

        let message = stream.next().await.unwrap().unwrap();
        let decoded: SecurityAlert = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(decoded, alert);
    }
}
