//! Telemetry event model
//!
//! Four immutable event shapes travel over the event bus, one per channel.
//! Inbound payloads are decoded into exactly one [`TelemetryEvent`] variant,
//! selected by the channel they arrived on.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Event bus channels, one per event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// `events:masking`
    Masking,
    /// `events:unmasking`
    Unmasking,
    /// `alerts:security`
    Alerts,
    /// `metrics:performance`
    Metrics,
}

impl Channel {
    /// All channels in subscription order
    pub const ALL: [Channel; 4] = [
        Channel::Masking,
        Channel::Unmasking,
        Channel::Alerts,
        Channel::Metrics,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Masking => "events:masking",
            Channel::Unmasking => "events:unmasking",
            Channel::Alerts => "alerts:security",
            Channel::Metrics => "metrics:performance",
        }
    }

    /// Resolve a wire name back to a channel
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A masking operation was applied to an outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingEvent {
    /// Unique event id
    pub event_id: String,

    /// Always `masking_applied` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Correlation id of the request that was masked
    pub request_id: String,

    /// Whether the upstream reports success
    pub success: bool,

    /// Unique values masked, per category
    #[serde(default)]
    pub patterns_applied: BTreeMap<String, u64>,

    /// Total number of values masked
    pub total_patterns: u64,

    pub processing_time_ms: u64,

    pub request_size_bytes: u64,

    /// Truncated text samples, only present in demo mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_data: Option<DemoData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Text samples attached to a masking event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemoData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked_text: Option<String>,

    #[serde(default)]
    pub is_demo_mode: bool,

    /// Whether either sample was cut short
    #[serde(default)]
    pub truncated: bool,
}

/// An unmasking operation was applied to an inbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmaskingEvent {
    pub event_id: String,

    /// Always `unmasking_applied` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    pub timestamp: i64,

    pub request_id: String,

    pub success: bool,

    /// Number of tokens restored to their originals
    pub patterns_restored: u64,

    pub processing_time_ms: u64,

    pub response_size_bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Kind of security alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SecurityBreach,
    MaskingFailure,
    PerformanceIssue,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An anomaly raised by the masking gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub alert_id: String,

    pub alert_type: AlertType,

    pub severity: Severity,

    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    pub message: String,

    /// Free-form details
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
}

/// Kind of metric sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Performance,
    Throughput,
    ErrorRate,
}

/// A single metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub metric_type: MetricType,

    pub timestamp: i64,

    pub value: f64,

    pub unit: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One decoded event, tagged by the channel it belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Masking(MaskingEvent),
    Unmasking(UnmaskingEvent),
    Alert(SecurityAlert),
    Metrics(MetricsEvent),
}

impl TelemetryEvent {
    /// Decode a raw JSON payload received on `channel`
    pub fn decode(channel: Channel, payload: &str) -> Result<Self> {
        let event = match channel {
            Channel::Masking => Self::Masking(serde_json::from_str(payload)?),
            Channel::Unmasking => Self::Unmasking(serde_json::from_str(payload)?),
            Channel::Alerts => Self::Alert(serde_json::from_str(payload)?),
            Channel::Metrics => Self::Metrics(serde_json::from_str(payload)?),
        };
        Ok(event)
    }

    /// Serialize the event to the JSON carried on its channel
    pub fn encode(&self) -> Result<String> {
        let json = match self {
            Self::Masking(e) => serde_json::to_string(e),
            Self::Unmasking(e) => serde_json::to_string(e),
            Self::Alert(e) => serde_json::to_string(e),
            Self::Metrics(e) => serde_json::to_string(e),
        };
        json.map_err(Error::from)
    }

    /// The channel this event travels on
    pub fn channel(&self) -> Channel {
        match self {
            Self::Masking(_) => Channel::Masking,
            Self::Unmasking(_) => Channel::Unmasking,
            Self::Alert(_) => Channel::Alerts,
            Self::Metrics(_) => Channel::Metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Masking.as_str(), "events:masking");
        assert_eq!(Channel::from_name("alerts:security"), Some(Channel::Alerts));
        assert_eq!(Channel::from_name("metrics:performance"), Some(Channel::Metrics));
        assert_eq!(Channel::from_name("aws-masker:events:masking"), None);
    }

    #[test]
    fn test_decode_masking_event() {
        let payload = r#"{
            "event_id": "mask_1738123456_12345",
            "event_type": "masking_applied",
            "timestamp": 1738123456000,
            "request_id": "req-1",
            "success": true,
            "patterns_applied": {"ec2_instance": 2, "vpc": 1},
            "total_patterns": 3,
            "processing_time_ms": 12,
            "request_size_bytes": 2048,
            "demo_data": {"original_text": "i-1234567890abcdef0", "is_demo_mode": true, "truncated": false},
            "source": "kong-aws-masker",
            "version": "1.0.0"
        }"#;

        let event = TelemetryEvent::decode(Channel::Masking, payload).unwrap();
        match event {
            TelemetryEvent::Masking(e) => {
                assert_eq!(e.total_patterns, 3);
                assert_eq!(e.patterns_applied.get("ec2_instance"), Some(&2));
                assert!(e.demo_data.unwrap().is_demo_mode);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_alert_enums() {
        let payload = r#"{
            "alert_id": "alert-9",
            "alert_type": "masking_failure",
            "severity": "critical",
            "timestamp": 1,
            "message": "unmasked ARN in request",
            "details": {"pattern": "arn"}
        }"#;

        let event = TelemetryEvent::decode(Channel::Alerts, payload).unwrap();
        let TelemetryEvent::Alert(alert) = event else {
            panic!("expected alert");
        };
        assert_eq!(alert.alert_type, AlertType::MaskingFailure);
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.request_id.is_none());
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_decode_metric_error_rate() {
        let payload = r#"{"metric_type":"error_rate","timestamp":5,"value":0.25,"unit":"ratio","labels":{"route":"/v1/messages"}}"#;
        let event = TelemetryEvent::decode(Channel::Metrics, payload).unwrap();
        assert_eq!(event.channel(), Channel::Metrics);
        let TelemetryEvent::Metrics(metric) = event else {
            panic!("expected metric");
        };
        assert_eq!(metric.metric_type, MetricType::ErrorRate);
        assert_eq!(metric.labels["route"], "/v1/messages");
    }

    #[test]
    fn test_payload_for_wrong_channel_is_rejected() {
        let payload = r#"{"metric_type":"throughput","timestamp":5,"value":1.0,"unit":"rps"}"#;
        assert!(TelemetryEvent::decode(Channel::Unmasking, payload).is_err());
        assert!(TelemetryEvent::decode(Channel::Masking, "not json").is_err());
    }
}
