//! Local diagnostics derived from inbound masking events
//!
//! These are raised by the subscriber itself, independent of the success
//! flag the gateway reports.

use crate::config::DiagnosticsConfig;
use cloudmask_core::{Error, MaskingEvent, Result};
use cloudmask_masking::{scan_for_leaks, LeakedResource, PatternCatalog};
use regex::RegexSet;
use serde::Serialize;
use std::sync::Arc;

/// Identifier shapes that should never appear unmasked, with their labels
const IDENTIFIER_SHAPES: &[(&str, &str)] = &[
    ("ec2_instance", r"i-[0-9a-f]{17}"),
    ("vpc", r"vpc-[0-9a-f]{8}"),
    ("security_group", r"sg-[0-9a-f]{8}"),
    ("private_ip", r"10\.\d+\.\d+\.\d+"),
    ("arn", r"arn:aws:"),
];

/// A locally derived finding about an inbound event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Nothing was masked although the sample looks like it holds identifiers
    MaskingFailureSuspected {
        event_id: String,
        request_id: String,
        shapes: Vec<String>,
    },

    SlowMasking {
        event_id: String,
        request_id: String,
        processing_time_ms: u64,
        threshold_ms: u64,
    },

    /// The masked sample still contains catalog matches
    LeakInMaskedSample {
        event_id: String,
        request_id: String,
        leaks: Vec<LeakedResource>,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::MaskingFailureSuspected { .. } => "masking_failure_suspected",
            Diagnostic::SlowMasking { .. } => "slow_masking",
            Diagnostic::LeakInMaskedSample { .. } => "leak_in_masked_sample",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Diagnostic::MaskingFailureSuspected { request_id, .. }
            | Diagnostic::SlowMasking { request_id, .. }
            | Diagnostic::LeakInMaskedSample { request_id, .. } => request_id,
        }
    }
}

/// Inspects masking events and produces diagnostics
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
    shapes: RegexSet,
    catalog: Arc<PatternCatalog>,
}

impl DiagnosticsEngine {
    pub fn new(config: DiagnosticsConfig) -> Result<Self> {
        Self::with_catalog(config, Arc::new(PatternCatalog::builtin()?))
    }

    /// Use `catalog` for the masked-sample leak scan
    pub fn with_catalog(config: DiagnosticsConfig, catalog: Arc<PatternCatalog>) -> Result<Self> {
        let shapes = RegexSet::new(IDENTIFIER_SHAPES.iter().map(|(_, pattern)| *pattern))
            .map_err(|e| Error::pattern(format!("Failed to compile identifier shapes: {}", e)))?;

        Ok(Self {
            config,
            shapes,
            catalog,
        })
    }

    /// Labels of the identifier shapes found in `text`
    pub fn identifier_shapes(&self, text: &str) -> Vec<String> {
        self.shapes
            .matches(text)
            .into_iter()
            .map(|index| IDENTIFIER_SHAPES[index].0.to_string())
            .collect()
    }

    pub fn inspect(&self, event: &MaskingEvent) -> Vec<Diagnostic> {
        let mut found = Vec::new();
        let samples = event.demo_data.as_ref();

        if event.total_patterns == 0 {
            if let Some(original) = samples.and_then(|d| d.original_text.as_deref()) {
                let shapes = self.identifier_shapes(original);
                if !shapes.is_empty() {
                    found.push(Diagnostic::MaskingFailureSuspected {
                        event_id: event.event_id.clone(),
                        request_id: event.request_id.clone(),
                        shapes,
                    });
                }
            }
        }

        if event.processing_time_ms > self.config.slow_masking_threshold_ms {
            found.push(Diagnostic::SlowMasking {
                event_id: event.event_id.clone(),
                request_id: event.request_id.clone(),
                processing_time_ms: event.processing_time_ms,
                threshold_ms: self.config.slow_masking_threshold_ms,
            });
        }

        if self.config.check_leaks {
            if let Some(masked) = samples.and_then(|d| d.masked_text.as_deref()) {
                let leaks = scan_for_leaks(&self.catalog, masked);
                if !leaks.is_empty() {
                    found.push(Diagnostic::LeakInMaskedSample {
                        event_id: event.event_id.clone(),
                        request_id: event.request_id.clone(),
                        leaks,
                    });
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmask_core::DemoData;
    use std::collections::BTreeMap;

    fn event(total_patterns: u64, processing_time_ms: u64, demo: Option<DemoData>) -> MaskingEvent {
        MaskingEvent {
            event_id: "mask_1".to_string(),
            event_type: Some("masking_applied".to_string()),
            timestamp: 0,
            request_id: "req-1".to_string(),
            success: true,
            patterns_applied: BTreeMap::new(),
            total_patterns,
            processing_time_ms,
            request_size_bytes: 64,
            demo_data: demo,
            source: None,
            version: None,
        }
    }

    fn engine() -> DiagnosticsEngine {
        DiagnosticsEngine::new(DiagnosticsConfig::default()).unwrap()
    }

    #[test]
    fn test_masking_failure_suspected() {
        let demo = DemoData {
            original_text: Some("restart i-1234567890abcdef0 on 10.0.1.5".to_string()),
            ..DemoData::default()
        };

        let found = engine().inspect(&event(0, 10, Some(demo)));
        assert_eq!(found.len(), 1);
        match &found[0] {
            Diagnostic::MaskingFailureSuspected { shapes, .. } => {
                assert_eq!(shapes, &vec!["ec2_instance".to_string(), "private_ip".to_string()]);
            }
            other => panic!("unexpected diagnostic: {:?}", other),
        }
    }

    #[test]
    fn test_no_failure_when_patterns_applied_or_no_sample() {
        let demo = DemoData {
            original_text: Some("arn:aws:iam::123456789012:root".to_string()),
            ..DemoData::default()
        };
        assert!(engine().inspect(&event(1, 10, Some(demo))).is_empty());
        assert!(engine().inspect(&event(0, 10, None)).is_empty());
    }

    #[test]
    fn test_slow_masking_threshold_is_exclusive() {
        assert!(engine().inspect(&event(2, 5000, None)).is_empty());

        let found = engine().inspect(&event(2, 5001, None));
        assert_eq!(found[0].kind(), "slow_masking");
        assert_eq!(found[0].request_id(), "req-1");
    }

    #[test]
    fn test_leak_in_masked_sample() {
        let demo = DemoData {
            masked_text: Some("AWS_EC2_001 attached to vpc-12345678".to_string()),
            ..DemoData::default()
        };

        let found = engine().inspect(&event(1, 10, Some(demo.clone())));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind(), "leak_in_masked_sample");

        let quiet = DiagnosticsEngine::new(DiagnosticsConfig {
            check_leaks: false,
            ..DiagnosticsConfig::default()
        })
        .unwrap();
        assert!(quiet.inspect(&event(1, 10, Some(demo))).is_empty());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let diagnostic = Diagnostic::SlowMasking {
            event_id: "e".to_string(),
            request_id: "r".to_string(),
            processing_time_ms: 6000,
            threshold_ms: 5000,
        };
        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["kind"], "slow_masking");
        assert_eq!(json["processing_time_ms"], 6000);
    }
}
