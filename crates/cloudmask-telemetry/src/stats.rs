//! Subscriber statistics

use cloudmask_core::Channel;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lock-free counters shared by the receive and batch tasks
#[derive(Clone)]
pub struct StatsCollector {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    started: Instant,
    total_events: AtomicU64,
    masking_events: AtomicU64,
    unmasking_events: AtomicU64,
    alerts: AtomicU64,
    metrics_events: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    diagnostics: AtomicU64,
    connected: AtomicBool,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                started: Instant::now(),
                total_events: AtomicU64::new(0),
                masking_events: AtomicU64::new(0),
                unmasking_events: AtomicU64::new(0),
                alerts: AtomicU64::new(0),
                metrics_events: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                diagnostics: AtomicU64::new(0),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Record a message arriving from the bus
    pub fn record_received(&self) {
        self.inner.total_events.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cloudmask_events_received_total").increment(1);
    }

    /// Record a successfully decoded event of the given kind
    pub fn record_processed(&self, channel: Channel) {
        let counter = match channel {
            Channel::Masking => &self.inner.masking_events,
            Channel::Unmasking => &self.inner.unmasking_events,
            Channel::Alerts => &self.inner.alerts,
            Channel::Metrics => &self.inner.metrics_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cloudmask_events_processed_total", "channel" => channel.as_str())
            .increment(1);
    }

    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cloudmask_event_errors_total").increment(1);
    }

    /// Record messages evicted from a full buffer
    pub fn record_dropped(&self, count: u64) {
        self.inner.dropped.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("cloudmask_events_dropped_total").increment(count);
    }

    pub fn record_diagnostic(&self, kind: &'static str) {
        self.inner.diagnostics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cloudmask_diagnostics_total", "kind" => kind).increment(1);
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Current statistics; `buffer_size` is supplied by the owner of the buffer
    pub fn snapshot(&self, buffer_size: usize) -> StatsSnapshot {
        let uptime = self.inner.started.elapsed();
        let total_events = self.inner.total_events.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();

        StatsSnapshot {
            total_events,
            masking_events: self.inner.masking_events.load(Ordering::Relaxed),
            unmasking_events: self.inner.unmasking_events.load(Ordering::Relaxed),
            alerts: self.inner.alerts.load(Ordering::Relaxed),
            metrics_events: self.inner.metrics_events.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            diagnostics: self.inner.diagnostics.load(Ordering::Relaxed),
            uptime_secs: uptime.as_secs(),
            events_per_second: if secs > 0.0 {
                total_events as f64 / secs
            } else {
                0.0
            },
            buffer_size,
            is_connected: self.is_connected(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time subscriber statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Messages received from the bus, including ones later dropped or rejected
    pub total_events: u64,
    pub masking_events: u64,
    pub unmasking_events: u64,
    pub alerts: u64,
    pub metrics_events: u64,
    /// Payloads that failed to decode, plus receive-side transport errors
    pub errors: u64,
    /// Messages evicted from a full buffer
    pub dropped: u64,
    pub diagnostics: u64,
    pub uptime_secs: u64,
    pub events_per_second: f64,
    pub buffer_size: usize,
    pub is_connected: bool,
}

impl StatsSnapshot {
    /// Decoded events across all kinds
    pub fn processed(&self) -> u64 {
        self.masking_events + self.unmasking_events + self.alerts + self.metrics_events
    }

    /// Fraction of received messages that could not be processed
    pub fn error_rate(&self) -> f64 {
        if self.total_events == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_events as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_collection() {
        let stats = StatsCollector::new();

        stats.record_received();
        stats.record_received();
        stats.record_received();
        stats.record_received();
        stats.record_processed(Channel::Masking);
        stats.record_processed(Channel::Alerts);
        stats.record_error();
        stats.record_dropped(1);
        stats.set_connected(true);

        let snapshot = stats.snapshot(7);
        assert_eq!(snapshot.total_events, 4);
        assert_eq!(snapshot.masking_events, 1);
        assert_eq!(snapshot.alerts, 1);
        assert_eq!(snapshot.processed(), 2);
        assert_eq!(snapshot.error_rate(), 0.25);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.buffer_size, 7);
        assert!(snapshot.is_connected);
    }

    #[test]
    fn test_clones_share_counters() {
        let stats = StatsCollector::new();
        let clone = stats.clone();
        clone.record_diagnostic("slow_masking");
        assert_eq!(stats.snapshot(0).diagnostics, 1);
        assert_eq!(stats.snapshot(0).error_rate(), 0.0);
    }
}
