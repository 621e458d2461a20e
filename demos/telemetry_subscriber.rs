//! Example: Telemetry Subscriber over the in-process bus
//!
//! Publishes masking events and an alert, then lets the subscriber batch them
//! into a logging handler. No Redis server is required.

use cloudmask_core::{AlertType, Severity};
use cloudmask_masking::MaskingEngine;
use cloudmask_telemetry::{
    EventPublisher, LoggingHandler, MemoryTransport, SubscriberConfig, TelemetrySubscriber,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> cloudmask_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("cloudmask=debug")
        .init();

    let transport = Arc::new(MemoryTransport::new(256));
    let mut config = SubscriberConfig::default();
    config.processing.interval_ms = 100;

    let subscriber = TelemetrySubscriber::new(config, transport.clone())?;
    subscriber.register(Arc::new(LoggingHandler));
    subscriber.connect().await?;

    let engine = MaskingEngine::new()?;
    let publisher = EventPublisher::new(transport.clone()).with_samples(true);

    for (n, request) in [
        "Restart i-1234567890abcdef0",
        "Open sg-87654321 to 10.0.1.15",
        "Rotate keys for arn:aws:iam::123456789012:role/deployer",
    ]
    .iter()
    .enumerate()
    {
        let report = engine.mask_with_report(request)?;
        let event = publisher.masking_event(&format!("req-{}", n), request, &report);
        publisher.publish_masking(&event).await?;
    }

    let alert = publisher.alert(
        AlertType::PerformanceIssue,
        Severity::Medium,
        "Upstream latency above threshold",
    );
    publisher.publish_alert(&alert).await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    subscriber.disconnect().await?;

    let stats = subscriber.stats();
    println!(
        "\nprocessed={} masking={} alerts={} errors={} diagnostics={}",
        stats.processed(),
        stats.masking_events,
        stats.alerts,
        stats.errors,
        stats.diagnostics
    );

    Ok(())
}
