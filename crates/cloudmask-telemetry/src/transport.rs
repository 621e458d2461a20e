//! Event bus transports
//!
//! The subscriber and publisher talk to the bus through the [`Transport`]
//! trait. [`MemoryTransport`] is an in-process bus backed by a tokio
//! broadcast channel; the Redis transport lives in `redis_transport`.

use crate::buffer::InboundMessage;
use async_trait::async_trait;
use cloudmask_core::{Channel, Error, Result};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::debug;

/// Stream of inbound messages for the subscribed channels.
/// The stream ends when the transport closes the subscription.
pub type MessageStream = BoxStream<'static, Result<InboundMessage>>;

/// A publish/subscribe event bus connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Establish the connection
    async fn connect(&self) -> Result<()>;

    /// Open a subscription to `channels`
    async fn subscribe(&self, channels: &[Channel]) -> Result<MessageStream>;

    /// Liveness check against the bus
    async fn ping(&self) -> Result<()>;

    /// Publish a serialized event
    async fn publish(&self, channel: Channel, payload: &str) -> Result<()>;

    /// Release the connection; open subscriptions end
    async fn close(&self) -> Result<()>;
}

/// In-process event bus
pub struct MemoryTransport {
    sender: Mutex<Option<broadcast::Sender<InboundMessage>>>,
    capacity: usize,
    reachable: bool,
}

impl MemoryTransport {
    /// Bus retaining up to `capacity` undelivered messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            capacity,
            reachable: true,
        }
    }

    /// A bus whose connect and ping always fail
    pub fn unreachable() -> Self {
        Self {
            sender: Mutex::new(None),
            capacity: 1,
            reachable: false,
        }
    }

    /// Publish on an arbitrary channel name
    pub fn publish_raw(&self, channel: &str, payload: &str) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| Error::transport("memory transport is closed"))?;

        // No receivers is not an error for a pub/sub bus.
        let delivered = sender
            .send(InboundMessage::new(channel, payload))
            .unwrap_or(0);
        debug!(channel, delivered, "Published to memory transport");
        Ok(())
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, |s| s.receiver_count())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        if !self.reachable {
            return Err(Error::transport("memory transport is unreachable"));
        }

        let mut sender = self.sender.lock();
        if sender.is_none() {
            let (tx, _) = broadcast::channel(self.capacity);
            *sender = Some(tx);
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<MessageStream> {
        let receiver = self
            .sender
            .lock()
            .as_ref()
            .map(|s| s.subscribe())
            .ok_or_else(|| Error::transport("memory transport is not connected"))?;
        let wanted: HashSet<&'static str> = channels.iter().map(|c| c.as_str()).collect();

        let stream = stream::unfold((receiver, wanted), |(mut receiver, wanted)| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) if wanted.contains(message.channel.as_str()) => {
                        return Some((Ok(message), (receiver, wanted)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let error = Error::transport(format!(
                            "subscriber lagged, {} messages skipped",
                            skipped
                        ));
                        return Some((Err(error), (receiver, wanted)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        if self.reachable && self.sender.lock().is_some() {
            Ok(())
        } else {
            Err(Error::transport("memory transport is not connected"))
        }
    }

    async fn publish(&self, channel: Channel, payload: &str) -> Result<()> {
        self.publish_raw(channel.as_str(), payload)
    }

    async fn close(&self) -> Result<()> {
        self.sender.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_channels() {
        let transport = MemoryTransport::new(16);
        transport.connect().await.unwrap();
        let mut stream = transport.subscribe(&[Channel::Alerts]).await.unwrap();

        transport.publish(Channel::Masking, "{}").await.unwrap();
        transport.publish(Channel::Alerts, "{\"a\":1}").await.unwrap();

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.channel, "alerts:security");
        assert_eq!(message.payload, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let transport = MemoryTransport::new(16);
        let mut stream = transport.subscribe(&Channel::ALL).await.unwrap();
        assert_eq!(transport.subscriber_count(), 1);

        transport.close().await.unwrap();
        assert!(stream.next().await.is_none());
        assert!(transport.ping().await.is_err());
        assert!(transport.publish(Channel::Metrics, "{}").await.is_err());

        transport.connect().await.unwrap();
        assert!(transport.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let transport = MemoryTransport::unreachable();
        assert!(matches!(transport.connect().await, Err(Error::Transport(_))));
        assert!(transport.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let transport = MemoryTransport::default();
        assert!(transport.publish(Channel::Masking, "{}").await.is_ok());
    }
}
