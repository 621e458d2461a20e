//! Bounded event buffer shared by the receive and batch paths

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A raw message as it arrived from the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel name the message was published on
    pub channel: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// An inbound message stamped with its receipt time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub channel: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl From<InboundMessage> for BufferedMessage {
    fn from(message: InboundMessage) -> Self {
        Self {
            channel: message.channel,
            payload: message.payload,
            received_at: Utc::now(),
        }
    }
}

/// Bounded FIFO queue; when full, pushing evicts the oldest entry.
///
/// The lock is never held across an await point, so pushes from the receive
/// task never wait on handler execution.
#[derive(Debug)]
pub struct EventBuffer {
    entries: Mutex<VecDeque<BufferedMessage>>,
    capacity: usize,
}

impl EventBuffer {
    /// Create a buffer holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append a message, returning the evicted entry if the buffer was full
    pub fn push(&self, message: BufferedMessage) -> Option<BufferedMessage> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(message);
        evicted
    }

    /// Remove up to `max` of the oldest messages
    pub fn drain(&self, max: usize) -> Vec<BufferedMessage> {
        let mut entries = self.entries.lock();
        let count = max.min(entries.len());
        entries.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
