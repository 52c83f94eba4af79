//! Message carried by the bus

use bytes::Bytes;

/// A topic plus an opaque, already-serialized payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Routing key matched against subscriber prefixes
    pub topic: Bytes,

    /// Opaque payload
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new message
    pub fn new(topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Message with an empty payload, used for trigger topics
    pub fn trigger(topic: impl Into<Bytes>) -> Self {
        Self::new(topic, Bytes::new())
    }

    /// Whether the topic starts with `prefix`
    pub fn matches(&self, prefix: &[u8]) -> bool {
        self.topic.starts_with(prefix)
    }
}
