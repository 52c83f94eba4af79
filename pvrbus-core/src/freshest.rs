//! Freshest-message-wins draining
//!
//! Consumers that render or react at their own pace must not fall behind a
//! bursty sender. Instead of reading every queued message, they block for
//! the first one and then sweep up to `max_skip` more without waiting,
//! keeping only the newest payload per topic. Everything older is dropped:
//! the bus is lossy state distribution, not a durable queue.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::bus::{BusError, BusMessage, Subscriber};

/// Newest payload per topic, in order of first appearance within one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Latest {
    entries: Vec<BusMessage>,
    index: HashMap<Bytes, usize>,
}

impl Latest {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message, replacing any older payload for the same topic
    pub fn insert(&mut self, message: BusMessage) {
        match self.index.get(&message.topic) {
            Some(&i) => self.entries[i].payload = message.payload,
            None => {
                self.index.insert(message.topic.clone(), self.entries.len());
                self.entries.push(message);
            }
        }
    }

    /// Payload for `topic`, if seen
    pub fn get(&self, topic: &[u8]) -> Option<&Bytes> {
        self.index.get(topic).map(|&i| &self.entries[i].payload)
    }

    /// Number of distinct topics
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no message was collected
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the freshest messages
    pub fn iter(&self) -> impl Iterator<Item = &BusMessage> {
        self.entries.iter()
    }
}

impl IntoIterator for Latest {
    type Item = BusMessage;
    type IntoIter = std::vec::IntoIter<BusMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Block for one message, then take up to `max_skip` more without waiting,
/// keeping only the most recent payload per topic.
///
/// There is no timeout; wrap the call (or use [`drain_latest_timeout`]) when
/// the caller needs one.
pub async fn drain_latest<S>(subscriber: &mut S, max_skip: usize) -> Result<Latest, BusError>
where
    S: Subscriber + ?Sized,
{
    let mut latest = Latest::new();
    latest.insert(subscriber.recv().await?);
    sweep(subscriber, max_skip, |message| latest.insert(message))?;
    Ok(latest)
}

/// [`drain_latest`] with an application-level timeout on the first receive
///
/// Returns `Ok(None)` when nothing arrived in time.
pub async fn drain_latest_timeout<S>(
    subscriber: &mut S,
    max_skip: usize,
    timeout: Duration,
) -> Result<Option<Latest>, BusError>
where
    S: Subscriber + ?Sized,
{
    match tokio::time::timeout(timeout, drain_latest(subscriber, max_skip)).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

/// Same sweep as [`drain_latest`] but keeping every message in arrival order
///
/// Used by the recorder, which must preserve all traffic.
pub async fn drain_all<S>(subscriber: &mut S, max_skip: usize) -> Result<Vec<BusMessage>, BusError>
where
    S: Subscriber + ?Sized,
{
    let mut messages = vec![subscriber.recv().await?];
    sweep(subscriber, max_skip, |message| messages.push(message))?;
    Ok(messages)
}

fn sweep<S, F>(subscriber: &mut S, max_skip: usize, mut keep: F) -> Result<(), BusError>
where
    S: Subscriber + ?Sized,
    F: FnMut(BusMessage),
{
    for _ in 0..max_skip {
        match subscriber.try_recv()? {
            Some(message) => keep(message),
            None => break,
        }
    }
    Ok(())
}
