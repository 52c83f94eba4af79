//! In-process bus
//!
//! Fan-out over bounded tokio channels. Each subscriber owns a queue of
//! `high_water_mark` messages; when it is full further messages are dropped
//! for that subscriber only, the way a PUB socket drops at its high-water mark.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{Mutex, RwLock, mpsc};

use super::error::BusError;
use super::message::BusMessage;
use super::traits::{Bus, BusBackend, Publisher, Subscriber};

type Filters = Arc<RwLock<Vec<Bytes>>>;

#[derive(Debug)]
struct Slot {
    filters: Filters,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Debug)]
struct Inner {
    slots: Mutex<Vec<Slot>>,
    high_water_mark: usize,
    dropped: AtomicU64,
}

/// In-process bus
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    /// Create a bus whose subscribers queue at most `high_water_mark` messages
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Vec::new()),
                high_water_mark: high_water_mark.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Create a publisher handle
    pub fn local_publisher(&self) -> LocalPublisher {
        LocalPublisher {
            inner: self.inner.clone(),
        }
    }

    /// Create a subscriber with no filters
    pub async fn local_subscriber(&self) -> LocalSubscriber {
        let (tx, rx) = mpsc::channel(self.inner.high_water_mark);
        let filters: Filters = Arc::new(RwLock::new(Vec::new()));
        self.inner.slots.lock().await.push(Slot {
            filters: filters.clone(),
            tx,
        });
        LocalSubscriber { filters, rx }
    }

    /// Messages dropped because a subscriber queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publisher(&self) -> Result<Box<dyn Publisher>, BusError> {
        Ok(Box::new(self.local_publisher()))
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, BusError> {
        Ok(Box::new(self.local_subscriber().await))
    }

    fn backend_type(&self) -> BusBackend {
        BusBackend::Local
    }
}

/// Publisher half of a [`LocalBus`]
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    inner: Arc<Inner>,
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn send(&self, message: BusMessage) -> Result<(), BusError> {
        let mut slots = self.inner.slots.lock().await;
        slots.retain(|slot| !slot.tx.is_closed());

        for slot in slots.iter() {
            let wanted = slot
                .filters
                .read()
                .await
                .iter()
                .any(|prefix| message.matches(prefix));
            if !wanted {
                continue;
            }

            match slot.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        topic = %crate::topics::display(&message.topic),
                        "subscriber queue full, dropping"
                    );
                }
                // Subscriber went away mid-publish; pruned on the next send.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        Ok(())
    }
}

/// Subscriber half of a [`LocalBus`]
#[derive(Debug)]
pub struct LocalSubscriber {
    filters: Filters,
    rx: mpsc::Receiver<BusMessage>,
}

#[async_trait]
impl Subscriber for LocalSubscriber {
    async fn subscribe(&mut self, prefix: &[u8]) -> Result<(), BusError> {
        let mut filters = self.filters.write().await;
        if !filters.iter().any(|p| p.as_ref() == prefix) {
            filters.push(Bytes::copy_from_slice(prefix));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<BusMessage, BusError> {
        self.rx.recv().await.ok_or(BusError::Closed)
    }

    fn try_recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_filtering() {
        let bus = LocalBus::default();
        let publisher = bus.local_publisher();

        let mut all = bus.local_subscriber().await;
        all.subscribe(b"").await.unwrap();
        let mut replay_only = bus.local_subscriber().await;
        replay_only.subscribe(b"/replayd/").await.unwrap();
        let mut unsubscribed = bus.local_subscriber().await;

        publisher
            .send(BusMessage::new(&b"/replayd/status/"[..], &b"a"[..]))
            .await
            .unwrap();
        publisher
            .send(BusMessage::new(&b"/mp/time/"[..], &b"b"[..]))
            .await
            .unwrap();

        assert_eq!(all.recv().await.unwrap().payload, Bytes::from_static(b"a"));
        assert_eq!(all.recv().await.unwrap().payload, Bytes::from_static(b"b"));

        let msg = replay_only.recv().await.unwrap();
        assert_eq!(msg.topic, Bytes::from_static(b"/replayd/status/"));
        assert!(replay_only.try_recv().unwrap().is_none());

        assert!(unsubscribed.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let bus = LocalBus::new(2);
        let publisher = bus.local_publisher();
        let mut sub = bus.local_subscriber().await;
        sub.subscribe(b"").await.unwrap();

        for i in 0..5u8 {
            publisher
                .send(BusMessage::new(&b"/t/"[..], vec![i]))
                .await
                .unwrap();
        }

        assert_eq!(sub.try_recv().unwrap().unwrap().payload.as_ref(), &[0]);
        assert_eq!(sub.try_recv().unwrap().unwrap().payload.as_ref(), &[1]);
        assert!(sub.try_recv().unwrap().is_none());
        assert_eq!(bus.dropped(), 3);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = LocalBus::default();
        let publisher = bus.local_publisher();
        let mut sub = bus.local_subscriber().await;
        sub.subscribe(b"").await.unwrap();
        drop(sub);

        publisher.send(BusMessage::trigger(&b"/t/"[..])).await.unwrap();
        assert!(bus.inner.slots.lock().await.is_empty());
    }
}
