//! Fan-out of ingested events to live viewers
//!
//! Each viewer owns a bounded channel of [`SUBSCRIBER_CAPACITY`] events.
//! Publishing never waits: when a viewer's channel is full the event is
//! dropped for that viewer only. There is no replay; a new viewer catches
//! up through the store snapshot.

use crate::event::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Per-viewer queue depth
pub const SUBSCRIBER_CAPACITY: usize = 200;

/// Registry key of a live viewer
pub type SubscriberId = u64;

struct HubInner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<Event>>>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Arc<Event>>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "Viewer unsubscribed");
        }
        removed
    }
}

/// In-process pub/sub from ingestion to viewers. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    /// Hub whose viewer channels hold `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new viewer channel.
    ///
    /// The channel only sees events published after this call returns.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let count = {
            let mut registry = self.inner.registry();
            registry.insert(id, tx);
            registry.len()
        };
        tracing::debug!(subscriber = id, subscribers = count, "Viewer subscribed");

        Subscription {
            id,
            receiver: rx,
            hub: Arc::clone(&self.inner),
        }
    }

    /// Remove a viewer. Returns whether it was registered.
    ///
    /// Dropping the [`Subscription`] does this automatically.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    /// Offer `event` to every registered viewer without waiting.
    ///
    /// Returns how many viewers accepted it.
    pub fn publish(&self, event: Arc<Event>) -> usize {
        let mut delivered = 0;
        let mut registry = self.inner.registry();

        registry.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscriber = *id, "Viewer queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        delivered
    }

    /// Number of registered viewers
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Total events dropped because a viewer's queue was full
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// The subscription was removed from the hub; no more events will arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// A viewer's end of the hub. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<Event>>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means the wait timed out. [`Closed`] means the viewer was
    /// unsubscribed and every queued event has been received.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Arc<Event>>, Closed> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(Closed),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: u64) -> Arc<Event> {
        Arc::new(Event::ingest(json!({"seq": seq})).unwrap())
    }

    fn seqs(events: &[Arc<Event>]) -> Vec<u64> {
        events
            .iter()
            .map(|e| e.get("seq").and_then(|v| v.as_u64()).unwrap())
            .collect()
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let mut c = hub.subscribe();

        for seq in 0..5 {
            assert_eq!(hub.publish(event(seq)), 3);
        }

        for sub in [&mut a, &mut b, &mut c] {
            assert_eq!(seqs(&sub.drain()), vec![0, 1, 2, 3, 4]);
            assert!(sub.try_recv().is_none());
        }
    }

    #[test]
    fn test_no_replay_for_late_subscriber() {
        let hub = BroadcastHub::new();
        hub.publish(event(1));

        let mut late = hub.subscribe();
        assert!(late.drain().is_empty());

        hub.publish(event(2));
        assert_eq!(seqs(&late.drain()), vec![2]);
    }

    #[test]
    fn test_full_subscriber_is_isolated() {
        let hub = BroadcastHub::with_capacity(3);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for seq in 0..10 {
            hub.publish(event(seq));
            assert_eq!(seqs(&fast.drain()), vec![seq]);
        }

        // Slow viewer kept only what fit; later events were dropped, never queued
        assert_eq!(seqs(&slow.drain()), vec![0, 1, 2]);
        assert_eq!(hub.dropped_count(), 7);

        hub.publish(event(10));
        assert_eq!(seqs(&slow.drain()), vec![10]);
        assert_eq!(seqs(&fast.drain()), vec![10]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = BroadcastHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(event(1)), 1);

        drop(b);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(event(2)), 0);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();

        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));
        assert_eq!(hub.publish(event(1)), 0);
        assert!(sub.try_recv().is_none());

        // Drop after explicit unsubscribe is harmless
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_concurrent_publish_and_subscribe() {
        let hub = BroadcastHub::with_capacity(10_000);
        let mut steady = hub.subscribe();

        let publisher = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for seq in 0..1000 {
                    hub.publish(event(seq));
                }
            })
        };
        let churn = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let _sub = hub.subscribe();
                }
            })
        };
        publisher.join().unwrap();
        churn.join().unwrap();

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(seqs(&steady.drain()), (0..1000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();

        assert_eq!(sub.recv_timeout(Duration::from_millis(20)).await, Ok(None));

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(event(9));
        });

        let got = sub.recv_timeout(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(got.get("seq"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn test_recv_timeout_reports_unsubscribe() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();

        hub.publish(event(1));
        assert!(hub.unsubscribe(sub.id()));

        // Queued events are still handed out before the close
        let queued = sub.recv_timeout(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(queued.get("seq"), Some(&json!(1)));

        let wait = sub.recv_timeout(Duration::from_secs(30));
        let closed = tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("close should be reported without waiting out the timeout");
        assert_eq!(closed, Err(Closed));
    }
}
