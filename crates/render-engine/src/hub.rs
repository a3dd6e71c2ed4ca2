//! Live log fan-out to connected observers.
//!
//! Each observer owns the receiving half of a bounded channel; the hub keeps
//! the sending half in a registry guarded by `parking_lot::RwLock`.
//! Broadcasting never waits on an observer:
//!
//! - a full queue (slow observer) skips that observer for that message only;
//! - a closed queue (observer went away) removes the observer from the hub.
//!
//! Neither case is reported to the broadcaster as an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-observer queue depth.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Identifies one subscribed observer for the lifetime of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Receiving end handed to a subscriber.
///
/// Dropping it closes the channel; the hub forgets the observer on the next
/// broadcast.
#[derive(Debug)]
pub struct LogObserver {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<str>>,
}

impl LogObserver {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next message. `None` once the hub dropped this observer.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct ObserverHandle {
    tx: mpsc::Sender<Arc<str>>,
    connected_at: Instant,
}

/// Result of a broadcast operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Observers that accepted the message.
    pub delivered: usize,
    /// Observers whose queue was full; they stay registered.
    pub skipped: Vec<ObserverId>,
    /// Observers whose channel was closed; they were removed.
    pub dropped: Vec<ObserverId>,
}

/// Concurrency-safe registry of log observers.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<RwLock<HashMap<ObserverId, ObserverHandle>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("observers", &self.observer_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub whose observers buffer up to `capacity` messages each.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer.
    ///
    /// Registration completes before this returns, so every later
    /// [`broadcast`](Self::broadcast) reaches it. Earlier messages are not
    /// replayed.
    pub fn subscribe(&self) -> LogObserver {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.attach(tx);
        LogObserver { id, rx }
    }

    /// Register an existing sender, e.g. one owned by a connection task.
    pub fn attach(&self, tx: mpsc::Sender<Arc<str>>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.write().insert(
            id,
            ObserverHandle {
                tx,
                connected_at: Instant::now(),
            },
        );
        tracing::info!(observer_id = %id, "Observer subscribed");
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.inner.write().remove(&id);
        match removed {
            Some(handle) => {
                tracing::info!(
                    observer_id = %id,
                    connected_secs = handle.connected_at.elapsed().as_secs(),
                    "Observer unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn contains(&self, id: ObserverId) -> bool {
        self.inner.read().contains_key(&id)
    }

    /// Deliver `message` to every registered observer.
    pub fn broadcast(&self, message: &str) -> BroadcastResult {
        let message: Arc<str> = Arc::from(message);
        let mut result = BroadcastResult::default();

        {
            let inner = self.inner.read();
            for (id, handle) in inner.iter() {
                match handle.tx.try_send(Arc::clone(&message)) {
                    Ok(()) => result.delivered += 1,
                    Err(TrySendError::Full(_)) => result.skipped.push(*id),
                    Err(TrySendError::Closed(_)) => result.dropped.push(*id),
                }
            }
        }

        if !result.skipped.is_empty() {
            tracing::debug!(
                skipped = result.skipped.len(),
                "Observer queues full, message skipped for them"
            );
        }

        if !result.dropped.is_empty() {
            let mut inner = self.inner.write();
            for id in &result.dropped {
                inner.remove(id);
                tracing::info!(observer_id = %id, "Observer disconnected, removed");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_id_display() {
        let hub = BroadcastHub::new();
        let observer = hub.subscribe();
        assert_eq!(format!("{}", observer.id()), "observer-1");
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let hub = BroadcastHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_ne!(a.id(), b.id());
        assert_eq!(hub.observer_count(), 2);

        assert!(hub.unsubscribe(a.id()));
        assert!(!hub.unsubscribe(a.id()));
        assert!(!hub.contains(a.id()));
        assert!(hub.contains(b.id()));
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn test_broadcast_reaches_all_observers() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let result = hub.broadcast("Rendering frame 1");
        assert_eq!(result.delivered, 2);
        assert!(result.skipped.is_empty() && result.dropped.is_empty());
        assert_eq!(a.try_recv().as_deref(), Some("Rendering frame 1"));
        assert_eq!(b.try_recv().as_deref(), Some("Rendering frame 1"));
    }

    #[test]
    fn test_closed_observer_does_not_block_others() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe();
        let closed = hub.subscribe();
        let mut c = hub.subscribe();
        let closed_id = closed.id();
        drop(closed);

        let result = hub.broadcast("hello");
        assert_eq!(result.delivered, 2);
        assert_eq!(result.dropped, vec![closed_id]);
        assert_eq!(a.try_recv().as_deref(), Some("hello"));
        assert_eq!(c.try_recv().as_deref(), Some("hello"));
        assert_eq!(hub.observer_count(), 2);
        assert!(!hub.contains(closed_id));
    }

    #[test]
    fn test_full_observer_is_skipped_not_removed() {
        let hub = BroadcastHub::with_capacity(1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        hub.broadcast("one");
        assert_eq!(fast.try_recv().as_deref(), Some("one"));

        let result = hub.broadcast("two");
        assert_eq!(result.delivered, 1);
        assert_eq!(result.skipped, vec![slow.id()]);
        assert!(hub.contains(slow.id()));
        assert_eq!(fast.try_recv().as_deref(), Some("two"));

        assert_eq!(slow.try_recv().as_deref(), Some("one"));
        assert_eq!(slow.try_recv(), None);
        hub.broadcast("three");
        assert_eq!(slow.try_recv().as_deref(), Some("three"));
    }

    #[test]
    fn test_late_subscriber_gets_only_new_messages() {
        let hub = BroadcastHub::new();
        hub.broadcast("before");
        let mut late = hub.subscribe();
        hub.broadcast("after");
        assert_eq!(late.try_recv().as_deref(), Some("after"));
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn test_attach_external_sender() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = hub.attach(tx);
        hub.broadcast("frame");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("frame"));
        assert!(hub.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_broadcast() {
        let hub = BroadcastHub::new();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let mut observer = hub.subscribe();
                hub.broadcast("ping");
                let first = observer.recv().await;
                hub.unsubscribe(observer.id());
                first
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("ping"));
        }
        assert_eq!(hub.observer_count(), 0);
    }
}
