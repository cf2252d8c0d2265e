//! Bounded-channel subscriber registry with self-healing fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of one [`SubscriberRegistry::fan_out`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    /// Sinks whose queue was full; they miss this item only.
    pub skipped: usize,
    /// Sinks whose receiver was gone; they are removed.
    pub removed: usize,
}

/// The receiving half handed to an attached subscriber.
pub struct Subscription<T> {
    pub id: u64,
    pub rx: mpsc::Receiver<T>,
}

struct Inner<T> {
    sinks: HashMap<u64, mpsc::Sender<T>>,
    latest: Option<T>,
}

/// Subscribers keyed by id, each behind a bounded queue.
///
/// Writes never block: a closed sink is dropped on the spot and a full one
/// skips the item.  With `replay` enabled the last item is kept and queued
/// for every new subscriber under the same lock as fan-out, so a late
/// joiner sees it before anything newer and never twice.
pub struct SubscriberRegistry<T> {
    next_id: AtomicU64,
    capacity: usize,
    replay: bool,
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> SubscriberRegistry<T> {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// Registry that replays the most recent item to new subscribers.
    pub fn with_replay(capacity: usize) -> Self {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, replay: bool) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            replay,
            inner: Mutex::new(Inner {
                sinks: HashMap::new(),
                latest: None,
            }),
        }
    }

    pub fn attach(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock();
        if let Some(latest) = &inner.latest {
            // Fresh channel with capacity >= 1, cannot be full.
            let _ = tx.try_send(latest.clone());
        }
        inner.sinks.insert(id, tx);
        tracing::debug!(subscriber = id, total = inner.sinks.len(), "subscriber attached");
        Subscription { id, rx }
    }

    pub fn detach(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.sinks.remove(&id).is_some() {
            tracing::debug!(subscriber = id, total = inner.sinks.len(), "subscriber detached");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<T> {
        self.inner.lock().latest.clone()
    }

    /// Forget the replay item, e.g. when its source goes away.
    pub fn clear_latest(&self) {
        self.inner.lock().latest = None;
    }

    /// Drop every sink.  Receivers drain what is queued, then see the end
    /// of their stream.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let closed = inner.sinks.len();
        inner.sinks.clear();
        closed
    }

    /// Push `item` to every subscriber without waiting on any of them.
    pub fn fan_out(&self, item: &T) -> FanOut {
        let mut out = FanOut::default();
        let mut inner = self.inner.lock();
        if self.replay {
            inner.latest = Some(item.clone());
        }
        inner.sinks.retain(|id, tx| match tx.try_send(item.clone()) {
            Ok(()) => {
                out.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                out.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = *id, "removing closed subscriber");
                out.removed += 1;
                false
            }
        });
        out
    }
}
