//! SSE Hub: process-wide subscriber registry, per-subscriber filtering,
//! non-blocking fan-out.
//!
//! Registry/broadcast shape grounded on the teacher's `dashmap`-backed
//! concurrent maps (`proxy/metrics.rs`'s `AtomicMetrics`), generalized from
//! atomic counters to a concurrent subscriber map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::store::GatewayEvent;

use super::subscriber::{new_subscriber, Subscriber, SubscriberFilter, SubscriberId};

/// Process-wide registry of connected SSE subscribers.
#[derive(Clone)]
pub struct SseHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: DashMap<SubscriberId, Subscriber>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SseHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Attaches a new subscriber with the given filter, returning its
    /// opaque handle and the receiving half of its outbound channel.
    pub fn attach(&self, filter: SubscriberFilter) -> (SubscriberId, mpsc::Receiver<GatewayEvent>) {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (subscriber, rx) = new_subscriber(id, filter);
        self.inner.subscribers.insert(id, subscriber);
        (id, rx)
    }

    /// Detaches a subscriber. Idempotent.
    pub fn detach(&self, id: SubscriberId) {
        self.inner.subscribers.remove(&id);
    }

    /// Broadcasts `event` to every alive, matching subscriber.
    ///
    /// Non-blocking: a subscriber whose buffer is full is dropped from the
    /// registry immediately rather than stalling the broadcaster. Missed
    /// events are not replayed.
    pub fn broadcast(&self, event: &GatewayEvent) {
        let mut dead = Vec::new();
        for entry in &self.inner.subscribers {
            let subscriber = entry.value();
            if !subscriber.filter.matches(event) {
                continue;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => dead.push(*entry.key()),
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }
        for id in dead {
            self.inner.subscribers.remove(&id);
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Marks every subscriber dead and closes the registry, per spec.md
    /// §4.I shutdown step 3. Receivers observe channel closure and the
    /// HTTP handler ends the stream.
    pub fn shutdown(&self) {
        self.inner.subscribers.clear();
    }

    /// Number of subscribers dropped for backpressure or disconnect since
    /// startup — diagnostics only, not exposed as replay.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Current subscriber count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.subscribers.is_empty()
    }
}
