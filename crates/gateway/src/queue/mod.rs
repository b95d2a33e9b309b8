//! PerTargetQueue component (spec.md §4.F).

pub mod entry;
pub mod target_queue;

pub use entry::{EntryHandle, EntryState, Outcome};
pub use target_queue::{AdmissionRejected, PerTargetQueue};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::limits::GatewayLimits;
use crate::upstream::UpstreamInvoker;

/// The only process-wide mutable structure touched on the hot path
/// (spec.md §5): one [`PerTargetQueue`] per target, created lazily on
/// first request and kept for the process lifetime. `DashMap::entry`
/// gives create-if-absent without a separate global lock.
pub struct PerTargetQueueMap {
    limits: GatewayLimits,
    invokers: DashMap<String, Arc<dyn UpstreamInvoker>>,
    queues: DashMap<String, PerTargetQueue>,
}

impl PerTargetQueueMap {
    /// Builds the map from process-wide limits and a per-target invoker
    /// registry resolved at startup.
    #[must_use]
    pub fn new(limits: GatewayLimits, invokers: impl IntoIterator<Item = (String, Arc<dyn UpstreamInvoker>)>) -> Self {
        Self {
            limits,
            invokers: invokers.into_iter().collect(),
            queues: DashMap::new(),
        }
    }

    /// Returns the queue for `target`, creating it on first access.
    ///
    /// Returns `None` if no invoker is registered for `target` — callers
    /// are expected to have already checked `TargetRegistry::is_known`.
    pub fn get_or_create(&self, target: &str) -> Option<PerTargetQueue> {
        if let Some(queue) = self.queues.get(target) {
            return Some(queue.clone());
        }
        let invoker = self.invokers.get(target)?.clone();
        let queue = self
            .queues
            .entry(target.to_string())
            .or_insert_with(|| PerTargetQueue::new(&self.limits, invoker))
            .clone();
        Some(queue)
    }

    /// Process-wide resource limits shared by every queue.
    #[must_use]
    pub fn limits(&self) -> GatewayLimits {
        self.limits
    }

    /// Drains every existing queue with the same deadline, for shutdown.
    pub async fn drain_all(&self, deadline: Duration) {
        let queues: Vec<PerTargetQueue> = self.queues.iter().map(|e| e.value().clone()).collect();
        for queue in queues {
            queue.drain(deadline).await;
        }
    }

    /// Whether every existing queue has no waiting or executing entries,
    /// for the shutdown drain-completion poll (spec.md §4.I).
    pub async fn all_idle(&self) -> bool {
        let queues: Vec<PerTargetQueue> = self.queues.iter().map(|e| e.value().clone()).collect();
        for queue in queues {
            if !queue.is_idle().await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{CancelSignal, UpstreamRequest, UpstreamResponse, UpstreamTransportFailure};

    struct Echo;

    #[async_trait::async_trait]
    impl UpstreamInvoker for Echo {
        async fn invoke(
            &self,
            request: UpstreamRequest,
            _cancel: CancelSignal,
        ) -> Result<UpstreamResponse, UpstreamTransportFailure> {
            Ok(UpstreamResponse {
                body: request.payload,
                upstream_latency: Duration::from_millis(1),
            })
        }
    }

    #[test]
    fn unknown_target_returns_none() {
        let map = PerTargetQueueMap::new(GatewayLimits::default(), []);
        assert!(map.get_or_create("ghost").is_none());
    }

    #[test]
    fn known_target_lazily_creates_a_single_queue() {
        let map = PerTargetQueueMap::new(
            GatewayLimits::default(),
            [("time".to_string(), Arc::new(Echo) as Arc<dyn UpstreamInvoker>)],
        );
        assert!(map.get_or_create("time").is_some());
        assert_eq!(map.queues.len(), 1);
        assert!(map.get_or_create("time").is_some());
        assert_eq!(map.queues.len(), 1);
    }
}
