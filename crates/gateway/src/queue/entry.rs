//! QueueEntry: the in-flight twin of a Request envelope inside a
//! PerTargetQueue, advanced through an explicit state machine
//! (`Waiting -> Executing -> {Done, Cancelled}`) per spec.md §9's redesign
//! note, replacing promise/callback chains.

use std::time::Instant;

use tokio::sync::oneshot;

use crate::ids::RequestId;
use crate::upstream::{CancelHandle, CancelSignal, UpstreamRequest, UpstreamTransportFailure};

/// Outcome delivered to the caller awaiting a `QueueEntry`'s result.
#[derive(Debug)]
pub enum Outcome {
    /// The invoker produced a response (possibly a JSON-RPC protocol error,
    /// which is still `Ok` from the queue's point of view).
    Ok {
        body: serde_json::Value,
        upstream_latency_ms: u64,
    },
    /// The invoker failed to produce a response at all.
    UpstreamFailure { message: String },
    /// The entry's timer fired while it was still waiting; it was removed
    /// from the FIFO without ever reaching the invoker.
    Timeout,
    /// The entry was still waiting or executing when the drain deadline
    /// fired; it is rejected rather than run.
    Shutdown,
}

impl From<Result<crate::upstream::UpstreamResponse, UpstreamTransportFailure>> for Outcome {
    fn from(result: Result<crate::upstream::UpstreamResponse, UpstreamTransportFailure>) -> Self {
        match result {
            Ok(response) => Outcome::Ok {
                body: response.body,
                upstream_latency_ms: response.upstream_latency.as_millis() as u64,
            },
            Err(failure) => Outcome::UpstreamFailure { message: failure.0 },
        }
    }
}

/// The entry's lifecycle state. Advanced solely by the queue's run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Waiting,
    Executing,
    Done,
    Cancelled,
}

/// One admitted request inside a `PerTargetQueue`. Destroyed when its
/// result is delivered or on cancellation. Exactly one consumer reads
/// `result_rx`.
pub struct QueueEntry {
    pub request_id: RequestId,
    pub request: UpstreamRequest,
    pub enqueued_at: Instant,
    pub(super) result_tx: oneshot::Sender<Outcome>,
    pub(super) cancel_handle: CancelHandle,
    pub(super) cancel_signal: CancelSignal,
    pub(super) state: EntryState,
}

/// The half returned to the caller: a receiver for the eventual outcome
/// and a handle to assert cancellation (client disconnect).
pub struct EntryHandle {
    pub result_rx: oneshot::Receiver<Outcome>,
    pub cancel_handle: CancelHandle,
}

impl QueueEntry {
    /// Builds a fresh entry in the `Waiting` state.
    #[must_use]
    pub fn new(request_id: RequestId, request: UpstreamRequest) -> (Self, EntryHandle) {
        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_handle, cancel_signal) = CancelHandle::new();
        let entry = Self {
            request_id,
            request,
            enqueued_at: Instant::now(),
            result_tx,
            cancel_handle: cancel_handle.clone(),
            cancel_signal,
            state: EntryState::Waiting,
        };
        let returned_handle = EntryHandle {
            result_rx,
            cancel_handle,
        };
        (entry, returned_handle)
    }

    /// How long this entry has waited since enqueue.
    #[must_use]
    pub fn wait_duration(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;

    fn sample_request() -> UpstreamRequest {
        UpstreamRequest {
            target: "time".to_string(),
            kind: TargetKind::Mcp,
            method: "tools/list".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn new_entry_starts_waiting() {
        let (entry, _handle) = QueueEntry::new(crate::ids::mint_request_id(), sample_request());
        assert_eq!(entry.state, EntryState::Waiting);
    }

    #[tokio::test]
    async fn delivering_outcome_is_observed_by_handle() {
        let (entry, handle) = QueueEntry::new(crate::ids::mint_request_id(), sample_request());
        entry
            .result_tx
            .send(Outcome::Ok {
                body: serde_json::json!({"ok": true}),
                upstream_latency_ms: 5,
            })
            .unwrap();
        let outcome = handle.result_rx.await.unwrap();
        assert!(matches!(outcome, Outcome::Ok { .. }));
    }

    #[test]
    fn cancel_handle_fires_signal() {
        let (entry, handle) = QueueEntry::new(crate::ids::mint_request_id(), sample_request());
        assert!(!entry.cancel_signal.is_cancelled());
        handle.cancel_handle.cancel();
        assert!(entry.cancel_signal.is_cancelled());
    }
}
