//! PerTargetQueue: one bounded FIFO per target, at-most-N-inflight,
//! timeout, cancellation. The heart of the core (spec.md §4.F).
//!
//! Run-loop-over-a-channel shape grounded on the teacher's backend
//! connector actors: a single task owns the FIFO and inflight count, so
//! `PerTargetQueue.Map` (spec.md §5) never needs a lock beyond
//! create-if-absent, and each queue serializes its own state with no
//! cross-queue sharing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::AdmissionReason;
use crate::ids::RequestId;
use crate::limits::GatewayLimits;
use crate::upstream::{CancelHandle, UpstreamInvoker, UpstreamRequest};

use super::entry::{EntryHandle, Outcome, QueueEntry};

/// Why admission into a [`PerTargetQueue`] was refused, plus the
/// `Retry-After` hint for `QueueFull` (spec.md §4.F).
#[derive(Debug, Clone)]
pub struct AdmissionRejected {
    pub reason: AdmissionReason,
    pub retry_after_secs: Option<u64>,
}

enum Command {
    Enqueue(Box<QueueEntry>, oneshot::Sender<Result<(), AdmissionRejected>>),
    Completed { request_id: RequestId, service_ms: u64 },
    Timeout(RequestId),
    Drain { deadline: Duration },
    ForceDrain,
    QueryIdle(oneshot::Sender<bool>),
}

struct RunState {
    waiting: VecDeque<Box<QueueEntry>>,
    executing: HashMap<RequestId, CancelHandle>,
    max_inflight: usize,
    max_queue: usize,
    draining: bool,
    mean_service_ms: u64,
    invoker: Arc<dyn UpstreamInvoker>,
    self_tx: mpsc::Sender<Command>,
}

impl RunState {
    fn retry_after_secs(&self) -> u64 {
        (self.mean_service_ms / 1000).max(1)
    }

    fn start_execution(&mut self, mut entry: Box<QueueEntry>) {
        entry.state = super::entry::EntryState::Executing;
        let request_id = entry.request_id;
        self.executing.insert(request_id, entry.cancel_handle.clone());

        let invoker = self.invoker.clone();
        let self_tx = self.self_tx.clone();
        let request = entry.request.clone();
        let cancel_signal = entry.cancel_signal.clone();

        tokio::spawn(async move {
            let start = std::time::Instant::now();
            let invoke_result = tokio::spawn(async move { invoker.invoke(request, cancel_signal).await }).await;

            let outcome = match invoke_result {
                Ok(result) => Outcome::from(result),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "invoker task panicked; slot freed");
                    Outcome::UpstreamFailure {
                        message: "invoker panicked".to_string(),
                    }
                }
            };
            let service_ms = start.elapsed().as_millis() as u64;
            let _ = entry.result_tx.send(outcome);
            let _ = self_tx
                .send(Command::Completed {
                    request_id,
                    service_ms,
                })
                .await;
        });
    }

    fn dispatch_next_if_possible(&mut self) {
        while self.executing.len() < self.max_inflight {
            let Some(entry) = self.waiting.pop_front() else {
                break;
            };
            self.start_execution(entry);
        }
    }

    fn handle_enqueue(&mut self, entry: Box<QueueEntry>, reply: oneshot::Sender<Result<(), AdmissionRejected>>) {
        if self.draining {
            let _ = reply.send(Err(AdmissionRejected {
                reason: AdmissionReason::Shutdown,
                retry_after_secs: None,
            }));
            return;
        }
        if self.executing.len() < self.max_inflight {
            let _ = reply.send(Ok(()));
            self.start_execution(entry);
        } else if self.waiting.len() < self.max_queue {
            let _ = reply.send(Ok(()));
            self.waiting.push_back(entry);
        } else {
            let _ = reply.send(Err(AdmissionRejected {
                reason: AdmissionReason::QueueFull,
                retry_after_secs: Some(self.retry_after_secs()),
            }));
        }
    }

    fn handle_completed(&mut self, request_id: RequestId, service_ms: u64) {
        self.executing.remove(&request_id);
        self.mean_service_ms = ((self.mean_service_ms * 7) + service_ms) / 8;
        self.dispatch_next_if_possible();
    }

    fn handle_timeout(&mut self, request_id: RequestId) {
        if let Some(pos) = self.waiting.iter().position(|e| e.request_id == request_id) {
            let mut entry = self.waiting.remove(pos).unwrap();
            entry.state = super::entry::EntryState::Cancelled;
            let _ = entry.result_tx.send(Outcome::Timeout);
            return;
        }
        if let Some(cancel_handle) = self.executing.get(&request_id) {
            cancel_handle.cancel();
        }
    }

    fn handle_drain(&mut self) {
        self.draining = true;
        for cancel_handle in self.executing.values() {
            cancel_handle.cancel();
        }
    }

    fn handle_force_drain(&mut self) {
        self.draining = true;
        while let Some(mut entry) = self.waiting.pop_front() {
            entry.state = super::entry::EntryState::Cancelled;
            let _ = entry.result_tx.send(Outcome::Shutdown);
        }
        for cancel_handle in self.executing.values() {
            cancel_handle.cancel();
        }
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.executing.is_empty()
    }
}

/// One bounded FIFO queue for a single target. Created lazily on first
/// request and kept for the lifetime of the process.
#[derive(Clone)]
pub struct PerTargetQueue {
    tx: mpsc::Sender<Command>,
}

impl PerTargetQueue {
    /// Spawns the run-loop task owning this target's state.
    #[must_use]
    pub fn new(limits: &GatewayLimits, invoker: Arc<dyn UpstreamInvoker>) -> Self {
        let (tx, mut rx) = mpsc::channel(1024);
        let self_tx = tx.clone();
        let mut state = RunState {
            waiting: VecDeque::new(),
            executing: HashMap::new(),
            max_inflight: limits.max_inflight_per_target,
            max_queue: limits.max_queue_per_target,
            draining: false,
            mean_service_ms: 0,
            invoker,
            self_tx,
        };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Enqueue(entry, reply) => state.handle_enqueue(entry, reply),
                    Command::Completed {
                        request_id,
                        service_ms,
                    } => state.handle_completed(request_id, service_ms),
                    Command::Timeout(request_id) => state.handle_timeout(request_id),
                    Command::Drain { deadline } => {
                        state.handle_drain();
                        let self_tx = state.self_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(deadline).await;
                            let _ = self_tx.send(Command::ForceDrain).await;
                        });
                    }
                    Command::ForceDrain => state.handle_force_drain(),
                    Command::QueryIdle(reply) => {
                        let _ = reply.send(state.is_idle());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Admits `request` if capacity allows, arming its per-entry timeout
    /// timer on acceptance. Non-blocking: capacity is checked synchronously
    /// by the run loop and the admission decision is returned before the
    /// entry does any waiting.
    pub async fn enqueue(
        &self,
        request_id: RequestId,
        request: UpstreamRequest,
        timeout_ms: u64,
    ) -> Result<EntryHandle, AdmissionRejected> {
        let (entry, handle) = QueueEntry::new(request_id, request);
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Enqueue(Box::new(entry), reply_tx))
            .await
            .is_err()
        {
            return Err(AdmissionRejected {
                reason: AdmissionReason::Shutdown,
                retry_after_secs: None,
            });
        }

        match reply_rx.await {
            Ok(Ok(())) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                    let _ = tx.send(Command::Timeout(request_id)).await;
                });
                Ok(handle)
            }
            Ok(Err(rejected)) => Err(rejected),
            Err(_) => Err(AdmissionRejected {
                reason: AdmissionReason::Shutdown,
                retry_after_secs: None,
            }),
        }
    }

    /// Enters draining mode: new admission is refused immediately; inflight
    /// continues until natural completion or `deadline`, at which point
    /// remaining entries are cancelled and rejected with `Shutdown`.
    pub async fn drain(&self, deadline: Duration) {
        let _ = self.tx.send(Command::Drain { deadline }).await;
    }

    /// Whether this queue currently has no waiting or executing entries.
    ///
    /// Returns `true` if the run loop has already shut down, since there is
    /// nothing left to wait on in that case.
    pub async fn is_idle(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::QueryIdle(reply_tx)).await.is_err() {
            return true;
        }
        reply_rx.await.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct SleepyInvoker {
        sleep_ms: u64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl UpstreamInvoker for SleepyInvoker {
        async fn invoke(
            &self,
            _request: UpstreamRequest,
            mut cancel: crate::upstream::CancelSignal,
        ) -> Result<crate::upstream::UpstreamResponse, crate::upstream::UpstreamTransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                () = tokio::time::sleep(StdDuration::from_millis(self.sleep_ms)) => {}
                () = cancel.cancelled() => {}
            }
            Ok(crate::upstream::UpstreamResponse {
                body: serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}),
                upstream_latency: StdDuration::from_millis(self.sleep_ms),
            })
        }
    }

    fn sample_request() -> UpstreamRequest {
        UpstreamRequest {
            target: "time".to_string(),
            kind: TargetKind::Mcp,
            method: "tools/list".to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn limits(max_inflight: usize, max_queue: usize, timeout_ms: u64) -> GatewayLimits {
        GatewayLimits {
            max_inflight_per_target: max_inflight,
            max_queue_per_target: max_queue,
            timeout_ms,
            max_body_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn single_request_completes_ok() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = Arc::new(SleepyInvoker { sleep_ms: 5, calls: calls.clone() });
        let queue = PerTargetQueue::new(&limits(1, 2, 1000), invoker);

        let handle = queue
            .enqueue(crate::ids::mint_request_id(), sample_request(), 1000)
            .await
            .unwrap();
        let outcome = handle.result_rx.await.unwrap();
        assert!(matches!(outcome, Outcome::Ok { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_full_refuses_fourth_request() {
        let invoker = Arc::new(SleepyInvoker {
            sleep_ms: 200,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let queue = PerTargetQueue::new(&limits(1, 2, 5000), invoker);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let handle = queue
                .enqueue(crate::ids::mint_request_id(), sample_request(), 5000)
                .await
                .unwrap();
            handles.push(handle);
        }
        let fourth = queue
            .enqueue(crate::ids::mint_request_id(), sample_request(), 5000)
            .await;
        assert!(matches!(
            fourth.unwrap_err().reason,
            AdmissionReason::QueueFull
        ));
    }

    #[tokio::test]
    async fn waiting_entry_times_out() {
        let invoker = Arc::new(SleepyInvoker {
            sleep_ms: 500,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let queue = PerTargetQueue::new(&limits(1, 2, 5000), invoker);

        let _first = queue
            .enqueue(crate::ids::mint_request_id(), sample_request(), 5000)
            .await
            .unwrap();
        let second = queue
            .enqueue(crate::ids::mint_request_id(), sample_request(), 30)
            .await
            .unwrap();

        let outcome = second.result_rx.await.unwrap();
        assert!(matches!(outcome, Outcome::Timeout));
    }

    #[tokio::test]
    async fn drain_refuses_new_admission_immediately() {
        let invoker = Arc::new(SleepyInvoker {
            sleep_ms: 50,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let queue = PerTargetQueue::new(&limits(1, 2, 5000), invoker);
        queue.drain(StdDuration::from_millis(500)).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let rejected = queue
            .enqueue(crate::ids::mint_request_id(), sample_request(), 5000)
            .await;
        assert!(matches!(
            rejected.unwrap_err().reason,
            AdmissionReason::Shutdown
        ));
    }
}
