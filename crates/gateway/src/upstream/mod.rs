//! The `UpstreamInvoker` collaborator boundary, plus the two concrete
//! transports the gateway ships with.
//!
//! The interface is the thing the core actually depends on: anything
//! implementing [`UpstreamInvoker`] can sit behind a target, including
//! transports this crate never heard of. [`mcp_stdio::McpStdioInvoker`] and
//! [`a2a_http::A2aHttpInvoker`] are the two this gateway bundles out of the
//! box, one per target family.

pub mod a2a_http;
pub mod mcp_stdio;

pub use a2a_http::{A2aHttpConfig, A2aHttpInvoker};
pub use mcp_stdio::{McpStdioConfig, McpStdioInvoker};

use std::time::Duration;

use tokio::sync::watch;

use crate::target::TargetKind;

/// A JSON-RPC request, already parsed and validated by the dispatcher,
/// ready to hand to an invoker.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Target this request is addressed to.
    pub target: String,
    /// Transport family of the target.
    pub kind: TargetKind,
    /// JSON-RPC method name.
    pub method: String,
    /// Opaque request body, already validated as well-formed JSON-RPC 2.0.
    pub payload: serde_json::Value,
}

/// Signal an invoker must honour by returning promptly once it fires.
///
/// Fires on queue-wide shutdown, per-entry timeout, or explicit caller
/// abort. The core does not attempt to force-cancel already-sent upstream
/// work beyond asserting this signal.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal fires (or resolves immediately if it
    /// already has).
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.0.changed().await;
    }
}

/// The writer half paired with a [`CancelSignal`]; owned by the queue entry
/// that can trigger cancellation (timeout, shutdown, client disconnect).
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Creates a fresh, not-yet-fired cancel pair.
    #[must_use]
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), CancelSignal(rx))
    }

    /// Asserts the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// A response produced by an upstream, successfully or as a JSON-RPC
/// protocol-level error.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// The full JSON-RPC response body (may itself carry an `error` member —
    /// that is a *protocol* failure, not a transport failure, and is still
    /// `Ok` from the invoker's point of view).
    pub body: serde_json::Value,
    /// Time the upstream took to produce this response.
    pub upstream_latency: Duration,
}

/// The two ways an invoker can fail to produce a usable exchange.
///
/// Transport failure: no response was produced at all (network/process
/// error). Protocol failure is *not* representable here — a JSON-RPC
/// response carrying an `error` member is still [`UpstreamResponse`], since
/// the gateway passes it through as `200 OK` per spec.md §7.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport failure: {0}")]
pub struct UpstreamTransportFailure(pub String);

/// External collaborator invoked once per admitted queue entry.
///
/// Implementations own the actual transport (stdio child process, outbound
/// HTTP client); the core only ever sees this trait.
#[async_trait::async_trait]
pub trait UpstreamInvoker: Send + Sync {
    /// Invokes the upstream, honouring `cancel` by returning promptly once
    /// it fires. Returns `Err` only for transport failures — a JSON-RPC
    /// error response is still `Ok`.
    async fn invoke(
        &self,
        request: UpstreamRequest,
        cancel: CancelSignal,
    ) -> Result<UpstreamResponse, UpstreamTransportFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_signal_resolves_after_cancel() {
        let (handle, mut signal) = CancelHandle::new();
        assert!(!signal.is_cancelled());
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (handle, signal) = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        assert!(signal.is_cancelled());
    }
}
