//! Dispatcher: parses the inbound JSON-RPC envelope, classifies it,
//! enqueues to the per-target queue, awaits the result, and shapes the
//! response (spec.md §4.G).
//!
//! Request routing shaped like the teacher's `proxy/service.rs`
//! `process_jsonrpc` method dispatch, generalized from a single backend
//! connection to per-target queue admission.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audit::AuditLogger;
use crate::error::{AdmissionReason, GatewayError};
use crate::ids::{RequestId, TraceId};
use crate::queue::{Outcome, PerTargetQueueMap};
use crate::sse::SseHub;
use crate::store::EventKind;
use crate::target::{TargetKind, TargetRegistry};
use crate::upstream::UpstreamRequest;

/// Extra grace added to a request's queue timeout before the dispatcher
/// gives up waiting on the result channel, per spec.md §5.
const RESULT_WAIT_GRACE: Duration = Duration::from_millis(250);

/// The shaped result of dispatching one request, ready for the HTTP layer
/// to turn into a response.
pub struct DispatchResult {
    pub status_code: u16,
    pub body: Value,
    pub request_id: RequestId,
}

/// Everything the dispatcher needs to process one request, resolved by the
/// HTTP layer before calling in (target path param, parsed body, client
/// identity from auth middleware).
///
/// `request_id` is minted once by the HTTP layer before authentication runs
/// and threaded through unchanged, so the `gateway_auth_success` event and
/// the `gateway_*_request`/`gateway_*_response` events share one
/// `requestId` (spec.md §8 invariant 6).
pub struct DispatchRequest {
    pub request_id: RequestId,
    pub target: String,
    pub kind: TargetKind,
    pub body: Value,
    pub client_id: String,
    pub trace_id: Option<TraceId>,
}

/// Shared components the dispatcher needs on every call.
pub struct Dispatcher {
    pub targets: TargetRegistry,
    pub queues: PerTargetQueueMap,
    pub audit: AuditLogger,
    /// Held so the HTTP layer can reach the same hub for `/events/stream`;
    /// the dispatcher itself never broadcasts directly — `AuditLogger`
    /// fans every appended event out on the caller's behalf.
    pub sse: SseHub,
}

impl Dispatcher {
    /// Validates, classifies, enqueues, awaits, and shapes the response
    /// for one inbound JSON-RPC request.
    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchResult {
        let request_id = req.request_id;
        let received_at = Instant::now();

        match self.targets.kind(&req.target) {
            None => {
                return self
                    .fail(
                        request_id,
                        req.trace_id,
                        &req.client_id,
                        Some(&req.target),
                        None,
                        GatewayError::client("unknown target"),
                        404,
                    )
                    .await;
            }
            Some(registered_kind) if registered_kind != req.kind => {
                return self
                    .fail(
                        request_id,
                        req.trace_id,
                        &req.client_id,
                        Some(&req.target),
                        None,
                        GatewayError::client("target does not speak this transport"),
                        404,
                    )
                    .await;
            }
            Some(_) => {}
        }

        let method = match validate_envelope(&req.body) {
            Ok(method) => method,
            Err(err) => {
                return self
                    .fail(
                        request_id,
                        req.trace_id,
                        &req.client_id,
                        Some(&req.target),
                        None,
                        err,
                        400,
                    )
                    .await;
            }
        };

        let Some(queue) = self.queues.get_or_create(&req.target) else {
            return self
                .fail(
                    request_id,
                    req.trace_id,
                    &req.client_id,
                    Some(&req.target),
                    Some(&method),
                    GatewayError::client("unknown target"),
                    404,
                )
                .await;
        };

        let request_event_kind = match req.kind {
            TargetKind::Mcp => EventKind::GatewayMcpRequest,
            TargetKind::A2a => EventKind::GatewayA2aRequest,
        };
        let response_event_kind = match req.kind {
            TargetKind::Mcp => EventKind::GatewayMcpResponse,
            TargetKind::A2a => EventKind::GatewayA2aResponse,
        };

        let timeout_ms = self.queues.limits().timeout_ms;
        let enqueued_at = Instant::now();
        let upstream_request = UpstreamRequest {
            target: req.target.clone(),
            kind: req.kind,
            method: method.clone(),
            payload: req.body,
        };

        let enqueue_result = queue.enqueue(request_id, upstream_request, timeout_ms).await;

        let handle = match enqueue_result {
            Ok(handle) => handle,
            Err(rejected) => {
                // Rejected before any upstream work was attempted: no
                // `*_request` event, just the `gateway_error` from `fail`.
                let err = GatewayError::Admission(rejected.reason);
                return self
                    .fail(
                        request_id,
                        req.trace_id,
                        &req.client_id,
                        Some(&req.target),
                        Some(&method),
                        err,
                        503,
                    )
                    .await;
            }
        };

        self.audit
            .upstream_request(
                request_id,
                req.trace_id,
                &req.client_id,
                &req.target,
                &method,
                request_event_kind,
            )
            .await;

        let wait_deadline = Duration::from_millis(timeout_ms) + RESULT_WAIT_GRACE;
        let outcome = match tokio::time::timeout(wait_deadline, handle.result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => Outcome::Timeout,
        };

        let queue_wait_ms = enqueued_at.elapsed().as_millis() as u64;
        let latency_ms = received_at.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Ok {
                body,
                upstream_latency_ms,
            } => {
                let protocol_error = body.get("error").cloned();
                let metadata = serde_json::json!({
                    "queueWaitMs": queue_wait_ms,
                    "upstreamKind": req.kind.event_prefix(),
                    "protocolError": protocol_error,
                });
                self.audit
                    .upstream_response(
                        request_id,
                        req.trace_id,
                        &req.client_id,
                        &req.target,
                        &method,
                        response_event_kind,
                        latency_ms,
                        Some(upstream_latency_ms),
                        200,
                        Some(metadata),
                    )
                    .await;
                DispatchResult {
                    status_code: 200,
                    body,
                    request_id,
                }
            }
            Outcome::UpstreamFailure { message } => {
                self.fail(
                    request_id,
                    req.trace_id,
                    &req.client_id,
                    Some(&req.target),
                    Some(&method),
                    GatewayError::upstream_transport(message),
                    502,
                )
                .await
            }
            Outcome::Timeout => {
                self.fail(
                    request_id,
                    req.trace_id,
                    &req.client_id,
                    Some(&req.target),
                    Some(&method),
                    GatewayError::Timeout,
                    504,
                )
                .await
            }
            Outcome::Shutdown => {
                self.fail(
                    request_id,
                    req.trace_id,
                    &req.client_id,
                    Some(&req.target),
                    Some(&method),
                    GatewayError::Admission(AdmissionReason::Shutdown),
                    503,
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        client_id: &str,
        target_id: Option<&str>,
        method: Option<&str>,
        error: GatewayError,
        status_code: u16,
    ) -> DispatchResult {
        self.audit
            .error(
                request_id,
                trace_id,
                client_id,
                target_id,
                method,
                &error.audit_message(),
                status_code,
                None,
            )
            .await;
        DispatchResult {
            status_code,
            body: error_envelope(error.code().as_str(), &error.to_string()),
            request_id,
        }
    }
}

/// Validates the JSON-RPC envelope per spec.md §4.G, returning the method
/// name on success.
fn validate_envelope(body: &Value) -> Result<String, GatewayError> {
    let jsonrpc = body.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") {
        return Err(GatewayError::client("jsonrpc must equal \"2.0\""));
    }
    let method = body
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::client("method is required"))?;
    Ok(method.to_string())
}

/// Builds the `{"error":{"code":...,"message":...}}` envelope.
#[must_use]
pub fn error_envelope(code: &str, message: &str) -> Value {
    serde_json::json!({ "error": { "code": code, "message": message } })
}
