//! AuditLogger: a thin typed façade mapping each gateway event kind to an
//! `AppendEvent` call, normalizing nullability so `0ms` latency and
//! "latency unknown" never collide.
//!
//! Grounded on the teacher's `middleware/audit.rs` (`AuditEvent` enum +
//! `log_audit_event`), generalized from Tower middleware logging to a typed
//! append façade over the event store.

use std::sync::Arc;

use crate::ids::{RequestId, TraceId};
use crate::sse::SseHub;
use crate::store::{Decision, EventKind, EventStore, GatewayEvent};

/// Typed façade over the [`EventStore`] for the gateway's event taxonomy.
///
/// Storage failures are logged as diagnostics and counted, never
/// propagated to the caller — the data path does not depend on successful
/// audit, per spec.md §7 `StorageError`. Every successfully appended event
/// is also fanned out over the [`SseHub`], keeping live subscribers in the
/// same order as the durable log.
#[derive(Clone)]
pub struct AuditLogger {
    store: EventStore,
    sse: SseHub,
    dropped: Arc<std::sync::atomic::AtomicU64>,
}

impl AuditLogger {
    /// Wraps an [`EventStore`] and the [`SseHub`] events are broadcast to.
    #[must_use]
    pub fn new(store: EventStore, sse: SseHub) -> Self {
        Self {
            store,
            sse,
            dropped: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Number of events dropped due to storage failure since startup.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn append(&self, event: GatewayEvent) {
        match self.store.append_event(event.clone()).await {
            Ok(_) => self.sse.broadcast(&event),
            Err(err) => {
                self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::error!(error = %err, "failed to append audit event");
            }
        }
    }

    /// Records a successful authentication.
    pub async fn auth_success(&self, request_id: RequestId, trace_id: Option<TraceId>, client_id: &str) {
        self.append(GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: chrono::Utc::now().to_rfc3339(),
            event_kind: EventKind::GatewayAuthSuccess,
            request_id,
            trace_id,
            client_id: client_id.to_string(),
            target_id: None,
            method: None,
            latency_ms: None,
            upstream_latency_ms: None,
            decision: Some(Decision::Allow),
            deny_reason: None,
            error_message: None,
            status_code: None,
            metadata_json: None,
        })
        .await;
    }

    /// Records a failed authentication or authorization check.
    ///
    /// `client_id` is always `"anonymous"` for any failure mode (missing,
    /// malformed, or resolver-rejected credential) — the gateway never
    /// learned a trustworthy identity in any of those paths.
    pub async fn auth_failure(
        &self,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        deny_reason: &str,
    ) {
        self.append(GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: chrono::Utc::now().to_rfc3339(),
            event_kind: EventKind::GatewayAuthFailure,
            request_id,
            trace_id,
            client_id: "anonymous".to_string(),
            target_id: None,
            method: None,
            latency_ms: None,
            upstream_latency_ms: None,
            decision: Some(Decision::Deny),
            deny_reason: Some(deny_reason.to_string()),
            error_message: None,
            status_code: None,
            metadata_json: None,
        })
        .await;
    }

    /// Records the outbound request to an upstream (`gateway_mcp_request` /
    /// `gateway_a2a_request`).
    #[allow(clippy::too_many_arguments)]
    pub async fn upstream_request(
        &self,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        client_id: &str,
        target_id: &str,
        method: &str,
        event_kind: EventKind,
    ) {
        self.append(GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: chrono::Utc::now().to_rfc3339(),
            event_kind,
            request_id,
            trace_id,
            client_id: client_id.to_string(),
            target_id: Some(target_id.to_string()),
            method: Some(method.to_string()),
            latency_ms: None,
            upstream_latency_ms: None,
            decision: None,
            deny_reason: None,
            error_message: None,
            status_code: None,
            metadata_json: None,
        })
        .await;
    }

    /// Records the completed exchange (`gateway_mcp_response` /
    /// `gateway_a2a_response`). If `status_code < 400`, `decision = allow`;
    /// otherwise the decision is left unset — authorization is recorded
    /// separately on the auth events.
    #[allow(clippy::too_many_arguments)]
    pub async fn upstream_response(
        &self,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        client_id: &str,
        target_id: &str,
        method: &str,
        event_kind: EventKind,
        latency_ms: u64,
        upstream_latency_ms: Option<u64>,
        status_code: u16,
        metadata_json: Option<serde_json::Value>,
    ) {
        let decision = if status_code < 400 {
            Some(Decision::Allow)
        } else {
            None
        };
        self.append(GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: chrono::Utc::now().to_rfc3339(),
            event_kind,
            request_id,
            trace_id,
            client_id: client_id.to_string(),
            target_id: Some(target_id.to_string()),
            method: Some(method.to_string()),
            latency_ms: Some(latency_ms),
            upstream_latency_ms,
            decision,
            deny_reason: None,
            error_message: None,
            status_code: Some(status_code),
            metadata_json,
        })
        .await;
    }

    /// Records a terminal failure (`gateway_error`).
    #[allow(clippy::too_many_arguments)]
    pub async fn error(
        &self,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        client_id: &str,
        target_id: Option<&str>,
        method: Option<&str>,
        error_message: &str,
        status_code: u16,
        metadata_json: Option<serde_json::Value>,
    ) {
        self.append(GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: chrono::Utc::now().to_rfc3339(),
            event_kind: EventKind::GatewayError,
            request_id,
            trace_id,
            client_id: client_id.to_string(),
            target_id: target_id.map(str::to_string),
            method: method.map(str::to_string),
            latency_ms: None,
            upstream_latency_ms: None,
            decision: None,
            deny_reason: None,
            error_message: Some(error_message.to_string()),
            status_code: Some(status_code),
            metadata_json,
        })
        .await;
    }
}
