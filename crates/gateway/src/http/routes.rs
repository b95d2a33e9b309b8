//! Route handlers and router assembly (spec.md §4.H, §6 HTTP API table).

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use crate::auth::{AuthMiddleware, DenyReason};
use crate::dispatch::{error_envelope, DispatchRequest, Dispatcher};
use crate::error::ErrorCode;
use crate::ids::{mint_request_id, RequestId, TraceId};
use crate::limits::GatewayLimits;
use crate::sse::{frame_event, SseHub, SubscriberFilter, HEARTBEAT_FRAME, HEARTBEAT_INTERVAL, WELCOME_FRAME};
use crate::store::EventKind;
use crate::target::TargetKind;

/// Shared application state threaded through every route.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<AuthMiddleware>,
    pub limits: GatewayLimits,
}

/// Builds the router for `/health`, `/mcp/:target`, `/a2a/:target`,
/// `/events/stream`, wrapped in tracing and panic-catching middleware.
pub fn build_router(state: AppState) -> Router {
    let audit = state.dispatcher.audit.clone();
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp/{target}", post(mcp_handler))
        .route("/a2a/{target}", post(a2a_handler))
        .route("/events/stream", get(events_stream_handler))
        .layer(super::middleware::catch_panic_layer(audit))
        .layer(super::middleware::trace_layer())
        .with_state(state)
}

async fn health_handler() -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn mcp_handler(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_upstream(state, path, TargetKind::Mcp, headers, body).await
}

async fn a2a_handler(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_upstream(state, path, TargetKind::A2a, headers, body).await
}

async fn handle_upstream(
    State(state): State<AppState>,
    Path(target): Path<String>,
    kind: TargetKind,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = mint_request_id();
    let trace_id = extract_trace_id(&headers);

    let identity = match state
        .auth
        .authenticate(&headers, request_id, trace_id, None)
        .await
    {
        Ok(identity) => identity,
        Err(reason) => return deny_response(request_id, trace_id, reason),
    };

    if body.len() as u64 > state.limits.max_body_bytes {
        state
            .dispatcher
            .audit
            .error(
                request_id,
                trace_id,
                &identity.client_id,
                Some(&target),
                None,
                "request body exceeds max_body_size",
                413,
                None,
            )
            .await;
        return error_response(
            request_id,
            trace_id,
            413,
            ErrorCode::PayloadTooLarge.as_str(),
            "request body exceeds max_body_size",
        );
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            state
                .dispatcher
                .audit
                .error(
                    request_id,
                    trace_id,
                    &identity.client_id,
                    Some(&target),
                    None,
                    "invalid JSON body",
                    400,
                    None,
                )
                .await;
            return error_response(request_id, trace_id, 400, ErrorCode::BadRequest.as_str(), "invalid JSON body");
        }
    };

    let result = state
        .dispatcher
        .dispatch(DispatchRequest {
            request_id,
            target,
            kind,
            body: payload,
            client_id: identity.client_id,
            trace_id,
        })
        .await;

    shaped_response(result.status_code, result.body, result.request_id, trace_id)
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    kinds: Option<String>,
    client_id: Option<String>,
}

struct SubscriberGuard {
    hub: SseHub,
    id: crate::sse::SubscriberId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

async fn events_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> Response {
    let request_id = mint_request_id();
    let trace_id = extract_trace_id(&headers);

    if let Err(reason) = state
        .auth
        .authenticate(&headers, request_id, trace_id, Some("events:read"))
        .await
    {
        return deny_response(request_id, trace_id, reason);
    }

    let filter = build_subscriber_filter(&params);

    let hub = state.dispatcher.sse.clone();
    let (subscriber_id, rx) = hub.attach(filter);
    let guard = SubscriberGuard {
        hub: hub.clone(),
        id: subscriber_id,
    };

    let welcome = stream::once(async { Ok::<_, Infallible>(Bytes::from_static(WELCOME_FRAME.as_bytes())) });
    let heartbeat_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    let events = stream::unfold(
        (rx, heartbeat_interval, guard),
        |(mut rx, mut heartbeat, guard)| async move {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => Some((Ok::<_, Infallible>(Bytes::from(frame_event(&event))), (rx, heartbeat, guard))),
                    None => None,
                },
                _ = heartbeat.tick() => {
                    Some((Ok(Bytes::from_static(HEARTBEAT_FRAME.as_bytes())), (rx, heartbeat, guard)))
                }
            }
        },
    );

    let body = Body::from_stream(welcome.chain(events));
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header("X-Accel-Buffering", "no")
        .header("X-Request-Id", request_id.to_string())
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Builds the subscriber's filter from query params. An absent `client_id`
/// leaves `client_ids` empty — "match all clients" per spec.md §4.D — it is
/// never defaulted to the caller's own identity.
fn build_subscriber_filter(params: &StreamParams) -> SubscriberFilter {
    let mut filter = SubscriberFilter::default();
    if let Some(kinds) = params.kinds.as_deref() {
        for kind in kinds.split(',') {
            if let Some(kind) = EventKind::parse(kind.trim()) {
                filter.kinds.insert(kind);
            }
        }
    }
    if let Some(client_id) = params.client_id.clone() {
        filter.client_ids.insert(client_id);
    }
    filter
}

fn extract_trace_id(headers: &HeaderMap) -> Option<TraceId> {
    headers
        .get("X-Trace-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| TraceId::parse(s).ok())
}

fn shaped_response(status_code: u16, body: serde_json::Value, request_id: RequestId, trace_id: Option<TraceId>) -> Response {
    let mut response = (
        StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
        .into_response();
    insert_id_headers(&mut response, request_id, trace_id);
    response
}

fn deny_response(request_id: RequestId, trace_id: Option<TraceId>, reason: DenyReason) -> Response {
    let status = reason.status_code();
    let code = match &reason {
        DenyReason::Forbidden(_) => ErrorCode::Forbidden,
        _ => ErrorCode::Unauthorized,
    };
    let message = match &reason {
        DenyReason::MissingCredential => "missing bearer credential".to_string(),
        DenyReason::MalformedCredential => "malformed bearer credential".to_string(),
        DenyReason::ResolverRejected => "credential rejected".to_string(),
        DenyReason::Forbidden(permission) => format!("missing required permission: {permission}"),
    };
    error_response(request_id, trace_id, status, code.as_str(), &message)
}

fn error_response(request_id: RequestId, trace_id: Option<TraceId>, status_code: u16, code: &str, message: &str) -> Response {
    let mut response = (
        StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(error_envelope(code, message)),
    )
        .into_response();
    insert_id_headers(&mut response, request_id, trace_id);
    response
}

fn insert_id_headers(response: &mut Response, request_id: RequestId, trace_id: Option<TraceId>) {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    if let Some(trace_id) = trace_id {
        if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
            response.headers_mut().insert("X-Trace-Id", value);
        }
    }
}
