//! Process-wide HTTP middleware: request tracing and the panic boundary.
//!
//! `TraceLayer` mirrors the teacher's `cli/commands/serve.rs` logging setup;
//! `CatchPanicLayer` implements spec.md §4.H's "panics in any handler are
//! caught and translated to 500" using `tower-http`'s built-in boundary
//! rather than hand-rolling `catch_unwind` at every handler.

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditLogger;
use crate::ids::mint_request_id;

/// Standard per-request tracing span, grounded on the teacher's
/// `TraceLayer::new_for_http()` usage in its serve command.
#[must_use]
pub fn trace_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Catches a panic unwinding out of any handler, emits a `gateway_error`
/// audit record (fire-and-forget, since the panic handler itself is sync),
/// and returns the `INTERNAL_SERVER_ERROR` envelope spec.md §4.H requires.
pub fn catch_panic_layer(
    audit: AuditLogger,
) -> CatchPanicLayer<impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone + Send + Sync + 'static> {
    CatchPanicLayer::custom(move |panic_payload: Box<dyn Any + Send + 'static>| {
        let message = panic_message(&panic_payload);
        let audit = audit.clone();
        tokio::spawn(async move {
            audit
                .error(mint_request_id(), None, "anonymous", None, None, &message, 500, None)
                .await;
        });
        let body = serde_json::json!({ "error": { "code": "INTERNAL_SERVER_ERROR" } });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    })
}

fn panic_message(payload: &(dyn Any + Send + 'static)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
