//! protocol-gateway: an authenticated HTTP front door that queues,
//! dispatches, and audits requests to MCP and A2A upstreams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ HTTP Front (axum)                                        │
//! │ • Auth Middleware: bearer credential → ClientIdentity    │
//! │ • Dispatcher: envelope validation, routing, shaping       │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ PerTargetQueueMap                                         │
//! │ • One bounded FIFO + inflight cap per target               │
//! │ • UpstreamInvoker boundary: MCP (stdio) / A2A (HTTP)      │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ EventStore (rusqlite, single writer) + SSE Hub             │
//! │ • Every exchange is an audit record, durable and live      │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod ids;
pub mod limits;
pub mod logging;
pub mod queue;
pub mod shutdown;
pub mod sse;
pub mod store;
pub mod target;
pub mod upstream;

pub use error::{GatewayError, GatewayResult};

/// Commonly used types, for `use protocol_gateway::prelude::*;`.
pub mod prelude {
    pub use crate::audit::AuditLogger;
    pub use crate::auth::{AuthMiddleware, ClientIdentity, CredentialResolver, DenyReason, ResolveOutcome};
    pub use crate::config::{ConfigHandle, GatewayConfig};
    pub use crate::dispatch::{DispatchRequest, DispatchResult, Dispatcher};
    pub use crate::error::{ErrorCode, GatewayError, GatewayResult};
    pub use crate::http::{build_router, AppState};
    pub use crate::ids::{mint_request_id, mint_trace_id, RequestId, TraceId};
    pub use crate::limits::GatewayLimits;
    pub use crate::queue::PerTargetQueueMap;
    pub use crate::shutdown::{drain, wait_for_shutdown_signal, DrainOutcome};
    pub use crate::sse::SseHub;
    pub use crate::store::{EventKind, EventStore, GatewayEvent};
    pub use crate::target::{TargetKind, TargetRegistry};
    pub use crate::upstream::{CancelHandle, CancelSignal, UpstreamInvoker, UpstreamRequest, UpstreamResponse};
}

/// Version of protocol-gateway.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
