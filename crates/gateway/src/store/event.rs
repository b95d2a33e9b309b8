//! `GatewayEvent`: the audit record, the system's most externally-visible
//! data structure.

use serde::{Deserialize, Serialize};

use crate::ids::{RequestId, TraceId};

/// The seven-element event kind set from spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GatewayAuthSuccess,
    GatewayAuthFailure,
    GatewayMcpRequest,
    GatewayMcpResponse,
    GatewayA2aRequest,
    GatewayA2aResponse,
    GatewayError,
}

impl EventKind {
    /// The `event_kind` column value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GatewayAuthSuccess => "gateway_auth_success",
            Self::GatewayAuthFailure => "gateway_auth_failure",
            Self::GatewayMcpRequest => "gateway_mcp_request",
            Self::GatewayMcpResponse => "gateway_mcp_response",
            Self::GatewayA2aRequest => "gateway_a2a_request",
            Self::GatewayA2aResponse => "gateway_a2a_response",
            Self::GatewayError => "gateway_error",
        }
    }

    /// Parses a stored `event_kind` column value back into a variant.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "gateway_auth_success" => Self::GatewayAuthSuccess,
            "gateway_auth_failure" => Self::GatewayAuthFailure,
            "gateway_mcp_request" => Self::GatewayMcpRequest,
            "gateway_mcp_response" => Self::GatewayMcpResponse,
            "gateway_a2a_request" => Self::GatewayA2aRequest,
            "gateway_a2a_response" => Self::GatewayA2aResponse,
            "gateway_error" => Self::GatewayError,
            _ => return None,
        })
    }
}

/// Authorization decision recorded on `*_response` events, per spec.md §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// The audit record appended to the event store and fanned out over SSE.
///
/// Field nullability matters: a zero-valued numeric field and "unknown"
/// must never collide, so latencies are `Option<u64>`, not defaulted to 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_ts: String,
    pub event_kind: EventKind,
    pub request_id: RequestId,
    pub trace_id: Option<TraceId>,
    pub client_id: String,
    pub target_id: Option<String>,
    pub method: Option<String>,
    pub latency_ms: Option<u64>,
    pub upstream_latency_ms: Option<u64>,
    pub decision: Option<Decision>,
    pub deny_reason: Option<String>,
    pub error_message: Option<String>,
    pub status_code: Option<u16>,
    pub metadata_json: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_its_string_form() {
        for kind in [
            EventKind::GatewayAuthSuccess,
            EventKind::GatewayAuthFailure,
            EventKind::GatewayMcpRequest,
            EventKind::GatewayMcpResponse,
            EventKind::GatewayA2aRequest,
            EventKind::GatewayA2aResponse,
            EventKind::GatewayError,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_event_kind_string_is_rejected() {
        assert_eq!(EventKind::parse("not_a_kind"), None);
    }
}
