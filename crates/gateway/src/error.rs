//! Gateway error taxonomy.
//!
//! Mirrors the kinds in spec.md §7 as actual variants. The dispatcher
//! (`src/dispatch.rs`) is the sole place that converts a [`GatewayError`]
//! into an HTTP response; everything else signals outcomes through typed
//! values, never by reaching for a status code directly.

use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Symbolic error codes used in the `{"error":{"code":...}}` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    PayloadTooLarge,
    QueueFull,
    Timeout,
    UpstreamFailure,
    InternalServerError,
}

impl ErrorCode {
    /// The symbolic string emitted in the error envelope.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::QueueFull => "QUEUE_FULL",
            Self::Timeout => "TIMEOUT",
            Self::UpstreamFailure => "UPSTREAM_FAILURE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Main gateway error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Malformed request, oversized body, or unknown target.
    #[error("client error: {0}")]
    Client(String),

    /// Missing/invalid credential or insufficient permission.
    #[error("auth error: {0}")]
    Auth(String),

    /// Queue full or the target is draining for shutdown.
    #[error("admission error: {0}")]
    Admission(AdmissionReason),

    /// Queue timeout measured from enqueue.
    #[error("timeout waiting for upstream")]
    Timeout,

    /// Invoker returned no response (network/process failure).
    #[error("upstream transport failure: {0}")]
    UpstreamTransport(String),

    /// `AppendEvent` failed. Never surfaced to the client — the data path
    /// does not depend on successful audit.
    #[error("storage error: {0}")]
    Storage(String),

    /// Panic or unreachable branch caught at an HTTP handler or queue
    /// worker boundary.
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Event store failure surfaced from `rusqlite`.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    /// The per-target wait list is at `max_queue_per_target`.
    QueueFull,
    /// The target's queue is draining for shutdown.
    Shutdown,
}

impl std::fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue_full"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl GatewayError {
    /// Constructs a [`GatewayError::Client`].
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Constructs a [`GatewayError::Auth`].
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Constructs a [`GatewayError::UpstreamTransport`].
    pub fn upstream_transport(message: impl Into<String>) -> Self {
        Self::UpstreamTransport(message.into())
    }

    /// Constructs a [`GatewayError::Storage`].
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Constructs a [`GatewayError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Constructs a [`GatewayError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Maps this error to the HTTP status code the dispatcher should return.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Client(_) => 400,
            Self::Auth(_) => 401,
            Self::Admission(_) => 503,
            Self::Timeout => 504,
            Self::UpstreamTransport(_) => 502,
            Self::Storage(_) => 500,
            Self::Internal(_) | Self::Serialization(_) | Self::Io(_) | Self::Sqlite(_) => 500,
            Self::Configuration(_) => 500,
        }
    }

    /// Maps this error to its symbolic error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Client(_) => ErrorCode::BadRequest,
            Self::Auth(_) => ErrorCode::Unauthorized,
            Self::Admission(AdmissionReason::QueueFull) => ErrorCode::QueueFull,
            Self::Admission(AdmissionReason::Shutdown) => ErrorCode::QueueFull,
            Self::Timeout => ErrorCode::Timeout,
            Self::UpstreamTransport(_) => ErrorCode::UpstreamFailure,
            Self::Storage(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Sqlite(_)
            | Self::Configuration(_) => ErrorCode::InternalServerError,
        }
    }

    /// The `gateway_error` audit record's `error` string for this failure,
    /// per spec.md §4.G.
    #[must_use]
    pub fn audit_message(&self) -> String {
        match self {
            Self::Admission(reason) => reason.to_string(),
            Self::Timeout => "timeout".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(GatewayError::client("x").status_code(), 400);
        assert_eq!(GatewayError::auth("x").status_code(), 401);
        assert_eq!(
            GatewayError::Admission(AdmissionReason::QueueFull).status_code(),
            503
        );
        assert_eq!(GatewayError::Timeout.status_code(), 504);
        assert_eq!(GatewayError::upstream_transport("x").status_code(), 502);
    }

    #[test]
    fn audit_message_uses_symbolic_reason() {
        assert_eq!(
            GatewayError::Admission(AdmissionReason::QueueFull).audit_message(),
            "queue_full"
        );
        assert_eq!(
            GatewayError::Admission(AdmissionReason::Shutdown).audit_message(),
            "shutdown"
        );
        assert_eq!(GatewayError::Timeout.audit_message(), "timeout");
    }

    #[test]
    fn error_codes_are_symbolic() {
        assert_eq!(GatewayError::auth("x").code().as_str(), "UNAUTHORIZED");
        assert_eq!(
            GatewayError::Admission(AdmissionReason::QueueFull)
                .code()
                .as_str(),
            "QUEUE_FULL"
        );
    }
}
