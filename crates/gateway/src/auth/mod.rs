//! Auth Middleware (spec.md §4.E).
//!
//! Collapsed from the teacher's Tower `Layer`/`Service` JWT middleware
//! (`turbomcp-server::middleware::auth`) into a plain struct invoked at the
//! top of each handler: axum 0.8 route metadata (the declared permission
//! per route) doesn't thread cleanly through a generic `Layer`/`Service`
//! pair without per-route generic parameters, and the gateway only has a
//! handful of routes. The request/response shape (extract bearer, resolve,
//! attach identity, emit audit event, check permission) is unchanged from
//! the teacher's middleware.

pub mod static_resolver;

pub use static_resolver::StaticTokenResolver;

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::audit::AuditLogger;
use crate::ids::{RequestId, TraceId};

/// Produced by the external `CredentialResolver`. Request-scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub permissions: HashSet<String>,
}

impl ClientIdentity {
    /// Whether this identity carries `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Outcome of resolving a bearer credential.
pub enum ResolveOutcome {
    Allow(ClientIdentity),
    Deny,
}

/// External collaborator: token → identity + permissions, or deny. The
/// credential store / secret encryption backing it is out of scope.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolves a presented bearer token.
    async fn resolve(&self, token_presented: &str) -> ResolveOutcome;
}

/// Why authentication or authorization was refused. Mirrors the
/// `deny_reason` values spec.md §4.E enumerates.
#[derive(Debug, PartialEq, Eq)]
pub enum DenyReason {
    MissingCredential,
    MalformedCredential,
    ResolverRejected,
    Forbidden(String),
}

impl DenyReason {
    #[must_use]
    pub fn as_str(&self) -> std::borrow::Cow<'static, str> {
        match self {
            Self::MissingCredential => "missing_credential".into(),
            Self::MalformedCredential => "malformed_credential".into(),
            Self::ResolverRejected => "resolver_rejected".into(),
            Self::Forbidden(permission) => format!("forbidden:{permission}").into(),
        }
    }

    /// The HTTP status this reason maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden(_) => 403,
            _ => 401,
        }
    }
}

/// Authenticates and authorizes a request, emitting the corresponding
/// audit event, per spec.md §4.E steps 1-5.
pub struct AuthMiddleware {
    resolver: Arc<dyn CredentialResolver>,
    audit: AuditLogger,
}

impl AuthMiddleware {
    /// Wraps a resolver and the audit façade used to emit auth events.
    #[must_use]
    pub fn new(resolver: Arc<dyn CredentialResolver>, audit: AuditLogger) -> Self {
        Self { resolver, audit }
    }

    /// Extracts the bearer credential, resolves it, checks the required
    /// permission if any, and emits the matching audit event. Returns the
    /// resolved identity on success.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        request_id: RequestId,
        trace_id: Option<TraceId>,
        required_permission: Option<&str>,
    ) -> Result<ClientIdentity, DenyReason> {
        let token = match extract_bearer(headers) {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.deny(request_id, trace_id, DenyReason::MissingCredential).await;
                return Err(DenyReason::MissingCredential);
            }
            Err(()) => {
                self.deny(request_id, trace_id, DenyReason::MalformedCredential).await;
                return Err(DenyReason::MalformedCredential);
            }
        };

        let identity = match self.resolver.resolve(&token).await {
            ResolveOutcome::Allow(identity) => identity,
            ResolveOutcome::Deny => {
                self.deny(request_id, trace_id, DenyReason::ResolverRejected).await;
                return Err(DenyReason::ResolverRejected);
            }
        };

        self.audit
            .auth_success(request_id, trace_id, &identity.client_id)
            .await;

        if let Some(permission) = required_permission {
            if !identity.has_permission(permission) {
                let reason = DenyReason::Forbidden(permission.to_string());
                self.deny(request_id, trace_id, reason.clone()).await;
                return Err(reason);
            }
        }

        Ok(identity)
    }

    async fn deny(&self, request_id: RequestId, trace_id: Option<TraceId>, reason: DenyReason) {
        self.audit
            .auth_failure(request_id, trace_id, &reason.as_str())
            .await;
    }
}

impl Clone for DenyReason {
    fn clone(&self) -> Self {
        match self {
            Self::MissingCredential => Self::MissingCredential,
            Self::MalformedCredential => Self::MalformedCredential,
            Self::ResolverRejected => Self::ResolverRejected,
            Self::Forbidden(p) => Self::Forbidden(p.clone()),
        }
    }
}

/// Extracts the bearer token from `Authorization: Bearer <token>`.
///
/// `Ok(None)` means no header was present; `Err(())` means a header was
/// present but malformed (not UTF-8, or not a `Bearer` scheme).
fn extract_bearer(headers: &HeaderMap) -> Result<Option<String>, ()> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ())?;
    let token = value.strip_prefix("Bearer ").ok_or(())?;
    if token.is_empty() {
        return Err(());
    }
    Ok(Some(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::mint_request_id;
    use crate::store::{EventKind, EventStore, QueryFilter};
    use axum::http::HeaderValue;

    struct AlwaysAllow;

    #[async_trait::async_trait]
    impl CredentialResolver for AlwaysAllow {
        async fn resolve(&self, token: &str) -> ResolveOutcome {
            if token == "good-token" {
                ResolveOutcome::Allow(ClientIdentity {
                    client_id: "alice".into(),
                    permissions: ["events:read".to_string()].into_iter().collect(),
                })
            } else {
                ResolveOutcome::Deny
            }
        }
    }

    async fn middleware() -> (AuthMiddleware, EventStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.db")).unwrap();
        let audit = AuditLogger::new(store.clone(), crate::sse::SseHub::new());
        (AuthMiddleware::new(Arc::new(AlwaysAllow), audit), store, dir)
    }

    #[tokio::test]
    async fn missing_header_denies_with_missing_credential() {
        let (mw, store, _dir) = middleware().await;
        let result = mw
            .authenticate(&HeaderMap::new(), mint_request_id(), None, None)
            .await;
        assert_eq!(result.unwrap_err(), DenyReason::MissingCredential);
        let events = store.query(&QueryFilter::default()).unwrap();
        assert_eq!(events[0].event_kind, EventKind::GatewayAuthFailure);
        assert_eq!(events[0].client_id, "anonymous");
    }

    #[tokio::test]
    async fn malformed_header_denies() {
        let (mw, _store, _dir) = middleware().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic not-a-bearer"),
        );
        let result = mw.authenticate(&headers, mint_request_id(), None, None).await;
        assert_eq!(result.unwrap_err(), DenyReason::MalformedCredential);
    }

    #[tokio::test]
    async fn valid_token_succeeds_and_emits_auth_success() {
        let (mw, store, _dir) = middleware().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer good-token"),
        );
        let identity = mw
            .authenticate(&headers, mint_request_id(), None, None)
            .await
            .unwrap();
        assert_eq!(identity.client_id, "alice");
        let events = store.query(&QueryFilter::default()).unwrap();
        assert_eq!(events[0].event_kind, EventKind::GatewayAuthSuccess);
    }

    #[tokio::test]
    async fn missing_permission_denies_forbidden() {
        let (mw, _store, _dir) = middleware().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer good-token"),
        );
        let result = mw
            .authenticate(&headers, mint_request_id(), None, Some("admin:all"))
            .await;
        assert_eq!(
            result.unwrap_err(),
            DenyReason::Forbidden("admin:all".to_string())
        );
    }
}
