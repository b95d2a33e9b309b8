//! End-to-end scenarios exercising the gateway's request/audit/SSE/shutdown
//! behaviour together, the way a single queue or dispatcher unit test can't.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use protocol_gateway::audit::AuditLogger;
use protocol_gateway::auth::{AuthMiddleware, ClientIdentity, CredentialResolver, ResolveOutcome};
use protocol_gateway::config::GatewayConfig;
use protocol_gateway::dispatch::{DispatchRequest, Dispatcher};
use protocol_gateway::http::{build_router, AppState};
use protocol_gateway::ids::mint_request_id;
use protocol_gateway::limits::GatewayLimits;
use protocol_gateway::queue::PerTargetQueueMap;
use protocol_gateway::shutdown::{self, DrainOutcome};
use protocol_gateway::sse::{SseHub, SubscriberFilter};
use protocol_gateway::store::{EventKind, EventStore, GatewayEvent, QueryFilter};
use protocol_gateway::target::{TargetKind, TargetRegistry};
use protocol_gateway::upstream::{
    CancelSignal, UpstreamInvoker, UpstreamRequest, UpstreamResponse, UpstreamTransportFailure,
};
use tower::ServiceExt;

struct AlwaysAllow;

#[async_trait::async_trait]
impl CredentialResolver for AlwaysAllow {
    async fn resolve(&self, token: &str) -> ResolveOutcome {
        if token == "good-token" {
            ResolveOutcome::Allow(ClientIdentity {
                client_id: "alice".to_string(),
                permissions: ["events:read".to_string()].into_iter().collect(),
            })
        } else {
            ResolveOutcome::Deny
        }
    }
}

/// Replies with a fixed ok result after sleeping `sleep_ms`, honouring
/// cancellation in the meantime.
struct SleepyEcho {
    sleep_ms: u64,
}

#[async_trait::async_trait]
impl UpstreamInvoker for SleepyEcho {
    async fn invoke(
        &self,
        _request: UpstreamRequest,
        mut cancel: CancelSignal,
    ) -> Result<UpstreamResponse, UpstreamTransportFailure> {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(self.sleep_ms)) => {}
            () = cancel.cancelled() => {}
        }
        Ok(UpstreamResponse {
            body: serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}),
            upstream_latency: Duration::from_millis(self.sleep_ms),
        })
    }
}

fn mcp_request_body() -> Body {
    Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
}

#[tokio::test]
async fn s1_happy_path_mcp_records_ordered_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store.clone(), sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let queues = PerTargetQueueMap::new(
        GatewayLimits::default(),
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 10 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit,
        sse,
    });
    let auth = Arc::new(AuthMiddleware::new(Arc::new(AlwaysAllow), dispatcher.audit.clone()));
    let state = AppState {
        dispatcher,
        auth,
        limits: GatewayLimits::default(),
    };
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::post("/mcp/time")
                .header("authorization", "Bearer good-token")
                .header("content-type", "application/json")
                .body(mcp_request_body())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-Request-Id"));

    let events = store.query(&QueryFilter::default()).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.event_kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::GatewayAuthSuccess,
            EventKind::GatewayMcpRequest,
            EventKind::GatewayMcpResponse,
        ]
    );
    let response_event = &events[2];
    assert!(response_event.latency_ms.unwrap() >= 10);
    assert_eq!(response_event.upstream_latency_ms, Some(10));
}

#[tokio::test]
async fn s2_fourth_request_is_queue_full_with_3_3_1_audit_split() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store.clone(), sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let limits = GatewayLimits {
        max_inflight_per_target: 1,
        max_queue_per_target: 2,
        timeout_ms: 5_000,
        max_body_bytes: 1024 * 1024,
    };
    let queues = PerTargetQueueMap::new(
        limits,
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 150 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit,
        sse,
    });

    fn fire(dispatcher: Arc<Dispatcher>) -> tokio::task::JoinHandle<protocol_gateway::dispatch::DispatchResult> {
        tokio::spawn(async move {
            dispatcher
                .dispatch(DispatchRequest {
                    request_id: mint_request_id(),
                    target: "time".to_string(),
                    kind: TargetKind::Mcp,
                    body: serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
                    client_id: "alice".to_string(),
                    trace_id: None,
                })
                .await
        })
    }

    // Admit the first (runs immediately) and the next two (queue), giving
    // each a moment to clear its own admission decision before the next is
    // fired, so the fourth deterministically lands on a full queue.
    let first = fire(dispatcher.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = fire(dispatcher.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    let third = fire(dispatcher.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fourth = dispatcher
        .dispatch(DispatchRequest {
            request_id: mint_request_id(),
            target: "time".to_string(),
            kind: TargetKind::Mcp,
            body: serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
            client_id: "alice".to_string(),
            trace_id: None,
        })
        .await;
    assert_eq!(fourth.status_code, 503);
    assert_eq!(fourth.body["error"]["code"], "QUEUE_FULL");

    let (first, second, third) = tokio::join!(first, second, third);
    assert_eq!(first.unwrap().status_code, 200);
    assert_eq!(second.unwrap().status_code, 200);
    assert_eq!(third.unwrap().status_code, 200);

    let events = store.query(&QueryFilter::default()).unwrap();
    let count = |kind: EventKind| events.iter().filter(|e| e.event_kind == kind).count();
    assert_eq!(count(EventKind::GatewayMcpRequest), 3);
    assert_eq!(count(EventKind::GatewayMcpResponse), 3);
    assert_eq!(count(EventKind::GatewayError), 1);
    let error_event = events.iter().find(|e| e.event_kind == EventKind::GatewayError).unwrap();
    assert_eq!(error_event.error_message.as_deref(), Some("queue_full"));
}

#[tokio::test]
async fn s3_timeout_yields_504_at_roughly_the_configured_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store, sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let limits = GatewayLimits {
        max_inflight_per_target: 1,
        max_queue_per_target: 2,
        timeout_ms: 50,
        max_body_bytes: 1024 * 1024,
    };
    let queues = PerTargetQueueMap::new(
        limits,
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 500 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Dispatcher {
        targets,
        queues,
        audit,
        sse,
    };

    let started = std::time::Instant::now();
    let result = dispatcher
        .dispatch(DispatchRequest {
            request_id: mint_request_id(),
            target: "time".to_string(),
            kind: TargetKind::Mcp,
            body: serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
            client_id: "alice".to_string(),
            trace_id: None,
        })
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.status_code, 504);
    assert_eq!(result.body["error"]["code"], "TIMEOUT");
    assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}, expected close to the 50ms deadline");
}

#[tokio::test]
async fn s4_sse_subscribers_see_append_order_filtered_by_their_subscription() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store, sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let queues = PerTargetQueueMap::new(
        GatewayLimits::default(),
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 1 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit: audit.clone(),
        sse: sse.clone(),
    });
    let auth = Arc::new(AuthMiddleware::new(Arc::new(AlwaysAllow), audit));
    let state = AppState {
        dispatcher,
        auth,
        limits: GatewayLimits::default(),
    };
    let router = build_router(state);

    let mut filter_a = SubscriberFilter::default();
    filter_a.kinds.insert(EventKind::GatewayMcpResponse);
    let (_id_a, mut rx_a) = sse.attach(filter_a);
    let (_id_b, mut rx_b) = sse.attach(SubscriberFilter::default());

    let response = router
        .oneshot(
            Request::post("/mcp/time")
                .header("authorization", "Bearer good-token")
                .header("content-type", "application/json")
                .body(mcp_request_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let a_event = rx_a.recv().await.unwrap();
    assert_eq!(a_event.event_kind, EventKind::GatewayMcpResponse);
    assert!(rx_a.try_recv().is_err(), "A should only see one event");

    let b_kinds: Vec<EventKind> = {
        let mut kinds = Vec::new();
        while let Ok(event) = rx_b.try_recv() {
            kinds.push(event.event_kind);
        }
        kinds
    };
    assert_eq!(
        b_kinds,
        vec![
            EventKind::GatewayAuthSuccess,
            EventKind::GatewayMcpRequest,
            EventKind::GatewayMcpResponse,
        ]
    );
}

#[tokio::test]
async fn s5_missing_authorization_header_is_unauthorized_with_anonymous_audit() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store.clone(), sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let queues = PerTargetQueueMap::new(
        GatewayLimits::default(),
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 1 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit: audit.clone(),
        sse,
    });
    let auth = Arc::new(AuthMiddleware::new(Arc::new(AlwaysAllow), audit));
    let state = AppState {
        dispatcher,
        auth,
        limits: GatewayLimits::default(),
    };
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::post("/mcp/time")
                .header("content-type", "application/json")
                .body(mcp_request_body())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events = store.query(&QueryFilter::default()).unwrap();
    assert_eq!(events.len(), 1);
    let event: &GatewayEvent = &events[0];
    assert_eq!(event.event_kind, EventKind::GatewayAuthFailure);
    assert_eq!(event.deny_reason.as_deref(), Some("missing_credential"));
    assert_eq!(event.client_id, "anonymous");
}

#[tokio::test]
async fn s6_clean_shutdown_drains_inflight_and_refuses_new_admission() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.db")).unwrap();
    let sse = SseHub::new();
    let audit = AuditLogger::new(store.clone(), sse.clone());
    let targets = TargetRegistry::new([("time".to_string(), TargetKind::Mcp)]);
    let limits = GatewayLimits {
        max_inflight_per_target: 3,
        max_queue_per_target: 8,
        timeout_ms: 5_000,
        max_body_bytes: 1024 * 1024,
    };
    let queues = PerTargetQueueMap::new(
        limits,
        [("time".to_string(), Arc::new(SleepyEcho { sleep_ms: 50 }) as Arc<dyn UpstreamInvoker>)],
    );
    let dispatcher = Arc::new(Dispatcher {
        targets,
        queues,
        audit,
        sse: sse.clone(),
    });

    let mut inflight = Vec::new();
    for _ in 0..3 {
        let dispatcher = dispatcher.clone();
        inflight.push(tokio::spawn(async move {
            dispatcher
                .dispatch(DispatchRequest {
                    request_id: mint_request_id(),
                    target: "time".to_string(),
                    kind: TargetKind::Mcp,
                    body: serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
                    client_id: "alice".to_string(),
                    trace_id: None,
                })
                .await
        }));
    }
    // Let all three reach execution before draining starts.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = shutdown::drain(&dispatcher.queues, &sse, Duration::from_millis(500)).await;
    assert_eq!(outcome, DrainOutcome::Clean);

    for handle in inflight {
        assert_eq!(handle.await.unwrap().status_code, 200);
    }

    let fourth = dispatcher
        .dispatch(DispatchRequest {
            request_id: mint_request_id(),
            target: "time".to_string(),
            kind: TargetKind::Mcp,
            body: serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
            client_id: "alice".to_string(),
            trace_id: None,
        })
        .await;
    assert_eq!(fourth.status_code, 503);
    assert_eq!(fourth.body["error"]["message"], "admission error: shutdown");

    let events = store.query(&QueryFilter::default()).unwrap();
    assert_eq!(
        events.iter().filter(|e| e.event_kind == EventKind::GatewayMcpResponse).count(),
        3
    );
    assert_eq!(events.iter().filter(|e| e.event_kind == EventKind::GatewayError).count(), 1);
}

#[tokio::test]
async fn config_target_wiring_round_trips_through_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.conf");
    std::fs::write(
        &path,
        "port = 9090\ntarget.time.kind = mcp\ntarget.time.command = /usr/bin/time-mcp\ntarget.time.args = --stdio\n",
    )
    .unwrap();

    let config = GatewayConfig::load(Some(&path)).unwrap();
    assert_eq!(config.port, 9090);
    assert_eq!(config.targets.len(), 1);
    assert_eq!(config.targets[0].id, "time");
    assert_eq!(config.targets[0].kind, TargetKind::Mcp);
    assert_eq!(config.targets[0].mcp_command.as_deref(), Some("/usr/bin/time-mcp"));
    assert_eq!(config.targets[0].mcp_args, vec!["--stdio".to_string()]);
}
