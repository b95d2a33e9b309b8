//! EventStore: append-only persistence of audit records.
//!
//! A single writer connection, reached through a dedicated background task
//! over an `mpsc` channel, mirrors the single-writer-task-over-a-channel
//! shape the teacher workspace uses for its stdio/process backends —
//! generalized here from "pipe bytes to a subprocess" to "pipe write
//! requests to a database handle." Readers open their own connection and
//! proceed concurrently under SQLite's WAL snapshot semantics.

pub mod event;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use crate::error::{GatewayError, GatewayResult};
pub use event::{Decision, EventKind, GatewayEvent};
pub use schema::Diagnosis;

/// Filter accepted by [`EventStore::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub target_id: Option<String>,
    pub client_id: Option<String>,
    pub kinds: Option<Vec<EventKind>>,
    pub since_ts: Option<String>,
    pub limit: Option<u32>,
}

enum WriteCommand {
    Append {
        event: GatewayEvent,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
    Repair {
        reply: oneshot::Sender<GatewayResult<()>>,
    },
}

/// Handle to the embedded event store. Cheap to clone; all clones share the
/// same writer task and the same on-disk file.
#[derive(Clone)]
pub struct EventStore {
    path: PathBuf,
    writer_tx: mpsc::Sender<WriteCommand>,
}

impl EventStore {
    /// Opens (creating if absent) the store at `path`, running migrations,
    /// and spawns the dedicated writer task.
    pub fn open(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer_conn = Connection::open(&path)?;
        writer_conn.pragma_update(None, "journal_mode", "WAL")?;
        writer_conn.pragma_update(None, "synchronous", "NORMAL")?;
        schema::migrate(&writer_conn)?;

        let (tx, mut rx) = mpsc::channel::<WriteCommand>(1024);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriteCommand::Append { event, reply } => {
                        let result = append_row(&mut writer_conn, &event);
                        let _ = reply.send(result);
                    }
                    WriteCommand::Repair { reply } => {
                        let result = schema::repair(&writer_conn);
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Ok(Self { path, writer_tx: tx })
    }

    /// Atomic single-row insert; returns the stored `event_id`.
    pub async fn append_event(&self, event: GatewayEvent) -> GatewayResult<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.writer_tx
            .send(WriteCommand::Append {
                event,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GatewayError::storage("writer task closed"))?;
        reply_rx
            .await
            .map_err(|_| GatewayError::storage("writer task dropped reply"))?
    }

    /// Queries matching events. Opens its own reader connection; concurrent
    /// with the writer under WAL.
    pub fn query(&self, filter: &QueryFilter) -> GatewayResult<Vec<GatewayEvent>> {
        let conn = Connection::open_with_flags(
            &self.path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?;

        let mut sql = String::from(
            "SELECT event_id, ts, request_id, trace_id, client_id, event_kind, target_id, \
             method, latency_ms, upstream_latency_ms, decision, deny_reason, error, \
             status_code, metadata_json FROM gateway_events WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(target) = &filter.target_id {
            sql.push_str(" AND target_id = ?");
            params.push(Box::new(target.clone()));
        }
        if let Some(client) = &filter.client_id {
            sql.push_str(" AND client_id = ?");
            params.push(Box::new(client.clone()));
        }
        if let Some(since) = &filter.since_ts {
            sql.push_str(" AND ts >= ?");
            params.push(Box::new(since.clone()));
        }
        if let Some(kinds) = &filter.kinds {
            if !kinds.is_empty() {
                let placeholders = vec!["?"; kinds.len()].join(", ");
                sql.push_str(&format!(" AND event_kind IN ({placeholders})"));
                for kind in kinds {
                    params.push(Box::new(kind.as_str().to_string()));
                }
            }
        }
        sql.push_str(" ORDER BY ts ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Read-only introspection for an external repair tool.
    pub fn diagnose(&self) -> GatewayResult<Diagnosis> {
        let conn = Connection::open_with_flags(
            &self.path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?;
        schema::diagnose(&conn)
    }

    /// Creates missing tables/columns only. Never drops, never rewrites.
    pub async fn repair(&self) -> GatewayResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.writer_tx
            .send(WriteCommand::Repair { reply: reply_tx })
            .await
            .map_err(|_| GatewayError::storage("writer task closed"))?;
        reply_rx
            .await
            .map_err(|_| GatewayError::storage("writer task dropped reply"))?
    }
}

fn append_row(conn: &mut Connection, event: &GatewayEvent) -> GatewayResult<String> {
    let ts = Utc::now().to_rfc3339();
    let trace_id = event.trace_id.map(|t| t.to_string());
    let decision = event.decision.map(Decision::as_str);
    let metadata_json = event
        .metadata_json
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()?;

    conn.execute(
        "INSERT INTO gateway_events (
            event_id, ts, request_id, trace_id, client_id, event_kind, target_id,
            method, latency_ms, upstream_latency_ms, decision, deny_reason, error,
            status_code, metadata_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        rusqlite::params![
            event.event_id,
            ts,
            event.request_id.to_string(),
            trace_id,
            event.client_id,
            event.event_kind.as_str(),
            event.target_id,
            event.method,
            event.latency_ms,
            event.upstream_latency_ms,
            decision,
            event.deny_reason,
            event.error_message,
            event.status_code,
            metadata_json,
        ],
    )?;

    Ok(event.event_id.clone())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<GatewayEvent> {
    let event_kind_str: String = row.get(5)?;
    let event_kind = EventKind::parse(&event_kind_str).unwrap_or(EventKind::GatewayError);
    let request_id_str: String = row.get(2)?;
    let request_id = crate::ids::RequestId::parse(&request_id_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
    let trace_id_str: Option<String> = row.get(3)?;
    let trace_id = trace_id_str.and_then(|s| crate::ids::TraceId::parse(&s).ok());
    let decision_str: Option<String> = row.get(10)?;
    let decision = decision_str.and_then(|s| match s.as_str() {
        "allow" => Some(Decision::Allow),
        "deny" => Some(Decision::Deny),
        _ => None,
    });
    let metadata_str: Option<String> = row.get(14)?;
    let metadata_json = metadata_str.and_then(|s| serde_json::from_str(&s).ok());

    Ok(GatewayEvent {
        event_id: row.get(0)?,
        event_ts: row.get(1)?,
        event_kind,
        request_id,
        trace_id,
        client_id: row.get(4)?,
        target_id: row.get(6)?,
        method: row.get(7)?,
        latency_ms: row.get(8)?,
        upstream_latency_ms: row.get(9)?,
        decision,
        deny_reason: row.get(11)?,
        error_message: row.get(12)?,
        status_code: row.get(13)?,
        metadata_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::mint_request_id;

    fn sample_event(kind: EventKind) -> GatewayEvent {
        GatewayEvent {
            event_id: ulid::Ulid::new().to_string(),
            event_ts: Utc::now().to_rfc3339(),
            event_kind: kind,
            request_id: mint_request_id(),
            trace_id: None,
            client_id: "alice".to_string(),
            target_id: Some("time".to_string()),
            method: Some("tools/list".to_string()),
            latency_ms: Some(12),
            upstream_latency_ms: Some(10),
            decision: None,
            deny_reason: None,
            error_message: None,
            status_code: Some(200),
            metadata_json: None,
        }
    }

    #[tokio::test]
    async fn append_and_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.db")).unwrap();

        let event = sample_event(EventKind::GatewayMcpResponse);
        let request_id = event.request_id;
        store.append_event(event).await.unwrap();

        let results = store.query(&QueryFilter::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].request_id, request_id);
        assert_eq!(results[0].client_id, "alice");
    }

    #[tokio::test]
    async fn query_filters_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.db")).unwrap();

        let mut other = sample_event(EventKind::GatewayMcpRequest);
        other.target_id = Some("other".to_string());
        store.append_event(other).await.unwrap();
        store
            .append_event(sample_event(EventKind::GatewayMcpResponse))
            .await
            .unwrap();

        let results = store
            .query(&QueryFilter {
                target_id: Some("time".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target_id.as_deref(), Some("time"));
    }

    #[tokio::test]
    async fn diagnose_reports_clean_store_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.db")).unwrap();
        let diagnosis = store.diagnose().unwrap();
        assert!(diagnosis.missing_tables.is_empty());
        assert!(diagnosis.missing_columns.is_empty());
    }
}
