//! Schema migrations for the event store.
//!
//! Each migration is idempotent (`IF NOT EXISTS` / additive `ALTER`) and
//! numbered monotonically. Downgrades are not supported. `schema_version` is
//! tracked in SQLite's own `user_version` pragma rather than a bespoke
//! table, avoiding a chicken-and-egg bootstrap problem.

use rusqlite::Connection;

use crate::error::GatewayResult;

/// Current schema version. Bump and append a migration when the layout
/// changes; never rewrite a past migration.
pub const CURRENT_VERSION: i64 = 1;

const MIGRATIONS: &[&str] = &[
    // v1: base gateway_events table + indexes from spec.md §6.
    r"
    CREATE TABLE IF NOT EXISTS gateway_events (
        event_id            TEXT PRIMARY KEY,
        ts                   TEXT NOT NULL,
        request_id           TEXT NOT NULL,
        trace_id             TEXT,
        client_id            TEXT NOT NULL,
        event_kind           TEXT NOT NULL,
        target_id            TEXT,
        method               TEXT,
        latency_ms           INTEGER,
        upstream_latency_ms  INTEGER,
        decision             TEXT,
        deny_reason          TEXT,
        error                TEXT,
        status_code          INTEGER,
        metadata_json        TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_gateway_events_request_id ON gateway_events(request_id);
    CREATE INDEX IF NOT EXISTS idx_gateway_events_client_ts ON gateway_events(client_id, ts);
    CREATE INDEX IF NOT EXISTS idx_gateway_events_kind_ts ON gateway_events(event_kind, ts);
    CREATE INDEX IF NOT EXISTS idx_gateway_events_target_ts ON gateway_events(target_id, ts);
    ",
];

/// Applies every migration from the store's current `user_version` up to
/// [`CURRENT_VERSION`], in order.
pub fn migrate(conn: &Connection) -> GatewayResult<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for version in current..CURRENT_VERSION {
        let statements = MIGRATIONS[version as usize];
        conn.execute_batch(statements)?;
    }
    conn.pragma_update(None, "user_version", CURRENT_VERSION)?;
    Ok(())
}

/// Read-only introspection result for an external repair tool, per
/// spec.md §4.B `Diagnose()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub missing_tables: Vec<String>,
    pub missing_columns: Vec<String>,
    pub version: i64,
    pub readable: bool,
}

const EXPECTED_COLUMNS: &[&str] = &[
    "event_id",
    "ts",
    "request_id",
    "trace_id",
    "client_id",
    "event_kind",
    "target_id",
    "method",
    "latency_ms",
    "upstream_latency_ms",
    "decision",
    "deny_reason",
    "error",
    "status_code",
    "metadata_json",
];

/// Inspects the store without mutating it.
pub fn diagnose(conn: &Connection) -> GatewayResult<Diagnosis> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let table_exists: bool = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='gateway_events'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false);

    let mut missing_tables = Vec::new();
    let mut missing_columns = Vec::new();

    if !table_exists {
        missing_tables.push("gateway_events".to_string());
    } else {
        let mut stmt = conn.prepare("PRAGMA table_info(gateway_events)")?;
        let present: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        for col in EXPECTED_COLUMNS {
            if !present.iter().any(|p| p == col) {
                missing_columns.push((*col).to_string());
            }
        }
    }

    Ok(Diagnosis {
        missing_tables,
        missing_columns,
        version,
        readable: true,
    })
}

/// Creates missing tables and missing columns only — never drops, never
/// rewrites. The store may outlive the binary; operators must be able to
/// bring an old file forward.
pub fn repair(conn: &Connection) -> GatewayResult<()> {
    let diagnosis = diagnose(conn)?;
    if !diagnosis.missing_tables.is_empty() {
        migrate(conn)?;
        return Ok(());
    }
    for column in &diagnosis.missing_columns {
        let ddl = format!("ALTER TABLE gateway_events ADD COLUMN {column} TEXT");
        conn.execute_batch(&ddl)?;
    }
    Ok(())
}
