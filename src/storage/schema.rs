//! Database schema definitions.
//!
//! This module contains the complete SQLite schema for Harbor's embedded
//! store: the synchronized entity tables, the persisted sync conflicts and
//! the audit log.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the Harbor database.
///
/// Note: Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Synchronized Entities
-- ====================

-- Projects: root_path is machine-local, logical_root travels
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    root_path TEXT,
    logical_root TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_root ON projects(root_path);

-- Ports: units of work; dependencies is a JSON array of port IDs
CREATE TABLE IF NOT EXISTS ports (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    dependencies TEXT NOT NULL DEFAULT '[]',
    working_dir TEXT,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_ports_project ON ports(project_id);
CREATE INDEX IF NOT EXISTS idx_ports_status ON ports(status);

-- Sessions: transcript_path never leaves this machine
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    port_id TEXT,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    cwd TEXT,
    transcript_path TEXT,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    updated_at INTEGER NOT NULL,
    created_in_env TEXT,
    last_touched_env TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_port ON sessions(port_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

-- Escalations
CREATE TABLE IF NOT EXISTS escalations (
    id TEXT PRIMARY KEY,
    session_id TEXT,
    port_id TEXT,
    title TEXT NOT NULL,
    reason TEXT,
    severity TEXT NOT NULL DEFAULT 'normal',
    status TEXT NOT NULL DEFAULT 'open',
    resolution TEXT,
    created_at INTEGER NOT NULL,
    resolved_at INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_escalations_status ON escalations(status);

-- Pipelines and their ordered memberships
CREATE TABLE IF NOT EXISTS pipelines (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- port_id is not a foreign key: memberships may arrive before their ports
CREATE TABLE IF NOT EXISTS pipeline_ports (
    pipeline_id TEXT NOT NULL,
    port_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (pipeline_id, port_id),
    FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_pipeline_ports_position ON pipeline_ports(pipeline_id, position);

-- ====================
-- Sync Support
-- ====================

-- Conflicts detected by a manual-strategy import
CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    entity_class TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    local_version TEXT NOT NULL,
    incoming_version TEXT NOT NULL,
    differing_fields TEXT NOT NULL DEFAULT '[]',
    source_environment TEXT,
    detected_at INTEGER NOT NULL,
    resolved_at INTEGER,
    resolution TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_class, entity_key);
CREATE INDEX IF NOT EXISTS idx_sync_conflicts_open ON sync_conflicts(resolved_at);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
"#;

/// Apply the schema to a database connection.
///
/// This sets pragmas and creates all tables. Safe to call on every open.
///
/// # Errors
///
/// Returns an error if a pragma or statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "projects",
            "ports",
            "sessions",
            "escalations",
            "pipelines",
            "pipeline_ports",
            "sync_conflicts",
            "events",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");
    }

    #[test]
    fn test_pipeline_memberships_cascade() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO pipelines (id, name, created_at, updated_at) VALUES ('pipe1', 'p', 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pipeline_ports (pipeline_id, port_id, position) VALUES ('pipe1', 'port_missing', 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM pipelines WHERE id = 'pipe1'", []).unwrap();

        let remaining: i32 = conn
            .query_row("SELECT COUNT(*) FROM pipeline_ports", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
