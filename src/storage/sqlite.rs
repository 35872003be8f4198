//! SQLite storage implementation.
//!
//! This module provides the embedded store the sync subsystem reads from and
//! writes into. It follows the MutationContext pattern for transaction
//! discipline and audit logging: every write goes through [`SqliteStorage::mutate`],
//! which wraps the closure in an IMMEDIATE transaction and flushes the
//! recorded events before commit.
//!
//! Row-level helpers (`upsert_*_in`, `get_*_in`) take a plain [`Connection`]
//! so callers can compose several of them inside one transaction.

use crate::error::{Error, Result};
use crate::model::{
    ConflictRecord, ConflictResolution, EntityClass, Escalation, Pipeline, PipelinePort, Port,
    Project, Session,
};
use crate::storage::events::{insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation.
///
/// Passed to mutation closures so they can record audit events that are
/// written in the same transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Row counts per entity class.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntityCounts {
    pub projects: usize,
    pub ports: usize,
    pub sessions: usize,
    pub escalations: usize,
    pub pipelines: usize,
}

impl EntityCounts {
    /// Count for one class.
    #[must_use]
    pub const fn get(&self, class: EntityClass) -> usize {
        match class {
            EntityClass::Project => self.projects,
            EntityClass::Port => self.ports,
            EntityClass::Session => self.sessions,
            EntityClass::Escalation => self.escalations,
            EntityClass::Pipeline => self.pipelines,
        }
    }

    /// Returns total number of records.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.projects + self.ports + self.sessions + self.escalations + self.pipelines
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ==================
    // Port Operations
    // ==================

    /// Get a port by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_port(&self, id: &str) -> Result<Option<Port>> {
        get_port_in(&self.conn, id)
    }

    /// List all ports ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_ports(&self) -> Result<Vec<Port>> {
        let mut stmt = self.conn.prepare(&format!("{PORT_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], map_port_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Insert or replace a port.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_port(&mut self, port: &Port, actor: &str) -> Result<()> {
        self.mutate("upsert_port", actor, |tx, ctx| {
            let existed = upsert_port_in(tx, port)?;
            ctx.record_event("port", &port.id, upsert_event(existed));
            Ok(())
        })
    }

    // ==================
    // Session Operations
    // ==================

    /// Get a session by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        get_session_in(&self.conn, id)
    }

    /// List all sessions ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SESSION_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], map_session_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Insert or update a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_session(&mut self, session: &Session, actor: &str) -> Result<()> {
        self.mutate("upsert_session", actor, |tx, ctx| {
            let existed = upsert_session_in(tx, session)?;
            ctx.record_event("session", &session.id, upsert_event(existed));
            Ok(())
        })
    }

    /// Create a session started in `environment`.
    ///
    /// Both environment tags are set to `environment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate ID).
    pub fn create_session(&mut self, session: &Session, environment: &str, actor: &str) -> Result<()> {
        let mut session = session.clone();
        session.created_in_env = Some(environment.to_string());
        session.last_touched_env = Some(environment.to_string());

        self.mutate("create_session", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO sessions (id, port_id, title, status, cwd, transcript_path, tokens_used, cost_usd, started_at, ended_at, updated_at, created_in_env, last_touched_env)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    session.id,
                    session.port_id,
                    session.title,
                    session.status,
                    session.cwd,
                    session.transcript_path,
                    session.tokens_used,
                    session.cost_usd,
                    session.started_at,
                    session.ended_at,
                    session.updated_at,
                    session.created_in_env,
                    session.last_touched_env,
                ],
            )?;
            ctx.record_event("session", &session.id, EventType::SessionCreated);
            Ok(())
        })
    }

    /// Change a session's status from `environment`.
    ///
    /// Advances `last_touched_env`. Terminal statuses also stamp `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns `Error::EntityNotFound` if the session does not exist.
    pub fn update_session_status(
        &mut self,
        id: &str,
        status: &str,
        environment: &str,
        actor: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let ended_at = matches!(status, "completed" | "abandoned").then_some(now);

        self.mutate("update_session_status", actor, |tx, ctx| {
            let old_status: Option<String> = tx
                .query_row("SELECT status FROM sessions WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(old_status) = old_status else {
                return Err(Error::EntityNotFound {
                    class: "session".to_string(),
                    id: id.to_string(),
                });
            };

            tx.execute(
                "UPDATE sessions
                 SET status = ?2, updated_at = ?3, last_touched_env = ?4,
                     ended_at = COALESCE(?5, ended_at)
                 WHERE id = ?1",
                rusqlite::params![id, status, now, environment, ended_at],
            )?;

            ctx.record_change(
                "session",
                id,
                EventType::SessionTouched,
                Some(old_status),
                Some(status.to_string()),
            );
            Ok(())
        })
    }

    // ==================
    // Escalation Operations
    // ==================

    /// Get an escalation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_escalation(&self, id: &str) -> Result<Option<Escalation>> {
        get_escalation_in(&self.conn, id)
    }

    /// List all escalations ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_escalations(&self) -> Result<Vec<Escalation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ESCALATION_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], map_escalation_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Insert or replace an escalation.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_escalation(&mut self, escalation: &Escalation, actor: &str) -> Result<()> {
        self.mutate("upsert_escalation", actor, |tx, ctx| {
            let existed = upsert_escalation_in(tx, escalation)?;
            ctx.record_event("escalation", &escalation.id, upsert_event(existed));
            Ok(())
        })
    }

    // ==================
    // Pipeline Operations
    // ==================

    /// Get a pipeline with its memberships.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        get_pipeline_in(&self.conn, id)
    }

    /// List all pipelines (with memberships) ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, status, created_at, updated_at FROM pipelines ORDER BY id")?;
        let rows = stmt.query_map([], map_pipeline_row)?;
        let mut pipelines = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for pipeline in &mut pipelines {
            pipeline.ports = pipeline_ports_in(&self.conn, &pipeline.id)?;
        }
        Ok(pipelines)
    }

    /// Insert or replace a pipeline and its memberships atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_pipeline(&mut self, pipeline: &Pipeline, actor: &str) -> Result<()> {
        self.mutate("upsert_pipeline", actor, |tx, ctx| {
            let existed = upsert_pipeline_in(tx, pipeline)?;
            ctx.record_event("pipeline", &pipeline.id, upsert_event(existed));
            Ok(())
        })
    }

    // ==================
    // Project Operations
    // ==================

    /// Get a project by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        get_project_in(&self.conn, id)
    }

    /// List all projects ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROJECT_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], map_project_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Insert or replace a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_project(&mut self, project: &Project, actor: &str) -> Result<()> {
        self.mutate("upsert_project", actor, |tx, ctx| {
            let existed = upsert_project_in(tx, project)?;
            ctx.record_event("project", &project.id, upsert_event(existed));
            Ok(())
        })
    }

    // ==================
    // Aggregates
    // ==================

    /// Count rows per entity class.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn entity_counts(&self) -> Result<EntityCounts> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        };

        Ok(EntityCounts {
            projects: count("projects")?,
            ports: count("ports")?,
            sessions: count("sessions")?,
            escalations: count("escalations")?,
            pipelines: count("pipelines")?,
        })
    }

    /// Primary keys of one class, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_ids(&self, class: EntityClass) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {} ORDER BY id", table_name(class)))?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ==================
    // Conflict Operations
    // ==================

    /// List conflicts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<ConflictRecord>> {
        let sql = if include_resolved {
            format!("{CONFLICT_SELECT} ORDER BY detected_at DESC, id")
        } else {
            format!("{CONFLICT_SELECT} WHERE resolved_at IS NULL ORDER BY detected_at DESC, id")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_conflict_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Get a conflict by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_conflict(&self, id: &str) -> Result<Option<ConflictRecord>> {
        get_conflict_in(&self.conn, id)
    }

    /// The open conflict for one entity, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn open_conflict_for(&self, class: EntityClass, key: &str) -> Result<Option<ConflictRecord>> {
        open_conflict_for_in(&self.conn, class, key)
    }

    /// Persist a conflict (see [`record_conflict_in`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record_conflict(&mut self, conflict: &ConflictRecord, actor: &str) -> Result<String> {
        self.mutate("record_conflict", actor, |tx, ctx| {
            let id = record_conflict_in(tx, conflict)?;
            ctx.record_event(conflict.entity_class.as_str(), &conflict.entity_key, EventType::ConflictRecorded);
            Ok(id)
        })
    }
}

// ==================
// Row-level helpers
// ==================

const PORT_SELECT: &str = "SELECT id, project_id, title, description, status, priority, dependencies, working_dir, tokens_used, cost_usd, created_at, updated_at, completed_at FROM ports";

const SESSION_SELECT: &str = "SELECT id, port_id, title, status, cwd, transcript_path, tokens_used, cost_usd, started_at, ended_at, updated_at, created_in_env, last_touched_env FROM sessions";

const ESCALATION_SELECT: &str = "SELECT id, session_id, port_id, title, reason, severity, status, resolution, created_at, resolved_at, updated_at FROM escalations";

const PROJECT_SELECT: &str =
    "SELECT id, name, description, root_path, logical_root, created_at, updated_at FROM projects";

const CONFLICT_SELECT: &str = "SELECT id, entity_class, entity_key, local_version, incoming_version, differing_fields, source_environment, detected_at, resolved_at, resolution FROM sync_conflicts";

const fn table_name(class: EntityClass) -> &'static str {
    match class {
        EntityClass::Project => "projects",
        EntityClass::Port => "ports",
        EntityClass::Session => "sessions",
        EntityClass::Escalation => "escalations",
        EntityClass::Pipeline => "pipelines",
    }
}

const fn upsert_event(existed: bool) -> EventType {
    if existed {
        EventType::EntityOverwritten
    } else {
        EventType::EntityImported
    }
}

fn row_exists(conn: &Connection, class: EntityClass, id: &str) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table_name(class));
    Ok(conn.prepare(&sql)?.exists([id])?)
}

/// Get a port by ID on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_port_in(conn: &Connection, id: &str) -> Result<Option<Port>> {
    conn.query_row(&format!("{PORT_SELECT} WHERE id = ?1"), [id], map_port_row)
        .optional()
        .map_err(Into::into)
}

/// Insert or replace a port. Returns whether the row already existed.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn upsert_port_in(conn: &Connection, port: &Port) -> Result<bool> {
    let existed = row_exists(conn, EntityClass::Port, &port.id)?;
    let dependencies = serde_json::to_string(&port.dependencies)?;

    conn.execute(
        "INSERT INTO ports (id, project_id, title, description, status, priority, dependencies, working_dir, tokens_used, cost_usd, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
           project_id = excluded.project_id,
           title = excluded.title,
           description = excluded.description,
           status = excluded.status,
           priority = excluded.priority,
           dependencies = excluded.dependencies,
           working_dir = excluded.working_dir,
           tokens_used = excluded.tokens_used,
           cost_usd = excluded.cost_usd,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at,
           completed_at = excluded.completed_at",
        rusqlite::params![
            port.id,
            port.project_id,
            port.title,
            port.description,
            port.status,
            port.priority,
            dependencies,
            port.working_dir,
            port.tokens_used,
            port.cost_usd,
            port.created_at,
            port.updated_at,
            port.completed_at,
        ],
    )?;
    Ok(existed)
}

/// Get a session by ID on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_session_in(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row(&format!("{SESSION_SELECT} WHERE id = ?1"), [id], map_session_row)
        .optional()
        .map_err(Into::into)
}

/// Insert or update a session. Returns whether the row already existed.
///
/// An existing row keeps its `transcript_path`; that column is local to the
/// machine that ran the session.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn upsert_session_in(conn: &Connection, session: &Session) -> Result<bool> {
    let existed = row_exists(conn, EntityClass::Session, &session.id)?;

    conn.execute(
        "INSERT INTO sessions (id, port_id, title, status, cwd, transcript_path, tokens_used, cost_usd, started_at, ended_at, updated_at, created_in_env, last_touched_env)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
           port_id = excluded.port_id,
           title = excluded.title,
           status = excluded.status,
           cwd = excluded.cwd,
           tokens_used = excluded.tokens_used,
           cost_usd = excluded.cost_usd,
           started_at = excluded.started_at,
           ended_at = excluded.ended_at,
           updated_at = excluded.updated_at,
           created_in_env = excluded.created_in_env,
           last_touched_env = excluded.last_touched_env",
        rusqlite::params![
            session.id,
            session.port_id,
            session.title,
            session.status,
            session.cwd,
            session.transcript_path,
            session.tokens_used,
            session.cost_usd,
            session.started_at,
            session.ended_at,
            session.updated_at,
            session.created_in_env,
            session.last_touched_env,
        ],
    )?;
    Ok(existed)
}

/// Get an escalation by ID on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_escalation_in(conn: &Connection, id: &str) -> Result<Option<Escalation>> {
    conn.query_row(
        &format!("{ESCALATION_SELECT} WHERE id = ?1"),
        [id],
        map_escalation_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert or replace an escalation. Returns whether the row already existed.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn upsert_escalation_in(conn: &Connection, escalation: &Escalation) -> Result<bool> {
    let existed = row_exists(conn, EntityClass::Escalation, &escalation.id)?;

    conn.execute(
        "INSERT INTO escalations (id, session_id, port_id, title, reason, severity, status, resolution, created_at, resolved_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
           session_id = excluded.session_id,
           port_id = excluded.port_id,
           title = excluded.title,
           reason = excluded.reason,
           severity = excluded.severity,
           status = excluded.status,
           resolution = excluded.resolution,
           created_at = excluded.created_at,
           resolved_at = excluded.resolved_at,
           updated_at = excluded.updated_at",
        rusqlite::params![
            escalation.id,
            escalation.session_id,
            escalation.port_id,
            escalation.title,
            escalation.reason,
            escalation.severity,
            escalation.status,
            escalation.resolution,
            escalation.created_at,
            escalation.resolved_at,
            escalation.updated_at,
        ],
    )?;
    Ok(existed)
}

/// Get a pipeline with its memberships on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_pipeline_in(conn: &Connection, id: &str) -> Result<Option<Pipeline>> {
    let pipeline = conn
        .query_row(
            "SELECT id, name, status, created_at, updated_at FROM pipelines WHERE id = ?1",
            [id],
            map_pipeline_row,
        )
        .optional()?;

    match pipeline {
        Some(mut pipeline) => {
            pipeline.ports = pipeline_ports_in(conn, id)?;
            Ok(Some(pipeline))
        }
        None => Ok(None),
    }
}

fn pipeline_ports_in(conn: &Connection, pipeline_id: &str) -> Result<Vec<PipelinePort>> {
    let mut stmt = conn.prepare(
        "SELECT port_id, position FROM pipeline_ports WHERE pipeline_id = ?1 ORDER BY position, port_id",
    )?;
    let rows = stmt.query_map([pipeline_id], |row| {
        Ok(PipelinePort {
            port_id: row.get(0)?,
            position: row.get(1)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

/// Insert or replace a pipeline and replace its memberships.
///
/// Callers wanting atomicity run this inside a transaction.
///
/// # Errors
///
/// Returns an error if a write fails.
pub fn upsert_pipeline_in(conn: &Connection, pipeline: &Pipeline) -> Result<bool> {
    let existed = row_exists(conn, EntityClass::Pipeline, &pipeline.id)?;

    conn.execute(
        "INSERT INTO pipelines (id, name, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           status = excluded.status,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at",
        rusqlite::params![
            pipeline.id,
            pipeline.name,
            pipeline.status,
            pipeline.created_at,
            pipeline.updated_at,
        ],
    )?;

    conn.execute(
        "DELETE FROM pipeline_ports WHERE pipeline_id = ?1",
        [&pipeline.id],
    )?;
    for member in &pipeline.ports {
        conn.execute(
            "INSERT INTO pipeline_ports (pipeline_id, port_id, position) VALUES (?1, ?2, ?3)",
            rusqlite::params![pipeline.id, member.port_id, member.position],
        )?;
    }

    Ok(existed)
}

/// Get a project by ID on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_project_in(conn: &Connection, id: &str) -> Result<Option<Project>> {
    conn.query_row(&format!("{PROJECT_SELECT} WHERE id = ?1"), [id], map_project_row)
        .optional()
        .map_err(Into::into)
}

/// Insert or replace a project. Returns whether the row already existed.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn upsert_project_in(conn: &Connection, project: &Project) -> Result<bool> {
    let existed = row_exists(conn, EntityClass::Project, &project.id)?;

    conn.execute(
        "INSERT INTO projects (id, name, description, root_path, logical_root, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           description = excluded.description,
           root_path = excluded.root_path,
           logical_root = excluded.logical_root,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at",
        rusqlite::params![
            project.id,
            project.name,
            project.description,
            project.root_path,
            project.logical_root,
            project.created_at,
            project.updated_at,
        ],
    )?;
    Ok(existed)
}

/// Get a conflict by ID on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_conflict_in(conn: &Connection, id: &str) -> Result<Option<ConflictRecord>> {
    conn.query_row(&format!("{CONFLICT_SELECT} WHERE id = ?1"), [id], map_conflict_row)
        .optional()
        .map_err(Into::into)
}

/// The open conflict for one entity on any connection.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn open_conflict_for_in(
    conn: &Connection,
    class: EntityClass,
    key: &str,
) -> Result<Option<ConflictRecord>> {
    conn.query_row(
        &format!(
            "{CONFLICT_SELECT} WHERE entity_class = ?1 AND entity_key = ?2 AND resolved_at IS NULL
             ORDER BY detected_at DESC LIMIT 1"
        ),
        rusqlite::params![class.as_str(), key],
        map_conflict_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Persist a conflict, returning the stored ID.
///
/// An entity has at most one open conflict: if one exists it is refreshed
/// with the new versions and keeps its ID.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn record_conflict_in(conn: &Connection, conflict: &ConflictRecord) -> Result<String> {
    let local = serde_json::to_string(&conflict.local_version)?;
    let incoming = serde_json::to_string(&conflict.incoming_version)?;
    let fields = serde_json::to_string(&conflict.differing_fields)?;

    if let Some(open) = open_conflict_for_in(conn, conflict.entity_class, &conflict.entity_key)? {
        conn.execute(
            "UPDATE sync_conflicts
             SET local_version = ?2, incoming_version = ?3, differing_fields = ?4,
                 source_environment = ?5, detected_at = ?6
             WHERE id = ?1",
            rusqlite::params![
                open.id,
                local,
                incoming,
                fields,
                conflict.source_environment,
                conflict.detected_at,
            ],
        )?;
        return Ok(open.id);
    }

    conn.execute(
        "INSERT INTO sync_conflicts (id, entity_class, entity_key, local_version, incoming_version, differing_fields, source_environment, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            conflict.id,
            conflict.entity_class.as_str(),
            conflict.entity_key,
            local,
            incoming,
            fields,
            conflict.source_environment,
            conflict.detected_at,
        ],
    )?;
    Ok(conflict.id.clone())
}

/// Mark a conflict resolved.
///
/// # Errors
///
/// Returns `Error::ConflictNotFound` if no open conflict has this ID.
pub fn mark_conflict_resolved_in(
    conn: &Connection,
    id: &str,
    resolution: ConflictResolution,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sync_conflicts SET resolved_at = ?2, resolution = ?3
         WHERE id = ?1 AND resolved_at IS NULL",
        rusqlite::params![id, chrono::Utc::now().timestamp_millis(), resolution.as_str()],
    )?;
    if changed == 0 {
        return Err(Error::ConflictNotFound { id: id.to_string() });
    }
    Ok(())
}

fn json_column_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn map_port_row(row: &rusqlite::Row) -> rusqlite::Result<Port> {
    let dependencies: String = row.get(6)?;
    Ok(Port {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        dependencies: serde_json::from_str(&dependencies).map_err(|e| json_column_error(6, e))?,
        working_dir: row.get(7)?,
        tokens_used: row.get(8)?,
        cost_usd: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        port_id: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        cwd: row.get(4)?,
        transcript_path: row.get(5)?,
        tokens_used: row.get(6)?,
        cost_usd: row.get(7)?,
        started_at: row.get(8)?,
        ended_at: row.get(9)?,
        updated_at: row.get(10)?,
        created_in_env: row.get(11)?,
        last_touched_env: row.get(12)?,
    })
}

fn map_escalation_row(row: &rusqlite::Row) -> rusqlite::Result<Escalation> {
    Ok(Escalation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        port_id: row.get(2)?,
        title: row.get(3)?,
        reason: row.get(4)?,
        severity: row.get(5)?,
        status: row.get(6)?,
        resolution: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_pipeline_row(row: &rusqlite::Row) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        ports: Vec::new(),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_project_row(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        root_path: row.get(3)?,
        logical_root: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_conflict_row(row: &rusqlite::Row) -> rusqlite::Result<ConflictRecord> {
    let class: String = row.get(1)?;
    let local: String = row.get(3)?;
    let incoming: String = row.get(4)?;
    let fields: String = row.get(5)?;
    let resolution: Option<String> = row.get(9)?;

    Ok(ConflictRecord {
        id: row.get(0)?,
        entity_class: class.parse().map_err(|e: String| {
            json_column_error(1, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?,
        entity_key: row.get(2)?,
        local_version: serde_json::from_str(&local).map_err(|e| json_column_error(3, e))?,
        incoming_version: serde_json::from_str(&incoming).map_err(|e| json_column_error(4, e))?,
        differing_fields: serde_json::from_str(&fields).map_err(|e| json_column_error(5, e))?,
        source_environment: row.get(6)?,
        detected_at: row.get(7)?,
        resolved_at: row.get(8)?,
        resolution: resolution.and_then(|r| r.parse().ok()),
    })
}
