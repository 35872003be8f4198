//! Conversion between store rows and portable documents.
//!
//! Export direction: path-shaped fields go through [`PathResolver::to_logical`]
//! and environment-local fields are dropped. Import direction: path-shaped
//! fields go through [`PathResolver::to_absolute`]; a path whose variable is
//! not bound here is kept in logical form and reported as a warning.

use rusqlite::Connection;
use tracing::warn;

use crate::environment::PathResolver;
use crate::error::Result;
use crate::model::{EntityClass, Escalation, Pipeline, Port, Project, Session};
use crate::storage::sqlite::{
    get_escalation_in, get_pipeline_in, get_port_in, get_project_in, get_session_in,
    upsert_escalation_in, upsert_pipeline_in, upsert_port_in, upsert_project_in,
    upsert_session_in,
};
use crate::sync::types::{ProjectDocument, Record, SessionDocument, SyncRecord, SyncResult};

/// A store row of any synchronized class.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRow {
    Project(Project),
    Port(Port),
    Session(Session),
    Escalation(Escalation),
    Pipeline(Pipeline),
}

impl EntityRow {
    #[must_use]
    pub const fn class(&self) -> EntityClass {
        match self {
            Self::Project(_) => EntityClass::Project,
            Self::Port(_) => EntityClass::Port,
            Self::Session(_) => EntityClass::Session,
            Self::Escalation(_) => EntityClass::Escalation,
            Self::Pipeline(_) => EntityClass::Pipeline,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Project(p) => &p.id,
            Self::Port(p) => &p.id,
            Self::Session(s) => &s.id,
            Self::Escalation(e) => &e.id,
            Self::Pipeline(p) => &p.id,
        }
    }

    /// Load one row by class and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load(conn: &Connection, class: EntityClass, key: &str) -> Result<Option<Self>> {
        let row = match class {
            EntityClass::Project => get_project_in(conn, key)?.map(Self::Project),
            EntityClass::Port => get_port_in(conn, key)?.map(Self::Port),
            EntityClass::Session => get_session_in(conn, key)?.map(Self::Session),
            EntityClass::Escalation => get_escalation_in(conn, key)?.map(Self::Escalation),
            EntityClass::Pipeline => get_pipeline_in(conn, key)?.map(Self::Pipeline),
        };
        Ok(row)
    }

    /// Upsert the row. Returns whether it already existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write(&self, conn: &Connection) -> Result<bool> {
        match self {
            Self::Project(p) => upsert_project_in(conn, p),
            Self::Port(p) => upsert_port_in(conn, p),
            Self::Session(s) => upsert_session_in(conn, s),
            Self::Escalation(e) => upsert_escalation_in(conn, e),
            Self::Pipeline(p) => upsert_pipeline_in(conn, p),
        }
    }

    /// Exported form of the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be hashed.
    pub fn to_record(&self, resolver: &PathResolver) -> SyncResult<SyncRecord> {
        let record = match self {
            Self::Project(p) => SyncRecord::Project(Record::new(project_document(p, resolver))?),
            Self::Port(p) => SyncRecord::Port(Record::new(port_document(p, resolver))?),
            Self::Session(s) => SyncRecord::Session(Record::new(session_document(s, resolver))?),
            Self::Escalation(e) => SyncRecord::Escalation(Record::new(e.clone())?),
            Self::Pipeline(p) => {
                let mut pipeline = p.clone();
                pipeline.normalize_order();
                SyncRecord::Pipeline(Record::new(pipeline)?)
            }
        };
        Ok(record)
    }
}

/// A row built from an incoming record, plus unresolved-path warnings.
#[derive(Debug, Clone)]
pub struct LocalizedRow {
    pub row: EntityRow,
    pub warnings: Vec<String>,
}

impl SyncRecord {
    /// Build the store row for this record in the local environment.
    #[must_use]
    pub fn localize(&self, resolver: &PathResolver) -> LocalizedRow {
        let mut warnings = Vec::new();
        let row = match self {
            Self::Project(r) => EntityRow::Project(project_row(&r.data, resolver, &mut warnings)),
            Self::Port(r) => {
                let mut port = r.data.clone();
                port.working_dir =
                    localize_path(port.working_dir.as_deref(), resolver, &mut warnings);
                EntityRow::Port(port)
            }
            Self::Session(r) => EntityRow::Session(session_row(&r.data, resolver, &mut warnings)),
            Self::Escalation(r) => EntityRow::Escalation(r.data.clone()),
            Self::Pipeline(r) => {
                let mut pipeline = r.data.clone();
                pipeline.normalize_order();
                EntityRow::Pipeline(pipeline)
            }
        };
        LocalizedRow { row, warnings }
    }
}

fn localize_path(
    path: Option<&str>,
    resolver: &PathResolver,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let path = path?;
    match resolver.to_absolute(path) {
        Ok(absolute) => Some(absolute),
        Err(e) => {
            warn!(path, error = %e, "Keeping unresolvable path in logical form");
            warnings.push(e.to_string());
            Some(path.to_string())
        }
    }
}

fn port_document(port: &Port, resolver: &PathResolver) -> Port {
    let mut doc = port.clone();
    doc.working_dir = port.working_dir.as_deref().map(|p| resolver.to_logical(p));
    doc
}

fn session_document(session: &Session, resolver: &PathResolver) -> SessionDocument {
    SessionDocument {
        id: session.id.clone(),
        port_id: session.port_id.clone(),
        title: session.title.clone(),
        status: session.status.clone(),
        cwd: session.cwd.as_deref().map(|p| resolver.to_logical(p)),
        tokens_used: session.tokens_used,
        cost_usd: session.cost_usd,
        started_at: session.started_at,
        ended_at: session.ended_at,
        updated_at: session.updated_at,
        created_in_env: session.created_in_env.clone(),
        last_touched_env: session.last_touched_env.clone(),
    }
}

fn session_row(doc: &SessionDocument, resolver: &PathResolver, warnings: &mut Vec<String>) -> Session {
    Session {
        id: doc.id.clone(),
        port_id: doc.port_id.clone(),
        title: doc.title.clone(),
        status: doc.status.clone(),
        cwd: localize_path(doc.cwd.as_deref(), resolver, warnings),
        transcript_path: None,
        tokens_used: doc.tokens_used,
        cost_usd: doc.cost_usd,
        started_at: doc.started_at,
        ended_at: doc.ended_at,
        updated_at: doc.updated_at,
        created_in_env: doc.created_in_env.clone(),
        last_touched_env: doc.last_touched_env.clone(),
    }
}

fn project_document(project: &Project, resolver: &PathResolver) -> ProjectDocument {
    ProjectDocument {
        id: project.id.clone(),
        name: project.name.clone(),
        description: project.description.clone(),
        logical_root: project
            .logical_root
            .as_deref()
            .or(project.root_path.as_deref())
            .map(|p| resolver.to_logical(p)),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

fn project_row(doc: &ProjectDocument, resolver: &PathResolver, warnings: &mut Vec<String>) -> Project {
    let root_path = doc.logical_root.as_deref().and_then(|logical| {
        match resolver.to_absolute(logical) {
            Ok(absolute) => Some(absolute),
            Err(e) => {
                warn!(project = %doc.id, path = logical, error = %e, "Project root not resolvable here");
                warnings.push(e.to_string());
                None
            }
        }
    });

    // Re-derive the logical root so nested bindings compare canonically
    let logical_root = root_path
        .as_deref()
        .map(|p| resolver.to_logical(p))
        .or_else(|| doc.logical_root.clone());

    Project {
        id: doc.id.clone(),
        name: doc.name.clone(),
        description: doc.description.clone(),
        root_path,
        logical_root,
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Bindings;

    fn resolver() -> PathResolver {
        let mut bindings = Bindings::new();
        bindings.insert("workspace".into(), "/Users/test/playground".into());
        bindings.insert("claude_data".into(), "/Users/test/.claude".into());
        bindings.insert("home".into(), "/Users/test".into());
        PathResolver::new("home-mac", &bindings)
    }

    fn office_resolver() -> PathResolver {
        let mut bindings = Bindings::new();
        bindings.insert("workspace".into(), "/home/dev/work".into());
        PathResolver::new("office", &bindings)
    }

    #[test]
    fn test_session_export_drops_transcript_and_rewrites_cwd() {
        let mut session = Session::new("sess_1", "Pairing");
        session.cwd = Some("/Users/test/playground/harbor".into());
        session.transcript_path = Some("/Users/test/.claude/projects/xxx".into());
        session.created_in_env = Some("home-mac".into());

        let record = EntityRow::Session(session).to_record(&resolver()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["cwd"], "$workspace/harbor");
        assert!(json.get("transcript_path").is_none());
        assert_eq!(json["created_in_env"], "home-mac");
    }

    #[test]
    fn test_project_export_prefers_logical_root() {
        let mut project = Project::new("harbor", Some("/Users/test/playground/harbor".into()));
        let record = EntityRow::Project(project.clone()).to_record(&resolver()).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap()["logical_root"], "$workspace/harbor");
        assert!(serde_json::to_value(&record).unwrap().get("root_path").is_none());

        project.logical_root = Some("$home/elsewhere".into());
        let record = EntityRow::Project(project).to_record(&resolver()).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap()["logical_root"], "$home/elsewhere");
    }

    #[test]
    fn test_localize_resolves_in_other_environment() {
        let mut port = Port::new("port_1", "Resolver");
        port.working_dir = Some("/Users/test/playground/harbor".into());
        let record = EntityRow::Port(port).to_record(&resolver()).unwrap();

        let localized = record.localize(&office_resolver());
        assert!(localized.warnings.is_empty());
        match localized.row {
            EntityRow::Port(p) => assert_eq!(p.working_dir.as_deref(), Some("/home/dev/work/harbor")),
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn test_localize_keeps_unbound_logical_path() {
        let mut session = Session::new("sess_1", "Pairing");
        session.cwd = Some("/Users/test/.claude/projects/xxx".into());
        let record = EntityRow::Session(session).to_record(&resolver()).unwrap();

        let localized = record.localize(&office_resolver());
        assert_eq!(localized.warnings.len(), 1);
        match localized.row {
            EntityRow::Session(s) => {
                assert_eq!(s.cwd.as_deref(), Some("$claude_data/projects/xxx"));
                assert!(s.transcript_path.is_none());
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn test_project_root_absent_when_unresolvable() {
        let mut project = Project::new("notes", None);
        project.logical_root = Some("$home/Documents".into());
        let record = EntityRow::Project(project).to_record(&resolver()).unwrap();

        match record.localize(&office_resolver()).row {
            EntityRow::Project(p) => {
                assert_eq!(p.root_path, None);
                assert_eq!(p.logical_root.as_deref(), Some("$home/Documents"));
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn test_unmatched_absolute_path_travels_unchanged() {
        let mut port = Port::new("port_1", "Logs");
        port.working_dir = Some("/var/log/system.log".into());
        let record = EntityRow::Port(port).to_record(&resolver()).unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap()["working_dir"],
            "/var/log/system.log"
        );
    }
}
