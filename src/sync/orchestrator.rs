//! Push/pull orchestration over a [`Transport`].
//!
//! Push: export the store into the sync tree, commit, push.
//! Pull: fetch, import the documents that changed upstream, then bring the
//! sync tree to upstream. Pull never commits or pushes.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::environment::PathResolver;
use crate::error::{Error, Result};
use crate::model::{ConflictRecord, ConflictResolution, EntityClass};
use crate::storage::SqliteStorage;
use crate::sync::compare::differing_fields;
use crate::sync::document::EntityRow;
use crate::sync::export::Exporter;
use crate::sync::file::{parse_jsonl, MANIFEST_FILE};
use crate::sync::import::Importer;
use crate::sync::transport::{Transport, TransportError};
use crate::sync::types::{
    ExportScope, ExportStats, ImportOptions, ImportResult, Manifest, MergeStrategy,
};

/// Directory inside the sync repository that holds the documents.
pub const STATE_DIR: &str = "state";

/// Where a push stands.
///
/// Runs `Idle -> Exporting -> Committing -> Pushing -> Done`. A push that
/// upstream refuses ends in `Failed`; `retryable` is set when pulling first
/// can fix it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum PushPhase {
    Idle,
    Exporting,
    Committing,
    Pushing,
    Done,
    Failed { retryable: bool },
}

/// Where a pull stands.
///
/// Runs `Idle -> Fetching -> Importing`, then `Done`, or
/// `AwaitingResolution` when the import left open conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum PullPhase {
    Idle,
    Fetching,
    Importing,
    AwaitingResolution,
    Done,
}

/// Outcome of a push.
#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub phase: PushPhase,
    pub export: ExportStats,
    pub records: usize,
    pub commit: Option<String>,
    pub message: Option<String>,
    pub pushed: bool,
}

/// Outcome of a pull.
#[derive(Debug, Clone, Serialize)]
pub struct PullReport {
    pub phase: PullPhase,
    pub changed_files: Vec<String>,
    pub import: ImportResult,
}

/// Where the non-local side of a diff came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DiffSource {
    Conflict { id: String },
    Upstream,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub class: EntityClass,
    pub key: String,
    pub source: DiffSource,
    pub local: Option<Value>,
    pub foreign: Option<Value>,
    pub differing_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub environment: String,
    pub repo_dir: String,
    pub ahead: usize,
    pub behind: usize,
    pub open_conflicts: usize,
    pub local_records: usize,
    /// Dry-run import of every upstream document, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_preview: Option<ImportResult>,
}

/// Drives export/import through a transport.
pub struct SyncOrchestrator<'a, T: Transport> {
    storage: &'a mut SqliteStorage,
    resolver: &'a PathResolver,
    transport: T,
    actor: String,
    push_phase: PushPhase,
    pull_phase: PullPhase,
}

impl<'a, T: Transport> SyncOrchestrator<'a, T> {
    #[must_use]
    pub fn new(storage: &'a mut SqliteStorage, resolver: &'a PathResolver, transport: T) -> Self {
        Self {
            storage,
            resolver,
            transport,
            actor: format!("sync@{}", resolver.environment()),
            push_phase: PushPhase::Idle,
            pull_phase: PullPhase::Idle,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    #[must_use]
    pub const fn push_phase(&self) -> PushPhase {
        self.push_phase
    }

    #[must_use]
    pub const fn pull_phase(&self) -> PullPhase {
        self.pull_phase
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_push_phase(&mut self, phase: PushPhase) {
        info!(from = ?self.push_phase, to = ?phase, "Push phase");
        self.push_phase = phase;
    }

    fn set_pull_phase(&mut self, phase: PullPhase) {
        info!(from = ?self.pull_phase, to = ?phase, "Pull phase");
        self.pull_phase = phase;
    }

    fn fail_push(&mut self, err: Error, retryable: bool) -> Error {
        warn!(error = %err, retryable, "Push failed");
        self.set_push_phase(PushPhase::Failed { retryable });
        err
    }

    fn transport_failure(&mut self, err: TransportError) -> Error {
        let retryable = err.is_retryable();
        self.fail_push(err.into(), retryable)
    }

    /// Export, commit and push.
    ///
    /// No retry is attempted. A rejected push leaves the phase at
    /// `Failed { retryable: true }`; pull and push again.
    ///
    /// # Errors
    ///
    /// Returns the export, commit or push failure.
    pub fn push(&mut self, force: bool) -> Result<PushReport> {
        self.set_push_phase(PushPhase::Exporting);
        let state_dir = self.transport.root().join(STATE_DIR);
        let exported = Exporter::new(&*self.storage, self.resolver, state_dir)
            .export(&ExportScope::all(), force);
        let export = match exported {
            Ok(stats) => stats,
            Err(e) => return Err(self.fail_push(e, false)),
        };
        let records = export.total();

        self.set_push_phase(PushPhase::Committing);
        let message = format!(
            "sync: {} {} ({records} records)",
            self.resolver.environment(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        let commit = match self.transport.commit_all(&[STATE_DIR], &message) {
            Ok(commit) => commit,
            Err(e) => return Err(self.transport_failure(e)),
        };

        let ahead = match self.transport.ahead_behind() {
            Ok((ahead, _)) => ahead,
            Err(e) => return Err(self.transport_failure(e)),
        };

        let mut pushed = false;
        if commit.is_some() || ahead > 0 {
            self.set_push_phase(PushPhase::Pushing);
            if let Err(e) = self.transport.push() {
                return Err(self.transport_failure(e));
            }
            pushed = true;
        }

        self.set_push_phase(PushPhase::Done);
        info!(records, pushed, commit = ?commit, "Push complete");
        Ok(PushReport {
            phase: self.push_phase,
            export,
            records,
            message: commit.as_ref().map(|_| message),
            commit,
            pushed,
        })
    }

    /// Fetch and import the documents that changed upstream.
    ///
    /// With `dry_run` the sync tree is left where it is.
    ///
    /// # Errors
    ///
    /// Returns transport failures. Per-entity import failures are reported
    /// in the result.
    pub fn pull(&mut self, options: ImportOptions) -> Result<PullReport> {
        self.set_pull_phase(PullPhase::Fetching);
        self.transport.fetch()?;
        let changed = self.transport.changed_files(STATE_DIR)?;

        self.set_pull_phase(PullPhase::Importing);
        let import = self.import_upstream(&changed, options)?;

        if !options.dry_run {
            self.transport.integrate_upstream()?;
        }

        let phase = if !options.dry_run && !import.conflicts.is_empty() {
            PullPhase::AwaitingResolution
        } else {
            PullPhase::Done
        };
        self.set_pull_phase(phase);

        Ok(PullReport {
            phase,
            changed_files: changed,
            import,
        })
    }

    fn import_upstream(&mut self, files: &[String], options: ImportOptions) -> Result<ImportResult> {
        let source = self.upstream_manifest()?.and_then(|m| m.source_environment);
        let mut importer = Importer::new(&mut *self.storage, self.resolver, options)
            .with_actor(&self.actor)
            .with_source_environment(source);

        let mut result = ImportResult {
            dry_run: options.dry_run,
            ..ImportResult::default()
        };
        for class in EntityClass::ALL {
            let path = state_path(class.file_name());
            if !files.iter().any(|f| f == &path) {
                continue;
            }
            if let Some(content) = self.transport.read_upstream(&path)? {
                result.merge(importer.import_document(class, &content));
            }
        }
        Ok(result)
    }

    fn upstream_manifest(&self) -> Result<Option<Manifest>> {
        let Some(content) = self.transport.read_upstream(&state_path(MANIFEST_FILE))? else {
            return Ok(None);
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable upstream manifest");
                Ok(None)
            }
        }
    }

    /// Ahead/behind counts versus upstream, optionally with a dry-run import.
    ///
    /// # Errors
    ///
    /// Returns transport or store failures.
    pub fn status(&mut self, check_import: bool) -> Result<StatusReport> {
        self.transport.fetch()?;
        let (ahead, behind) = self.transport.ahead_behind()?;

        let import_preview = if check_import {
            let files = self.transport.list_upstream(STATE_DIR)?;
            let options = ImportOptions {
                strategy: MergeStrategy::Manual,
                skip_conflicts: false,
                dry_run: true,
            };
            Some(self.import_upstream(&files, options)?)
        } else {
            None
        };

        Ok(StatusReport {
            environment: self.resolver.environment().to_string(),
            repo_dir: self.transport.root().display().to_string(),
            ahead,
            behind,
            open_conflicts: self.storage.list_conflicts(false)?.len(),
            local_records: self.storage.entity_counts()?.total(),
            import_preview,
        })
    }

    /// Local exported version against the foreign one.
    ///
    /// The foreign side is the open conflict's incoming version if there is
    /// one, else the upstream document.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if neither side has the entity.
    pub fn diff(&self, class: EntityClass, key: &str) -> Result<DiffReport> {
        let local = match EntityRow::load(self.storage.conn(), class, key)? {
            Some(row) => Some(row.to_record(self.resolver)?.document()?),
            None => None,
        };

        let (source, foreign) = if let Some(conflict) = self.storage.open_conflict_for(class, key)? {
            (DiffSource::Conflict { id: conflict.id }, Some(conflict.incoming_version))
        } else {
            match self.upstream_document(class, key)? {
                Some(doc) => (DiffSource::Upstream, Some(doc)),
                None => (DiffSource::Missing, None),
            }
        };

        if local.is_none() && foreign.is_none() {
            return Err(Error::EntityNotFound {
                class: class.to_string(),
                id: key.to_string(),
            });
        }

        let fields = differing_fields(
            local.as_ref().unwrap_or(&Value::Null),
            foreign.as_ref().unwrap_or(&Value::Null),
        );
        Ok(DiffReport {
            class,
            key: key.to_string(),
            source,
            local,
            foreign,
            differing_fields: fields,
        })
    }

    fn upstream_document(&self, class: EntityClass, key: &str) -> Result<Option<Value>> {
        let Some(content) = self.transport.read_upstream(&state_path(class.file_name()))? else {
            return Ok(None);
        };
        let Some(record) = parse_jsonl(&content)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .find(|r| r.key() == key)
        else {
            return Ok(None);
        };
        // Same canonical form the importer compares against
        let canonical = record.localize(self.resolver).row.to_record(self.resolver)?;
        Ok(Some(canonical.document()?))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<ConflictRecord>> {
        self.storage.list_conflicts(include_resolved)
    }

    /// # Errors
    ///
    /// Returns `ConflictNotFound` if no open conflict has this ID.
    pub fn resolve_conflict(&mut self, id: &str, resolution: ConflictResolution) -> Result<ConflictRecord> {
        Importer::new(&mut *self.storage, self.resolver, ImportOptions::default())
            .with_actor(&self.actor)
            .resolve_conflict(id, resolution)
    }
}

fn state_path(file: &str) -> String {
    format!("{STATE_DIR}/{file}")
}
