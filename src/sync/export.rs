//! JSONL export functionality.
//!
//! This module writes the store's synchronized entities as portable
//! documents, one JSONL file per class plus `manifest.json`.
//!
//! # Snapshot Mode
//!
//! Exports use **snapshot mode**: each file holds the current state of all
//! records of its class, sorted by primary key. Git tracks the history.
//! Records whose content did not change keep their previous `exported_at`,
//! so an export over an unchanged store leaves every file byte-identical.
//!
//! # Safety Checks
//!
//! Before overwriting, the exporter checks for records that would be "lost"
//! (present in the existing document but not in the store). Use `force` to
//! override.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::environment::PathResolver;
use crate::error::Result;
use crate::model::EntityClass;
use crate::storage::sqlite::SqliteStorage;
use crate::sync::document::EntityRow;
use crate::sync::file::{
    atomic_write, ensure_gitignore, read_jsonl, read_manifest, render_jsonl, write_manifest,
};
use crate::sync::hash::{bytes_hash, has_changed};
use crate::sync::types::{
    ClassDocument, ExportScope, ExportStats, Manifest, ManifestEntry, Snapshot, SyncError,
    SyncRecord,
};

/// Version written into `manifest.json`.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Exporter for the portable documents.
///
/// Reads rows from the store, rewrites path fields through the current
/// environment's resolver and writes the documents into `output_dir`.
pub struct Exporter<'a> {
    storage: &'a SqliteStorage,
    resolver: &'a PathResolver,
    output_dir: PathBuf,
}

impl<'a> Exporter<'a> {
    /// Create a new exporter writing into `output_dir`.
    #[must_use]
    pub fn new(storage: &'a SqliteStorage, resolver: &'a PathResolver, output_dir: PathBuf) -> Self {
        Self {
            storage,
            resolver,
            output_dir,
        }
    }

    /// Get the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Build an in-memory snapshot of the rows in `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn snapshot(&self, scope: &ExportScope) -> Result<Snapshot> {
        let mut documents = Vec::new();
        for class in scope.classes() {
            documents.push(ClassDocument {
                class,
                records: self.class_records(class, scope)?,
            });
        }

        Ok(Snapshot {
            produced_at: Utc::now().to_rfc3339(),
            source_environment: Some(self.resolver.environment().to_string()),
            documents,
        })
    }

    /// Export the rows in `scope` to the output directory.
    ///
    /// With an ID filter, records of other IDs already in a document are
    /// carried over untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Database queries fail
    /// - File writes fail
    /// - Safety check fails (records would be lost) and `force` is false
    pub fn export(&self, scope: &ExportScope, force: bool) -> Result<ExportStats> {
        fs::create_dir_all(&self.output_dir)?;
        ensure_gitignore(&self.output_dir)?;

        let mut stats = ExportStats::default();

        for class in scope.classes() {
            self.export_class(class, scope, force, &mut stats)?;
        }

        let manifest_changed = self.refresh_manifest(!stats.is_unchanged())?;
        if manifest_changed {
            stats.files_written.push(crate::sync::file::MANIFEST_FILE.to_string());
        }

        info!(
            dir = %self.output_dir.display(),
            records = stats.total(),
            written = stats.files_written.len(),
            "Export complete"
        );
        Ok(stats)
    }

    fn class_records(&self, class: EntityClass, scope: &ExportScope) -> Result<Vec<SyncRecord>> {
        load_rows(self.storage, class)?
            .into_iter()
            .filter(|row| scope.includes_id(row.key()))
            .map(|row| row.to_record(self.resolver).map_err(Into::into))
            .collect()
    }

    fn export_class(
        &self,
        class: EntityClass,
        scope: &ExportScope,
        force: bool,
        stats: &mut ExportStats,
    ) -> Result<()> {
        let path = self.output_dir.join(class.file_name());
        let existing = match read_jsonl(&path) {
            Ok(records) => records,
            Err(e) if force => {
                debug!(file = %path.display(), error = %e, "Ignoring unreadable document");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        if !force {
            let stored: HashSet<String> = self.storage.list_ids(class)?.into_iter().collect();
            check_for_lost_records(class, &existing, &stored, scope)?;
        }

        let previous: HashMap<String, SyncRecord> = existing
            .into_iter()
            .map(|record| (record.key().to_string(), record))
            .collect();

        let mut records = self.class_records(class, scope)?;
        for record in &mut records {
            if let Some(old) = previous.get(record.key()) {
                if !has_changed(record.content_hash(), Some(old.content_hash())) {
                    record.set_exported_at(old.exported_at().to_string());
                }
            }
        }

        if !scope.ids.is_empty() {
            let refreshed: HashSet<String> = records.iter().map(|r| r.key().to_string()).collect();
            records.extend(
                previous
                    .into_values()
                    .filter(|r| !scope.includes_id(r.key()) && !refreshed.contains(r.key())),
            );
        }
        records.sort_by(|a, b| a.key().cmp(b.key()));

        stats.classes.insert(class, records.len());

        let content = render_jsonl(&records)?;
        let current = fs::read_to_string(&path).ok();
        let file_name = class.file_name().to_string();

        if current.as_deref() == Some(content.as_str()) || (current.is_none() && records.is_empty()) {
            stats.files_unchanged.push(file_name);
        } else {
            atomic_write(&path, &content)?;
            debug!(file = %path.display(), records = records.len(), "Wrote document");
            stats.files_written.push(file_name);
        }

        Ok(())
    }

    /// Rewrite `manifest.json` when a document changed or the manifest is
    /// missing or stale. Returns whether it was written.
    fn refresh_manifest(&self, documents_changed: bool) -> Result<bool> {
        let mut classes = BTreeMap::new();
        for class in EntityClass::ALL {
            let path = self.output_dir.join(class.file_name());
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            classes.insert(
                class,
                ManifestEntry {
                    file: class.file_name().to_string(),
                    count: content.lines().filter(|l| !l.trim().is_empty()).count(),
                    hash: bytes_hash(content.as_bytes()),
                },
            );
        }

        let previous = read_manifest(&self.output_dir).unwrap_or(None);
        let up_to_date = previous.as_ref().is_some_and(|m| m.classes == classes);
        if up_to_date && !documents_changed {
            return Ok(false);
        }

        let manifest = Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            produced_at: Utc::now().to_rfc3339(),
            source_environment: Some(self.resolver.environment().to_string()),
            classes,
        };
        write_manifest(&self.output_dir, &manifest)?;
        Ok(true)
    }
}

/// Load every row of one class, ordered by primary key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn load_rows(storage: &SqliteStorage, class: EntityClass) -> Result<Vec<EntityRow>> {
    let rows = match class {
        EntityClass::Project => storage
            .list_projects()?
            .into_iter()
            .map(EntityRow::Project)
            .collect(),
        EntityClass::Port => storage.list_ports()?.into_iter().map(EntityRow::Port).collect(),
        EntityClass::Session => storage
            .list_sessions()?
            .into_iter()
            .map(EntityRow::Session)
            .collect(),
        EntityClass::Escalation => storage
            .list_escalations()?
            .into_iter()
            .map(EntityRow::Escalation)
            .collect(),
        EntityClass::Pipeline => storage
            .list_pipelines()?
            .into_iter()
            .map(EntityRow::Pipeline)
            .collect(),
    };
    Ok(rows)
}

/// Refuse to drop records that exist in the document but not in the store.
fn check_for_lost_records(
    class: EntityClass,
    existing: &[SyncRecord],
    stored: &HashSet<String>,
    scope: &ExportScope,
) -> std::result::Result<(), SyncError> {
    let mut missing: Vec<String> = existing
        .iter()
        .map(SyncRecord::key)
        .filter(|key| scope.includes_id(key) && !stored.contains(*key))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    Err(SyncError::WouldLoseRecords { class, missing })
}
