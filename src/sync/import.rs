//! JSONL import functionality.
//!
//! This module reconciles incoming documents with the local store. Every
//! incoming record is compared against the local row in its exported form,
//! so path fields compare logically and environment tags never count as a
//! difference. Differences are settled by the [`MergeStrategy`].
//!
//! Each entity is written in its own transaction. A failure on one entity is
//! recorded in the result and the batch continues.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::environment::PathResolver;
use crate::error::{Error, Result};
use crate::model::{ConflictRecord, ConflictResolution, EntityClass};
use crate::storage::events::EventType;
use crate::storage::sqlite::{mark_conflict_resolved_in, SqliteStorage};
use crate::sync::compare::differing_fields;
use crate::sync::document::EntityRow;
use crate::sync::file::{parse_jsonl, read_manifest};
use crate::sync::types::{
    ImportFailure, ImportOptions, ImportResult, MergeStrategy, SyncRecord,
};

/// What happened to one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Imported,
    Skipped,
    Unchanged,
    Conflict,
}

/// Importer for the portable documents.
///
/// The importer merges records into the local store using the configured
/// [`ImportOptions`]. With `dry_run` it computes the same result without
/// writing anything.
pub struct Importer<'a> {
    storage: &'a mut SqliteStorage,
    resolver: &'a PathResolver,
    options: ImportOptions,
    actor: String,
    source_environment: Option<String>,
}

impl<'a> Importer<'a> {
    /// Create a new importer for the current environment's resolver.
    #[must_use]
    pub fn new(storage: &'a mut SqliteStorage, resolver: &'a PathResolver, options: ImportOptions) -> Self {
        let actor = format!("sync@{}", resolver.environment());
        Self {
            storage,
            resolver,
            options,
            actor,
            source_environment: None,
        }
    }

    /// Override the actor recorded in audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Record which environment produced the incoming documents.
    #[must_use]
    pub fn with_source_environment(mut self, source: Option<String>) -> Self {
        self.source_environment = source;
        self
    }

    /// Import every document found in a state directory.
    ///
    /// Documents are applied in [`EntityClass::ALL`] order. Missing files are
    /// skipped. The manifest, when present, names the source environment.
    ///
    /// # Errors
    ///
    /// Returns an error only if a document file exists but cannot be read.
    pub fn import_dir(&mut self, dir: &Path) -> Result<ImportResult> {
        if self.source_environment.is_none() {
            match read_manifest(dir) {
                Ok(manifest) => {
                    self.source_environment = manifest.and_then(|m| m.source_environment);
                }
                Err(e) => warn!(dir = %dir.display(), error = %e, "Ignoring unreadable manifest"),
            }
        }

        let mut result = ImportResult {
            dry_run: self.options.dry_run,
            ..ImportResult::default()
        };

        for class in EntityClass::ALL {
            let path = dir.join(class.file_name());
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            result.merge(self.import_document(class, &content));
        }

        Ok(result)
    }

    /// Import one class's JSONL document.
    ///
    /// Unparseable lines and records of the wrong class are reported as
    /// per-entity errors.
    pub fn import_document(&mut self, class: EntityClass, content: &str) -> ImportResult {
        let mut result = ImportResult {
            dry_run: self.options.dry_run,
            ..ImportResult::default()
        };
        let mut records = Vec::new();

        for parsed in parse_jsonl(content) {
            match parsed {
                Ok(record) if record.class() == class => records.push(record),
                Ok(record) => result.errors.push(ImportFailure {
                    class,
                    key: record.key().to_string(),
                    message: format!("{} record in the {class} document", record.class()),
                }),
                Err(e) => {
                    warn!(%class, error = %e, "Skipping unparseable record");
                    result.errors.push(ImportFailure {
                        class,
                        key: match &e {
                            crate::sync::SyncError::InvalidRecord { line, .. } => format!("line {line}"),
                            _ => "unknown".to_string(),
                        },
                        message: e.to_string(),
                    });
                }
            }
        }

        result.merge(self.import_records(records));
        result
    }

    /// Import a batch of records.
    pub fn import_records(&mut self, records: impl IntoIterator<Item = SyncRecord>) -> ImportResult {
        let mut result = ImportResult {
            dry_run: self.options.dry_run,
            ..ImportResult::default()
        };

        for record in records {
            let class = record.class();
            let key = record.key().to_string();

            match self.import_one(&record, &mut result) {
                Ok(outcome) => {
                    let stats = result.stats_mut(class);
                    match outcome {
                        Outcome::Imported => stats.imported += 1,
                        Outcome::Skipped => stats.skipped += 1,
                        Outcome::Unchanged => stats.unchanged += 1,
                        Outcome::Conflict => stats.conflicts += 1,
                    }
                    debug!(%class, key, ?outcome, "Processed record");
                }
                Err(e) => {
                    warn!(%class, key, error = %e, "Failed to import record");
                    result.errors.push(ImportFailure {
                        class,
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }

        let totals = result.totals();
        info!(
            imported = totals.imported,
            skipped = totals.skipped,
            unchanged = totals.unchanged,
            conflicts = totals.conflicts,
            errors = result.errors.len(),
            dry_run = self.options.dry_run,
            "Import batch complete"
        );
        result
    }

    fn import_one(&mut self, record: &SyncRecord, result: &mut ImportResult) -> Result<Outcome> {
        let class = record.class();
        let key = record.key();

        let localized = record.localize(self.resolver);
        // Incoming version expressed against this environment's bindings
        let incoming = localized.row.to_record(self.resolver)?;

        let Some(local_row) = EntityRow::load(self.storage.conn(), class, key)? else {
            self.write_row(&localized.row)?;
            result.warnings.extend(localized.warnings);
            return Ok(Outcome::Imported);
        };

        let local = local_row.to_record(self.resolver)?;
        if local.content_hash() == incoming.content_hash() {
            return Ok(Outcome::Unchanged);
        }

        let local_doc = local.document()?;
        let incoming_doc = incoming.document()?;
        let fields = differing_fields(&local_doc, &incoming_doc);
        if fields.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        if self.options.skip_conflicts {
            return Ok(Outcome::Skipped);
        }

        match self.options.strategy {
            MergeStrategy::KeepLocal => Ok(Outcome::Skipped),
            MergeStrategy::KeepRemote | MergeStrategy::LastWriteWins => {
                self.write_row(&localized.row)?;
                result.warnings.extend(localized.warnings);
                Ok(Outcome::Imported)
            }
            MergeStrategy::Manual => {
                let mut conflict = ConflictRecord::new(class, key, local_doc, incoming_doc, fields);
                conflict.source_environment = self.source_environment.clone();
                if !self.options.dry_run {
                    conflict.id = self.storage.record_conflict(&conflict, &self.actor)?;
                }
                info!(%class, key, conflict = %conflict.id, fields = ?conflict.differing_fields, "Conflict recorded");
                result.conflicts.push(conflict);
                Ok(Outcome::Conflict)
            }
        }
    }

    fn write_row(&mut self, row: &EntityRow) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }

        let class = row.class();
        self.storage.mutate("import_entity", &self.actor, |tx, ctx| {
            let existed = row.write(tx)?;
            let event = if existed {
                EventType::EntityOverwritten
            } else {
                EventType::EntityImported
            };
            ctx.record_event(class.as_str(), row.key(), event);
            Ok(())
        })
    }

    /// Settle an open conflict.
    ///
    /// `KeepLocal` discards the stored incoming version; `KeepRemote` applies
    /// it. Either way the record is marked resolved in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConflictNotFound` if no open conflict has this ID.
    pub fn resolve_conflict(&mut self, id: &str, resolution: ConflictResolution) -> Result<ConflictRecord> {
        let conflict = self
            .storage
            .get_conflict(id)?
            .filter(ConflictRecord::is_open)
            .ok_or_else(|| Error::ConflictNotFound { id: id.to_string() })?;

        let row = match resolution {
            ConflictResolution::KeepLocal => None,
            ConflictResolution::KeepRemote => {
                let record =
                    SyncRecord::from_document(conflict.entity_class, conflict.incoming_version.clone())?;
                let localized = record.localize(self.resolver);
                Some(localized.row)
            }
        };

        let class = conflict.entity_class;
        let key = conflict.entity_key.clone();
        self.storage.mutate("resolve_conflict", &self.actor, |tx, ctx| {
            if let Some(row) = &row {
                row.write(tx)?;
                ctx.record_event(class.as_str(), &key, EventType::EntityOverwritten);
            }
            mark_conflict_resolved_in(tx, id, resolution)?;
            ctx.record_change(
                class.as_str(),
                &key,
                EventType::ConflictResolved,
                None,
                Some(resolution.as_str().to_string()),
            );
            Ok(())
        })?;

        info!(conflict = id, %class, key, %resolution, "Conflict resolved");
        self.storage
            .get_conflict(id)?
            .ok_or_else(|| Error::ConflictNotFound { id: id.to_string() })
    }
}
