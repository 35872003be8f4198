//! Sync types for JSONL export/import.
//!
//! This module defines the record types used in the portable documents.
//! Each record wraps an entity's exported form with sync metadata.
//!
//! Exported forms differ from store rows in two ways: path-shaped fields are
//! logical (`$variable/suffix`), and environment-local fields are absent.
//! Ports, escalations and pipelines have no environment-local fields and
//! travel as their model types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{ConflictRecord, EntityClass, Escalation, Pipeline, Port};

/// Tagged union for JSONL records.
///
/// The serde tag attribute makes each line look like
/// `{"type":"port","id":"port_123",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncRecord {
    Project(ProjectRecord),
    Port(PortRecord),
    Session(SessionRecord),
    Escalation(EscalationRecord),
    Pipeline(PipelineRecord),
}

/// An exported document with sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// The exported document.
    #[serde(flatten)]
    pub data: T,
    /// SHA256 hash of the serialized document.
    pub content_hash: String,
    /// RFC 3339 timestamp when this record was exported.
    pub exported_at: String,
}

impl<T: Serialize> Record<T> {
    /// Wrap a document, hashing it and stamping the export time.
    pub fn new(data: T) -> SyncResult<Self> {
        let content_hash = super::hash::content_hash(&data)?;
        Ok(Self {
            data,
            content_hash,
            exported_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

pub type ProjectRecord = Record<ProjectDocument>;
pub type PortRecord = Record<Port>;
pub type SessionRecord = Record<SessionDocument>;
pub type EscalationRecord = Record<Escalation>;
pub type PipelineRecord = Record<Pipeline>;

/// Exported form of a session. `transcript_path` never leaves the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub id: String,
    pub port_id: Option<String>,
    pub title: String,
    pub status: String,
    /// Logical when the directory was under a bound variable.
    pub cwd: Option<String>,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub cost_usd: f64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub updated_at: i64,
    pub created_in_env: Option<String>,
    pub last_touched_env: Option<String>,
}

/// Exported form of a project. Only the logical root travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub logical_root: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncRecord {
    /// The entity class of this record.
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

    /// Primary key of the wrapped document.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Project(r) => &r.data.id,
            Self::Port(r) => &r.data.id,
            Self::Session(r) => &r.data.id,
            Self::Escalation(r) => &r.data.id,
            Self::Pipeline(r) => &r.data.id,
        }
    }

    /// Hash carried by the record.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        match self {
            Self::Project(r) => &r.content_hash,
            Self::Port(r) => &r.content_hash,
            Self::Session(r) => &r.content_hash,
            Self::Escalation(r) => &r.content_hash,
            Self::Pipeline(r) => &r.content_hash,
        }
    }

    /// Export timestamp carried by the record.
    #[must_use]
    pub fn exported_at(&self) -> &str {
        match self {
            Self::Project(r) => &r.exported_at,
            Self::Port(r) => &r.exported_at,
            Self::Session(r) => &r.exported_at,
            Self::Escalation(r) => &r.exported_at,
            Self::Pipeline(r) => &r.exported_at,
        }
    }

    /// Replace the export timestamp.
    pub fn set_exported_at(&mut self, exported_at: String) {
        match self {
            Self::Project(r) => r.exported_at = exported_at,
            Self::Port(r) => r.exported_at = exported_at,
            Self::Session(r) => r.exported_at = exported_at,
            Self::Escalation(r) => r.exported_at = exported_at,
            Self::Pipeline(r) => r.exported_at = exported_at,
        }
    }

    /// The wrapped document alone, without sync metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized.
    pub fn document(&self) -> SyncResult<serde_json::Value> {
        let value = match self {
            Self::Project(r) => serde_json::to_value(&r.data)?,
            Self::Port(r) => serde_json::to_value(&r.data)?,
            Self::Session(r) => serde_json::to_value(&r.data)?,
            Self::Escalation(r) => serde_json::to_value(&r.data)?,
            Self::Pipeline(r) => serde_json::to_value(&r.data)?,
        };
        Ok(value)
    }

    /// Rebuild a record from a bare document of a known class.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not have the class's shape.
    pub fn from_document(class: EntityClass, document: serde_json::Value) -> SyncResult<Self> {
        let record = match class {
            EntityClass::Project => Self::Project(Record::new(serde_json::from_value(document)?)?),
            EntityClass::Port => Self::Port(Record::new(serde_json::from_value(document)?)?),
            EntityClass::Session => Self::Session(Record::new(serde_json::from_value(document)?)?),
            EntityClass::Escalation => {
                Self::Escalation(Record::new(serde_json::from_value(document)?)?)
            }
            EntityClass::Pipeline => Self::Pipeline(Record::new(serde_json::from_value(document)?)?),
        };
        Ok(record)
    }
}

// ── Strategy & options ────────────────────────────────────────

/// Strategy for an entity that exists locally and remotely with different
/// shared fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the local row; the incoming document is skipped.
    KeepLocal,
    /// Overwrite with the incoming document.
    KeepRemote,
    /// The incoming snapshot is the latest write, so it overwrites.
    /// Behaves exactly like [`MergeStrategy::KeepRemote`].
    LastWriteWins,
    /// Leave the row alone and record a conflict for the operator.
    #[default]
    Manual,
}

impl MergeStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::LastWriteWins => "last_write_wins",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_remote" | "remote" => Ok(Self::KeepRemote),
            "last_write_wins" | "lww" => Ok(Self::LastWriteWins),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown merge strategy '{other}'")),
        }
    }
}

/// Options for one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub strategy: MergeStrategy,
    /// Treat every difference as a plain skip.
    pub skip_conflicts: bool,
    /// Compute the result without writing.
    pub dry_run: bool,
}

/// Which entities an export covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportScope {
    /// Classes to export. Empty means all.
    pub classes: Vec<EntityClass>,
    /// Primary keys to refresh. Empty means every row.
    pub ids: Vec<String>,
}

impl ExportScope {
    /// Every class, every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Classes covered, in document order.
    #[must_use]
    pub fn classes(&self) -> Vec<EntityClass> {
        EntityClass::ALL
            .into_iter()
            .filter(|c| self.classes.is_empty() || self.classes.contains(c))
            .collect()
    }

    /// Whether a row with this key is refreshed by the export.
    #[must_use]
    pub fn includes_id(&self, id: &str) -> bool {
        self.ids.is_empty() || self.ids.iter().any(|i| i == id)
    }
}

// ── Results ───────────────────────────────────────────────────

/// Per-class statistics for import operations.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    /// Records inserted or overwritten.
    pub imported: usize,
    /// Records that differed but were left alone.
    pub skipped: usize,
    /// Records whose shared fields already matched.
    pub unchanged: usize,
    /// Records that produced a conflict.
    pub conflicts: usize,
}

impl EntityStats {
    /// Total records processed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.imported + self.skipped + self.unchanged + self.conflicts
    }

    fn absorb(&mut self, other: &Self) {
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
        self.conflicts += other.conflicts;
    }
}

/// A per-entity failure that did not stop the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub class: EntityClass,
    /// Primary key, or `line N` when the record could not be parsed.
    pub key: String,
    pub message: String,
}

/// Outcome of an import run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub dry_run: bool,
    pub classes: BTreeMap<EntityClass, EntityStats>,
    pub conflicts: Vec<ConflictRecord>,
    pub errors: Vec<ImportFailure>,
    /// Logical paths that could not be resolved locally.
    pub warnings: Vec<String>,
}

impl ImportResult {
    /// Stats for one class, creating the entry on first use.
    pub fn stats_mut(&mut self, class: EntityClass) -> &mut EntityStats {
        self.classes.entry(class).or_default()
    }

    /// Stats for one class.
    #[must_use]
    pub fn stats(&self, class: EntityClass) -> EntityStats {
        self.classes.get(&class).cloned().unwrap_or_default()
    }

    /// Sum over all classes.
    #[must_use]
    pub fn totals(&self) -> EntityStats {
        let mut total = EntityStats::default();
        for stats in self.classes.values() {
            total.absorb(stats);
        }
        total
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: Self) {
        for (class, stats) in &other.classes {
            self.stats_mut(*class).absorb(stats);
        }
        self.conflicts.extend(other.conflicts);
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.dry_run |= other.dry_run;
    }

    /// Whether applying would change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let totals = self.totals();
        totals.imported > 0 || totals.conflicts > 0
    }
}

/// Statistics for an export operation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExportStats {
    /// Records written per class.
    pub classes: BTreeMap<EntityClass, usize>,
    /// Document files whose content changed.
    pub files_written: Vec<String>,
    /// Document files already up to date.
    pub files_unchanged: Vec<String>,
}

impl ExportStats {
    /// Total number of records exported.
    #[must_use]
    pub fn total(&self) -> usize {
        self.classes.values().sum()
    }

    /// Returns true if no document changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.files_written.is_empty()
    }
}

/// One class's documents inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDocument {
    pub class: EntityClass,
    pub records: Vec<SyncRecord>,
}

/// An ordered bundle of per-class documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub produced_at: String,
    pub source_environment: Option<String>,
    pub documents: Vec<ClassDocument>,
}

impl Snapshot {
    /// Total number of records across classes.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.documents.iter().map(|d| d.records.len()).sum()
    }

    /// Records of one class.
    #[must_use]
    pub fn records(&self, class: EntityClass) -> &[SyncRecord] {
        self.documents
            .iter()
            .find(|d| d.class == class)
            .map_or(&[], |d| d.records.as_slice())
    }
}

/// Per-class entry in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub count: usize,
    /// SHA256 of the document file's bytes.
    pub hash: String,
}

/// Snapshot metadata written next to the documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub produced_at: String,
    pub source_environment: Option<String>,
    pub classes: BTreeMap<EntityClass, ManifestEntry>,
}

/// Information about a document file.
#[derive(Debug, Clone, Serialize)]
pub struct ExportFileInfo {
    /// File name (e.g., "ports.jsonl").
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Number of lines (records) in the file.
    pub line_count: usize,
}

/// Sync-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Export would drop records present in the existing document.
    #[error("export would lose {} {class} record(s) missing from the store: {}", missing.len(), missing.join(", "))]
    WouldLoseRecords {
        class: EntityClass,
        missing: Vec<String>,
    },

    /// Invalid record format.
    #[error("Invalid record at line {line}: {message}")]
    InvalidRecord {
        /// Line number (1-indexed).
        line: usize,
        /// Error message.
        message: String,
    },
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Io(e) => Self::Io(e),
            SyncError::Json(e) => Self::Json(e),
            other => Self::Sync(other.to_string()),
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let record = SyncRecord::Port(Record::new(Port::new("port_1", "Resolver")).unwrap());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "port");
        assert_eq!(json["id"], "port_1");
        assert_eq!(json["content_hash"].as_str().unwrap().len(), 64);

        let back: SyncRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.class(), EntityClass::Port);
        assert_eq!(back.key(), "port_1");
    }

    #[test]
    fn test_document_strips_metadata() {
        let record = SyncRecord::Port(Record::new(Port::new("port_1", "Resolver")).unwrap());
        let document = record.document().unwrap();
        assert!(document.get("content_hash").is_none());
        assert!(document.get("type").is_none());

        let rebuilt = SyncRecord::from_document(EntityClass::Port, document).unwrap();
        assert_eq!(rebuilt.content_hash(), record.content_hash());
    }

    #[test]
    fn test_merge_strategy_parse() {
        assert_eq!("keep-local".parse::<MergeStrategy>().unwrap(), MergeStrategy::KeepLocal);
        assert_eq!("LWW".parse::<MergeStrategy>().unwrap(), MergeStrategy::LastWriteWins);
        assert_eq!(MergeStrategy::default(), MergeStrategy::Manual);
        assert!("prefer_newer".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_export_scope() {
        let scope = ExportScope {
            classes: vec![EntityClass::Pipeline, EntityClass::Port],
            ids: vec![],
        };
        assert_eq!(scope.classes(), vec![EntityClass::Port, EntityClass::Pipeline]);
        assert!(scope.includes_id("anything"));
        assert_eq!(ExportScope::all().classes().len(), 5);
    }

    #[test]
    fn test_import_result_merge() {
        let mut a = ImportResult::default();
        a.stats_mut(EntityClass::Port).imported = 2;
        let mut b = ImportResult::default();
        b.stats_mut(EntityClass::Port).unchanged = 3;
        b.stats_mut(EntityClass::Session).conflicts = 1;

        a.merge(b);
        assert_eq!(a.stats(EntityClass::Port).total(), 5);
        assert_eq!(a.totals().conflicts, 1);
        assert!(a.has_changes());
    }
}
