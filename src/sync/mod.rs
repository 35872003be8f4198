//! Portable state documents and their synchronization.
//!
//! - **Export**: store rows → per-class JSONL documents with logical paths
//! - **Import**: documents → store, with merge strategies and conflict records
//! - **Hashing**: SHA256 content hashes for change detection
//! - **Orchestration**: push/pull through a git transport
//!
//! # File Format
//!
//! Each JSONL file holds one record per line with a `type` tag, sorted by key:
//! ```json
//! {"type":"port","id":"port_1","title":"Resolver","working_dir":"$workspace/harbor",...,"content_hash":"abc","exported_at":"2026-01-20T10:00:00Z"}
//! ```
//!
//! Environment-local fields never travel: session transcripts stay on the
//! machine that wrote them and project roots travel only in logical form.

mod compare;
mod document;
mod export;
mod file;
mod hash;
mod import;
mod orchestrator;
mod status;
mod transport;
mod types;

pub use compare::{differing_fields, IGNORED_FIELDS};
pub use document::{EntityRow, LocalizedRow};
pub use export::{load_rows, Exporter, MANIFEST_FORMAT_VERSION};
pub use file::{
    atomic_write, count_lines, ensure_gitignore, file_size, gitignore_content, parse_jsonl,
    read_jsonl, read_manifest, render_jsonl, MANIFEST_FILE,
};
pub use hash::{bytes_hash, content_hash, has_changed};
pub use import::Importer;
pub use orchestrator::{
    DiffReport, DiffSource, PullPhase, PullReport, PushPhase, PushReport, StatusReport,
    SyncOrchestrator, STATE_DIR,
};
pub use status::{
    local_files, print_conflicts, print_diff, print_export, print_import_result, print_pull,
    print_push, print_status,
};
pub use transport::{GitTransport, Transport, TransportError, TransportResult};
pub use types::{
    ClassDocument, EntityStats, EscalationRecord, ExportFileInfo, ExportScope, ExportStats,
    ImportFailure, ImportOptions, ImportResult, Manifest, ManifestEntry, MergeStrategy,
    PipelineRecord, PortRecord, ProjectDocument, ProjectRecord, Record, SessionDocument,
    SessionRecord, Snapshot, SyncError, SyncRecord, SyncResult,
};
