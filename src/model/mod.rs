//! Data models for Harbor.
//!
//! These are the store's row shapes for every synchronized entity class:
//! - Port (a unit of work)
//! - Session
//! - Escalation
//! - Pipeline (+ ordered port memberships)
//! - Project
//!
//! plus the [`EntityClass`] enumeration and persisted [`ConflictRecord`]s.
//!
//! Rows carry both machine-shared fields and environment-local fields;
//! the sync layer decides which of them travel.

pub mod conflict;
pub mod entity_class;
pub mod escalation;
pub mod pipeline;
pub mod port;
pub mod project;
pub mod session;

pub use conflict::{ConflictRecord, ConflictResolution};
pub use entity_class::EntityClass;
pub use escalation::Escalation;
pub use pipeline::{Pipeline, PipelinePort};
pub use port::Port;
pub use project::Project;
pub use session::Session;

/// Current time as Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
