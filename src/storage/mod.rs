//! SQLite storage layer for Harbor.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod schema;
pub mod sqlite;

pub use sqlite::{EntityCounts, MutationContext, SqliteStorage};
