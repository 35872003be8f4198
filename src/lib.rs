//! Harbor - environment-aware path virtualization and state sync
//!
//! This crate provides the core functionality for the `harbor` CLI tool:
//! keeping task-tracking state consistent across machines whose filesystem
//! layouts differ.
//!
//! # Architecture
//!
//! - [`environment`] - Named environments, path bindings and the path resolver
//! - [`model`] - Data types (Port, Session, Escalation, Pipeline, Project, ConflictRecord)
//! - [`storage`] - SQLite database layer
//! - [`sync`] - JSONL export/import and git-backed push/pull
//! - [`config`] - Machine-local directories and settings
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
