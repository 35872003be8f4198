//! Command implementations.

pub mod completions;
pub mod env;
pub mod init;
pub mod sync;
pub mod version;

use std::path::PathBuf;

use crate::config::{default_actor, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;

/// Open the store, requiring `harbor init` to have run.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    SqliteStorage::open(&db_path)
}

pub(crate) fn actor_or_default(actor: Option<&str>) -> String {
    actor.map_or_else(default_actor, String::from)
}

/// Print a serializable value as one line of JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
