//! Initialize the Harbor home.
//!
//! Creates `~/.harbor/` with the database under `data/`. The environment
//! registry and settings files are created on first write. Everything in the
//! home is machine-local.

use crate::config::{environments_path, harbor_home, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
struct InitOutput {
    path: PathBuf,
    database: PathBuf,
    created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    environments: Option<PathBuf>,
}

/// Execute the init command.
///
/// Re-running is harmless: an existing database is kept (and migrated)
/// unless `force` is given.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let base_dir = harbor_home()
        .ok_or_else(|| Error::Config("Could not determine the Harbor home directory".to_string()))?;
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database path".to_string()))?;

    fs::create_dir_all(&base_dir)?;

    if force && db_path.exists() {
        fs::remove_file(&db_path)?;
        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if side.exists() {
                fs::remove_file(side)?;
            }
        }
    }
    let created = !db_path.exists();

    // Opening applies the schema
    SqliteStorage::open(&db_path)?;

    // Machine-local files never belong in a repository
    let gitignore_path = base_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(&gitignore_path, "# Everything in the Harbor home is machine-local\n*\n")?;
    }
    info!(database = %db_path.display(), created, "Initialized");

    let environments = environments_path().filter(|p| p.exists());

    if json {
        return super::print_json(&InitOutput {
            path: base_dir,
            database: db_path,
            created,
            environments,
        });
    }

    if created {
        println!("Initialized Harbor");
    } else {
        println!("Harbor already initialized");
    }
    println!("  Database: {}", db_path.display());
    if environments.is_none() {
        println!();
        println!("Next: register this machine:");
        println!("  harbor env register <name> --bind workspace=/path/to/workspace");
    }
    Ok(())
}
