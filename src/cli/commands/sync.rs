//! Sync command implementations.
//!
//! `export` and `import` work on a directory of documents (the sync tree's
//! `state/` by default). `push`, `pull`, `status` and `diff` go through the
//! git transport configured with `harbor sync configure`.

use std::path::{Path, PathBuf};

use crate::cli::{MergeArgs, SyncCommands};
use crate::config::{load_config, require_sync_settings, save_config, SyncSettings};
use crate::environment::{EnvironmentRegistry, PathResolver};
use crate::error::{Error, Result};
use crate::model::{ConflictResolution, EntityClass};
use crate::storage::SqliteStorage;
use crate::sync::{
    local_files, print_conflicts, print_diff, print_export, print_import_result, print_pull,
    print_push, print_status, Exporter, ExportScope, GitTransport, ImportOptions, Importer,
    MergeStrategy, SyncOrchestrator, Transport, STATE_DIR,
};

/// Execute sync commands.
///
/// # Errors
///
/// Returns configuration, store, transport and validation errors.
pub fn execute(
    command: &SyncCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let actor = super::actor_or_default(actor);

    match command {
        SyncCommands::Export {
            dir,
            classes,
            ids,
            force,
        } => {
            let scope = ExportScope {
                classes: parse_classes(classes)?,
                ids: ids.clone(),
            };
            let (resolver, storage) = open_context(db_path)?;
            export(&storage, &resolver, dir.as_deref(), &scope, *force, json)
        }
        SyncCommands::Import { dir, merge } => {
            let (resolver, mut storage) = open_context(db_path)?;
            let dir = state_dir_or(dir.as_deref())?;
            let options = import_options(merge)?;
            let result = Importer::new(&mut storage, &resolver, options)
                .with_actor(&actor)
                .import_dir(&dir)?;
            if json {
                super::print_json(&result)
            } else {
                print_import_result(&result);
                Ok(())
            }
        }
        SyncCommands::Push { force } => {
            let (resolver, mut storage) = open_context(db_path)?;
            let mut sync = orchestrator(&mut storage, &resolver, &actor)?;
            let report = sync.push(*force)?;
            if json {
                super::print_json(&report)
            } else {
                print_push(&report);
                Ok(())
            }
        }
        SyncCommands::Pull { merge } => {
            let options = import_options(merge)?;
            let (resolver, mut storage) = open_context(db_path)?;
            let mut sync = orchestrator(&mut storage, &resolver, &actor)?;
            let report = sync.pull(options)?;
            if json {
                super::print_json(&report)
            } else {
                print_pull(&report);
                Ok(())
            }
        }
        SyncCommands::Status { check_import } => {
            let (resolver, mut storage) = open_context(db_path)?;
            let mut sync = orchestrator(&mut storage, &resolver, &actor)?;
            let report = sync.status(*check_import)?;
            if json {
                super::print_json(&report)
            } else {
                let files = local_files(&sync.transport().root().join(STATE_DIR));
                print_status(&report, &files);
                Ok(())
            }
        }
        SyncCommands::Diff { class, id } => {
            let class = parse_class(class)?;
            let (resolver, mut storage) = open_context(db_path)?;
            let sync = orchestrator(&mut storage, &resolver, &actor)?;
            let diff = sync.diff(class, id)?;
            if json {
                super::print_json(&diff)
            } else {
                print_diff(&diff);
                Ok(())
            }
        }
        SyncCommands::Conflicts { all } => {
            let storage = super::open_storage(db_path)?;
            let conflicts = storage.list_conflicts(*all)?;
            if json {
                super::print_json(&conflicts)
            } else {
                print_conflicts(&conflicts);
                Ok(())
            }
        }
        SyncCommands::Resolve { id, keep } => {
            let resolution: ConflictResolution = keep.parse().map_err(Error::InvalidArgument)?;
            let (resolver, mut storage) = open_context(db_path)?;
            let conflict = Importer::new(&mut storage, &resolver, ImportOptions::default())
                .with_actor(&actor)
                .resolve_conflict(id, resolution)?;
            if json {
                super::print_json(&conflict)
            } else {
                println!(
                    "Resolved {} ({} {}) with {resolution}",
                    conflict.id, conflict.entity_class, conflict.entity_key
                );
                Ok(())
            }
        }
        SyncCommands::Configure {
            repo,
            remote,
            branch,
            strategy,
        } => configure(repo, remote.as_deref(), branch.as_deref(), strategy.as_deref(), json),
    }
}

/// Current environment's resolver plus the store.
fn open_context(db_path: Option<&PathBuf>) -> Result<(PathResolver, SqliteStorage)> {
    let resolver = EnvironmentRegistry::open_default()?.resolver()?;
    let storage = super::open_storage(db_path)?;
    Ok((resolver, storage))
}

fn orchestrator<'a>(
    storage: &'a mut SqliteStorage,
    resolver: &'a PathResolver,
    actor: &str,
) -> Result<SyncOrchestrator<'a, GitTransport>> {
    let settings = require_sync_settings()?;
    let transport = GitTransport::open(&settings.repo_dir, &settings.remote, &settings.branch)?;
    Ok(SyncOrchestrator::new(storage, resolver, transport).with_actor(actor))
}

fn state_dir_or(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(require_sync_settings()?.repo_dir.join(STATE_DIR)),
    }
}

fn export(
    storage: &SqliteStorage,
    resolver: &PathResolver,
    dir: Option<&Path>,
    scope: &ExportScope,
    force: bool,
    json: bool,
) -> Result<()> {
    let dir = state_dir_or(dir)?;
    let stats = Exporter::new(storage, resolver, dir.clone()).export(scope, force)?;

    if json {
        return super::print_json(&serde_json::json!({
            "output_dir": dir.display().to_string(),
            "stats": stats,
        }));
    }
    print_export(&stats, &dir);
    Ok(())
}

fn parse_class(class: &str) -> Result<EntityClass> {
    class.parse().map_err(Error::InvalidArgument)
}

fn parse_classes(classes: &[String]) -> Result<Vec<EntityClass>> {
    classes.iter().map(|c| parse_class(c)).collect()
}

fn parse_strategy(strategy: &str) -> Result<MergeStrategy> {
    strategy.parse().map_err(Error::InvalidArgument)
}

/// Explicit flag, else the configured default, else `Manual`.
fn import_options(args: &MergeArgs) -> Result<ImportOptions> {
    let strategy = match &args.strategy {
        Some(s) => parse_strategy(s)?,
        None => load_config()?
            .sync
            .and_then(|s| s.default_strategy)
            .unwrap_or_default(),
    };
    Ok(ImportOptions {
        strategy,
        skip_conflicts: args.skip_conflicts,
        dry_run: args.dry_run,
    })
}

fn configure(
    repo: &Path,
    remote: Option<&str>,
    branch: Option<&str>,
    strategy: Option<&str>,
    json: bool,
) -> Result<()> {
    let repo = if repo.is_absolute() {
        repo.to_path_buf()
    } else {
        std::env::current_dir()?.join(repo)
    };

    let mut config = load_config()?;
    let mut settings = config
        .sync
        .take()
        .map(|existing| SyncSettings {
            repo_dir: repo.clone(),
            ..existing
        })
        .unwrap_or_else(|| SyncSettings::new(repo.clone()));
    if let Some(remote) = remote {
        settings.remote = remote.to_string();
    }
    if let Some(branch) = branch {
        settings.branch = branch.to_string();
    }
    if let Some(strategy) = strategy {
        settings.default_strategy = Some(parse_strategy(strategy)?);
    }
    config.sync = Some(settings.clone());
    save_config(&config)?;

    if json {
        return super::print_json(&settings);
    }
    println!("Sync repository: {}", settings.repo_dir.display());
    println!("  remote: {}  branch: {}", settings.remote, settings.branch);
    if let Some(strategy) = settings.default_strategy {
        println!("  default strategy: {strategy}");
    }
    Ok(())
}
