//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Harbor - environment-aware path virtualization and state sync
#[derive(Parser, Debug)]
#[command(name = "harbor", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.harbor/data/harbor.db)
    #[arg(long, global = true, env = "HARBOR_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "HARBOR_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the Harbor home and database
    Init {
        /// Recreate the database even if it exists
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Manage machine environments and path bindings
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Export, import and synchronize state
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Environment Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum EnvCommands {
    /// Register a new environment
    Register {
        /// Environment name (e.g. home-mac)
        name: String,

        /// Path binding as var=/absolute/path (repeatable)
        #[arg(long = "bind", value_name = "VAR=PATH")]
        bindings: Vec<String>,

        /// Hostname that identifies this machine
        #[arg(long)]
        hostname: Option<String>,

        /// Path that only exists on this machine
        #[arg(long)]
        marker_path: Option<String>,
    },

    /// List registered environments
    List,

    /// Show the current environment
    Current,

    /// Make an environment current
    Switch {
        name: String,
    },

    /// Find the environment matching this machine
    Detect {
        /// Make the detected environment current
        #[arg(long)]
        switch: bool,
    },

    /// Change an environment's bindings or detection rule
    Update {
        name: String,

        /// Add or replace a binding as var=/absolute/path (repeatable)
        #[arg(long = "bind", value_name = "VAR=PATH")]
        bindings: Vec<String>,

        /// Remove a binding (repeatable)
        #[arg(long = "unbind", value_name = "VAR")]
        unbind: Vec<String>,

        /// New hostname for detection
        #[arg(long)]
        hostname: Option<String>,

        /// New marker path for detection
        #[arg(long)]
        marker_path: Option<String>,
    },

    /// Delete an environment (not the current one)
    Delete {
        name: String,
    },

    /// Show how paths map in the current environment
    Resolve {
        /// Absolute or logical ($var/...) paths
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Export the store to JSONL documents
    Export {
        /// Output directory (default: <sync repo>/state)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Only export these classes (repeatable)
        #[arg(long = "class", value_name = "CLASS")]
        classes: Vec<String>,

        /// Only refresh these IDs, keeping other records (repeatable)
        #[arg(long = "id", value_name = "ID")]
        ids: Vec<String>,

        /// Drop records that are in the documents but not in the store
        #[arg(long)]
        force: bool,
    },

    /// Import JSONL documents into the store
    Import {
        /// Input directory (default: <sync repo>/state)
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(flatten)]
        merge: MergeArgs,
    },

    /// Export, commit and push to the sync remote
    Push {
        /// Drop records that are in the documents but not in the store
        #[arg(long)]
        force: bool,
    },

    /// Fetch from the sync remote and import what changed
    Pull {
        #[command(flatten)]
        merge: MergeArgs,
    },

    /// Show ahead/behind counts and pending conflicts
    Status {
        /// Preview what a pull would import
        #[arg(long)]
        check_import: bool,
    },

    /// Compare the local version of an entity with the foreign one
    Diff {
        /// Entity class (port, session, escalation, pipeline, project)
        class: String,
        id: String,
    },

    /// List conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
    },

    /// Resolve a conflict
    Resolve {
        /// Conflict ID
        id: String,

        /// Which side to keep: local or remote
        #[arg(long)]
        keep: String,
    },

    /// Configure the sync repository
    Configure {
        /// Working tree of the sync repository
        #[arg(long)]
        repo: PathBuf,

        /// Remote name
        #[arg(long)]
        remote: Option<String>,

        /// Branch name
        #[arg(long)]
        branch: Option<String>,

        /// Default merge strategy for pull and import
        #[arg(long)]
        strategy: Option<String>,
    },
}

/// Merge options shared by `import` and `pull`.
#[derive(Args, Debug, Clone, Default)]
pub struct MergeArgs {
    /// keep_local, keep_remote, last_write_wins or manual
    #[arg(long)]
    pub strategy: Option<String>,

    /// Leave differing records untouched without recording conflicts
    #[arg(long)]
    pub skip_conflicts: bool,

    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,
}
