//! Error types for Harbor.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, 5=resolution, etc.)
//! - Retryability flags
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Harbor operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Tools match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,

    // Not Found (exit 3)
    EnvironmentNotFound,
    EntityNotFound,
    ConflictNotFound,

    // Validation (exit 4)
    DuplicateEnvironment,
    CurrentEnvironment,
    InvalidBinding,
    InvalidArgument,

    // Resolution (exit 5)
    UnboundVariable,

    // Sync (exit 6)
    SyncError,
    AmbiguousEnvironment,

    // Config (exit 7)
    NotConfigured,
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Transport (exit 9)
    TransportError,
    PushRejected,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::EnvironmentNotFound => "ENVIRONMENT_NOT_FOUND",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::ConflictNotFound => "CONFLICT_NOT_FOUND",
            Self::DuplicateEnvironment => "DUPLICATE_ENVIRONMENT",
            Self::CurrentEnvironment => "CURRENT_ENVIRONMENT",
            Self::InvalidBinding => "INVALID_BINDING",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnboundVariable => "UNBOUND_VARIABLE",
            Self::SyncError => "SYNC_ERROR",
            Self::AmbiguousEnvironment => "AMBIGUOUS_ENVIRONMENT",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::PushRejected => "PUSH_REJECTED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError => 2,
            Self::EnvironmentNotFound | Self::EntityNotFound | Self::ConflictNotFound => 3,
            Self::DuplicateEnvironment
            | Self::CurrentEnvironment
            | Self::InvalidBinding
            | Self::InvalidArgument => 4,
            Self::UnboundVariable => 5,
            Self::SyncError | Self::AmbiguousEnvironment => 6,
            Self::NotConfigured | Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::TransportError | Self::PushRejected => 9,
        }
    }

    /// Whether the caller can succeed by retrying after a corrective step.
    ///
    /// A rejected push is retryable only after a pull; validation and
    /// resolution errors are retryable once the input or bindings are fixed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidBinding
                | Self::InvalidArgument
                | Self::UnboundVariable
                | Self::AmbiguousEnvironment
                | Self::PushRejected
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Harbor operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `harbor init` first")]
    NotInitialized,

    #[error("No environment configured")]
    NotConfigured,

    #[error("Environment not found: {name}")]
    EnvironmentNotFound { name: String },

    #[error("Environment already exists: {name}")]
    DuplicateEnvironment { name: String },

    #[error("Cannot delete the current environment: {name}")]
    DeleteCurrentEnvironment { name: String },

    #[error("Invalid binding '{variable}': {reason}")]
    InvalidBinding { variable: String, reason: String },

    #[error("Multiple environments match this machine: {}", candidates.join(", "))]
    AmbiguousEnvironment { candidates: Vec<String> },

    #[error("Variable ${variable} in '{path}' is not bound in environment '{environment}'")]
    UnboundVariable {
        variable: String,
        path: String,
        environment: String,
    },

    #[error("{class} not found: {id}")]
    EntityNotFound { class: String, id: String },

    #[error("Conflict not found: {id}")]
    ConflictNotFound { id: String },

    #[error("Sync directory is not configured")]
    SyncNotConfigured { config_path: PathBuf },

    #[error("Push rejected: {message}")]
    PushRejected { message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::NotConfigured => ErrorCode::NotConfigured,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::EnvironmentNotFound { .. } => ErrorCode::EnvironmentNotFound,
            Self::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            Self::ConflictNotFound { .. } => ErrorCode::ConflictNotFound,
            Self::DuplicateEnvironment { .. } => ErrorCode::DuplicateEnvironment,
            Self::DeleteCurrentEnvironment { .. } => ErrorCode::CurrentEnvironment,
            Self::InvalidBinding { .. } => ErrorCode::InvalidBinding,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::UnboundVariable { .. } => ErrorCode::UnboundVariable,
            Self::AmbiguousEnvironment { .. } => ErrorCode::AmbiguousEnvironment,
            Self::Sync(_) => ErrorCode::SyncError,
            Self::SyncNotConfigured { .. } | Self::Config(_) => ErrorCode::ConfigError,
            Self::PushRejected { .. } => ErrorCode::PushRejected,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether this error belongs to the validation taxonomy.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        self.error_code().exit_code() == 4
    }

    /// Context-aware recovery hint for operators and tools.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `harbor init` to initialize the database".to_string())
            }

            Self::NotConfigured => Some(
                "Register this machine first:\n  \
                 harbor env register <name> --bind workspace=/path/to/workspace"
                    .to_string(),
            ),

            Self::EnvironmentNotFound { name } => Some(format!(
                "No environment named '{name}'. Use `harbor env list` to see registered environments."
            )),

            Self::DuplicateEnvironment { name } => Some(format!(
                "Use `harbor env update {name} --bind var=/path` to change its bindings."
            )),

            Self::DeleteCurrentEnvironment { .. } => Some(
                "Switch to another environment first: harbor env switch <name>".to_string(),
            ),

            Self::AmbiguousEnvironment { candidates } => Some(format!(
                "Pick one explicitly: harbor env switch {}",
                candidates.first().map_or("<name>", String::as_str)
            )),

            Self::UnboundVariable {
                variable,
                environment,
                ..
            } => Some(format!(
                "Bind it in this environment: harbor env update {environment} --bind {variable}=/absolute/path"
            )),

            Self::SyncNotConfigured { config_path } => Some(format!(
                "Run `harbor sync configure --repo <dir>` (settings live in {})",
                config_path.display()
            )),

            Self::PushRejected { .. } => Some(
                "The remote has commits you don't have. Run `harbor sync pull`, then push again."
                    .to_string(),
            ),

            Self::ConflictNotFound { .. } => {
                Some("Use `harbor sync conflicts` to list open conflicts.".to_string())
            }

            Self::InvalidBinding { .. } => Some(
                "Bindings look like name=/absolute/path, with name matching [A-Za-z_][A-Za-z0-9_]*"
                    .to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("strategy") {
                    Some(
                        "Valid strategies: keep_local, keep_remote, last_write_wins, manual"
                            .to_string(),
                    )
                } else if msg.contains("class") {
                    Some(
                        "Valid classes: port, session, escalation, pipeline, project".to_string(),
                    )
                } else {
                    None
                }
            }

            Self::Sync(msg) if msg.contains("would lose") => Some(
                "Pull first so the store holds every record, or re-run with --force to drop them."
                    .to_string(),
            ),

            Self::EntityNotFound { .. }
            | Self::Transport(_)
            | Self::Sync(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_share_exit_code() {
        let dup = Error::DuplicateEnvironment { name: "home".into() };
        let current = Error::DeleteCurrentEnvironment { name: "home".into() };
        assert_eq!(dup.exit_code(), 4);
        assert_eq!(current.exit_code(), 4);
        assert!(dup.is_validation());
        assert!(current.is_validation());
    }

    #[test]
    fn test_unbound_variable_is_distinct_category() {
        let err = Error::UnboundVariable {
            variable: "scratch".into(),
            path: "$scratch/x".into(),
            environment: "office".into(),
        };
        assert_eq!(err.exit_code(), 5);
        assert!(!err.is_validation());
        assert!(err.hint().unwrap().contains("harbor env update office"));
    }

    #[test]
    fn test_push_rejected_is_retryable() {
        let err = Error::PushRejected {
            message: "non-fast-forward".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "PUSH_REJECTED");
        assert_eq!(json["error"]["retryable"], true);
        assert_eq!(json["error"]["exit_code"], 9);
        assert!(json["error"]["hint"].as_str().unwrap().contains("sync pull"));
    }
}
