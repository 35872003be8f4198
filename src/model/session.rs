//! Session model.
//!
//! Sessions remember which environment created them and which one last
//! changed them. Both tags move only when the session itself is mutated.

use serde::{Deserialize, Serialize};

/// A working session against a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub port_id: Option<String>,
    pub title: String,
    pub status: String,
    /// Working directory of the session (path-shaped).
    pub cwd: Option<String>,
    /// Transcript file on the machine that ran the session. Never leaves this machine.
    pub transcript_path: Option<String>,
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

impl Session {
    /// Create an active session.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        let now = super::now_millis();
        Self {
            id: id.to_string(),
            port_id: None,
            title: title.to_string(),
            status: "active".to_string(),
            cwd: None,
            transcript_path: None,
            tokens_used: 0,
            cost_usd: 0.0,
            started_at: now,
            ended_at: None,
            updated_at: now,
            created_in_env: None,
            last_touched_env: None,
        }
    }
}
