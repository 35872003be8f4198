//! Port model.
//!
//! A port is one unit of work tracked by the scheduler. Its dependency edges
//! point at other port IDs.

use serde::{Deserialize, Serialize};

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub priority: i32,
    /// IDs of ports that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Directory the work happens in (path-shaped).
    pub working_dir: Option<String>,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub cost_usd: f64,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Port {
    /// Create a pending port with no dependencies.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        let now = super::now_millis();
        Self {
            id: id.to_string(),
            project_id: None,
            title: title.to_string(),
            description: None,
            status: "pending".to_string(),
            priority: 0,
            dependencies: Vec::new(),
            working_dir: None,
            tokens_used: 0,
            cost_usd: 0.0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
