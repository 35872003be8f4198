//! Escalation model.

use serde::{Deserialize, Serialize};

/// A request for operator attention raised by a session or port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub session_id: Option<String>,
    pub port_id: Option<String>,
    pub title: String,
    pub reason: Option<String>,
    pub severity: String,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub updated_at: i64,
}

impl Escalation {
    /// Create an open escalation with normal severity.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        let now = super::now_millis();
        Self {
            id: id.to_string(),
            session_id: None,
            port_id: None,
            title: title.to_string(),
            reason: None,
            severity: "normal".to_string(),
            status: "open".to_string(),
            resolution: None,
            created_at: now,
            resolved_at: None,
            updated_at: now,
        }
    }
}
