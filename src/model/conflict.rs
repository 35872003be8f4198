//! Sync conflict records.
//!
//! A conflict is recorded when an incoming document and the local row
//! disagree on shared fields and the import ran with the manual strategy.
//! Both versions are kept in their exported (portable) form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::EntityClass;

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
}

impl ConflictResolution {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_remote" | "remote" => Ok(Self::KeepRemote),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// A detected difference between a local row and an incoming document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// `conf_` + 12 hex
    pub id: String,
    pub entity_class: EntityClass,
    pub entity_key: String,
    /// Local row in exported form.
    pub local_version: serde_json::Value,
    /// Incoming document, expressed against the local bindings.
    pub incoming_version: serde_json::Value,
    /// Shared fields whose values differ, sorted.
    pub differing_fields: Vec<String>,
    /// Environment that produced the incoming snapshot, when known.
    pub source_environment: Option<String>,
    /// Unix milliseconds
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution: Option<ConflictResolution>,
}

impl ConflictRecord {
    /// Create an open conflict with a fresh ID.
    #[must_use]
    pub fn new(
        entity_class: EntityClass,
        entity_key: &str,
        local_version: serde_json::Value,
        incoming_version: serde_json::Value,
        differing_fields: Vec<String>,
    ) -> Self {
        Self {
            id: format!("conf_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            entity_class,
            entity_key: entity_key.to_string(),
            local_version,
            incoming_version,
            differing_fields,
            source_environment: None,
            detected_at: super::now_millis(),
            resolved_at: None,
            resolution: None,
        }
    }

    /// Whether the conflict is still waiting for a decision.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("local".parse::<ConflictResolution>().unwrap(), ConflictResolution::KeepLocal);
        assert_eq!(
            "keep-remote".parse::<ConflictResolution>().unwrap(),
            ConflictResolution::KeepRemote
        );
        assert!("both".parse::<ConflictResolution>().is_err());
    }

    #[test]
    fn test_new_conflict_is_open() {
        let record = ConflictRecord::new(
            EntityClass::Port,
            "port_1",
            serde_json::json!({"title": "a"}),
            serde_json::json!({"title": "b"}),
            vec!["title".into()],
        );
        assert!(record.id.starts_with("conf_"));
        assert!(record.is_open());
    }
}
