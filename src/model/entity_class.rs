//! The closed set of synchronized entity classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity classes that travel between environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Project,
    Port,
    Session,
    Escalation,
    Pipeline,
}

impl EntityClass {
    /// Every class, in the order documents are written and applied.
    ///
    /// Projects come first and pipelines last so that references usually
    /// point at rows that already exist.
    pub const ALL: [Self; 5] = [
        Self::Project,
        Self::Port,
        Self::Session,
        Self::Escalation,
        Self::Pipeline,
    ];

    /// Singular storage name (also used as the audit `entity_type`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Port => "port",
            Self::Session => "session",
            Self::Escalation => "escalation",
            Self::Pipeline => "pipeline",
        }
    }

    /// Document file name inside the state directory.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Project => "projects.jsonl",
            Self::Port => "ports.jsonl",
            Self::Session => "sessions.jsonl",
            Self::Escalation => "escalations.jsonl",
            Self::Pipeline => "pipelines.jsonl",
        }
    }

    /// Inverse of [`Self::file_name`].
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.file_name() == name)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = String;

    /// Accepts singular or plural names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == singular)
            .ok_or_else(|| {
                format!(
                    "unknown entity class '{s}' (expected one of: project, port, session, escalation, pipeline)"
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_singular_and_plural() {
        assert_eq!("port".parse::<EntityClass>().unwrap(), EntityClass::Port);
        assert_eq!("Sessions".parse::<EntityClass>().unwrap(), EntityClass::Session);
        assert_eq!("pipelines".parse::<EntityClass>().unwrap(), EntityClass::Pipeline);
        assert!("issue".parse::<EntityClass>().is_err());
    }

    #[test]
    fn test_file_names_roundtrip() {
        for class in EntityClass::ALL {
            assert_eq!(EntityClass::from_file_name(class.file_name()), Some(class));
        }
        assert_eq!(EntityClass::from_file_name("manifest.json"), None);
    }
}
