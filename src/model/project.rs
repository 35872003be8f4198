//! Project model for Harbor.
//!
//! Projects group ports and sessions under one codebase directory. The
//! directory is recorded twice: `root_path` is the absolute path on this
//! machine, `logical_root` is the same location expressed against the
//! environment that last wrote it.

use serde::{Deserialize, Serialize};

/// A project in Harbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (`proj_` + 12 hex)
    pub id: String,

    /// Display name for the project
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Absolute path to the project directory on this machine
    pub root_path: Option<String>,

    /// Portable form of the project directory (`$variable/suffix`)
    pub logical_root: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Project {
    /// Create a new project rooted at `root_path`.
    #[must_use]
    pub fn new(name: &str, root_path: Option<String>) -> Self {
        let now = super::now_millis();
        let id = format!("proj_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        Self {
            id,
            name: name.to_string(),
            description: None,
            root_path,
            logical_root: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Best available directory string, preferring the local absolute path.
    #[must_use]
    pub fn display_root(&self) -> Option<&str> {
        self.root_path.as_deref().or(self.logical_root.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_project_id_shape() {
        let project = Project::new("harbor", Some("/Users/test/harbor".into()));
        assert!(project.id.starts_with("proj_"));
        assert_eq!(project.id.len(), "proj_".len() + 12);
        assert_eq!(project.display_root(), Some("/Users/test/harbor"));
    }

    #[test]
    fn test_display_root_falls_back_to_logical() {
        let mut project = Project::new("harbor", None);
        project.logical_root = Some("$workspace/harbor".into());
        assert_eq!(project.display_root(), Some("$workspace/harbor"));
    }
}
