//! Named environments and path virtualization.
//!
//! An environment describes one machine: a set of symbolic path variables
//! (`workspace`, `home`, ...) bound to that machine's absolute directories,
//! plus a rule for recognizing the machine.
//!
//! - [`registry`] - The machine-local set of environments and which is current
//! - [`resolver`] - Absolute ⇄ logical (`$variable/suffix`) path rewriting
//! - [`detect`] - Matching the running host against detection rules

pub mod detect;
pub mod registry;
pub mod resolver;

pub use detect::{HostProbe, SystemProbe};
pub use registry::EnvironmentRegistry;
pub use resolver::{get_variable, is_logical, BatchItem, PathAnalysis, PathResolver, VARIABLE_MARKER};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Variable name → absolute directory.
pub type Bindings = BTreeMap<String, String>;

/// How to recognize the machine an environment describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRule {
    /// Hostname to match (case-insensitive, `.local` suffix ignored).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// A path that only exists on this machine, tested when the hostname does not match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_path: Option<String>,
}

impl DetectionRule {
    /// Returns true if the rule has nothing to match on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.marker_path.is_none()
    }
}

/// A registered environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub detection: DetectionRule,
    pub bindings: Bindings,
    pub is_current: bool,
}

impl Environment {
    /// Build a resolver over this environment's bindings.
    #[must_use]
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(&self.name, &self.bindings)
    }
}

/// Validate a variable name: `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate and normalize one binding.
///
/// The bound path must be absolute; trailing separators are stripped
/// (except for the filesystem root).
///
/// # Errors
///
/// Returns `Error::InvalidBinding` for a bad name or a non-absolute path.
pub fn normalize_binding(variable: &str, path: &str) -> Result<(String, String)> {
    if !is_valid_variable_name(variable) {
        return Err(Error::InvalidBinding {
            variable: variable.to_string(),
            reason: "name must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
        });
    }

    let trimmed = path.trim();
    if !std::path::Path::new(trimmed).is_absolute() {
        return Err(Error::InvalidBinding {
            variable: variable.to_string(),
            reason: format!("'{trimmed}' is not an absolute path"),
        });
    }

    let stripped = trimmed.trim_end_matches('/');
    let normalized = if stripped.is_empty() { "/" } else { stripped };
    Ok((variable.to_string(), normalized.to_string()))
}

/// Parse a `name=/absolute/path` binding argument.
///
/// # Errors
///
/// Returns `Error::InvalidBinding` if the `=` is missing or the binding is invalid.
pub fn parse_binding(spec: &str) -> Result<(String, String)> {
    let (name, path) = spec.split_once('=').ok_or_else(|| Error::InvalidBinding {
        variable: spec.to_string(),
        reason: "expected name=/absolute/path".to_string(),
    })?;
    normalize_binding(name.trim(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_names() {
        assert!(is_valid_variable_name("workspace"));
        assert!(is_valid_variable_name("claude_data"));
        assert!(is_valid_variable_name("_x1"));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("1abc"));
        assert!(!is_valid_variable_name("with-dash"));
        assert!(!is_valid_variable_name("$home"));
    }

    #[test]
    fn test_parse_binding_strips_trailing_slash() {
        let (name, path) = parse_binding("workspace=/Users/test/playground/").unwrap();
        assert_eq!(name, "workspace");
        assert_eq!(path, "/Users/test/playground");

        let (_, root) = parse_binding("root=/").unwrap();
        assert_eq!(root, "/");
    }

    #[test]
    fn test_parse_binding_rejects_relative_and_malformed() {
        assert!(matches!(
            parse_binding("workspace=playground"),
            Err(Error::InvalidBinding { .. })
        ));
        assert!(matches!(
            parse_binding("/Users/test"),
            Err(Error::InvalidBinding { .. })
        ));
        assert!(matches!(
            parse_binding("bad name=/x"),
            Err(Error::InvalidBinding { .. })
        ));
    }
}
