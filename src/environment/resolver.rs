//! Bidirectional path resolution.
//!
//! A logical path is `$variable` or `$variable/relative/suffix`. Converting an
//! absolute path to its logical form picks, among every binding whose
//! directory contains the path, the one with the longest bound directory, so
//! nested bindings (`claude_data` inside `workspace`) resolve to the most
//! specific variable regardless of map ordering.
//!
//! Resolution is pure: a resolver holds a copy of one environment's bindings
//! and never touches the registry again.

use serde::Serialize;
use std::path::{Component, Path};

use crate::environment::Bindings;
use crate::error::{Error, Result};

/// Prefix marking a logical path.
pub const VARIABLE_MARKER: char = '$';

/// Resolver over one environment's bindings.
#[derive(Debug, Clone)]
pub struct PathResolver {
    environment: String,
    bindings: Bindings,
}

/// Diagnostic view of one path in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathAnalysis {
    pub original: String,
    pub logical: String,
    /// `None` when the path is logical and its variable is unbound here.
    pub absolute: Option<String>,
    /// Variable the path maps to (or names), if any.
    pub variable: Option<String>,
    pub resolvable: bool,
}

/// Outcome for one item of a batch conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// True iff the path starts with the variable marker.
#[must_use]
pub fn is_logical(path: &str) -> bool {
    path.starts_with(VARIABLE_MARKER)
}

/// Extract the leading variable name of a logical path without substituting it.
///
/// Returns `None` for non-logical input.
#[must_use]
pub fn get_variable(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(VARIABLE_MARKER)?;
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Split a logical path into its variable and (possibly empty) suffix.
fn split_logical(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(VARIABLE_MARKER)?;
    Some(match rest.split_once('/') {
        Some((variable, suffix)) => (variable, suffix),
        None => (rest, ""),
    })
}

/// Join path components below a bound directory with `/`.
///
/// `None` when the remainder climbs out with `..` or holds anything but
/// plain names, since the prefix match is lexical.
fn relative_suffix(remainder: &Path) -> Option<String> {
    remainder
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

impl PathResolver {
    /// Create a resolver for the named environment's bindings.
    #[must_use]
    pub fn new(environment: &str, bindings: &Bindings) -> Self {
        Self {
            environment: environment.to_string(),
            bindings: bindings.clone(),
        }
    }

    /// Name of the environment this resolver was built from.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Find the most specific binding containing `absolute`.
    ///
    /// Returns the variable name and the path below the bound directory.
    fn best_match(&self, absolute: &str) -> Option<(&str, String)> {
        let path = Path::new(absolute);
        self.bindings
            .iter()
            .filter_map(|(variable, bound)| {
                let rest = path.strip_prefix(bound).ok()?;
                relative_suffix(rest).map(|suffix| (variable.as_str(), bound.len(), suffix))
            })
            .max_by_key(|(_, bound_len, _)| *bound_len)
            .map(|(variable, _, suffix)| (variable, suffix))
    }

    /// Rewrite an absolute path into its portable logical form.
    ///
    /// Logical input and paths outside every binding are returned unchanged.
    #[must_use]
    pub fn to_logical(&self, path: &str) -> String {
        if is_logical(path) || !Path::new(path).is_absolute() {
            return path.to_string();
        }

        match self.best_match(path) {
            Some((variable, suffix)) if suffix.is_empty() => {
                format!("{VARIABLE_MARKER}{variable}")
            }
            Some((variable, suffix)) => format!("{VARIABLE_MARKER}{variable}/{suffix}"),
            None => path.to_string(),
        }
    }

    /// Rewrite a logical path into this environment's absolute path.
    ///
    /// Non-logical input is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnboundVariable` if the variable is not bound here.
    pub fn to_absolute(&self, path: &str) -> Result<String> {
        let Some((variable, suffix)) = split_logical(path) else {
            return Ok(path.to_string());
        };

        let bound = self
            .bindings
            .get(variable)
            .ok_or_else(|| Error::UnboundVariable {
                variable: variable.to_string(),
                path: path.to_string(),
                environment: self.environment.clone(),
            })?;

        if suffix.is_empty() {
            Ok(bound.clone())
        } else if bound.ends_with('/') {
            Ok(format!("{bound}{suffix}"))
        } else {
            Ok(format!("{bound}/{suffix}"))
        }
    }

    /// True for any non-logical path; for a logical path, true iff its variable is bound.
    #[must_use]
    pub fn is_resolvable(&self, path: &str) -> bool {
        match get_variable(path) {
            Some(variable) => self.bindings.contains_key(variable),
            None => true,
        }
    }

    /// Describe a path in both directions without failing.
    #[must_use]
    pub fn analyze(&self, path: &str) -> PathAnalysis {
        if is_logical(path) {
            let absolute = self.to_absolute(path).ok();
            return PathAnalysis {
                original: path.to_string(),
                logical: path.to_string(),
                resolvable: absolute.is_some(),
                absolute,
                variable: get_variable(path).map(str::to_string),
            };
        }

        let logical = self.to_logical(path);
        PathAnalysis {
            original: path.to_string(),
            variable: get_variable(&logical).map(str::to_string),
            logical,
            absolute: Some(path.to_string()),
            resolvable: true,
        }
    }

    /// Convert every path to logical form.
    #[must_use]
    pub fn to_logical_batch<S: AsRef<str>>(&self, paths: &[S]) -> Vec<BatchItem> {
        paths
            .iter()
            .map(|p| BatchItem {
                input: p.as_ref().to_string(),
                output: Some(self.to_logical(p.as_ref())),
                error: None,
            })
            .collect()
    }

    /// Convert every path to absolute form, recording failures per item.
    #[must_use]
    pub fn to_absolute_batch<S: AsRef<str>>(&self, paths: &[S]) -> Vec<BatchItem> {
        paths
            .iter()
            .map(|p| match self.to_absolute(p.as_ref()) {
                Ok(output) => BatchItem {
                    input: p.as_ref().to_string(),
                    output: Some(output),
                    error: None,
                },
                Err(e) => BatchItem {
                    input: p.as_ref().to_string(),
                    output: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    /// Analyze every path.
    #[must_use]
    pub fn analyze_batch<S: AsRef<str>>(&self, paths: &[S]) -> Vec<PathAnalysis> {
        paths.iter().map(|p| self.analyze(p.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathResolver {
        let mut bindings = Bindings::new();
        bindings.insert("workspace".into(), "/Users/test/playground".into());
        bindings.insert("claude_data".into(), "/Users/test/.claude".into());
        bindings.insert("home".into(), "/Users/test".into());
        PathResolver::new("home-mac", &bindings)
    }

    fn nested_fixture() -> PathResolver {
        let mut bindings = Bindings::new();
        bindings.insert("workspace".into(), "/Users/test/playground".into());
        bindings.insert("claude_data".into(), "/Users/test/playground/claude-data".into());
        bindings.insert("home".into(), "/Users/test".into());
        PathResolver::new("home-mac", &bindings)
    }

    #[test]
    fn test_to_logical_worked_example() {
        let r = fixture();
        assert_eq!(
            r.to_logical("/Users/test/playground/CodeSpace/project"),
            "$workspace/CodeSpace/project"
        );
        assert_eq!(r.to_logical("/Users/test/playground"), "$workspace");
        assert_eq!(
            r.to_logical("/Users/test/.claude/projects/xxx"),
            "$claude_data/projects/xxx"
        );
        assert_eq!(r.to_logical("/var/log/system.log"), "/var/log/system.log");
    }

    #[test]
    fn test_to_absolute_worked_example() {
        let r = fixture();
        assert_eq!(r.to_absolute("$home/Documents").unwrap(), "/Users/test/Documents");
        assert_eq!(r.to_absolute("$workspace").unwrap(), "/Users/test/playground");
        assert_eq!(r.to_absolute("/already/absolute").unwrap(), "/already/absolute");
    }

    #[test]
    fn test_parent_dir_segments_are_not_rewritten() {
        let r = fixture();
        let climbing = "/Users/test/playground/../secret/x";
        // Falls through to `$home`, whose remainder still climbs
        assert_eq!(r.to_logical(climbing), climbing);
        assert_eq!(r.to_absolute(&r.to_logical(climbing)).unwrap(), climbing);

        let plain = "/Users/test/playground/secret/x";
        assert_eq!(r.to_absolute(&r.to_logical(plain)).unwrap(), plain);
    }

    #[test]
    fn test_most_specific_binding_wins() {
        let r = nested_fixture();
        assert_eq!(
            r.to_logical("/Users/test/playground/claude-data/sessions"),
            "$claude_data/sessions"
        );
        assert_eq!(r.to_logical("/Users/test/playground/other"), "$workspace/other");
        assert_eq!(r.to_logical("/Users/test/notes.md"), "$home/notes.md");
    }

    #[test]
    fn test_prefix_match_respects_component_boundaries() {
        let r = fixture();
        assert_eq!(
            r.to_logical("/Users/test/playground2/x"),
            "$home/playground2/x"
        );
        assert_eq!(r.to_logical("/Users/tester"), "/Users/tester");
    }

    #[test]
    fn test_round_trip() {
        let r = nested_fixture();
        for path in [
            "/Users/test",
            "/Users/test/playground",
            "/Users/test/playground/a/b/c.txt",
            "/Users/test/playground/claude-data",
            "/Users/test/playground/claude-data/sessions/1.jsonl",
            "/Users/test/Library/Caches",
        ] {
            let logical = r.to_logical(path);
            assert!(is_logical(&logical), "{path} should map to a variable");
            assert_eq!(r.to_absolute(&logical).unwrap(), path);
        }
    }

    #[test]
    fn test_logical_input_is_idempotent() {
        let r = fixture();
        for path in ["$workspace/a", "$unknown/b", "$home"] {
            assert_eq!(r.to_logical(path), path);
        }
        let once = r.to_logical("/Users/test/playground/x");
        assert_eq!(r.to_logical(&once), once);
    }

    #[test]
    fn test_unbound_variable_fails_with_resolution_error() {
        let r = fixture();
        let err = r.to_absolute("$unknown/path").unwrap_err();
        match err {
            Error::UnboundVariable {
                variable,
                environment,
                ..
            } => {
                assert_eq!(variable, "unknown");
                assert_eq!(environment, "home-mac");
            }
            other => panic!("expected UnboundVariable, got {other:?}"),
        }
    }

    #[test]
    fn test_is_resolvable() {
        let r = fixture();
        assert!(r.is_resolvable("/var/log/x"));
        assert!(r.is_resolvable("$workspace/x"));
        assert!(!r.is_resolvable("$unknown/path"));
        assert!(is_logical("$unknown/path"));
        assert!(!is_logical("/Users/test"));
    }

    #[test]
    fn test_get_variable() {
        assert_eq!(get_variable("$workspace/CodeSpace"), Some("workspace"));
        assert_eq!(get_variable("$home"), Some("home"));
        assert_eq!(get_variable("/Users/test"), None);
    }

    #[test]
    fn test_analyze_never_fails() {
        let r = fixture();

        let unresolved = r.analyze("$scratch/tmp");
        assert!(!unresolved.resolvable);
        assert_eq!(unresolved.absolute, None);
        assert_eq!(unresolved.variable.as_deref(), Some("scratch"));

        let absolute = r.analyze("/Users/test/playground/app");
        assert!(absolute.resolvable);
        assert_eq!(absolute.logical, "$workspace/app");
        assert_eq!(absolute.variable.as_deref(), Some("workspace"));

        let outside = r.analyze("/opt/tools");
        assert_eq!(outside.logical, "/opt/tools");
        assert_eq!(outside.variable, None);
    }

    #[test]
    fn test_batch_reports_per_item() {
        let r = fixture();
        let items = r.to_absolute_batch(&["$home/a", "$nope/b", "/abs"]);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].output.as_deref(), Some("/Users/test/a"));
        assert!(!items[1].is_ok());
        assert!(items[2].is_ok());

        let logical = r.to_logical_batch(&["/Users/test/x", "/etc/hosts"]);
        assert_eq!(logical[0].output.as_deref(), Some("$home/x"));
        assert_eq!(logical[1].output.as_deref(), Some("/etc/hosts"));
    }

    #[test]
    fn test_root_binding() {
        let mut bindings = Bindings::new();
        bindings.insert("root".into(), "/".into());
        let r = PathResolver::new("box", &bindings);
        assert_eq!(r.to_logical("/etc/hosts"), "$root/etc/hosts");
        assert_eq!(r.to_absolute("$root/etc/hosts").unwrap(), "/etc/hosts");
    }
}
