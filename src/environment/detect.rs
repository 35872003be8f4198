//! Host detection.
//!
//! Detection reads two facts about the running machine: its hostname and
//! whether a given path exists. Both are behind [`HostProbe`] so detection
//! can be exercised without touching the real host.

use std::path::Path;

use crate::config::current_hostname;
use crate::environment::DetectionRule;

/// Source of host facts for detection.
pub trait HostProbe {
    /// The running machine's hostname, if it can be determined.
    fn hostname(&self) -> Option<String>;

    /// Whether `path` exists on the running machine.
    fn path_exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn hostname(&self) -> Option<String> {
        current_hostname()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Which part of a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Hostname,
    MarkerPath,
}

fn normalize_hostname(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    lower.strip_suffix(".local").map_or(lower.clone(), str::to_string)
}

impl DetectionRule {
    /// Test this rule against the host.
    ///
    /// The hostname is checked first; the marker path is only tested when
    /// the hostname is absent from the rule or does not match.
    #[must_use]
    pub fn matches(&self, probe: &dyn HostProbe) -> Option<MatchKind> {
        if let (Some(expected), Some(actual)) = (&self.hostname, probe.hostname()) {
            if normalize_hostname(expected) == normalize_hostname(&actual) {
                return Some(MatchKind::Hostname);
            }
        }

        self.marker_path
            .as_deref()
            .filter(|marker| probe.path_exists(Path::new(marker)))
            .map(|_| MatchKind::MarkerPath)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    /// Probe with a fixed hostname and a fixed set of existing paths.
    pub(crate) struct FakeProbe {
        pub hostname: Option<String>,
        pub existing: HashSet<PathBuf>,
    }

    impl FakeProbe {
        pub(crate) fn new(hostname: Option<&str>, existing: &[&str]) -> Self {
            Self {
                hostname: hostname.map(str::to_string),
                existing: existing.iter().map(PathBuf::from).collect(),
            }
        }
    }

    impl HostProbe for FakeProbe {
        fn hostname(&self) -> Option<String> {
            self.hostname.clone()
        }

        fn path_exists(&self, path: &Path) -> bool {
            self.existing.contains(path)
        }
    }

    #[test]
    fn test_hostname_match_ignores_case_and_local_suffix() {
        let rule = DetectionRule {
            hostname: Some("Studio-Mac".into()),
            marker_path: None,
        };
        let probe = FakeProbe::new(Some("studio-mac.local"), &[]);
        assert_eq!(rule.matches(&probe), Some(MatchKind::Hostname));
    }

    #[test]
    fn test_marker_path_fallback() {
        let rule = DetectionRule {
            hostname: Some("studio-mac".into()),
            marker_path: Some("/Volumes/Work".into()),
        };
        let probe = FakeProbe::new(Some("office-linux"), &["/Volumes/Work"]);
        assert_eq!(rule.matches(&probe), Some(MatchKind::MarkerPath));

        let no_marker = FakeProbe::new(Some("office-linux"), &[]);
        assert_eq!(rule.matches(&no_marker), None);
    }

    #[test]
    fn test_empty_rule_never_matches() {
        let rule = DetectionRule::default();
        assert!(rule.is_empty());
        let probe = FakeProbe::new(Some("anything"), &["/"]);
        assert_eq!(rule.matches(&probe), None);
    }
}
