//! Machine-local environment registry.
//!
//! The registry is a single JSON document (`~/.harbor/environments.json`)
//! holding every environment and the name of the current one:
//!
//! ```json
//! {"current":"home","environments":{"home":{"id":"env_…","detection":{…},"bindings":{…}}}}
//! ```
//!
//! Every mutation builds the next document, writes it atomically, and only
//! then replaces the in-memory copy, so a failed write leaves both the file
//! and the registry unchanged. Because "current" is a single name, exactly
//! one environment is current whenever any exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::environment::detect::HostProbe;
use crate::environment::{
    normalize_binding, Bindings, DetectionRule, Environment, PathResolver,
};
use crate::error::{Error, Result};
use crate::sync::atomic_write;

/// One environment as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EnvironmentEntry {
    id: String,
    #[serde(default)]
    detection: DetectionRule,
    #[serde(default)]
    bindings: Bindings,
}

/// The registry document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentEntry>,
}

/// Registry of named environments.
#[derive(Debug)]
pub struct EnvironmentRegistry {
    /// Backing file; `None` keeps the registry in memory only.
    path: Option<PathBuf>,
    doc: RegistryDocument,
}

impl EnvironmentRegistry {
    /// Open the registry at `path`. A missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read environments file: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse environments file: {e}")))?
        } else {
            RegistryDocument::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            doc,
        })
    }

    /// Open the registry at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory is unknown or the file is invalid.
    pub fn open_default() -> Result<Self> {
        let path = crate::config::environments_path()
            .ok_or(Error::Config("Could not determine home directory".into()))?;
        Self::open(&path)
    }

    /// An empty registry that is never persisted (for testing).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RegistryDocument::default(),
        }
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn view(&self, name: &str, entry: &EnvironmentEntry) -> Environment {
        Environment {
            id: entry.id.clone(),
            name: name.to_string(),
            detection: entry.detection.clone(),
            bindings: entry.bindings.clone(),
            is_current: self.doc.current.as_deref() == Some(name),
        }
    }

    /// Persist `next` and adopt it.
    fn commit(&mut self, next: RegistryDocument) -> Result<()> {
        if let Some(path) = &self.path {
            atomic_write(path, &serde_json::to_string_pretty(&next)?)?;
        }
        self.doc = next;
        Ok(())
    }

    /// Register a new environment.
    ///
    /// The first environment ever registered becomes current.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateEnvironment` if the name is taken, or
    /// `Error::InvalidBinding` / `Error::InvalidArgument` for bad input.
    pub fn register(
        &mut self,
        name: &str,
        bindings: &Bindings,
        detection: DetectionRule,
    ) -> Result<Environment> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "environment name cannot be empty".to_string(),
            ));
        }
        if self.doc.environments.contains_key(name) {
            return Err(Error::DuplicateEnvironment {
                name: name.to_string(),
            });
        }

        let mut normalized = Bindings::new();
        for (variable, path) in bindings {
            let (variable, path) = normalize_binding(variable, path)?;
            normalized.insert(variable, path);
        }

        let mut next = self.doc.clone();
        next.environments.insert(
            name.to_string(),
            EnvironmentEntry {
                id: format!("env_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
                detection,
                bindings: normalized,
            },
        );
        if next.current.is_none() {
            next.current = Some(name.to_string());
        }

        self.commit(next)?;
        info!(environment = name, "Registered environment");
        self.get(name)
    }

    /// Make `name` the current environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::EnvironmentNotFound` if no such environment exists.
    pub fn switch(&mut self, name: &str) -> Result<Environment> {
        if !self.doc.environments.contains_key(name) {
            return Err(Error::EnvironmentNotFound {
                name: name.to_string(),
            });
        }

        let previous = self.doc.current.clone();
        let mut next = self.doc.clone();
        next.current = Some(name.to_string());
        self.commit(next)?;

        info!(
            from = previous.as_deref().unwrap_or("-"),
            to = name,
            "Switched environment"
        );
        self.get(name)
    }

    /// Add or replace bindings, remove others, and optionally replace the detection rule.
    ///
    /// # Errors
    ///
    /// Returns `Error::EnvironmentNotFound` or `Error::InvalidBinding`.
    pub fn update(
        &mut self,
        name: &str,
        set: &Bindings,
        unset: &[String],
        detection: Option<DetectionRule>,
    ) -> Result<Environment> {
        let mut next = self.doc.clone();
        let entry = next
            .environments
            .get_mut(name)
            .ok_or_else(|| Error::EnvironmentNotFound {
                name: name.to_string(),
            })?;

        for (variable, path) in set {
            let (variable, path) = normalize_binding(variable, path)?;
            entry.bindings.insert(variable, path);
        }
        for variable in unset {
            entry.bindings.remove(variable);
        }
        if let Some(rule) = detection {
            entry.detection = rule;
        }

        self.commit(next)?;
        debug!(environment = name, "Updated environment");
        self.get(name)
    }

    /// Delete an environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeleteCurrentEnvironment` when `name` is current, or
    /// `Error::EnvironmentNotFound`.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if self.doc.current.as_deref() == Some(name) {
            return Err(Error::DeleteCurrentEnvironment {
                name: name.to_string(),
            });
        }

        let mut next = self.doc.clone();
        if next.environments.remove(name).is_none() {
            return Err(Error::EnvironmentNotFound {
                name: name.to_string(),
            });
        }

        self.commit(next)?;
        info!(environment = name, "Deleted environment");
        Ok(())
    }

    /// All environments, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<Environment> {
        self.doc
            .environments
            .iter()
            .map(|(name, entry)| self.view(name, entry))
            .collect()
    }

    /// Look up one environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::EnvironmentNotFound` if no such environment exists.
    pub fn get(&self, name: &str) -> Result<Environment> {
        self.doc
            .environments
            .get(name)
            .map(|entry| self.view(name, entry))
            .ok_or_else(|| Error::EnvironmentNotFound {
                name: name.to_string(),
            })
    }

    /// The current environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` when no environment is registered.
    pub fn current(&self) -> Result<Environment> {
        let name = self.doc.current.as_deref().ok_or(Error::NotConfigured)?;
        self.get(name).map_err(|_| Error::NotConfigured)
    }

    /// Resolver over the current environment's bindings.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` when no environment is registered.
    pub fn resolver(&self) -> Result<PathResolver> {
        Ok(self.current()?.resolver())
    }

    /// Find the environment whose detection rule matches this machine.
    ///
    /// # Errors
    ///
    /// Returns `Error::AmbiguousEnvironment` when more than one rule matches.
    pub fn detect(&self, probe: &dyn HostProbe) -> Result<Option<Environment>> {
        let matches: Vec<Environment> = self
            .doc
            .environments
            .iter()
            .filter_map(|(name, entry)| {
                entry.detection.matches(probe).map(|kind| {
                    debug!(environment = %name, ?kind, "Detection rule matched");
                    self.view(name, entry)
                })
            })
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            _ => Err(Error::AmbiguousEnvironment {
                candidates: matches.into_iter().map(|env| env.name).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::detect::tests::FakeProbe;
    use tempfile::TempDir;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn current_count(registry: &EnvironmentRegistry) -> usize {
        registry.list().iter().filter(|e| e.is_current).count()
    }

    #[test]
    fn test_first_registration_becomes_current() {
        let mut registry = EnvironmentRegistry::in_memory();
        assert!(matches!(registry.current(), Err(Error::NotConfigured)));

        let home = registry
            .register("home", &bindings(&[("home", "/Users/test")]), DetectionRule::default())
            .unwrap();
        assert!(home.is_current);
        assert!(home.id.starts_with("env_"));

        let office = registry
            .register("office", &bindings(&[("home", "/home/test")]), DetectionRule::default())
            .unwrap();
        assert!(!office.is_current);
        assert_eq!(registry.current().unwrap().name, "home");
    }

    #[test]
    fn test_duplicate_name_is_validation_error() {
        let mut registry = EnvironmentRegistry::in_memory();
        registry
            .register("home", &Bindings::new(), DetectionRule::default())
            .unwrap();
        let err = registry
            .register("home", &Bindings::new(), DetectionRule::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEnvironment { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_exactly_one_current_after_switches() {
        let mut registry = EnvironmentRegistry::in_memory();
        for name in ["a", "b", "c"] {
            registry
                .register(name, &Bindings::new(), DetectionRule::default())
                .unwrap();
            assert_eq!(current_count(&registry), 1);
        }
        for name in ["c", "a", "b", "b"] {
            registry.switch(name).unwrap();
            assert_eq!(current_count(&registry), 1);
            assert_eq!(registry.current().unwrap().name, name);
        }
        assert!(matches!(
            registry.switch("missing"),
            Err(Error::EnvironmentNotFound { .. })
        ));
        assert_eq!(current_count(&registry), 1);
    }

    #[test]
    fn test_cannot_delete_current() {
        let mut registry = EnvironmentRegistry::in_memory();
        registry
            .register("home", &Bindings::new(), DetectionRule::default())
            .unwrap();
        registry
            .register("office", &Bindings::new(), DetectionRule::default())
            .unwrap();

        let err = registry.delete("home").unwrap_err();
        assert!(matches!(err, Error::DeleteCurrentEnvironment { .. }));

        registry.delete("office").unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(matches!(
            registry.delete("office"),
            Err(Error::EnvironmentNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_binding_rejected_without_mutation() {
        let mut registry = EnvironmentRegistry::in_memory();
        let err = registry
            .register(
                "home",
                &bindings(&[("workspace", "relative/dir")]),
                DetectionRule::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBinding { .. }));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_update_bindings() {
        let mut registry = EnvironmentRegistry::in_memory();
        registry
            .register(
                "home",
                &bindings(&[("home", "/Users/test"), ("tmp", "/tmp")]),
                DetectionRule::default(),
            )
            .unwrap();

        let env = registry
            .update(
                "home",
                &bindings(&[("workspace", "/Users/test/playground/")]),
                &["tmp".to_string()],
                Some(DetectionRule {
                    hostname: Some("studio".into()),
                    marker_path: None,
                }),
            )
            .unwrap();

        assert_eq!(
            env.bindings.get("workspace").map(String::as_str),
            Some("/Users/test/playground")
        );
        assert!(!env.bindings.contains_key("tmp"));
        assert_eq!(env.detection.hostname.as_deref(), Some("studio"));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("harbor").join("environments.json");

        {
            let mut registry = EnvironmentRegistry::open(&path).unwrap();
            registry
                .register("home", &bindings(&[("home", "/Users/test")]), DetectionRule::default())
                .unwrap();
            registry
                .register("office", &bindings(&[("home", "/home/test")]), DetectionRule::default())
                .unwrap();
            registry.switch("office").unwrap();
        }

        let registry = EnvironmentRegistry::open(&path).unwrap();
        assert_eq!(registry.list().len(), 2);
        let current = registry.current().unwrap();
        assert_eq!(current.name, "office");
        assert_eq!(
            registry.resolver().unwrap().to_logical("/home/test/x"),
            "$home/x"
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_detect_single_and_ambiguous() {
        let mut registry = EnvironmentRegistry::in_memory();
        registry
            .register(
                "home",
                &Bindings::new(),
                DetectionRule {
                    hostname: Some("studio-mac".into()),
                    marker_path: None,
                },
            )
            .unwrap();
        registry
            .register(
                "office",
                &Bindings::new(),
                DetectionRule {
                    hostname: Some("office-linux".into()),
                    marker_path: Some("/srv/office".into()),
                },
            )
            .unwrap();

        let probe = FakeProbe::new(Some("office-linux"), &[]);
        assert_eq!(registry.detect(&probe).unwrap().unwrap().name, "office");

        let nobody = FakeProbe::new(Some("laptop"), &[]);
        assert!(registry.detect(&nobody).unwrap().is_none());

        let both = FakeProbe::new(Some("studio-mac"), &["/srv/office"]);
        match registry.detect(&both) {
            Err(Error::AmbiguousEnvironment { candidates }) => {
                assert_eq!(candidates, vec!["home".to_string(), "office".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }
}
