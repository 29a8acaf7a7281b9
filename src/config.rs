//! Project configuration and the runtime bundle built from it.
//!
//! Everything a task needs at run time travels through an explicit
//! [`Project`] value; there is no process-global state. The serialized
//! [`ProjectConfig`] is what the `init` wizard writes.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::Registry;
use crate::store::Store;

pub const CONFIG_FILE: &str = "memotask.json";

const RECORDS_FILE: &str = "runs.jsonl";

/// The serialized project layout: where inputs come from, where results go,
/// and (optionally) which repository to stamp run records with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub input_root: Utf8PathBuf,
    pub output_root: Utf8PathBuf,
    pub repository: Option<Utf8PathBuf>,
}

impl ProjectConfig {
    pub fn new(
        input_root: impl Into<Utf8PathBuf>,
        output_root: impl Into<Utf8PathBuf>,
        repository: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            repository,
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Checks the layout before any store is opened: the two roots must
    /// differ, and each must be (or be creatable as) a writable directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize(&self.input_root) == normalize(&self.output_root) {
            return Err(ConfigError::SameRoots);
        }
        check_root(&self.input_root)?;
        check_root(&self.output_root)?;
        Ok(())
    }
}

fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    use camino::Utf8Component;
    path.components()
        .filter(|c| !matches!(c, Utf8Component::CurDir))
        .collect()
}

/// A root is acceptable if it is a writable directory, or does not exist yet
/// but its closest existing ancestor is writable.
fn check_root(root: &Utf8Path) -> Result<(), ConfigError> {
    let mut probe = if root.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        root
    };
    loop {
        if probe.exists() {
            if probe == root && !probe.is_dir() {
                return Err(ConfigError::NotADirectory(root.to_owned()));
            }
            let metadata = fs::metadata(probe)?;
            if metadata.permissions().readonly() {
                return Err(ConfigError::NotWritable(root.to_owned()));
            }
            return Ok(());
        }
        probe = match probe.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
    }
}

/// The runtime bundle handed to [`Task::run`](crate::Task::run): the two
/// datastores, the registry, and whether runs are recorded.
pub struct Project {
    pub input_store: Store,
    pub output_store: Store,
    pub registry: Option<Registry>,
    pub record: bool,
}

impl Project {
    /// Opens the two stores without a registry. Results still cache; runs are
    /// simply not recorded.
    pub fn open_unrecorded(
        input_root: impl AsRef<Utf8Path>,
        output_root: impl AsRef<Utf8Path>,
    ) -> Result<Project, ConfigError> {
        Ok(Project {
            input_store: Store::open(input_root)?,
            output_store: Store::open(output_root)?,
            registry: None,
            record: false,
        })
    }

    pub fn from_config(config: &ProjectConfig, record: bool) -> Result<Project, ConfigError> {
        config.validate()?;
        let input_store = Store::open(&config.input_root)?;
        let output_store = Store::open(&config.output_root)?;
        let registry = Registry::open(
            output_store.root().join(RECORDS_FILE),
            config.repository.clone(),
        )?;
        Ok(Project {
            input_store,
            output_store,
            registry: Some(registry),
            record,
        })
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_same_roots_rejected() {
        let config = ProjectConfig::new("data", "./data", None);
        assert!(matches!(config.validate(), Err(ConfigError::SameRoots)));
    }

    #[test]
    fn test_from_config_opens_stores_and_registry() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = ProjectConfig::new(
            format!("{root}/data"),
            format!("{root}/data/run_dump"),
            None,
        );
        let project = Project::from_config(&config, true).unwrap();
        assert!(project.registry.is_some());
        assert!(project.record);
        assert!(project.input_store.root().is_dir());
        assert!(project.output_store.root().is_dir());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from(dir.path().to_str().unwrap()).join(CONFIG_FILE);
        let config = ProjectConfig::new("data", "data/run_dump", Some("src".into()));
        config.save(&path).unwrap();
        let loaded = ProjectConfig::load(&path).unwrap();
        assert_eq!(loaded.input_root, config.input_root);
        assert_eq!(loaded.output_root, config.output_root);
        assert_eq!(loaded.repository, config.repository);
    }

    #[test]
    fn test_root_under_nonexistent_but_writable_parent_accepted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = ProjectConfig::new(
            format!("{root}/deep/nested/in"),
            format!("{root}/deep/nested/out"),
            None,
        );
        assert!(config.validate().is_ok());
    }
}
