//! The run registry: an append-only record of computations.
//!
//! Each run appends one JSON line with the task name, fingerprint, free-text
//! reason, repository revision, timestamps, and outcome. Recording refuses to
//! start from a dirty working tree, since an unrecorded code state would make
//! the revision field meaningless.

use std::fs;
use std::io::Write;
use std::process::Command;

use anyhow::anyhow;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::describe::Fingerprint;
use crate::error::RegistryError;

const GIT_EXEC: &str = "git";

/// Final state of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Running,
    Completed,
    Failed,
}

/// One line of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub taskname: String,
    pub fingerprint: String,
    pub reason: Option<String>,
    pub version: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub outcome: Outcome,
}

/// Writes run records to a JSON-lines file, optionally tied to a source
/// repository whose revision stamps each record.
#[derive(Debug, Clone)]
pub struct Registry {
    records: Utf8PathBuf,
    repository: Option<Utf8PathBuf>,
}

impl Registry {
    pub fn open(
        records: impl Into<Utf8PathBuf>,
        repository: Option<Utf8PathBuf>,
    ) -> Result<Registry, RegistryError> {
        let records = records.into();
        if let Some(dir) = records.parent() {
            fs::create_dir_all(dir)?;
        }
        Ok(Registry {
            records,
            repository,
        })
    }

    /// Fails when the tracked repository has uncommitted changes. Without a
    /// repository this is a no-op.
    pub fn check_clean(&self) -> Result<(), RegistryError> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let status = git(repository, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            Ok(())
        } else {
            Err(RegistryError::DirtyRepository)
        }
    }

    /// The current revision of the tracked repository, if any.
    pub fn version(&self) -> Option<String> {
        let repository = self.repository.as_ref()?;
        git(repository, &["rev-parse", "HEAD"])
            .ok()
            .map(|rev| rev.trim().to_string())
    }

    pub(crate) fn start(
        &self,
        taskname: &str,
        fingerprint: &Fingerprint,
        reason: Option<String>,
    ) -> Result<RunRecord, RegistryError> {
        self.check_clean()?;
        info!(taskname, %fingerprint, "Recording run");
        Ok(RunRecord {
            taskname: taskname.to_string(),
            fingerprint: fingerprint.to_hex(),
            reason,
            version: self.version(),
            started: Utc::now(),
            finished: None,
            outcome: Outcome::Running,
        })
    }

    pub(crate) fn finish(
        &self,
        mut record: RunRecord,
        outcome: Outcome,
    ) -> Result<(), RegistryError> {
        record.finished = Some(Utc::now());
        record.outcome = outcome;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.records)?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }

    /// All records written so far, oldest first.
    pub fn records(&self) -> Result<Vec<RunRecord>, RegistryError> {
        if !self.records.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(&self.records)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(RegistryError::from))
            .collect()
    }
}

fn git(repository: &Utf8Path, args: &[&str]) -> Result<String, RegistryError> {
    let output = Command::new(GIT_EXEC)
        .args(args)
        .current_dir(repository)
        .output()
        .map_err(|err| RegistryError::Git(anyhow!(err)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(RegistryError::Git(anyhow!(stderr)));
    }
    String::from_utf8(output.stdout).map_err(|err| RegistryError::Git(anyhow!(err)))
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    fn temp_registry() -> (TempDir, Registry) {
        let dir = TempDir::new().unwrap();
        let records = Utf8PathBuf::from(dir.path().to_str().unwrap()).join("runs.jsonl");
        let registry = Registry::open(records, None).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_start_finish_appends_records() {
        let (_dir, registry) = temp_registry();
        let fingerprint = Fingerprint::default();

        let record = registry
            .start("Multiply", &fingerprint, Some("exploration".into()))
            .unwrap();
        registry.finish(record, Outcome::Completed).unwrap();

        let record = registry.start("Multiply", &fingerprint, None).unwrap();
        registry.finish(record, Outcome::Failed).unwrap();

        let records = registry.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Outcome::Completed);
        assert_eq!(records[0].reason.as_deref(), Some("exploration"));
        assert!(records[0].finished.is_some());
        assert_eq!(records[1].outcome, Outcome::Failed);
    }

    #[test]
    fn test_no_repository_means_no_version_and_always_clean() {
        let (_dir, registry) = temp_registry();
        assert!(registry.version().is_none());
        assert!(registry.check_clean().is_ok());
    }

    #[test]
    fn test_empty_registry_reads_back_empty() {
        let (_dir, registry) = temp_registry();
        assert!(registry.records().unwrap().is_empty());
    }
}
