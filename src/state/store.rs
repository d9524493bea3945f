//! Persistent job state
//!
//! The whole collection is rewritten after every mutation. Writes go to a
//! sibling temp file which is synced and renamed over the target, so a
//! crash leaves either the old or the new file, never a torn one.

use crate::error::{IoResultExt, Result, SkyTrackError};
use crate::state::JobCollection;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// JSON file holding one sweep's jobs
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store for a path; nothing is touched until load/save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the state file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the collection; a missing file is an empty collection
    pub fn load(&self) -> Result<JobCollection> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return Ok(JobCollection::new(Vec::new(), None));
            }
            Err(e) => return Err(SkyTrackError::io(&self.path, e)),
        };

        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SkyTrackError::state_store(&self.path, format!("corrupt state file: {}", e)))
    }

    /// Atomically overwrite the state file
    pub fn save(&self, jobs: &JobCollection) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_path(parent)?;
            }
        }

        let temp_path = self.temp_path();
        let file = File::create(&temp_path).with_path(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, jobs)
            .map_err(|e| SkyTrackError::state_store(&self.path, e.to_string()))?;
        writer.flush().with_path(&temp_path)?;
        let file = writer
            .into_inner()
            .map_err(|e| SkyTrackError::io(&temp_path, e.into_error()))?;
        file.sync_all().with_path(&temp_path)?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).with_path(&self.path)?;
        Ok(())
    }

    /// Stamp the collection and save it
    pub fn persist(&self, jobs: &mut JobCollection) -> Result<()> {
        jobs.touch();
        self.save(jobs)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Job, JobStatus};
    use crate::sweep::{ParamValue, ParameterAssignment};
    use tempfile::TempDir;

    fn sample() -> JobCollection {
        let mut done = Job::new(
            ParameterAssignment::grid([("lr", ParamValue::Float(0.1)), ("bs", ParamValue::Int(32))].into_iter().collect()),
            "3fa2",
            "lr0-1-3fa2",
        );
        done.begin_attempt();
        done.record_submission("managed/4", "lr0-1-3fa2");
        done.mark_done();

        let mut failed = Job::new(ParameterAssignment::benchmark("m1", "eval.py"), "00ff", "m1-00ff");
        failed.begin_attempt();
        failed.mark_failed("FAILED_SETUP");

        let pending = Job::new(ParameterAssignment::literal("echo hi"), "beef", "cmd-beef");

        JobCollection::new(vec![done, failed, pending], Some("abc123".into()))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("jobs.json"));
        assert!(!store.exists());
        let jobs = store.load().unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested/dir/jobs.json"));
        let jobs = sample();

        store.save(&jobs).unwrap();
        assert!(store.exists());
        assert!(!store.temp_path().exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, jobs);
        assert_eq!(loaded.jobs[1].status, JobStatus::Failed);
        assert_eq!(loaded.jobs[0].slug, "lr0-1-3fa2");
        assert_eq!(
            loaded.jobs[0].parameters.values.keys().collect::<Vec<_>>(),
            vec!["lr", "bs"]
        );
    }

    #[test]
    fn test_persist_updates_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("jobs.json"));
        let mut jobs = sample();
        let before = jobs.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.persist(&mut jobs).unwrap();
        assert!(jobs.updated_at > before);
        assert_eq!(store.load().unwrap().updated_at, jobs.updated_at);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = StateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SkyTrackError::StateStore { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_legacy_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(
            &path,
            r#"{"jobs": [{"params": {"lr": 0.01}, "status": "RUNNING", "attempts": 1,
                          "request_id": "r-1", "cluster_name": "tune-job0-att1", "error": null}]}"#,
        )
        .unwrap();

        let jobs = StateStore::new(&path).load().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs.jobs[0].status, JobStatus::Running);
        assert_eq!(jobs.jobs[0].submission_id.as_deref(), Some("r-1"));
        assert_eq!(jobs.config_hash, None);
    }
}
