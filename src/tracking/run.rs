//! Run handles and metric sinks
//!
//! A [`RunHandle`] carries the identity of one tracked run (name, config,
//! git revision, host) and forwards metrics to a [`MetricSink`].

use crate::error::{IoResultExt, Result};
use crate::tracking::Artifact;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Named scalar metrics
pub type Metrics = BTreeMap<String, f64>;

/// Environment variable carrying the run name into remote tasks
pub const RUN_NAME_ENV: &str = "SKYTRACK_RUN_NAME";

/// Default project name
pub const DEFAULT_PROJECT: &str = "skytrack";

/// Destination for logged metrics
pub trait MetricSink: Send + Sync {
    /// Record one set of metrics
    fn log(&self, run: &str, metrics: &Metrics, step: Option<u64>) -> Result<()>;

    /// Record a bundle of files produced by a run
    fn log_artifact(&self, run: &str, artifact: &Artifact) -> Result<()>;
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: DateTime<Utc>,
    run: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<&'a Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<&'a Artifact>,
}

/// Appends one JSON object per call to a file
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) a metrics file for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_path(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_path(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Metrics file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &Record<'_>) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", line).with_path(&self.path)?;
        writer.flush().with_path(&self.path)?;
        Ok(())
    }
}

impl MetricSink for JsonlSink {
    fn log(&self, run: &str, metrics: &Metrics, step: Option<u64>) -> Result<()> {
        self.append(&Record {
            timestamp: Utc::now(),
            run,
            step,
            metrics: Some(metrics),
            artifact: None,
        })
    }

    fn log_artifact(&self, run: &str, artifact: &Artifact) -> Result<()> {
        self.append(&Record {
            timestamp: Utc::now(),
            run,
            step: None,
            metrics: None,
            artifact: Some(artifact),
        })
    }
}

/// Keeps every record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Metrics, Option<u64>)>>,
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records logged so far
    pub fn records(&self) -> Vec<(Metrics, Option<u64>)> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Artifacts logged so far
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl MetricSink for MemorySink {
    fn log(&self, _run: &str, metrics: &Metrics, step: Option<u64>) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((metrics.clone(), step));
        Ok(())
    }

    fn log_artifact(&self, _run: &str, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(artifact.clone());
        Ok(())
    }
}

/// Identity of a tracked run
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Project the run belongs to
    pub project: Option<String>,
    /// Run name; falls back to the `SKYTRACK_RUN_NAME` environment variable
    pub run_name: Option<String>,
    /// Free-form parameters stored with the run
    pub config: Map<String, Value>,
}

/// One tracked run
pub struct RunHandle {
    name: String,
    project: String,
    config: Map<String, Value>,
    git_rev: String,
    hostname: String,
    step: AtomicU64,
    sink: Arc<dyn MetricSink>,
}

impl RunHandle {
    /// Start a run
    pub fn new(run: RunConfig, sink: Arc<dyn MetricSink>) -> Self {
        let git_rev = git_revision();
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let name = run
            .run_name
            .or_else(|| std::env::var(RUN_NAME_ENV).ok())
            .unwrap_or_else(|| format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S")));

        let mut config = run.config;
        config
            .entry("git_commit")
            .or_insert_with(|| Value::String(git_rev.clone()));

        Self {
            name,
            project: run.project.unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            config,
            git_rev,
            hostname,
            step: AtomicU64::new(0),
            sink,
        }
    }

    /// Run name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project name
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Parameters stored with the run
    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Git commit the run started from
    pub fn git_rev(&self) -> &str {
        &self.git_rev
    }

    /// Host the run started on
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Highest step logged so far
    pub fn step(&self) -> u64 {
        self.step.load(Ordering::Relaxed)
    }

    /// Log metrics, optionally at an explicit step
    pub fn log(&self, metrics: &Metrics, step: Option<u64>) -> Result<()> {
        if let Some(s) = step {
            self.step.fetch_max(s, Ordering::Relaxed);
        }
        self.sink.log(&self.name, metrics, step)
    }

    /// Log the learning rate of every optimizer parameter group
    pub fn log_lr(&self, group_lrs: &[f64], step: u64) -> Result<()> {
        let metrics: Metrics = group_lrs
            .iter()
            .enumerate()
            .map(|(i, lr)| (format!("lr/group_{}", i), *lr))
            .collect();
        if metrics.is_empty() {
            return Ok(());
        }
        self.log(&metrics, Some(step))
    }

    /// Log gradient L2 norms every `every` steps
    ///
    /// Returns whether anything was logged.
    pub fn log_gradient_norms<'a, I>(&self, norms: I, step: u64, every: u64) -> Result<bool>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        if every == 0 || step % every != 0 {
            return Ok(false);
        }
        let metrics: Metrics = norms
            .into_iter()
            .map(|(name, norm)| (format!("grad/{}", name), norm))
            .collect();
        if metrics.is_empty() {
            return Ok(false);
        }
        self.log(&metrics, Some(step))?;
        Ok(true)
    }

    /// Bundle files and directories and log them as one artifact
    ///
    /// Missing paths are skipped.
    pub fn log_artifacts<I, P>(&self, paths: I, name: &str, kind: &str) -> Result<Artifact>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let artifact = Artifact::collect(name, kind, paths)?;
        self.sink.log_artifact(&self.name, &artifact)?;
        info!(
            "Logged artifact {} ({} files, {} bytes) for {}",
            artifact.name,
            artifact.files.len(),
            artifact.total_bytes(),
            self.name
        );
        Ok(artifact)
    }
}

/// Holds at most one run; the first acquisition wins
#[derive(Default)]
pub struct RunRegistry {
    current: Mutex<Option<Arc<RunHandle>>>,
}

impl RunRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the active run, starting it on first use
    ///
    /// Later calls ignore their arguments and return the same handle.
    pub fn acquire(&self, run: RunConfig, sink: Arc<dyn MetricSink>) -> Arc<RunHandle> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(current.get_or_insert_with(|| Arc::new(RunHandle::new(run, sink))))
    }

    /// The active run, if any
    pub fn current(&self) -> Option<Arc<RunHandle>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Current git commit, or `unknown` outside a repository
pub fn git_revision() -> String {
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
