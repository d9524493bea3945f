//! SkyPilot CLI backend
//!
//! Each submission renders a task file and shells out to `sky`. Jobs that
//! tear their cluster down run as managed jobs so their final state stays
//! queryable after the cluster is gone; jobs on a persistent cluster use the
//! cluster's own queue.

use crate::cluster::{ClusterService, LaunchSpec, RemoteState, RemoteStatus};
use crate::error::{IoResultExt, Result, SkyTrackError};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Submission id prefix for managed jobs
pub const MANAGED_PREFIX: &str = "managed";

const JOB_ID_PATTERN: &str = r"(?i)\bID:\s*(\d+)";
const STATUS_PATTERN: &str = r"\b(SUCCEEDED|FAILED(?:_[A-Z_]+)?|CANCELLED|CANCELLING|RECOVERING|RUNNING|PENDING|SUBMITTED|STARTING|SETTING_UP|INIT)\b";

/// `sky` command line client
#[derive(Debug, Clone)]
pub struct SkyCli {
    binary: String,
    tasks_dir: PathBuf,
    base_task: Mapping,
    job_id_re: Regex,
    status_re: Regex,
}

impl SkyCli {
    /// Create a client for a `sky` executable
    pub fn new(binary: impl Into<String>, tasks_dir: impl Into<PathBuf>) -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| SkyTrackError::config(format!("invalid pattern: {}", e)))
        };
        Ok(Self {
            binary: binary.into(),
            tasks_dir: tasks_dir.into(),
            base_task: Mapping::new(),
            job_id_re: compile(JOB_ID_PATTERN)?,
            status_re: compile(STATUS_PATTERN)?,
        })
    }

    /// Merge every rendered task into a base task file
    pub fn with_task_template(mut self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        self.base_task = match serde_yaml::from_str::<Value>(&text)? {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => {
                return Err(SkyTrackError::config(format!(
                    "task template {} is not a mapping",
                    path.display()
                )))
            }
        };
        Ok(self)
    }

    /// Check if the base task has a `run` section of its own
    pub fn has_template_run(&self) -> bool {
        self.base_task
            .get("run")
            .map(|run| !run.is_null())
            .unwrap_or(false)
    }

    /// Task document for one launch
    ///
    /// An empty command keeps the base task's `run`.
    pub fn render_task(&self, spec: &LaunchSpec) -> Result<Mapping> {
        let mut task = self.base_task.clone();
        task.insert("name".into(), spec.name.clone().into());
        if !spec.command.is_empty() {
            task.insert("run".into(), spec.command.clone().into());
        } else if !self.has_template_run() {
            return Err(SkyTrackError::config(format!(
                "job '{}' has no command and the task template has no run section",
                spec.name
            )));
        }

        if !spec.envs.is_empty() {
            let mut envs = sub_mapping(&task, "envs");
            for (k, v) in &spec.envs {
                envs.insert(k.clone().into(), v.clone().into());
            }
            task.insert("envs".into(), Value::Mapping(envs));
        }

        if !spec.resources.is_empty() {
            let mut resources = sub_mapping(&task, "resources");
            if let Value::Mapping(overrides) = serde_yaml::to_value(&spec.resources)? {
                for (k, v) in overrides {
                    resources.insert(k, v);
                }
            }
            task.insert("resources".into(), Value::Mapping(resources));
        }

        Ok(task)
    }

    fn write_task(&self, spec: &LaunchSpec) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.tasks_dir).with_path(&self.tasks_dir)?;
        let path = self.tasks_dir.join(format!("{}.yaml", spec.name));
        let yaml = serde_yaml::to_string(&self.render_task(spec)?)?;
        std::fs::write(&path, yaml).with_path(&path)?;
        debug!("Wrote task file {}", path.display());
        Ok(path)
    }

    fn run(&self, args: &[&str]) -> std::result::Result<String, String> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.binary, e))?;

        if output.status.success() {
            Ok(console::strip_ansi_codes(&String::from_utf8_lossy(&output.stdout)).into_owned())
        } else {
            Err(failure_message(&output))
        }
    }

    fn launch(&self, spec: &LaunchSpec, args: &[&str]) -> Result<String> {
        let task = self.write_task(spec)?;
        let task = task.to_string_lossy();
        let mut full: Vec<&str> = args.to_vec();
        full.push(&task);

        let stdout = self
            .run(&full)
            .map_err(|m| SkyTrackError::submission(&spec.cluster, m))?;
        self.parse_job_id(&stdout).ok_or_else(|| {
            SkyTrackError::submission(&spec.cluster, "no job id in control plane output")
        })
    }

    /// Last job id printed by a launch/exec call
    pub fn parse_job_id(&self, output: &str) -> Option<String> {
        self.job_id_re
            .captures_iter(output)
            .last()
            .map(|c| c[1].to_string())
    }

    /// State of job `job_id` in a queue table
    pub fn parse_queue(&self, output: &str, job_id: &str) -> Option<RemoteStatus> {
        output.lines().find_map(|line| {
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some(job_id) {
                return None;
            }
            let raw = self.status_re.captures(line)?.get(1)?.as_str();
            Some(map_state(raw))
        })
    }

    /// Active cluster names from a `sky status` table
    pub fn parse_clusters(&self, output: &str) -> Vec<String> {
        let mut active = Vec::new();
        let mut in_table = false;
        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("NAME") {
                in_table = true;
                continue;
            }
            if !in_table {
                continue;
            }
            if trimmed.is_empty() {
                in_table = false;
                continue;
            }
            let mut tokens = trimmed.split_whitespace();
            let Some(name) = tokens.next() else { continue };
            if tokens.any(|t| matches!(t, "UP" | "INIT" | "RUNNING")) {
                active.push(name.to_string());
            }
        }
        active
    }
}

impl ClusterService for SkyCli {
    fn submit(&self, spec: &LaunchSpec) -> Result<String> {
        if spec.auto_teardown {
            let id = self.launch(spec, &["jobs", "launch", "-d", "-y", "-n", &spec.name])?;
            Ok(format!("{}/{}", MANAGED_PREFIX, id))
        } else {
            let id = self.launch(spec, &["launch", "-d", "-y", "-c", &spec.cluster])?;
            Ok(format!("{}/{}", spec.cluster, id))
        }
    }

    fn execute_on_cluster(&self, spec: &LaunchSpec) -> Result<String> {
        let id = self.launch(spec, &["exec", "-d", &spec.cluster])?;
        Ok(format!("{}/{}", spec.cluster, id))
    }

    fn query_status(&self, submission_id: &str) -> Result<RemoteStatus> {
        let (scope, job_id) = submission_id.rsplit_once('/').ok_or_else(|| {
            SkyTrackError::status_query(submission_id, "malformed submission id")
        })?;

        let output = if scope == MANAGED_PREFIX {
            self.run(&["jobs", "queue"])
        } else {
            self.run(&["queue", scope])
        }
        .map_err(|m| SkyTrackError::status_query(submission_id, m))?;

        self.parse_queue(&output, job_id).ok_or_else(|| {
            SkyTrackError::status_query(submission_id, format!("job {} not in queue", job_id))
        })
    }

    fn list_active_clusters(&self) -> Result<Vec<String>> {
        let output = self
            .run(&["status"])
            .map_err(|m| SkyTrackError::status_query("status", m))?;
        Ok(self.parse_clusters(&output))
    }
}

fn sub_mapping(task: &Mapping, key: &str) -> Mapping {
    match task.get(key) {
        Some(Value::Mapping(m)) => m.clone(),
        _ => Mapping::new(),
    }
}

fn map_state(raw: &str) -> RemoteStatus {
    match raw {
        "SUCCEEDED" => RemoteStatus::new(RemoteState::Succeeded),
        "RUNNING" | "RECOVERING" | "CANCELLING" => RemoteStatus::new(RemoteState::Running),
        "PENDING" | "SUBMITTED" | "STARTING" | "SETTING_UP" | "INIT" => {
            RemoteStatus::new(RemoteState::Init)
        }
        // FAILED, FAILED_*, CANCELLED
        other => RemoteStatus::failed(other),
    }
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = console::strip_ansi_codes(&stderr);
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| format!("exited with {}", output.status))
}
