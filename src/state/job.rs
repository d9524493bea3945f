//! Job lifecycle model
//!
//! A job moves `PENDING -> RUNNING -> DONE | FAILED`, and `FAILED -> RUNNING`
//! again while its retry budget lasts. `DONE` is final.

use crate::error::{Result, SkyTrackError};
use crate::sweep::{generate_uid, ParameterAssignment, SlugPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Current state file layout version
pub const STATE_VERSION: u32 = 1;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Not submitted yet
    #[default]
    Pending,
    /// Submitted, outcome not yet observed
    Running,
    /// Remote success observed
    Done,
    /// Last attempt failed
    Failed,
}

impl JobStatus {
    /// Upper-case label as stored on disk
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One unit of work and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Concrete parameters
    #[serde(alias = "params")]
    pub parameters: ParameterAssignment,
    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,
    /// Submission attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Control-plane id of the most recent attempt
    #[serde(default, alias = "request_id")]
    pub submission_id: Option<String>,
    /// Cluster used by the most recent attempt
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Failure reason of the most recent attempt
    #[serde(default, alias = "error")]
    pub error_message: Option<String>,
    /// Random disambiguator, fixed at creation
    #[serde(default)]
    pub uid: String,
    /// Rendered name, fixed at creation
    #[serde(default)]
    pub slug: String,
}

impl Job {
    /// Create a pending job
    pub fn new(parameters: ParameterAssignment, uid: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            parameters,
            status: JobStatus::Pending,
            attempts: 0,
            submission_id: None,
            cluster_name: None,
            error_message: None,
            uid: uid.into(),
            slug: slug.into(),
        }
    }

    /// Attempts allowed under a retry limit
    pub fn max_attempts(retry_limit: u32) -> u32 {
        retry_limit.saturating_add(1)
    }

    /// Waiting for (another) submission and budget left
    pub fn is_launchable(&self, retry_limit: u32) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Failed)
            && self.attempts < Self::max_attempts(retry_limit)
    }

    /// Done, or out of attempts and not in flight
    pub fn is_terminal(&self, retry_limit: u32) -> bool {
        match self.status {
            JobStatus::Done => true,
            JobStatus::Running => false,
            JobStatus::Pending | JobStatus::Failed => {
                self.attempts >= Self::max_attempts(retry_limit)
            }
        }
    }

    /// Failed with no retries left
    pub fn is_permanently_failed(&self, retry_limit: u32) -> bool {
        self.status != JobStatus::Done && self.is_terminal(retry_limit)
    }

    /// Start a new attempt: bump the counter, clear the last outcome, mark running
    pub fn begin_attempt(&mut self) {
        debug_assert!(self.status != JobStatus::Done);
        self.attempts += 1;
        self.status = JobStatus::Running;
        self.submission_id = None;
        self.error_message = None;
    }

    /// Record an accepted submission
    pub fn record_submission(&mut self, submission_id: impl Into<String>, cluster: impl Into<String>) {
        self.submission_id = Some(submission_id.into());
        self.cluster_name = Some(cluster.into());
    }

    /// Observed remote success
    pub fn mark_done(&mut self) {
        self.status = JobStatus::Done;
        self.error_message = None;
    }

    /// Attempt failed, remotely or at submission
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        if self.status == JobStatus::Done {
            return;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
    }
}

/// Per-status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Never submitted
    pub pending: usize,
    /// In flight
    pub running: usize,
    /// Succeeded
    pub done: usize,
    /// Failed (including retryable)
    pub failed: usize,
}

impl StatusCounts {
    /// Total jobs
    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed
    }
}

/// All jobs of one sweep run, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCollection {
    /// Layout version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Fingerprint of the configuration that created the jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last write time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Jobs in submission order
    #[serde(default)]
    pub jobs: Vec<Job>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl JobCollection {
    /// Create a collection from jobs
    pub fn new(jobs: Vec<Job>, config_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            config_hash,
            created_at: now,
            updated_at: now,
            jobs,
        }
    }

    /// Build fresh pending jobs from a matrix, naming each one
    pub fn populate(
        assignments: Vec<ParameterAssignment>,
        policy: &SlugPolicy,
        config_hash: Option<String>,
    ) -> Result<Self> {
        let mut jobs = Vec::with_capacity(assignments.len());
        for (index, parameters) in assignments.into_iter().enumerate() {
            let uid = generate_uid();
            let slug = policy.render(&parameters, &uid, index)?;
            jobs.push(Job::new(parameters, uid, slug));
        }

        let collection = Self::new(jobs, config_hash);
        collection.check_unique_slugs(policy)?;
        Ok(collection)
    }

    /// Name jobs loaded from a file that predates persisted names
    ///
    /// Returns true if any job was changed.
    pub fn backfill_names(&mut self, policy: &SlugPolicy) -> Result<bool> {
        let mut changed = false;
        for (index, job) in self.jobs.iter_mut().enumerate() {
            if job.uid.is_empty() {
                job.uid = generate_uid();
                changed = true;
            }
            if job.slug.is_empty() {
                job.slug = policy.render(&job.parameters, &job.uid, index)?;
                changed = true;
            }
        }
        if changed {
            self.check_unique_slugs(policy)?;
        }
        Ok(changed)
    }

    fn check_unique_slugs(&self, policy: &SlugPolicy) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if !seen.insert(job.slug.as_str()) {
                return Err(SkyTrackError::config(format!(
                    "slug pattern '{}' produced duplicate name '{}'; include more parameters or {{uid}}",
                    policy.pattern(),
                    job.slug
                )));
            }
        }
        Ok(())
    }

    /// Refresh the write timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check if there are no jobs
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs currently in flight
    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    /// Count jobs per status
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Every job has reached a final state
    pub fn all_terminal(&self, retry_limit: u32) -> bool {
        self.jobs.iter().all(|j| j.is_terminal(retry_limit))
    }

    /// Jobs that exhausted their retries without success
    pub fn permanently_failed(&self, retry_limit: u32) -> impl Iterator<Item = &Job> {
        self.jobs
            .iter()
            .filter(move |j| j.is_permanently_failed(retry_limit))
    }
}
