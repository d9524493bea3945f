//! Sweep engine
//!
//! Drives a sweep to completion: builds or resumes the job collection,
//! starts attempts, polls the control plane and retries failures until
//! every job is terminal.
//!
//! Two execution modes share the same job lifecycle:
//! - dedicated: every attempt gets its own auto-teardown cluster, up to
//!   `max_concurrent` at a time
//! - reuse: jobs run one at a time on a single persistent cluster

use crate::cluster::{ClusterService, LaunchSpec, RemoteState};
use crate::config::SweepConfig;
use crate::core::Launcher;
use crate::error::{Result, SkyTrackError};
use crate::progress::SweepProgress;
use crate::state::{Job, JobCollection, JobStatus, StateStore};
use crate::sweep::{generate, ParameterAssignment, SlugPolicy};
use crate::tracking::{Metrics, RunHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Recorded when the control plane reports failure without detail
pub const DEFAULT_FAILURE_MESSAGE: &str = "remote job failed";

/// Recorded for a persisted RUNNING job that never got a submission id
pub const NO_SUBMISSION_MESSAGE: &str = "no submission recorded";

/// Outcome of a sweep run
#[derive(Debug, Clone)]
pub struct SweepSummary {
    /// Jobs in the sweep
    pub total: usize,
    /// Slugs of jobs that succeeded
    pub succeeded: Vec<String>,
    /// Slugs and last errors of jobs out of retries
    pub failed: Vec<(String, String)>,
    /// Jobs that may still run (only after cancellation)
    pub unfinished: usize,
    /// Attempts made over the lifetime of the sweep
    pub attempts: u64,
    /// Wall time of this run
    pub elapsed: Duration,
    /// Stopped by the cancellation flag
    pub cancelled: bool,
}

impl SweepSummary {
    fn from_jobs(jobs: &JobCollection, retry_limit: u32, elapsed: Duration, cancelled: bool) -> Self {
        let mut summary = Self {
            total: jobs.len(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            unfinished: 0,
            attempts: 0,
            elapsed,
            cancelled,
        };

        for job in &jobs.jobs {
            summary.attempts += u64::from(job.attempts);
            if job.status == JobStatus::Done {
                summary.succeeded.push(job.slug.clone());
            } else if job.is_terminal(retry_limit) {
                let error = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                summary.failed.push((job.slug.clone(), error));
            } else {
                summary.unfinished += 1;
            }
        }
        summary
    }

    /// Check if every job succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.unfinished == 0
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let elapsed = Duration::from_secs(self.elapsed.as_secs());
        println!("\n=== Sweep Summary ===");
        println!("Jobs:            {}", self.total);
        println!("Succeeded:       {}", self.succeeded.len());
        println!("Failed:          {}", self.failed.len());
        if self.unfinished > 0 {
            println!("Unfinished:      {}", self.unfinished);
        }
        println!("Attempts:        {}", self.attempts);
        println!("Duration:        {}", humantime::format_duration(elapsed));
        if self.cancelled {
            println!("Status:          cancelled");
        }

        if !self.failed.is_empty() {
            println!("\nFailures: {}", self.failed.len());
            for (slug, error) in &self.failed {
                println!("  {} - {}", slug, error);
            }
        }
    }
}

/// Sweep orchestrator
pub struct SweepEngine {
    config: SweepConfig,
    cluster: Arc<dyn ClusterService>,
    launcher: Launcher,
    store: StateStore,
    poll_interval: Duration,
    progress: SweepProgress,
    run: Option<Arc<RunHandle>>,
    cancelled: Arc<AtomicBool>,
}

impl SweepEngine {
    /// Create an engine for a validated configuration
    pub fn new(config: SweepConfig, cluster: Arc<dyn ClusterService>) -> Result<Self> {
        config.validate()?;
        let launcher = Launcher::new(Arc::clone(&cluster), &config)?;
        Ok(Self {
            store: StateStore::new(&config.state_file),
            poll_interval: config.poll_interval(),
            config,
            cluster,
            launcher,
            progress: SweepProgress::disabled(),
            run: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: SweepProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Log per-cycle sweep metrics to a run
    pub fn with_run(mut self, run: Arc<RunHandle>) -> Self {
        self.run = Some(run);
        self
    }

    /// Override the configured poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get cancellation flag for external control
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancel the sweep at the next cycle
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Job state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn retry_limit(&self) -> u32 {
        self.config.retry_limit
    }

    /// Assignments the configuration expands to
    pub fn plan(&self) -> Result<Vec<ParameterAssignment>> {
        generate(&self.config)
    }

    /// Load the persisted jobs, or create them if the store is empty
    ///
    /// Every unfinished job is checked for a renderable command before
    /// anything is written or submitted.
    pub fn prepare(&self) -> Result<JobCollection> {
        let (mut jobs, dirty) = self.load_or_create()?;
        if dirty {
            self.store.persist(&mut jobs)?;
        }
        Ok(jobs)
    }

    /// Returns the jobs and whether they differ from what is on disk
    fn load_or_create(&self) -> Result<(JobCollection, bool)> {
        let policy = SlugPolicy::new(&self.config.slug_pattern)?;
        let hash = self.config.fingerprint()?;
        let mut jobs = self.store.load()?;
        let mut dirty = false;

        if jobs.is_empty() {
            let assignments = self.plan()?;
            if assignments.is_empty() {
                warn!("Sweep matrix is empty, nothing to run");
            }
            jobs = JobCollection::populate(assignments, &policy, Some(hash))?;
            info!(
                "Created {} jobs for {} ({} mode)",
                jobs.len(),
                self.config.display_name(),
                self.config.mode
            );
            dirty = true;
        } else {
            let counts = jobs.counts();
            info!(
                "Resuming {} jobs from {} ({} done, {} failed, {} running, {} pending)",
                jobs.len(),
                self.store.path().display(),
                counts.done,
                counts.failed,
                counts.running,
                counts.pending
            );
            match jobs.config_hash.as_deref() {
                Some(stored) if stored != hash => warn!(
                    "Configuration changed since {} was created; continuing with the stored jobs",
                    self.store.path().display()
                ),
                None => debug!("State file has no configuration fingerprint"),
                _ => {}
            }
        }

        if jobs.backfill_names(&policy)? {
            dirty = true;
        }
        self.launcher.validate(&jobs)?;
        Ok((jobs, dirty))
    }

    /// Launch requests the sweep would make, without submitting or writing
    pub fn dry_run(&self) -> Result<Vec<LaunchSpec>> {
        let (jobs, _) = self.load_or_create()?;
        jobs.jobs
            .iter()
            .filter(|j| j.status != JobStatus::Done)
            .map(|j| self.launcher.launch_spec(j))
            .collect()
    }

    /// Run the sweep until every job is terminal or the run is cancelled
    pub fn run(&self) -> Result<SweepSummary> {
        let started = Instant::now();
        let mut jobs = self.prepare()?;
        self.progress.set_total(jobs.len());

        let cancelled = if self.config.reuse_cluster {
            self.run_sequential(&mut jobs)?
        } else {
            self.run_dedicated(&mut jobs)?
        };

        if cancelled {
            warn!("Sweep cancelled, state saved to {}", self.store.path().display());
            self.store.persist(&mut jobs)?;
        }
        self.report(&jobs);
        self.progress.finish();

        let summary =
            SweepSummary::from_jobs(&jobs, self.retry_limit(), started.elapsed(), cancelled);
        info!(
            "Sweep finished: {} succeeded, {} failed, {} unfinished",
            summary.succeeded.len(),
            summary.failed.len(),
            summary.unfinished
        );
        Ok(summary)
    }

    /// One auto-teardown cluster per attempt, bounded by `max_concurrent`
    ///
    /// Returns whether the loop was cancelled.
    fn run_dedicated(&self, jobs: &mut JobCollection) -> Result<bool> {
        // Settle attempts left RUNNING by an earlier process before
        // launching anything new
        self.poll_running(jobs)?;

        loop {
            if self.is_cancelled() {
                return Ok(true);
            }

            self.launcher.fill_slots(jobs, &self.store)?;
            self.poll_running(jobs)?;
            self.report(jobs);

            if jobs.all_terminal(self.retry_limit()) {
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Jobs one at a time on the shared cluster, launching it once
    ///
    /// Returns whether the loop was cancelled.
    fn run_sequential(&self, jobs: &mut JobCollection) -> Result<bool> {
        info!("Running {} jobs on shared cluster {}", jobs.len(), self.config.cluster_name);

        for i in 0..jobs.len() {
            if jobs.jobs[i].status == JobStatus::Running && self.wait_for_terminal(jobs, i)? {
                return Ok(true);
            }

            while jobs.jobs[i].is_launchable(self.retry_limit()) {
                if self.is_cancelled() {
                    return Ok(true);
                }
                self.launcher.start_attempt(&mut jobs.jobs[i])?;
                self.store.persist(jobs)?;
                if self.wait_for_terminal(jobs, i)? {
                    return Ok(true);
                }
                self.report(jobs);
            }
        }
        Ok(false)
    }

    /// Poll job `index` until it leaves RUNNING
    ///
    /// Returns whether the wait was cancelled.
    fn wait_for_terminal(&self, jobs: &mut JobCollection, index: usize) -> Result<bool> {
        while jobs.jobs[index].status == JobStatus::Running {
            if self.is_cancelled() {
                return Ok(true);
            }
            if self.poll_job(&mut jobs.jobs[index]) {
                self.store.persist(jobs)?;
            }
            if jobs.jobs[index].status == JobStatus::Running {
                std::thread::sleep(self.poll_interval);
            }
        }
        Ok(false)
    }

    /// Query every RUNNING job once and persist any change
    ///
    /// Returns the number of jobs whose state changed.
    pub fn poll_running(&self, jobs: &mut JobCollection) -> Result<usize> {
        let mut changed = 0;
        for job in jobs
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Running)
        {
            if self.poll_job(job) {
                changed += 1;
            }
        }

        if changed > 0 {
            self.store.persist(jobs)?;
        }
        Ok(changed)
    }

    /// Apply one status query to a RUNNING job; returns whether it changed
    fn poll_job(&self, job: &mut Job) -> bool {
        let Some(id) = job.submission_id.clone() else {
            warn!("{} is RUNNING without a submission id", job.slug);
            job.mark_failed(NO_SUBMISSION_MESSAGE);
            return true;
        };

        let status = match self.cluster.query_status(&id) {
            Ok(status) => status,
            Err(e) => {
                warn!("Status query for {} failed: {}", job.slug, e);
                return false;
            }
        };

        if !status.state.is_finished() {
            debug!("{} is {}", job.slug, status.state);
            return false;
        }

        if status.state == RemoteState::Succeeded {
            info!("{} succeeded (attempt {})", job.slug, job.attempts);
            job.mark_done();
            return true;
        }

        let message = status
            .error
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        let failure = SkyTrackError::job_failed(&job.slug, &message);
        if job.attempts < Job::max_attempts(self.retry_limit()) {
            warn!("{} (attempt {}), will retry", failure, job.attempts);
        } else {
            warn!("{} (attempt {}), no retries left", failure, job.attempts);
        }
        job.mark_failed(message);
        true
    }

    fn report(&self, jobs: &JobCollection) {
        let counts = jobs.counts();
        let finished = jobs
            .jobs
            .iter()
            .filter(|j| j.is_terminal(self.retry_limit()))
            .count();
        self.progress.update(&counts, finished);

        if let Some(run) = &self.run {
            let metrics = Metrics::from([
                ("sweep/done".to_string(), counts.done as f64),
                ("sweep/running".to_string(), counts.running as f64),
                ("sweep/failed".to_string(), counts.failed as f64),
                ("sweep/pending".to_string(), counts.pending as f64),
            ]);
            if let Err(e) = run.log(&metrics, None) {
                warn!("Failed to log sweep metrics: {}", e);
            }
        }
    }
}
