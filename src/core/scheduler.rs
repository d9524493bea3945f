//! Job launching
//!
//! Turns a job into a launch request (command, resources, environment,
//! target cluster) and starts attempts against the control plane, keeping
//! the number of in-flight jobs under the concurrency ceiling.

use crate::cluster::{ClusterService, LaunchSpec};
use crate::config::SweepConfig;
use crate::error::{Result, SkyTrackError};
use crate::state::{Job, JobCollection, JobStatus, StateStore};
use crate::sweep::{resolve, template::format_compact, template::FormatSpec, ResourceRule, Template};
use crate::tracking::RUN_NAME_ENV;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Starts job attempts
pub struct Launcher {
    cluster: Arc<dyn ClusterService>,
    rules: Vec<ResourceRule>,
    command: Option<Template>,
    task_run: bool,
    retry_limit: u32,
    max_concurrent: usize,
    shared_cluster: Option<String>,
}

impl Launcher {
    /// Create a launcher for a sweep configuration
    pub fn new(cluster: Arc<dyn ClusterService>, config: &SweepConfig) -> Result<Self> {
        let command = config.command.as_deref().map(Template::parse).transpose()?;
        Ok(Self {
            cluster,
            rules: config.resources_rules.clone(),
            command,
            task_run: config.task_template.is_some(),
            retry_limit: config.retry_limit,
            max_concurrent: config.max_concurrent.max(1),
            shared_cluster: config
                .reuse_cluster
                .then(|| config.cluster_name.clone()),
        })
    }

    /// Retries allowed after the first attempt
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Shell command a job runs
    ///
    /// A literal command wins; otherwise the command template is rendered
    /// from the job's parameters, and benchmark jobs without a template run
    /// their script. An empty command leaves the task template's own `run`
    /// in place, which reads the parameters from its environment.
    pub fn job_command(&self, job: &Job) -> Result<String> {
        let params = &job.parameters;
        if let Some(cmd) = &params.command {
            return Ok(cmd.clone());
        }

        if let Some(template) = &self.command {
            return template
                .render(|name, spec| {
                    let value = params.get(name)?;
                    match (spec, value.as_f64()) {
                        (FormatSpec::Compact, Some(n)) => Some(format_compact(n)),
                        _ => Some(value.to_string()),
                    }
                })
                .map_err(|e| {
                    SkyTrackError::config(format!("job '{}': {}", job.slug, e))
                });
        }

        if let Some(script) = params.script() {
            return Ok(script.to_string());
        }

        if self.task_run {
            return Ok(String::new());
        }
        Err(SkyTrackError::config(format!("job '{}' has no command", job.slug)))
    }

    /// Check every unfinished job can be turned into a launch request
    pub fn validate(&self, jobs: &JobCollection) -> Result<()> {
        for job in jobs.jobs.iter().filter(|j| j.status != JobStatus::Done) {
            self.job_command(job)?;
        }
        Ok(())
    }

    /// Launch request for the next attempt of a job
    pub fn launch_spec(&self, job: &Job) -> Result<LaunchSpec> {
        let mut envs = job.parameters.env_vars();
        envs.push((RUN_NAME_ENV.to_string(), job.slug.clone()));

        Ok(LaunchSpec {
            name: job.slug.clone(),
            cluster: self
                .shared_cluster
                .clone()
                .unwrap_or_else(|| job.slug.clone()),
            command: self.job_command(job)?,
            resources: resolve(&job.parameters, &self.rules),
            envs,
            auto_teardown: self.shared_cluster.is_none(),
        })
    }

    /// Start one attempt of a job
    ///
    /// A submission error is recorded as a failed attempt rather than
    /// returned. Returns whether the control plane accepted the job.
    pub fn start_attempt(&self, job: &mut Job) -> Result<bool> {
        let spec = self.launch_spec(job)?;
        let first_attempt = job.attempts == 0;
        job.begin_attempt();

        let submitted = if self.shared_cluster.is_some() && !first_attempt {
            self.cluster.execute_on_cluster(&spec)
        } else {
            self.cluster.submit(&spec)
        };

        match submitted {
            Ok(id) => {
                info!(
                    "Submitted {} (attempt {}/{}) on {} as {} [{}]",
                    job.slug,
                    job.attempts,
                    Job::max_attempts(self.retry_limit),
                    spec.cluster,
                    id,
                    spec.resources
                );
                job.record_submission(id, spec.cluster);
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Submission of {} (attempt {}) failed: {}",
                    job.slug, job.attempts, e
                );
                job.cluster_name = Some(spec.cluster);
                job.mark_failed(e.to_string());
                Ok(false)
            }
        }
    }

    /// Start attempts until the concurrency ceiling is reached
    ///
    /// Jobs are considered in collection order and the store is written
    /// after every attempt. Returns the number of attempts started.
    pub fn fill_slots(&self, jobs: &mut JobCollection, store: &StateStore) -> Result<usize> {
        let mut running = jobs.running_count();
        let mut started = 0;

        for i in 0..jobs.jobs.len() {
            if running >= self.max_concurrent {
                debug!("All {} slots busy", self.max_concurrent);
                break;
            }
            if !jobs.jobs[i].is_launchable(self.retry_limit) {
                continue;
            }

            if self.start_attempt(&mut jobs.jobs[i])? {
                running += 1;
            }
            started += 1;
            store.persist(jobs)?;
        }

        Ok(started)
    }
}
