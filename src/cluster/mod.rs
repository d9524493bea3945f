//! Cluster orchestration module
//!
//! The control plane is consumed through [`ClusterService`]: launch a job
//! (optionally on a fresh cluster torn down afterwards), run more work on a
//! live cluster, and ask for a submitted job's state.

mod sky;

#[cfg(test)]
pub(crate) mod stub;

pub use sky::SkyCli;

use crate::error::Result;
use crate::sweep::ResourceOverrides;
use std::fmt;

/// Everything needed to start one attempt of a job
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchSpec {
    /// Task name (the job slug)
    pub name: String,
    /// Target cluster
    pub cluster: String,
    /// Shell command the task runs
    pub command: String,
    /// Resource overrides on top of the task defaults
    pub resources: ResourceOverrides,
    /// Environment exported to the task
    pub envs: Vec<(String, String)>,
    /// Tear the cluster down once the job ends
    pub auto_teardown: bool,
}

/// Remote job state as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    /// Queued or provisioning
    Init,
    /// Executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished unsuccessfully
    Failed,
}

impl RemoteState {
    /// No further transitions expected
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    /// Reported state
    pub state: RemoteState,
    /// Failure detail, if the service gave one
    pub error: Option<String>,
}

impl RemoteStatus {
    /// Status without detail
    pub fn new(state: RemoteState) -> Self {
        Self { state, error: None }
    }

    /// Failed status with detail
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RemoteState::Failed,
            error: Some(error.into()),
        }
    }
}

/// Cluster-launch control plane
pub trait ClusterService: Send + Sync {
    /// Launch a job, provisioning the spec's cluster; returns a submission id
    fn submit(&self, spec: &LaunchSpec) -> Result<String>;

    /// Run a job on the already-provisioned cluster named by the spec
    fn execute_on_cluster(&self, spec: &LaunchSpec) -> Result<String>;

    /// Current state of a submission
    fn query_status(&self, submission_id: &str) -> Result<RemoteStatus>;

    /// Names of clusters that are up or starting
    fn list_active_clusters(&self) -> Result<Vec<String>>;
}
