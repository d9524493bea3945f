//! Scripted in-memory control plane for tests

use crate::cluster::{ClusterService, LaunchSpec, RemoteState, RemoteStatus};
use crate::error::{Result, SkyTrackError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// How one submission behaves
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// The submission call itself fails
    Reject(String),
    /// Accepted, eventually succeeds
    Succeed,
    /// Accepted, eventually fails with this detail
    Fail(Option<String>),
}

/// Recorded call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Submit(LaunchSpec),
    Execute(LaunchSpec),
    Query(String),
}

#[derive(Debug, Default)]
struct Inner {
    script: VecDeque<Outcome>,
    fallback: Option<Outcome>,
    running_polls: u32,
    failing_queries: u32,
    next_id: u64,
    jobs: HashMap<String, (Outcome, u32)>,
    active: HashSet<String>,
    max_active: usize,
    calls: Vec<Call>,
}

/// Control plane whose submissions follow a script
#[derive(Debug, Default)]
pub(crate) struct ScriptedCluster {
    inner: Mutex<Inner>,
}

impl ScriptedCluster {
    /// Outcomes consumed one per submission, then `Succeed`
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        let stub = Self::default();
        stub.lock().script = script.into_iter().collect();
        stub
    }

    /// Outcome once the script is exhausted
    pub fn with_fallback(self, outcome: Outcome) -> Self {
        self.lock().fallback = Some(outcome);
        self
    }

    /// Report RUNNING this many times before the final state
    pub fn with_running_polls(self, polls: u32) -> Self {
        self.lock().running_polls = polls;
        self
    }

    /// Fail the next `n` status queries
    pub fn with_failing_queries(self, n: u32) -> Self {
        self.lock().failing_queries = n;
        self
    }

    /// Register a submission made by an earlier process
    pub fn with_existing(self, submission_id: &str, outcome: Outcome) -> Self {
        {
            let mut inner = self.lock();
            inner.jobs.insert(submission_id.to_string(), (outcome, 0));
            inner.active.insert(submission_id.to_string());
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn submissions(&self) -> Vec<LaunchSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) | Call::Execute(s) => Some(s.clone()),
                Call::Query(_) => None,
            })
            .collect()
    }

    /// Highest number of simultaneously unfinished submissions seen
    pub fn max_active(&self) -> usize {
        self.lock().max_active
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn accept(&self, spec: &LaunchSpec, call: Call) -> Result<String> {
        let mut inner = self.lock();
        inner.calls.push(call);
        let next = inner.script.pop_front();
        let outcome = next
            .or_else(|| inner.fallback.clone())
            .unwrap_or(Outcome::Succeed);
        if let Outcome::Reject(message) = outcome {
            return Err(SkyTrackError::submission(&spec.cluster, message));
        }

        inner.next_id += 1;
        let id = format!("{}/{}", spec.cluster, inner.next_id);
        inner.jobs.insert(id.clone(), (outcome, 0));
        inner.active.insert(id.clone());
        inner.max_active = inner.max_active.max(inner.active.len());
        Ok(id)
    }
}

impl ClusterService for ScriptedCluster {
    fn submit(&self, spec: &LaunchSpec) -> Result<String> {
        self.accept(spec, Call::Submit(spec.clone()))
    }

    fn execute_on_cluster(&self, spec: &LaunchSpec) -> Result<String> {
        self.accept(spec, Call::Execute(spec.clone()))
    }

    fn query_status(&self, submission_id: &str) -> Result<RemoteStatus> {
        let mut inner = self.lock();
        inner.calls.push(Call::Query(submission_id.to_string()));
        if inner.failing_queries > 0 {
            inner.failing_queries -= 1;
            return Err(SkyTrackError::status_query(submission_id, "control plane unreachable"));
        }

        let running_polls = inner.running_polls;
        let (outcome, polls) = inner
            .jobs
            .get_mut(submission_id)
            .ok_or_else(|| SkyTrackError::status_query(submission_id, "unknown submission"))?;
        if *polls < running_polls {
            *polls += 1;
            return Ok(RemoteStatus::new(RemoteState::Running));
        }
        let status = match outcome {
            Outcome::Succeed => RemoteStatus::new(RemoteState::Succeeded),
            Outcome::Fail(detail) => RemoteStatus {
                state: RemoteState::Failed,
                error: detail.clone(),
            },
            Outcome::Reject(_) => unreachable!("rejected submissions are never stored"),
        };
        inner.active.remove(submission_id);
        Ok(status)
    }

    fn list_active_clusters(&self) -> Result<Vec<String>> {
        let inner = self.lock();
        let mut clusters: Vec<String> = inner
            .active
            .iter()
            .filter_map(|id| id.rsplit_once('/').map(|(c, _)| c.to_string()))
            .collect();
        clusters.sort();
        clusters.dedup();
        Ok(clusters)
    }
}
