//! # SkyTrack - Sweep Orchestration for SkyPilot
//!
//! SkyTrack expands a declarative parameter space into jobs, launches each
//! job on a SkyPilot cluster, tracks every job through a resumable state
//! file, enforces a concurrency ceiling and retries failures up to a limit.
//!
//! ## Features
//!
//! - **Grid, benchmark and command sweeps**: Cartesian products, one job per
//!   model, or a plain list of commands
//! - **Resource rules**: First-match parameter predicates select per-job
//!   accelerators, CPUs, memory and placement
//! - **Resumable state**: Atomic JSON state file; a restarted sweep picks up
//!   where it stopped and re-polls jobs left running
//! - **Two cluster modes**: One auto-teardown cluster per job, or every job
//!   in sequence on one persistent cluster
//! - **Metric logging**: Run handles writing JSON lines, plus a background
//!   host monitor
//!
//! ## Quick Start
//!
//! ```no_run
//! use skytrack::cluster::SkyCli;
//! use skytrack::config::SweepConfig;
//! use skytrack::core::SweepEngine;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = SweepConfig::load(Path::new("sweep.yaml")).unwrap();
//! let sky = SkyCli::new("sky", &config.tasks_dir).unwrap();
//! let engine = SweepEngine::new(config, Arc::new(sky)).unwrap();
//!
//! let summary = engine.run().unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Expanding a Grid
//!
//! ```
//! use skytrack::sweep::{expand_grid, OrderedMap, ParamValue};
//!
//! let mut space = OrderedMap::new();
//! space.insert("lr", vec![ParamValue::Float(0.1), ParamValue::Float(0.01)]);
//! space.insert("bs", vec![ParamValue::Int(32)]);
//!
//! let jobs = expand_grid(&space);
//! assert_eq!(jobs.len(), 2);
//! assert_eq!(jobs[0].to_string(), "{lr=0.1, bs=32}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod core;
pub mod error;
pub mod progress;
pub mod state;
pub mod sweep;
pub mod tracking;

// Re-export commonly used types
pub use crate::config::{SweepConfig, SweepMode};
pub use crate::core::{SweepEngine, SweepSummary};
pub use crate::error::{Result, SkyTrackError};
pub use crate::state::{Job, JobCollection, JobStatus, StateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use skytrack::prelude::*;
    //! ```

    pub use crate::cluster::{ClusterService, LaunchSpec, RemoteState, RemoteStatus, SkyCli};
    pub use crate::config::{SweepConfig, SweepMode};
    pub use crate::core::{Launcher, SweepEngine, SweepSummary};
    pub use crate::error::{Result, SkyTrackError};
    pub use crate::progress::SweepProgress;
    pub use crate::state::{Job, JobCollection, JobStatus, StateStore};
    pub use crate::sweep::{ParamValue, ParameterAssignment, ResourceOverrides, ResourceRule, SlugPolicy};
    pub use crate::tracking::{
        Artifact, JsonlSink, MetricSink, RunConfig, RunHandle, RunRegistry, SystemMonitor,
    };
}
