//! Metric tracking module
//!
//! Run handles that log scalar metrics and artifact bundles to a sink, and
//! a background monitor for host CPU and memory.

mod artifact;
mod monitor;
mod run;

pub use artifact::*;
pub use monitor::*;
pub use run::*;
