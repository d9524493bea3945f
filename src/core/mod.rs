//! Core sweep engine module
//!
//! Provides job launching under the concurrency ceiling and the
//! poll/retry loop that drives a sweep to completion.

mod engine;
mod scheduler;

pub use engine::*;
pub use scheduler::*;
