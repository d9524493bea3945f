//! Job state module
//!
//! The job lifecycle model and its persistent store.

mod job;
mod store;

pub use job::*;
pub use store::StateStore;
