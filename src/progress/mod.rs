//! Progress reporting module
//!
//! Terminal progress for running sweeps and styled status words.

mod reporter;

pub use reporter::*;
