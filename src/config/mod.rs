//! Configuration module for SkyTrack
//!
//! Provides CLI arguments and the sweep document.

mod settings;

pub use settings::*;
