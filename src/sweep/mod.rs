//! Sweep definition module
//!
//! Everything that describes *what* a sweep runs, independent of where:
//! - Parameter values and assignments
//! - Matrix expansion (grid, benchmark, literal commands)
//! - Resource rules
//! - Job naming

mod matrix;
mod params;
mod rules;
pub mod slug;
pub mod template;

pub use matrix::*;
pub use params::*;
pub use rules::*;
pub use slug::{generate_uid, sanitize, SlugPolicy, DEFAULT_SLUG_PATTERN};
pub use template::Template;
