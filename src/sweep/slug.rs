//! Job naming policy
//!
//! Renders the human-readable slug that doubles as cluster name and run
//! name. The random disambiguator is generated once per job and persisted
//! with it, so names stay stable across retries and restarts.

use crate::error::Result;
use crate::sweep::template::{format_compact, FormatSpec, Template};
use crate::sweep::ParameterAssignment;

/// Default naming template
pub const DEFAULT_SLUG_PATTERN: &str = "tune-{index}-{uid}";

/// Maximum slug length accepted as a cluster name
pub const MAX_SLUG_LEN: usize = 63;

/// Built-in placeholder for the random disambiguator
pub const UID_FIELD: &str = "uid";

/// Built-in placeholder for the job's position in the sweep
pub const INDEX_FIELD: &str = "index";

/// Generate a 4 hex digit disambiguator
pub fn generate_uid() -> String {
    format!("{:04x}", rand::random::<u16>())
}

/// Template-driven slug renderer
#[derive(Debug, Clone)]
pub struct SlugPolicy {
    template: Template,
}

impl SlugPolicy {
    /// Create a policy from a template string
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            template: Template::parse(pattern.trim())?,
        })
    }

    /// Template source
    pub fn pattern(&self) -> &str {
        self.template.source()
    }

    /// Render the sanitized slug for one job
    pub fn render(&self, params: &ParameterAssignment, uid: &str, index: usize) -> Result<String> {
        let raw = self.template.render(|name, spec| match name {
            UID_FIELD => Some(uid.to_string()),
            INDEX_FIELD => Some(index.to_string()),
            _ => {
                let value = params.get(name)?;
                match (spec, value.as_f64()) {
                    (FormatSpec::Compact, Some(n)) => Some(format_compact(n)),
                    _ => Some(value.to_string()),
                }
            }
        })?;
        Ok(sanitize(&raw))
    }
}

/// Reduce arbitrary text to a cluster-name-safe identifier
///
/// Lower-case `[a-z0-9-]`, no leading/trailing/double dashes, starts with a
/// letter, at most [`MAX_SLUG_LEN`] characters.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;

    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    let mut out = out.trim_end_matches('-').to_string();
    if !out.starts_with(|c: char| c.is_ascii_lowercase()) {
        out.insert(0, 'j');
    }
    if out.len() > MAX_SLUG_LEN {
        out.truncate(MAX_SLUG_LEN);
        out = out.trim_end_matches('-').to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::ParamValue;

    fn assignment() -> ParameterAssignment {
        ParameterAssignment::grid(
            [
                ("MODE", ParamValue::from("lora")),
                ("LR", ParamValue::Float(1e-5)),
                ("GBS", ParamValue::Int(64)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_render_with_compact_numbers() {
        let policy = SlugPolicy::new("{MODE}_lr{LR:g}_gbs{GBS}_{uid}").unwrap();
        let slug = policy.render(&assignment(), "ab12", 0).unwrap();
        assert_eq!(slug, "lora-lr1e-05-gbs64-ab12");
    }

    #[test]
    fn test_render_is_deterministic() {
        let policy = SlugPolicy::new("{MODE}-{index}-{uid}").unwrap();
        let a = policy.render(&assignment(), "00ff", 3).unwrap();
        let b = policy.render(&assignment(), "00ff", 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "lora-3-00ff");
    }

    #[test]
    fn test_default_policy() {
        let slug = SlugPolicy::new(DEFAULT_SLUG_PATTERN)
            .unwrap()
            .render(&ParameterAssignment::literal("echo 1"), "1a2b", 7)
            .unwrap();
        assert_eq!(slug, "tune-7-1a2b");
    }

    #[test]
    fn test_unknown_parameter_is_error() {
        let policy = SlugPolicy::new("{nope}-{uid}").unwrap();
        assert!(policy.render(&assignment(), "ab12", 0).is_err());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Run__A.B  c"), "run-a-b-c");
        assert_eq!(sanitize("--x--"), "x");
        assert_eq!(sanitize("0.01-ab"), "j0-01-ab");
        assert_eq!(sanitize(&"a".repeat(80)).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_generate_uid() {
        let uid = generate_uid();
        assert_eq!(uid.len(), 4);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
