//! Resource rules
//!
//! Maps job parameters to resource overrides. Rules are evaluated in
//! declaration order and the first match wins; no match means the task
//! template defaults apply.

use crate::sweep::{OrderedMap, ParamValue, ParameterAssignment};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource quantity such as `4`, `8+` or `32GB`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceQuantity {
    /// Whole count
    Count(u64),
    /// Fractional amount
    Amount(f64),
    /// Free-form spec understood by the control plane
    Spec(String),
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(v) => write!(f, "{}", v),
            Self::Amount(v) => write!(f, "{}", v),
            Self::Spec(v) => f.write_str(v),
        }
    }
}

/// Per-job resource overrides with a fixed schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceOverrides {
    /// Accelerator spec, e.g. `A100:4`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerators: Option<String>,
    /// vCPU count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<ResourceQuantity>,
    /// Memory in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<ResourceQuantity>,
    /// Boot disk size in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,
    /// Explicit instance type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Cloud provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    /// Region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Use spot instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_spot: Option<bool>,
    /// Machine image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl ResourceOverrides {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set fields as `(name, value)` pairs, in schema order
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = &self.accelerators {
            out.push(("accelerators", v.clone()));
        }
        if let Some(v) = &self.cpus {
            out.push(("cpus", v.to_string()));
        }
        if let Some(v) = &self.memory {
            out.push(("memory", v.to_string()));
        }
        if let Some(v) = self.disk_size {
            out.push(("disk_size", v.to_string()));
        }
        if let Some(v) = &self.instance_type {
            out.push(("instance_type", v.clone()));
        }
        if let Some(v) = &self.cloud {
            out.push(("cloud", v.clone()));
        }
        if let Some(v) = &self.region {
            out.push(("region", v.clone()));
        }
        if let Some(v) = &self.zone {
            out.push(("zone", v.clone()));
        }
        if let Some(v) = self.use_spot {
            out.push(("use_spot", v.to_string()));
        }
        if let Some(v) = &self.image_id {
            out.push(("image_id", v.clone()));
        }
        out
    }
}

impl fmt::Display for ResourceOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("defaults");
        }
        let parts: Vec<String> = self
            .fields()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Predicate over parameter equality plus the overrides it selects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRule {
    /// Every entry must equal the job's parameter of the same name
    #[serde(rename = "if", default)]
    pub condition: OrderedMap<ParamValue>,
    /// Overrides applied when the predicate matches
    #[serde(default)]
    pub resources: ResourceOverrides,
}

impl ResourceRule {
    /// Check the predicate; a missing parameter never matches
    ///
    /// Numbers compare by value, so `{lr: 1}` matches a grid value `1.0`.
    pub fn matches(&self, params: &ParameterAssignment) -> bool {
        self.condition.iter().all(|(key, expected)| {
            params
                .get(key)
                .map(|actual| actual.same_value(expected))
                .unwrap_or(false)
        })
    }
}

/// Resolve the overrides of the first matching rule
pub fn resolve(params: &ParameterAssignment, rules: &[ResourceRule]) -> ResourceOverrides {
    rules
        .iter()
        .find(|rule| rule.matches(params))
        .map(|rule| rule.resources.clone())
        .unwrap_or_default()
}
