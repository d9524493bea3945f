//! Parameter values and assignments
//!
//! A sweep job is described by an ordered set of named scalar values.
//! Key order comes from the configuration document and is preserved
//! through serialization, since it drives expansion order and naming.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Parameter key holding the model identifier of a benchmark job
pub const MODEL_ID_KEY: &str = "MODEL_ID";

/// Parameter key holding the script reference of a benchmark job
pub const BENCH_SCRIPT_KEY: &str = "BENCH_SCRIPT";

/// Flat-map key carrying a literal command
pub const COMMAND_KEY: &str = "__cmd";

/// A single scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Any other token
    Str(String),
}

impl ParamValue {
    /// Numeric view of the value; numeric-looking strings count too
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            Self::Bool(_) => None,
        }
    }

    /// Equality with integers and floats compared by numeric value
    ///
    /// `1` equals `1.0`; strings and booleans only equal their own kind.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            _ => self == other,
        }
    }

    /// String view, if this is a string token
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Shortest round-trip form of a float, the way training scripts print it
///
/// Always carries a decimal point or exponent (`1.0`, not `1`). Positional
/// notation is used for decimal exponents in `-4..16`, otherwise
/// scientific with a signed two-digit exponent (`1e-05`, `1e+16`).
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. `-1.25e-3`
    let sci = format!("{:e}", value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if !(-4..16).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }

    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let body = if exp < 0 {
        format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
    } else {
        let int_len = exp as usize + 1;
        if digits.len() <= int_len {
            format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
        } else {
            format!("{}.{}", &digits[..int_len], &digits[int_len..])
        }
    };
    format!("{}{}", sign, body)
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// String-keyed map that keeps insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> OrderedMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a value, replacing an existing entry in place
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Where an assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentOrigin {
    /// One point of a grid product
    #[default]
    Grid,
    /// One model of a benchmark matrix
    Benchmark,
    /// A pre-baked shell command
    Literal,
}

/// Concrete parameters of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AssignmentRepr")]
pub struct ParameterAssignment {
    /// Provenance
    pub origin: AssignmentOrigin,
    /// Named values in declaration order
    #[serde(skip_serializing_if = "OrderedMap::is_empty")]
    pub values: OrderedMap<ParamValue>,
    /// Literal command; when present, templated formatting is skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ParameterAssignment {
    /// Grid assignment from named values
    pub fn grid(values: OrderedMap<ParamValue>) -> Self {
        Self {
            origin: AssignmentOrigin::Grid,
            values,
            command: None,
        }
    }

    /// Benchmark assignment for one model
    pub fn benchmark(model_id: impl Into<String>, script: impl Into<String>) -> Self {
        let mut values = OrderedMap::new();
        values.insert(MODEL_ID_KEY, ParamValue::Str(model_id.into()));
        values.insert(BENCH_SCRIPT_KEY, ParamValue::Str(script.into()));
        Self {
            origin: AssignmentOrigin::Benchmark,
            values,
            command: None,
        }
    }

    /// Assignment carrying only a literal command
    pub fn literal(command: impl Into<String>) -> Self {
        Self {
            origin: AssignmentOrigin::Literal,
            values: OrderedMap::new(),
            command: Some(command.into()),
        }
    }

    /// Explicit parameter set; a `__cmd` entry becomes the literal command
    pub fn parameter_set(mut values: OrderedMap<ParamValue>) -> Self {
        let command = values.remove(COMMAND_KEY).map(|cmd| match cmd {
            ParamValue::Str(cmd) => cmd,
            other => other.to_string(),
        });
        Self {
            origin: AssignmentOrigin::Grid,
            values,
            command,
        }
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Model identifier of a benchmark assignment
    pub fn model_id(&self) -> Option<&str> {
        self.get(MODEL_ID_KEY).and_then(ParamValue::as_str)
    }

    /// Script reference of a benchmark assignment
    pub fn script(&self) -> Option<&str> {
        self.get(BENCH_SCRIPT_KEY).and_then(ParamValue::as_str)
    }

    /// Parameters rendered as environment variables for the remote task
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl fmt::Display for ParameterAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cmd) = &self.command {
            if self.values.is_empty() {
                return write!(f, "`{}`", cmd);
            }
        }
        let mut first = true;
        f.write_str("{")?;
        for (k, v) in self.values.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        f.write_str("}")
    }
}

/// Accepted on-disk shapes of an assignment
#[derive(Deserialize)]
#[serde(untagged)]
enum AssignmentRepr {
    Structured(StructuredAssignment),
    Flat(OrderedMap<ParamValue>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredAssignment {
    origin: AssignmentOrigin,
    #[serde(default)]
    values: OrderedMap<ParamValue>,
    #[serde(default)]
    command: Option<String>,
}

impl From<AssignmentRepr> for ParameterAssignment {
    fn from(repr: AssignmentRepr) -> Self {
        match repr {
            AssignmentRepr::Structured(s) => Self {
                origin: s.origin,
                values: s.values,
                command: s.command,
            },
            // Flat parameter dicts as written by older state files
            AssignmentRepr::Flat(mut values) => {
                let command = match values.remove(COMMAND_KEY) {
                    Some(ParamValue::Str(cmd)) => Some(cmd),
                    Some(other) => Some(other.to_string()),
                    None => None,
                };
                let origin = if command.is_some() {
                    AssignmentOrigin::Literal
                } else if values.contains_key(MODEL_ID_KEY) && values.contains_key(BENCH_SCRIPT_KEY) {
                    AssignmentOrigin::Benchmark
                } else {
                    AssignmentOrigin::Grid
                };
                Self {
                    origin,
                    values,
                    command,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_keeps_insertion_order() {
        let map: OrderedMap<ParamValue> = serde_yaml::from_str("z: 1\na: 2\nm: 3\n").unwrap();
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"z":1,"a":2,"m":3}"#);
    }

    #[test]
    fn test_ordered_map_rejects_duplicates() {
        let res: Result<OrderedMap<ParamValue>, _> = serde_json::from_str(r#"{"a":1,"a":2}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_param_value_untagged() {
        let values: Vec<ParamValue> = serde_yaml::from_str("[1, 0.5, true, adam]").unwrap();
        assert_eq!(
            values,
            vec![
                ParamValue::Int(1),
                ParamValue::Float(0.5),
                ParamValue::Bool(true),
                ParamValue::Str("adam".into()),
            ]
        );
        assert_ne!(ParamValue::Int(1), ParamValue::Str("1".into()));
        assert_eq!(ParamValue::Str("3e-4".into()).as_f64(), Some(3e-4));
    }

    #[test]
    fn test_format_float() {
        let cases = [
            (1.0, "1.0"),
            (0.1, "0.1"),
            (1e-5, "1e-05"),
            (0.0001, "0.0001"),
            (3e-4, "0.0003"),
            (2.5e-7, "2.5e-07"),
            (123.456, "123.456"),
            (100.0, "100.0"),
            (1e15, "1000000000000000.0"),
            (1e16, "1e+16"),
            (1.5e300, "1.5e+300"),
            (0.0, "0.0"),
            (-0.5, "-0.5"),
            (-2e-6, "-2e-06"),
            (f64::INFINITY, "inf"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_float(value), expected, "formatting {:e}", value);
        }
        assert_eq!(ParamValue::Float(1.0).to_string(), "1.0");
        assert_eq!(ParamValue::Int(1).to_string(), "1");
    }

    #[test]
    fn test_assignment_display() {
        let a = ParameterAssignment::grid(
            [("lr", ParamValue::Float(0.01)), ("bs", ParamValue::Int(32))]
                .into_iter()
                .collect(),
        );
        assert_eq!(a.to_string(), "{lr=0.01, bs=32}");
        assert_eq!(ParameterAssignment::literal("echo hi").to_string(), "`echo hi`");
    }

    #[test]
    fn test_legacy_flat_assignment() {
        let a: ParameterAssignment = serde_json::from_str(r#"{"__cmd": "echo 1"}"#).unwrap();
        assert_eq!(a.origin, AssignmentOrigin::Literal);
        assert_eq!(a.command.as_deref(), Some("echo 1"));
        assert!(a.values.is_empty());

        let b: ParameterAssignment =
            serde_json::from_str(r#"{"MODEL_ID": "m1", "BENCH_SCRIPT": "eval.py"}"#).unwrap();
        assert_eq!(b.origin, AssignmentOrigin::Benchmark);
        assert_eq!(b.model_id(), Some("m1"));

        let c: ParameterAssignment = serde_json::from_str(r#"{"lr": 0.1}"#).unwrap();
        assert_eq!(c.origin, AssignmentOrigin::Grid);
        assert_eq!(c.get("lr"), Some(&ParamValue::Float(0.1)));
    }

    #[test]
    fn test_structured_assignment_roundtrip() {
        let a = ParameterAssignment::benchmark("llama", "python eval.py");
        let json = serde_json::to_string(&a).unwrap();
        let back: ParameterAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
