//! Value model for DocQL
//!
//! This module provides the loosely typed document representation every other
//! component works on:
//! - Value: a tagged union over JSON types plus dates, binary data and regexes
//! - Total ordering and deep equality (`compare`)
//! - Canonical stringification and stable hashing (`hash`)
//! - Dotted path resolution, graph building, mutation and merging (`path`)
//!
//! Expressions are values too: a map whose single key looks like `$name` is an
//! operator call until the evaluator says otherwise.

use crate::error::{EngineError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod compare;
pub mod hash;
pub mod path;

pub use compare::{compare, is_equal};
pub use hash::{group_by, hash_code, stringify, unique, HashFunction};
pub use path::{
    filter_missing, flatten, merge, remove_value, resolve, resolve_graph, resolve_with, set_value,
    GraphOptions,
};

/// Ordered field map; insertion order is kept for output but ignored by equality
pub type Map = IndexMap<String, Value>;

/// Regular expression value with MongoDB-style option letters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexValue {
    /// Pattern source
    pub pattern: String,
    /// Option letters (`i`, `m`, `s`, `x`)
    pub options: String,
}

impl RegexValue {
    /// Create a regex value
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            options: options.into(),
        }
    }

    /// Compile into a `regex::Regex`, honouring the option letters
    pub fn compile(&self) -> Result<regex::Regex> {
        let mut builder = regex::RegexBuilder::new(&self.pattern);
        for flag in self.options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                'g' | 'u' => &mut builder,
                other => {
                    return Err(EngineError::assertion(format!(
                        "invalid regex option '{}'",
                        other
                    )))
                }
            };
        }
        builder
            .build()
            .map_err(|e| EngineError::assertion(format!("invalid regex /{}/: {}", self.pattern, e)))
    }
}

/// Document value
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value; dropped from output maps
    Missing,
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// String value
    String(String),
    /// DateTime with UTC timezone
    DateTime(DateTime<Utc>),
    /// Binary data
    Binary(Vec<u8>),
    /// Regular expression
    Regex(RegexValue),
    /// Array of values
    Array(Vec<Value>),
    /// Object with ordered string keys
    Object(Map),
}

impl Value {
    /// Create an empty object
    pub fn object() -> Self {
        Value::Object(Map::new())
    }

    /// Parse a value from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        Ok(Value::from(parsed))
    }

    /// Check if value is missing
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Check if value is exactly null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is null or missing
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Missing | Value::Null)
    }

    /// Check if value is a number (int or float)
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_))
    }

    /// Check if value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if value is an array
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Check if value is an object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Check if value is a date
    pub fn is_date(&self) -> bool {
        matches!(self, Value::DateTime(_))
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64; floats are accepted when they hold an integral value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Float64(f) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get as date
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(d) => Some(d),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as mutable array reference
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object reference
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get as mutable object reference
    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Look up a top-level key; missing entries read as `None`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()
            .and_then(|obj| obj.get(key))
            .filter(|v| !v.is_missing())
    }

    /// Wrap non-array values in a one-element array; nil becomes empty
    pub fn into_array(self) -> Vec<Value> {
        match self {
            Value::Array(items) => items,
            Value::Missing => Vec::new(),
            other => vec![other],
        }
    }

    /// Truthiness as used by `$expr`, `$cond` and friends.
    ///
    /// Strict mode follows MongoDB, where the empty string is truthy.
    pub fn is_truthy(&self, strict: bool) -> bool {
        match self {
            Value::Missing | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int64(i) => *i != 0,
            Value::Float64(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => strict || !s.is_empty(),
            _ => true,
        }
    }

    /// BSON-style type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Missing => "missing",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(i) if i32::try_from(*i).is_ok() => "int",
            Value::Int64(_) => "long",
            Value::Float64(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "date",
            Value::Binary(_) => "binData",
            Value::Regex(_) => "regex",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Convert to a `serde_json::Value`; dates become `{"$date": ...}`
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Missing | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int64(i) => Json::from(*i),
            Value::Float64(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::DateTime(d) => {
                serde_json::json!({ "$date": d.to_rfc3339_opts(SecondsFormat::Millis, true) })
            }
            Value::Binary(b) => serde_json::json!({ "$binary": hex::encode(b) }),
            Value::Regex(r) => serde_json::json!({ "$regex": r.pattern, "$options": r.options }),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(obj) => Json::Object(
                obj.iter()
                    .filter(|(_, v)| !v.is_missing())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        is_equal(self, other)
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        compare(self, other)
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(hash_code(self, None));
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => write!(f, "undefined"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Missing | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int64(i) => serializer.serialize_i64(*i),
            Value::Float64(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(obj) => {
                let mut map = serializer.serialize_map(None)?;
                for (k, v) in obj.iter().filter(|(_, v)| !v.is_missing()) {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            other => other.to_json().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(date) = obj.get("$date").and_then(parse_extended_date) {
                        return Value::DateTime(date);
                    }
                }
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from(json.clone())
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

fn parse_extended_date(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int64(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(i as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}

impl From<Map> for Value {
    fn from(obj: Map) -> Self {
        Value::Object(obj)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<RegexValue> for Value {
    fn from(re: RegexValue) -> Self {
        Value::Regex(re)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_nil());
        assert!(Value::Missing.is_nil());
        assert!(Value::Int64(42).is_number());
        assert!(Value::Float64(1.5).is_number());
        assert!(Value::from("test").is_string());
        assert!(Value::Array(vec![]).is_array());
        assert!(Value::object().is_object());
    }

    #[test]
    fn test_json_conversion() {
        let v = Value::from(json!({"a": 1, "b": [true, null, 2.5], "c": "x"}));
        let obj = v.as_object().unwrap();
        assert_eq!(obj.get("a"), Some(&Value::Int64(1)));
        assert_eq!(obj.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(v.to_json(), json!({"a": 1, "b": [true, null, 2.5], "c": "x"}));
    }

    #[test]
    fn test_extended_date() {
        let v = Value::from(json!({"$date": "2024-01-02T03:04:05.000Z"}));
        assert!(v.is_date());
        assert_eq!(v.to_json(), json!({"$date": "2024-01-02T03:04:05.000Z"}));
    }

    #[test]
    fn test_missing_dropped_from_output() {
        let mut obj = Map::new();
        obj.insert("a".to_string(), Value::Missing);
        obj.insert("b".to_string(), Value::Int64(2));
        let json = serde_json::to_value(Value::Object(obj)).unwrap();
        assert_eq!(json, json!({"b": 2}));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int64(0).is_truthy(true));
        assert!(!Value::Null.is_truthy(true));
        assert!(Value::from("").is_truthy(true));
        assert!(!Value::from("").is_truthy(false));
        assert!(Value::Array(vec![]).is_truthy(true));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int64(1).type_name(), "int");
        assert_eq!(Value::Int64(1 << 40).type_name(), "long");
        assert_eq!(Value::Float64(1.0).type_name(), "double");
        assert_eq!(Value::object().type_name(), "object");
    }

    #[test]
    fn test_regex_compile() {
        let re = RegexValue::new("^ab", "i").compile().unwrap();
        assert!(re.is_match("ABc"));
        assert!(RegexValue::new("a", "q").compile().is_err());
    }
}
