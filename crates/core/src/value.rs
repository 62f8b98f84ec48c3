//! Field values stored inside a [`BaseEntity`](crate::entity::BaseEntity)
//!
//! Seven kinds only: null, bool, int64, double, string, float vector and
//! binary. Different kinds are never equal (`Int(1) != Double(1.0)`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered field map: name → value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A typed field value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Dense float vector (embeddings)
    Vector(Vec<f32>),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            // Bitwise so that a decoded NaN equals the NaN that was encoded
            (FieldValue::Double(a), FieldValue::Double(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::String(a), FieldValue::String(b)) => a == b,
            (FieldValue::Vector(a), FieldValue::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (FieldValue::Binary(a), FieldValue::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl FieldValue {
    /// Short name of the kind, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Double(_) => "double",
            FieldValue::String(_) => "string",
            FieldValue::Vector(_) => "vector",
            FieldValue::Binary(_) => "binary",
        }
    }

    /// True for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Borrow as `&str` if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; doubles with no fractional part convert
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric view used by range, geo and weight lookups
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Double(d) => Some(*d),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view; accepts "true"/"false" strings
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Int(i) => Some(*i != 0),
            FieldValue::String(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Borrow the vector payload
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical text form.
    ///
    /// Equality index keys and fulltext input both go through this, so
    /// `Int(5)` and `String("5")` land on the same equality key.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Double(d) => format_double(*d),
            FieldValue::String(s) => s.clone(),
            FieldValue::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                format!("[{}]", parts.join(","))
            }
            FieldValue::Binary(b) => BASE64.encode(b),
        }
    }

    /// Convert into a JSON value.
    ///
    /// Values plain JSON cannot carry are tagged objects: `{"$binary":
    /// "<base64>"}`, `{"$double": "NaN"}` for non-finite doubles, and
    /// `{"$vector": [...]}` for empty vectors or vectors with non-finite
    /// components. [`from_json`](Self::from_json) reverses all of them.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            FieldValue::Null => J::Null,
            FieldValue::Bool(b) => J::Bool(*b),
            FieldValue::Int(i) => J::from(*i),
            FieldValue::Double(d) => match serde_json::Number::from_f64(*d) {
                Some(n) => J::Number(n),
                None => tagged("$double", J::String(non_finite_name(*d).to_string())),
            },
            FieldValue::String(s) => J::String(s.clone()),
            FieldValue::Vector(v) => {
                let plain = !v.is_empty() && v.iter().all(|x| x.is_finite());
                let items = v.iter().map(|x| json_component(*x as f64)).collect();
                if plain {
                    J::Array(items)
                } else {
                    tagged("$vector", J::Array(items))
                }
            }
            FieldValue::Binary(b) => tagged("$binary", J::String(BASE64.encode(b))),
        }
    }

    /// Convert from a JSON value.
    ///
    /// Integers stay integers, other numbers become doubles, non-empty
    /// arrays of numbers become vectors, and the tagged objects written by
    /// [`to_json`](Self::to_json) decode to their values. Anything else
    /// nested is kept as its JSON text.
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        use serde_json::Value as J;
        match value {
            J::Null => FieldValue::Null,
            J::Bool(b) => FieldValue::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => FieldValue::String(s.clone()),
            J::Array(items) => {
                let floats: Option<Vec<f32>> =
                    items.iter().map(|i| i.as_f64().map(|f| f as f32)).collect();
                match floats {
                    Some(v) if !items.is_empty() => FieldValue::Vector(v),
                    _ => FieldValue::String(value.to_string()),
                }
            }
            J::Object(map) => from_tagged(map).unwrap_or_else(|| FieldValue::String(value.to_string())),
        }
    }
}

fn tagged(tag: &str, value: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(tag.to_string(), value);
    serde_json::Value::Object(obj)
}

fn from_tagged(map: &serde_json::Map<String, serde_json::Value>) -> Option<FieldValue> {
    use serde_json::Value as J;
    if map.len() != 1 {
        return None;
    }
    let (tag, value) = map.iter().next()?;
    match (tag.as_str(), value) {
        ("$binary", J::String(encoded)) => BASE64.decode(encoded).ok().map(FieldValue::Binary),
        ("$double", J::String(name)) => parse_non_finite(name).map(FieldValue::Double),
        ("$vector", J::Array(items)) => items
            .iter()
            .map(|item| match item {
                J::Number(n) => n.as_f64().map(|f| f as f32),
                J::String(name) => parse_non_finite(name).map(|f| f as f32),
                _ => None,
            })
            .collect::<Option<Vec<f32>>>()
            .map(FieldValue::Vector),
        _ => None,
    }
}

fn json_component(x: f64) -> serde_json::Value {
    match serde_json::Number::from_f64(x) {
        Some(n) => serde_json::Value::Number(n),
        None => serde_json::Value::String(non_finite_name(x).to_string()),
    }
}

fn non_finite_name(d: f64) -> &'static str {
    if d.is_nan() {
        "NaN"
    } else if d > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn parse_non_finite(name: &str) -> Option<f64> {
    match name {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.is_finite() && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        d.to_string()
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Double(d)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::Vector(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Binary(b)
    }
}
