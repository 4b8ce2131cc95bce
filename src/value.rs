//! The tagged value type shared by the expression evaluator (`expr`), the
//! path engine (`path`), and the template renderer (`render`).
//!
//! Expressions, merges, and template substitution all need to move values
//! between a JSON-shaped world (inputs and rendered output are JSON/YAML
//! documents) and a typed-evaluation world (the expression language has
//! distinct `int`/`uint`/`double`/`bytes` types that JSON can't tell apart on
//! its own). [`Value`] is the bridge: a sum type wide enough to hold every
//! distinguishable leaf of the expression language, plus the [`Value::Omit`]
//! sentinel `omit()` produces.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Number;

/// A dynamically-typed value as carried through expression evaluation and
/// rendering.
///
/// [`IndexMap`] is used for maps (rather than [`std::collections::BTreeMap`])
/// so that key insertion order survives round-trips through the evaluator;
/// output is only canonically sorted at the very end of a render (see the
/// Determinism invariant).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// The sentinel produced by the `omit()` builtin. Never appears in
    /// rendered output: [`Value::strip_omitted`] removes any map entry or
    /// list element equal to it before a template is finalized.
    Omit,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Omit => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Omit => "omit",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Renders this value the way string interpolation does: `${expr}`
    /// fragments embedded in a larger string are stringified with this, not
    /// `Display`'d verbatim (e.g. `Value::String` loses its quotes).
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Double(d) => format_double(*d),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::List(_) | Value::Map(_) => self.to_json().to_string(),
            Value::Omit => String::new(),
        }
    }

    /// Converts to `serde_json::Value`, dropping [`Value::Omit`] markers
    /// recursively. This is the final step between the evaluator's world and
    /// the documents the renderer emits.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Omit => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::UInt(u) => serde_json::Value::Number((*u).into()),
            Value::Double(d) => Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::String(base64_encode(b))
            }
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .filter(|v| !matches!(v, Value::Omit))
                    .map(Value::to_json)
                    .collect(),
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Omit))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Converts a `serde_json::Value` into the evaluator's tagged
    /// representation. Numbers become [`Value::Int`] when they fit, else
    /// [`Value::Double`]; there is no way to distinguish a JSON number that
    /// was meant as `uint` from the JSON side, so those are recovered as
    /// `Int`/`Double` and only produced as `UInt` by expression literals or
    /// arithmetic.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Double(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Removes [`Value::Omit`] map entries/list elements in place, so an
    /// omitted field never reaches rendered output.
    pub fn strip_omitted(&mut self) {
        match self {
            Value::List(items) => {
                items.retain(|v| !matches!(v, Value::Omit));
                for item in items.iter_mut() {
                    item.strip_omitted();
                }
            }
            Value::Map(map) => {
                map.retain(|_, v| !matches!(v, Value::Omit));
                for v in map.values_mut() {
                    v.strip_omitted();
                }
            }
            _ => {}
        }
    }
}

/// Total-order comparator used by the `sort()` builtin. Numeric values
/// compare by value across int/uint/double; equal-typed values fall back to
/// their natural order; anything else (including cross-type pairs outside
/// the numeric family) compares equal so `sort` never panics on mixed input.
pub fn compare_for_sort(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    fn as_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.1}")
    } else {
        d.to_string()
    }
}

/// Minimal base64 (standard alphabet, padded) used for `Value::Bytes`
/// stringification and the `base64.encode`/`base64.decode` builtins.
pub fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);

        let n = (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2);
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[((n >> 6) & 0x3f) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(n & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    fn val(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some(u32::from(c - b'A')),
            b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
            b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let bytes = input.as_bytes();
    for chunk in bytes.chunks(4) {
        let mut n: u32 = 0;
        for (i, &c) in chunk.iter().enumerate() {
            n |= val(c)? << (18 - 6 * i);
        }
        let len = chunk.len();
        out.push((n >> 16) as u8);
        if len > 2 {
            out.push((n >> 8) as u8);
        }
        if len > 3 {
            out.push(n as u8);
        }
    }
    Some(out)
}
