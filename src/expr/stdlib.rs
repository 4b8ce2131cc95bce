//! Built-in methods and free functions for the expression language's
//! standard library. Grouped by receiver type; dispatch happens in
//! [`call_method`], called from the evaluator for any method name not
//! recognized as a comprehension macro.

use indexmap::IndexMap;
use snafu::ensure;

use super::eval::{Error, Result, TypeErrorSnafu};
use crate::value::{self, Value};

pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match receiver {
        Value::String(s) => string_method(s, name, args),
        Value::List(items) => list_method(items, name, args),
        Value::Map(map) => map_method(map, name, args),
        Value::Int(_) | Value::UInt(_) | Value::Double(_) => numeric_method(receiver, name, args),
        other => unknown_method(other, name),
    }
}

fn unknown_method(receiver: &Value, name: &str) -> Result<Value> {
    super::eval::UnknownMethodSnafu {
        name: name.to_string(),
        type_name: receiver.type_name().to_string(),
    }
    .fail()
}

fn arg0(args: &[Value], name: &str) -> Result<()> {
    ensure!(
        args.is_empty(),
        super::eval::ArityMismatchSnafu { name: name.to_string(), expected: 0usize, got: args.len() }
    );
    Ok(())
}

fn arg1_str<'a>(args: &'a [Value], name: &str) -> Result<&'a str> {
    match args {
        [Value::String(s)] => Ok(s.as_str()),
        _ => super::eval::ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }
            .fail(),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "upperAscii" => {
            arg0(args, name)?;
            Ok(Value::String(s.to_ascii_uppercase()))
        }
        "lowerAscii" => {
            arg0(args, name)?;
            Ok(Value::String(s.to_ascii_lowercase()))
        }
        "trim" => {
            arg0(args, name)?;
            Ok(Value::String(s.trim().to_string()))
        }
        "size" | "length" => {
            arg0(args, name)?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "isEmpty" => {
            arg0(args, name)?;
            Ok(Value::Bool(s.is_empty()))
        }
        "contains" => Ok(Value::Bool(s.contains(arg1_str(args, name)?))),
        "startsWith" => Ok(Value::Bool(s.starts_with(arg1_str(args, name)?))),
        "endsWith" => Ok(Value::Bool(s.ends_with(arg1_str(args, name)?))),
        "indexOf" => {
            let needle = arg1_str(args, name)?;
            Ok(match s.find(needle) {
                Some(byte_idx) => Value::Int(s[..byte_idx].chars().count() as i64),
                None => Value::Int(-1),
            })
        }
        "split" => {
            let sep = arg1_str(args, name)?;
            Ok(Value::List(s.split(sep).map(|p| Value::String(p.to_string())).collect()))
        }
        "replace" => match args {
            [Value::String(from), Value::String(to)] => Ok(Value::String(s.replace(from, to))),
            _ => super::eval::ArityMismatchSnafu {
                name: name.to_string(),
                expected: 2usize,
                got: args.len(),
            }
            .fail(),
        },
        "substring" => match args {
            [Value::Int(start)] => Ok(Value::String(char_slice(s, *start, None))),
            [Value::Int(start), Value::Int(end)] => Ok(Value::String(char_slice(s, *start, Some(*end)))),
            _ => TypeErrorSnafu { message: "substring expects 1 or 2 integer arguments".to_string() }
                .fail(),
        },
        "matches" => {
            let pattern = arg1_str(args, name)?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| TypeErrorSnafu { message: format!("invalid regex: {e}") }.build())?;
            Ok(Value::Bool(re.is_match(s)))
        }
        _ => unknown_method(&Value::String(s.to_string()), name),
    }
}

fn char_slice(s: &str, start: i64, end: Option<i64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let clamp = |i: i64| i.clamp(0, len) as usize;
    let start = clamp(start);
    let end = end.map_or(chars.len(), clamp);
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect()
}

fn list_method(items: &[Value], name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "size" | "length" => {
            arg0(args, name)?;
            Ok(Value::Int(items.len() as i64))
        }
        "isEmpty" => {
            arg0(args, name)?;
            Ok(Value::Bool(items.is_empty()))
        }
        "reverse" => {
            arg0(args, name)?;
            let mut out = items.to_vec();
            out.reverse();
            Ok(Value::List(out))
        }
        "flatten" => {
            arg0(args, name)?;
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::List(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::List(out))
        }
        "unique" | "distinct" => {
            arg0(args, name)?;
            let mut out: Vec<Value> = Vec::new();
            for item in items {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Ok(Value::List(out))
        }
        "sort" => {
            arg0(args, name)?;
            let mut out = items.to_vec();
            out.sort_by(|a, b| value::compare_for_sort(a, b));
            Ok(Value::List(out))
        }
        "join" => {
            let sep = match args {
                [] => String::new(),
                [Value::String(s)] => s.clone(),
                _ => {
                    return super::eval::ArityMismatchSnafu {
                        name: name.to_string(),
                        expected: 1usize,
                        got: args.len(),
                    }
                    .fail()
                }
            };
            Ok(Value::String(items.iter().map(Value::stringify).collect::<Vec<_>>().join(&sep)))
        }
        "sum" => {
            arg0(args, name)?;
            let mut int_acc: i64 = 0;
            let mut double_acc = 0.0;
            let mut is_double = false;
            for item in items {
                match item {
                    Value::Int(i) => int_acc += i,
                    Value::UInt(u) => int_acc += *u as i64,
                    Value::Double(d) => {
                        is_double = true;
                        double_acc += d;
                    }
                    other => {
                        return TypeErrorSnafu {
                            message: format!("cannot sum a list containing {}", other.type_name()),
                        }
                        .fail()
                    }
                }
            }
            Ok(if is_double {
                Value::Double(double_acc + int_acc as f64)
            } else {
                Value::Int(int_acc)
            })
        }
        "contains" => match args {
            [needle] => Ok(Value::Bool(items.contains(needle))),
            _ => super::eval::ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }
                .fail(),
        },
        "intersects" => match args {
            [Value::List(other)] => Ok(Value::Bool(items.iter().any(|i| other.contains(i)))),
            _ => TypeErrorSnafu { message: "intersects expects a list argument".to_string() }.fail(),
        },
        _ => unknown_method(&Value::List(items.to_vec()), name),
    }
}

fn map_method(map: &IndexMap<String, Value>, name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "size" | "length" => {
            arg0(args, name)?;
            Ok(Value::Int(map.len() as i64))
        }
        "isEmpty" => {
            arg0(args, name)?;
            Ok(Value::Bool(map.is_empty()))
        }
        "keys" => {
            arg0(args, name)?;
            Ok(Value::List(map.keys().map(|k| Value::String(k.clone())).collect()))
        }
        "values" => {
            arg0(args, name)?;
            Ok(Value::List(map.values().cloned().collect()))
        }
        "get" => match args {
            [Value::String(key)] => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
            [Value::String(key), default] => Ok(map.get(key).cloned().unwrap_or_else(|| default.clone())),
            _ => TypeErrorSnafu { message: "get expects a string key".to_string() }.fail(),
        },
        _ => unknown_method(&Value::Map(map.clone()), name),
    }
}

fn numeric_method(value: &Value, name: &str, args: &[Value]) -> Result<Value> {
    let as_double = match value {
        Value::Int(i) => *i as f64,
        Value::UInt(u) => *u as f64,
        Value::Double(d) => *d,
        _ => unreachable!(),
    };
    match name {
        "ceil" => {
            arg0(args, name)?;
            Ok(Value::Double(as_double.ceil()))
        }
        "floor" => {
            arg0(args, name)?;
            Ok(Value::Double(as_double.floor()))
        }
        "round" => {
            arg0(args, name)?;
            Ok(Value::Double(as_double.round()))
        }
        "abs" => {
            arg0(args, name)?;
            Ok(match value {
                Value::Int(i) => Value::Int(i.abs()),
                Value::Double(d) => Value::Double(d.abs()),
                other => other.clone(),
            })
        }
        _ => unknown_method(value, name),
    }
}

/// `merge(m1, m2)`: deep merge, `m2` overrides `m1`. Nested maps recurse;
/// lists are replaced wholesale, never concatenated.
pub fn merge(a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::Map(mut a), Value::Map(b)) => {
            for (k, v) in b {
                let merged = match a.shift_remove(&k) {
                    Some(existing) => merge(existing, v)?,
                    None => v,
                };
                a.insert(k, merged);
            }
            Ok(Value::Map(a))
        }
        (_, b) => Ok(b),
    }
}

pub fn cast_int(v: Value) -> Result<Value> {
    match v {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::UInt(u) => Ok(Value::Int(u as i64)),
        Value::Double(d) => Ok(Value::Int(d as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| TypeErrorSnafu { message: format!("cannot cast {s:?} to int") }.build()),
        other => TypeErrorSnafu { message: format!("cannot cast {} to int", other.type_name()) }.fail(),
    }
}

pub fn cast_uint(v: Value) -> Result<Value> {
    match v {
        Value::UInt(u) => Ok(Value::UInt(u)),
        Value::Int(i) if i >= 0 => Ok(Value::UInt(i as u64)),
        Value::Double(d) if d >= 0.0 => Ok(Value::UInt(d as u64)),
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::UInt)
            .map_err(|_| TypeErrorSnafu { message: format!("cannot cast {s:?} to uint") }.build()),
        other => TypeErrorSnafu { message: format!("cannot cast {} to uint", other.type_name()) }.fail(),
    }
}

pub fn cast_double(v: Value) -> Result<Value> {
    match v {
        Value::Double(d) => Ok(Value::Double(d)),
        Value::Int(i) => Ok(Value::Double(i as f64)),
        Value::UInt(u) => Ok(Value::Double(u as f64)),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| TypeErrorSnafu { message: format!("cannot cast {s:?} to double") }.build()),
        other => TypeErrorSnafu { message: format!("cannot cast {} to double", other.type_name()) }.fail(),
    }
}

pub fn base64_encode(v: &Value) -> Result<Value> {
    match v {
        Value::Bytes(b) => Ok(Value::String(value::base64_encode(b))),
        Value::String(s) => Ok(Value::String(value::base64_encode(s.as_bytes()))),
        other => TypeErrorSnafu { message: format!("base64.encode expects bytes or string, got {}", other.type_name()) }
            .fail(),
    }
}

pub fn base64_decode(v: &Value) -> Result<Value> {
    match v {
        Value::String(s) => value::base64_decode(s)
            .map(Value::Bytes)
            .ok_or_else(|| TypeErrorSnafu { message: format!("{s:?} is not valid base64") }.build()),
        other => TypeErrorSnafu { message: format!("base64.decode expects a string, got {}", other.type_name()) }
            .fail(),
    }
}
