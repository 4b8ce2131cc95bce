//! Tree-walking evaluator for the expression AST.
//!
//! Comprehension macros (`filter`, `map`, `all`, `exists`, `exists_one`,
//! `transformMapEntry`) are special-cased here rather than in the parser:
//! their leading call arguments are bound-variable identifiers, not value
//! expressions, so they must not be evaluated before the macro binds them
//! into a child [`Context`].

use indexmap::IndexMap;
use snafu::{OptionExt, Snafu};

use super::ast::{BinOp, Expr, Literal, UnOp};
use super::stdlib;
use crate::value::Value;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("parse error: {source}"))]
    Parse { source: super::parser::Error },

    #[snafu(display("unknown identifier {name:?}"))]
    UnknownIdent { name: String },

    #[snafu(display("no such field {field:?} on {type_name}"))]
    NoSuchField { field: String, type_name: String },

    #[snafu(display("index out of bounds: {index} (length {len})"))]
    IndexOutOfBounds { index: i64, len: usize },

    #[snafu(display("cannot index into {type_name}"))]
    NotIndexable { type_name: String },

    #[snafu(display("type error: {message}"))]
    TypeError { message: String },

    #[snafu(display("unknown function {name:?}"))]
    UnknownFunction { name: String },

    #[snafu(display("unknown method {name:?} on {type_name}"))]
    UnknownMethod { name: String, type_name: String },

    #[snafu(display("{name} expects {expected} arguments, got {got}"))]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[snafu(display("{name} requires a bound variable name as its first argument"))]
    ExpectedBoundVar { name: String },

    #[snafu(display("division by zero"))]
    DivisionByZero,

    #[snafu(display("unterminated interpolation in {source:?}"))]
    UnterminatedInterpolation { source: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Variable scope, chained via `parent` for comprehension bindings.
#[derive(Debug, Clone, Default)]
pub struct Context<'a> {
    vars: IndexMap<String, Value>,
    parent: Option<&'a Context<'a>>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(vars: IndexMap<String, Value>) -> Self {
        Context { vars, parent: None }
    }

    pub fn bind(&self, name: &str, value: Value) -> Context<'_> {
        let mut vars = IndexMap::new();
        vars.insert(name.to_string(), value);
        Context {
            vars,
            parent: Some(self),
        }
    }

    pub fn bind_two(&self, a: &str, av: Value, b: &str, bv: Value) -> Context<'_> {
        let mut vars = IndexMap::new();
        vars.insert(a.to_string(), av);
        vars.insert(b.to_string(), bv);
        Context {
            vars,
            parent: Some(self),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.vars
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.lookup(name)))
    }
}

/// Parses and evaluates `src` as an expression.
pub fn eval_str(src: &str, ctx: &Context) -> Result<Value> {
    let expr = super::parser::parse(src).map_err(|source| Error::Parse { source })?;
    eval(&expr, ctx)
}

pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(literal_to_value(lit)),
        Expr::Ident(name) => ctx
            .lookup(name)
            .cloned()
            .context(UnknownIdentSnafu { name: name.clone() }),
        Expr::List(items) => {
            let values = items.iter().map(|e| eval(e, ctx)).collect::<Result<Vec<_>>>()?;
            Ok(Value::List(values))
        }
        Expr::Map(entries) => {
            let mut map = IndexMap::new();
            for (k, v) in entries {
                let key = eval(k, ctx)?;
                let key = key.as_str().map(str::to_string).unwrap_or_else(|| key.stringify());
                map.insert(key, eval(v, ctx)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Unary(op, inner) => eval_unary(*op, eval(inner, ctx)?),
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if eval(lhs, ctx)?.is_truthy() {
                Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()))
            } else {
                Ok(Value::Bool(false))
            }
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval(lhs, ctx)?.is_truthy() {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()))
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, eval(lhs, ctx)?, eval(rhs, ctx)?),
        Expr::Ternary(cond, then_branch, else_branch) => {
            if eval(cond, ctx)?.is_truthy() {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
        Expr::Member(receiver, field) => eval_member(receiver, field, ctx),
        Expr::Index(receiver, index) => {
            let receiver_val = eval(receiver, ctx)?;
            let index_val = eval(index, ctx)?;
            eval_index(&receiver_val, &index_val)
        }
        Expr::Call(name, args) => eval_call(name, args, ctx),
        Expr::MethodCall(receiver, name, args) => eval_method_call(receiver, name, args, ctx),
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::UInt(u) => Value::UInt(*u),
        Literal::Double(d) => Value::Double(*d),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Bytes(b) => Value::Bytes(b.clone()),
    }
}

fn eval_unary(op: UnOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnOp::Neg, other) => TypeErrorSnafu {
            message: format!("cannot negate {}", other.type_name()),
        }
        .fail(),
    }
}

fn eval_binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinOp::Add => arith(lhs, rhs, |a, b| a + b, |a, b| a + b, true),
        BinOp::Sub => arith(lhs, rhs, |a, b| a - b, |a, b| a - b, false),
        BinOp::Mul => arith(lhs, rhs, |a, b| a * b, |a, b| a * b, false),
        BinOp::Div => {
            if is_zero(&rhs) {
                return DivisionByZeroSnafu.fail();
            }
            arith(lhs, rhs, |a, b| a / b, |a, b| a / b, false)
        }
        BinOp::Mod => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) if b != 0 => Ok(Value::Int(a % b)),
            (Value::UInt(a), Value::UInt(b)) if b != 0 => Ok(Value::UInt(a % b)),
            (_, b) if is_zero(&b) => DivisionByZeroSnafu.fail(),
            (a, b) => TypeErrorSnafu {
                message: format!("cannot apply % to {} and {}", a.type_name(), b.type_name()),
            }
            .fail(),
        },
        BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::Lt => compare(&lhs, &rhs).map(|o| Value::Bool(o == std::cmp::Ordering::Less)),
        BinOp::LtEq => compare(&lhs, &rhs).map(|o| Value::Bool(o != std::cmp::Ordering::Greater)),
        BinOp::Gt => compare(&lhs, &rhs).map(|o| Value::Bool(o == std::cmp::Ordering::Greater)),
        BinOp::GtEq => compare(&lhs, &rhs).map(|o| Value::Bool(o != std::cmp::Ordering::Less)),
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval"),
    }
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::Int(0) | Value::UInt(0)) || matches!(v, Value::Double(d) if *d == 0.0)
}

fn arith(
    lhs: Value,
    rhs: Value,
    int_op: fn(i64, i64) -> i64,
    double_op: fn(f64, f64) -> f64,
    allow_string_concat: bool,
) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b))),
        (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(int_op(a as i64, b as i64) as u64)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double_op(a, b))),
        (Value::Int(a), Value::Double(b)) => Ok(Value::Double(double_op(a as f64, b))),
        (Value::Double(a), Value::Int(b)) => Ok(Value::Double(double_op(a, b as f64))),
        (Value::String(a), Value::String(b)) if allow_string_concat => {
            Ok(Value::String(format!("{a}{b}")))
        }
        (Value::List(mut a), Value::List(b)) if allow_string_concat => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => TypeErrorSnafu {
            message: format!("cannot apply arithmetic to {} and {}", a.type_name(), b.type_name()),
        }
        .fail(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => *a as f64 == *b,
        (Value::UInt(a), Value::Int(b)) | (Value::Int(b), Value::UInt(a)) => *a as i64 == *b,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::UInt(a), Value::UInt(b)) => Ok(a.cmp(b)),
        (Value::Double(a), Value::Double(b)) => {
            a.partial_cmp(b).context(TypeErrorSnafu { message: "NaN comparison".to_string() })
        }
        (Value::Int(a), Value::Double(b)) => (*a as f64)
            .partial_cmp(b)
            .context(TypeErrorSnafu { message: "NaN comparison".to_string() }),
        (Value::Double(a), Value::Int(b)) => a
            .partial_cmp(&(*b as f64))
            .context(TypeErrorSnafu { message: "NaN comparison".to_string() }),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => TypeErrorSnafu {
            message: format!("cannot compare {} and {}", a.type_name(), b.type_name()),
        }
        .fail(),
    }
}

fn eval_member(receiver: &Expr, field: &str, ctx: &Context) -> Result<Value> {
    let value = eval(receiver, ctx)?;
    match &value {
        Value::Map(map) => map
            .get(field)
            .cloned()
            .context(NoSuchFieldSnafu { field: field.to_string(), type_name: "map" }),
        other => NoSuchFieldSnafu {
            field: field.to_string(),
            type_name: other.type_name().to_string(),
        }
        .fail(),
    }
}

fn eval_index(receiver: &Value, index: &Value) -> Result<Value> {
    match receiver {
        Value::List(items) => {
            let i = as_index(index)?;
            let len = items.len();
            let idx = if i < 0 { i + len as i64 } else { i };
            if idx < 0 || idx as usize >= len {
                return IndexOutOfBoundsSnafu { index: i, len }.fail();
            }
            Ok(items[idx as usize].clone())
        }
        Value::Map(map) => {
            let key = index.as_str().map(str::to_string).unwrap_or_else(|| index.stringify());
            map.get(&key)
                .cloned()
                .context(NoSuchFieldSnafu { field: key, type_name: "map" })
        }
        other => NotIndexableSnafu { type_name: other.type_name().to_string() }.fail(),
    }
}

fn as_index(v: &Value) -> Result<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::UInt(u) => Ok(*u as i64),
        other => TypeErrorSnafu {
            message: format!("cannot use {} as an index", other.type_name()),
        }
        .fail(),
    }
}

/// `has(x.y.z)` — a null-safe field-chain existence check. Must not raise on
/// a missing intermediate, so the receiver chain is walked manually instead
/// of delegating to [`eval`].
fn eval_has_with_ctx(expr: &Expr, ctx: &Context) -> bool {
    match expr {
        Expr::Ident(name) => ctx.lookup(name).is_some(),
        Expr::Member(receiver, field) => match eval(receiver, ctx) {
            Ok(Value::Map(map)) => map.contains_key(field),
            _ => false,
        },
        Expr::Index(receiver, index) => match (eval(receiver, ctx), eval(index, ctx)) {
            (Ok(Value::Map(map)), Ok(idx)) => {
                let key = idx.as_str().map(str::to_string).unwrap_or_else(|| idx.stringify());
                map.contains_key(&key)
            }
            (Ok(Value::List(list)), Ok(idx)) => {
                as_index(&idx).is_ok_and(|i| i >= 0 && (i as usize) < list.len())
            }
            _ => false,
        },
        _ => eval(expr, ctx).is_ok(),
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &Context) -> Result<Value> {
    match name {
        "has" => {
            let [arg] = args else {
                return ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }
                    .fail();
            };
            Ok(Value::Bool(eval_has_with_ctx(arg, ctx)))
        }
        "omit" => Ok(Value::Omit),
        "merge" => {
            let [a, b] = args else {
                return ArityMismatchSnafu { name: name.to_string(), expected: 2usize, got: args.len() }
                    .fail();
            };
            stdlib::merge(eval(a, ctx)?, eval(b, ctx)?)
        }
        "type" => {
            let [a] = args else {
                return ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }
                    .fail();
            };
            Ok(Value::String(eval(a, ctx)?.type_name().to_string()))
        }
        "int" => stdlib::cast_int(eval_one(args, ctx, name)?),
        "uint" => stdlib::cast_uint(eval_one(args, ctx, name)?),
        "double" => stdlib::cast_double(eval_one(args, ctx, name)?),
        "string" => Ok(Value::String(eval_one(args, ctx, name)?.stringify())),
        _ => UnknownFunctionSnafu { name: name.to_string() }.fail(),
    }
}

fn eval_one(args: &[Expr], ctx: &Context, name: &str) -> Result<Value> {
    let [a] = args else {
        return ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }.fail();
    };
    eval(a, ctx)
}

const COMPREHENSION_MACROS: &[&str] = &["filter", "map", "all", "exists", "exists_one", "transformMapEntry"];

fn eval_method_call(receiver: &Expr, name: &str, args: &[Expr], ctx: &Context) -> Result<Value> {
    if let Expr::Ident(ns) = receiver {
        if ns == "base64" && ctx.lookup(ns).is_none() {
            let [arg] = args else {
                return ArityMismatchSnafu { name: name.to_string(), expected: 1usize, got: args.len() }
                    .fail();
            };
            let arg_val = eval(arg, ctx)?;
            return match name {
                "encode" => stdlib::base64_encode(&arg_val),
                "decode" => stdlib::base64_decode(&arg_val),
                other => UnknownFunctionSnafu { name: format!("base64.{other}") }.fail(),
            };
        }
    }
    if COMPREHENSION_MACROS.contains(&name) {
        return eval_comprehension(receiver, name, args, ctx);
    }
    let recv_val = eval(receiver, ctx)?;
    let arg_vals = args.iter().map(|a| eval(a, ctx)).collect::<Result<Vec<_>>>()?;
    stdlib::call_method(&recv_val, name, &arg_vals)
}

fn eval_comprehension(receiver: &Expr, name: &str, args: &[Expr], ctx: &Context) -> Result<Value> {
    let recv_val = eval(receiver, ctx)?;
    let items: Vec<Value> = match &recv_val {
        Value::List(items) => items.clone(),
        Value::Map(map) => map.keys().map(|k| Value::String(k.clone())).collect(),
        other => {
            return TypeErrorSnafu {
                message: format!("{} is not iterable", other.type_name()),
            }
            .fail()
        }
    };

    if name == "transformMapEntry" {
        let [var_i, var_e, body] = args else {
            return ArityMismatchSnafu { name: name.to_string(), expected: 3usize, got: args.len() }.fail();
        };
        let (ident_i, ident_e) = (bound_name(var_i, name)?, bound_name(var_e, name)?);
        let mut out = IndexMap::new();
        for (idx, item) in items.into_iter().enumerate() {
            let child = ctx.bind_two(&ident_i, Value::Int(idx as i64), &ident_e, item);
            let entry = eval(body, &child)?;
            let Value::Map(mut pair) = entry else {
                return TypeErrorSnafu {
                    message: "transformMapEntry body must produce a single-entry map".to_string(),
                }
                .fail();
            };
            if let Some((k, v)) = pair.shift_remove_index(0) {
                out.insert(k, v);
            }
        }
        return Ok(Value::Map(out));
    }

    let [var, body] = args else {
        return ArityMismatchSnafu { name: name.to_string(), expected: 2usize, got: args.len() }.fail();
    };
    let ident = bound_name(var, name)?;

    match name {
        "filter" => {
            let mut out = Vec::new();
            for item in items {
                let child = ctx.bind(&ident, item.clone());
                if eval(body, &child)?.is_truthy() {
                    out.push(item);
                }
            }
            Ok(Value::List(out))
        }
        "map" => {
            let mut out = Vec::new();
            for item in items {
                let child = ctx.bind(&ident, item);
                out.push(eval(body, &child)?);
            }
            Ok(Value::List(out))
        }
        "all" => {
            for item in items {
                let child = ctx.bind(&ident, item);
                if !eval(body, &child)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "exists" => {
            for item in items {
                let child = ctx.bind(&ident, item);
                if eval(body, &child)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "exists_one" => {
            let mut count = 0;
            for item in items {
                let child = ctx.bind(&ident, item);
                if eval(body, &child)?.is_truthy() {
                    count += 1;
                }
            }
            Ok(Value::Bool(count == 1))
        }
        _ => unreachable!("filtered by COMPREHENSION_MACROS"),
    }
}

fn bound_name(expr: &Expr, macro_name: &str) -> Result<String> {
    match expr {
        Expr::Ident(name) => Ok(name.clone()),
        _ => ExpectedBoundVarSnafu { name: macro_name.to_string() }.fail(),
    }
}

/// Renders a template string. A string equal to exactly one `${...}`
/// fragment (ignoring no surrounding text) returns the expression's native
/// [`Value`] unwrapped; any other mix of literal text and fragments is
/// stringified and concatenated.
pub fn interpolate(src: &str, ctx: &Context) -> Result<Value> {
    let fragments = scan_fragments(src)?;
    if let [Fragment::Expr(e)] = fragments.as_slice() {
        return eval_str(e, ctx);
    }
    let mut out = String::new();
    for frag in &fragments {
        match frag {
            Fragment::Literal(s) => out.push_str(s),
            Fragment::Expr(e) => out.push_str(&eval_str(e, ctx)?.stringify()),
        }
    }
    Ok(Value::String(out))
}

enum Fragment<'a> {
    Literal(&'a str),
    Expr(&'a str),
}

/// Splits `src` into literal text and `${...}` expression fragments,
/// tracking brace depth and string-literal quoting so a brace or quote
/// inside the embedded expression doesn't terminate the fragment early.
fn scan_fragments(src: &str) -> Result<Vec<Fragment<'_>>> {
    let bytes = src.as_bytes();
    let mut fragments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if literal_start < i {
                fragments.push(Fragment::Literal(&src[literal_start..i]));
            }
            let expr_start = i + 2;
            let mut depth = 1;
            let mut j = expr_start;
            let mut quote: Option<u8> = None;
            while j < bytes.len() && depth > 0 {
                match quote {
                    Some(q) => {
                        if bytes[j] == b'\\' {
                            j += 1;
                        } else if bytes[j] == q {
                            quote = None;
                        }
                    }
                    None => match bytes[j] {
                        b'\'' | b'"' => quote = Some(bytes[j]),
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    },
                }
                j += 1;
            }
            if depth != 0 {
                return UnterminatedInterpolationSnafu { source: src.to_string() }.fail();
            }
            fragments.push(Fragment::Expr(&src[expr_start..j - 1]));
            literal_start = j;
            i = j;
        } else {
            i += 1;
        }
    }
    if literal_start < bytes.len() {
        fragments.push(Fragment::Literal(&src[literal_start..]));
    }
    Ok(fragments)
}
