//! Tokenizer for a single simple-schema leaf: `<type> [| <constraint>...]`.
//! Recursive descent over a hand-split token stream — no grammar library,
//! matching how other small DSLs in this crate (e.g. CPU/duration
//! quantities) parse themselves directly off `&str`.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use snafu::{OptionExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("empty leaf"))]
    Empty,

    #[snafu(display("unknown type {name:?}"))]
    UnknownType { name: String },

    #[snafu(display("malformed constraint {token:?}"))]
    MalformedConstraint { token: String },

    #[snafu(display("unterminated quoted value in {token:?}"))]
    UnterminatedQuote { token: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A resolved type reference: either a primitive, a homogenous list/map, or
/// an expanded custom type (a nested field map).
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    String,
    Integer,
    Number,
    Boolean,
    List(Box<Type>),
    Map(Box<Type>),
    Object(BTreeMap<String, Leaf>),
}

/// The recognized constraints; `queryContainers`/`queryResources` are
/// accepted but intentionally not stored — they are UI hints, opaque to
/// this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub required: bool,
    pub default: Option<String>,
    pub pattern: Option<String>,
    pub r#enum: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_items: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub ty: Type,
    pub constraints: Constraints,
}

impl Leaf {
    /// The JSON value to seed into the defaults document, parsed according
    /// to the leaf's own type so `default=10` on an `integer` leaf produces
    /// a JSON number rather than a string.
    pub fn default_value(&self) -> Option<Json> {
        let raw = self.constraints.default.as_deref()?;
        Some(coerce_default(raw, &self.ty))
    }
}

fn coerce_default(raw: &str, ty: &Type) -> Json {
    match ty {
        Type::Integer => raw
            .parse::<i64>()
            .map(Json::from)
            .unwrap_or_else(|_| Json::String(raw.to_string())),
        Type::Number => raw
            .parse::<f64>()
            .map(Json::from)
            .unwrap_or_else(|_| Json::String(raw.to_string())),
        Type::Boolean => raw
            .parse::<bool>()
            .map(Json::Bool)
            .unwrap_or_else(|_| Json::String(raw.to_string())),
        _ => Json::String(raw.to_string()),
    }
}

/// If `raw`'s type portion is a bare custom-type name (not a primitive or
/// `[]`/`map[string]` wrapper), returns it, so callers can pre-resolve
/// dependency order between custom types before compiling fields.
pub fn peek_type_name(raw: &str) -> Option<String> {
    let type_str = raw.split('|').next().unwrap_or("").trim();
    match type_str {
        "string" | "integer" | "number" | "boolean" => None,
        s if s.starts_with("[]") || s.starts_with("map[string]") => None,
        s if s.is_empty() => None,
        s => Some(s.to_string()),
    }
}

/// Parses a full leaf token (`<type> | <constraints>`), resolving any
/// custom type reference against `types` (already-compiled named types).
pub fn parse_leaf(raw: &str, types: &BTreeMap<String, Leaf>) -> Result<Leaf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return EmptySnafu.fail();
    }

    let mut parts = raw.splitn(2, '|');
    let type_str = parts.next().unwrap_or("").trim();
    let constraints_str = parts.next().unwrap_or("").trim();

    let ty = parse_type(type_str, types)?;
    let constraints = parse_constraints(constraints_str)?;

    Ok(Leaf { ty, constraints })
}

fn parse_type(type_str: &str, types: &BTreeMap<String, Leaf>) -> Result<Type> {
    match type_str {
        "string" => Ok(Type::String),
        "integer" => Ok(Type::Integer),
        "number" => Ok(Type::Number),
        "boolean" => Ok(Type::Boolean),
        s if s.starts_with("[]") => Ok(Type::List(Box::new(parse_type(&s[2..], types)?))),
        s if s.starts_with("map[string]") => {
            Ok(Type::Map(Box::new(parse_type(&s["map[string]".len()..], types)?)))
        }
        s => {
            let leaf = types.get(s).context(UnknownTypeSnafu { name: s })?;
            Ok(leaf.ty.clone())
        }
    }
}

/// Splits a constraint string into `k=v` tokens, honoring double-quoted
/// values that may themselves contain spaces (e.g. `pattern="^[a-z ]+$"`).
fn split_constraint_tokens(s: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = s.char_indices().peekable();
    let mut current = String::new();
    let mut in_quotes = false;

    while let Some((_, c)) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return UnterminatedQuoteSnafu { token: s }.fail();
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_constraints(s: &str) -> Result<Constraints> {
    let mut constraints = Constraints::default();
    if s.is_empty() {
        return Ok(constraints);
    }

    for token in split_constraint_tokens(s)? {
        let (key, value) = token
            .split_once('=')
            .context(MalformedConstraintSnafu { token: token.clone() })?;
        let value = unquote(value);

        match key {
            "required" => constraints.required = value.parse().unwrap_or(true),
            "default" => constraints.default = Some(value.to_string()),
            "pattern" => constraints.pattern = Some(value.to_string()),
            "enum" => {
                constraints.r#enum =
                    Some(value.split(',').map(str::trim).map(str::to_string).collect());
            }
            "minimum" => {
                constraints.minimum = value.parse().ok();
            }
            "maximum" => {
                constraints.maximum = value.parse().ok();
            }
            "minLength" => {
                constraints.min_length = value.parse().ok();
            }
            "maxLength" => {
                constraints.max_length = value.parse().ok();
            }
            "minItems" => {
                constraints.min_items = value.parse().ok();
            }
            // UI hint constraints, opaque metadata — accepted and ignored.
            "queryContainers" | "queryResources" => {}
            _ => return MalformedConstraintSnafu { token }.fail(),
        }
    }

    Ok(constraints)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitive_with_constraints() {
        let leaf = parse_leaf(
            r#"string | required=true pattern="^[a-z]+$" default=foo"#,
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(leaf.ty, Type::String);
        assert!(leaf.constraints.required);
        assert_eq!(leaf.constraints.pattern.as_deref(), Some("^[a-z]+$"));
        assert_eq!(leaf.constraints.default.as_deref(), Some("foo"));
    }

    #[test]
    fn parses_list_and_map_wrappers() {
        assert_eq!(
            parse_leaf("[]integer", &BTreeMap::new()).unwrap().ty,
            Type::List(Box::new(Type::Integer))
        );
        assert_eq!(
            parse_leaf("map[string][]string", &BTreeMap::new()).unwrap().ty,
            Type::Map(Box::new(Type::List(Box::new(Type::String))))
        );
    }

    #[test]
    fn rejects_malformed_constraint() {
        assert!(parse_leaf("string | bogus", &BTreeMap::new()).is_err());
    }

    #[test]
    fn enum_constraint_splits_on_comma() {
        let leaf = parse_leaf("string | enum=a,b,c", &BTreeMap::new()).unwrap();
        assert_eq!(
            leaf.constraints.r#enum,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
