//! C1 — the simple-schema DSL compiler.
//!
//! Compiles a [`crate::model::SchemaDocument`] (raw `name -> "type |
//! constraints"` strings) into a [`CompiledSchema`]: a structural validator,
//! a defaulting function, and the set of required-field paths. Named types
//! are expanded recursively with cycle detection, mirroring how this crate
//! resolves other recursive lookups (see `schema.cycle` below and the CTD
//! `types` map).

mod token;

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde_json::Value as Json;
use snafu::{OptionExt, ResultExt, Snafu};

pub use token::{Constraints, Leaf, Type};

use crate::model::SchemaDocument;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse schema leaf {field:?}: {reason}"))]
    Parse { field: String, reason: String },

    #[snafu(display("schema type {name:?} is involved in a cycle"))]
    Cycle { name: String },

    #[snafu(display("schema references unknown type {name:?}"))]
    UnknownType { name: String },

    #[snafu(display("field {path:?} is required but missing and has no default"))]
    MissingRequired { path: String },

    #[snafu(display("field {path:?} does not match pattern {pattern:?}"))]
    PatternMismatch { path: String, pattern: String },

    #[snafu(display("field {path:?} value {value} is not one of {allowed:?}"))]
    EnumMismatch {
        path: String,
        value: String,
        allowed: Vec<String>,
    },

    #[snafu(display("field {path:?} value {value} is out of bounds"))]
    OutOfBounds { path: String, value: String },

    #[snafu(display("field {path:?} has invalid regex {pattern:?}"))]
    InvalidPattern {
        path: String,
        pattern: String,
        source: regex::Error,
    },
}

/// The result of compiling a [`SchemaDocument`]: a tree of resolved leaf
/// schemas for `parameters` and `envOverrides`, ready to validate and
/// default-fill concrete JSON values against.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub parameters: BTreeMap<String, Leaf>,
    pub env_overrides: BTreeMap<String, Leaf>,
}

impl CompiledSchema {
    /// Compiles `doc`, resolving custom type references in `doc.types`.
    pub fn compile(doc: &SchemaDocument) -> Result<Self> {
        let mut resolved_types: BTreeMap<String, Leaf> = BTreeMap::new();
        for name in doc.types.keys() {
            resolve_type(name, doc, &mut resolved_types, &mut HashSet::new())?;
        }

        let parameters = compile_fields(&doc.parameters, &resolved_types)?;
        let env_overrides = compile_fields(&doc.env_overrides, &resolved_types)?;

        Ok(Self {
            parameters,
            env_overrides,
        })
    }

    /// Returns the dot-path of every required leaf with no default, across
    /// both `parameters` and `envOverrides`.
    pub fn required_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, leaf) in &self.parameters {
            collect_required(name, leaf, &mut out);
        }
        for (name, leaf) in &self.env_overrides {
            collect_required(name, leaf, &mut out);
        }
        out
    }

    /// Builds a JSON document populated with every `default=` value declared
    /// in `parameters` and `envOverrides` — the lowest-precedence layer the
    /// input merger folds over.
    pub fn defaults(&self) -> Json {
        let mut params = serde_json::Map::new();
        for (name, leaf) in &self.parameters {
            if let Some(value) = leaf.default_value() {
                params.insert(name.clone(), value);
            }
        }
        let mut overrides = serde_json::Map::new();
        for (name, leaf) in &self.env_overrides {
            if let Some(value) = leaf.default_value() {
                overrides.insert(name.clone(), value);
            }
        }
        for (k, v) in overrides {
            params.insert(k, v);
        }
        Json::Object(params)
    }

    /// Validates `value` (the merged parameters+envOverrides document)
    /// against this schema, collecting every violation rather than failing
    /// on the first one.
    pub fn validate(&self, value: &Json) -> Vec<Error> {
        let mut errors = Vec::new();
        let obj = value.as_object().cloned().unwrap_or_default();
        for (name, leaf) in self.parameters.iter().chain(self.env_overrides.iter()) {
            validate_leaf(name, leaf, obj.get(name), &mut errors);
        }
        errors
    }
}

fn resolve_type(
    name: &str,
    doc: &SchemaDocument,
    resolved: &mut BTreeMap<String, Leaf>,
    visiting: &mut HashSet<String>,
) -> Result<()> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    if !visiting.insert(name.to_string()) {
        return CycleSnafu { name }.fail();
    }

    let Some(fields) = doc.types.get(name) else {
        return UnknownTypeSnafu { name }.fail();
    };

    // Resolve any types this one references before compiling its own
    // fields, so nested custom types are available.
    for (field_name, raw) in fields {
        let ty = token::peek_type_name(raw);
        if let Some(ty) = ty {
            if doc.types.contains_key(&ty) && !resolved.contains_key(&ty) {
                resolve_type(&ty, doc, resolved, visiting)?;
            }
        }
        let _ = field_name;
    }

    let compiled = compile_fields(fields, resolved)?;
    resolved.insert(
        name.to_string(),
        Leaf {
            ty: Type::Object(compiled),
            constraints: Constraints::default(),
        },
    );
    visiting.remove(name);
    Ok(())
}

fn compile_fields(
    fields: &BTreeMap<String, String>,
    types: &BTreeMap<String, Leaf>,
) -> Result<BTreeMap<String, Leaf>> {
    fields
        .iter()
        .map(|(name, raw)| {
            let leaf = token::parse_leaf(raw, types).with_context(|_| ParseSnafu {
                field: name.clone(),
            })?;
            Ok((name.clone(), leaf))
        })
        .collect()
}

fn collect_required(path: &str, leaf: &Leaf, out: &mut Vec<String>) {
    if leaf.constraints.required && leaf.constraints.default.is_none() {
        out.push(path.to_string());
    }
    if let Type::Object(fields) = &leaf.ty {
        for (name, child) in fields {
            collect_required(&format!("{path}.{name}"), child, out);
        }
    }
}

fn validate_leaf(path: &str, leaf: &Leaf, value: Option<&Json>, errors: &mut Vec<Error>) {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => {
            if leaf.constraints.required && leaf.constraints.default.is_none() {
                errors.push(Error::MissingRequired {
                    path: path.to_string(),
                });
            }
            return;
        }
    };

    match &leaf.ty {
        Type::String => {
            if let Some(s) = value.as_str() {
                check_string_constraints(path, s, &leaf.constraints, errors);
            }
        }
        Type::Integer | Type::Number => {
            if let Some(n) = value.as_f64() {
                check_numeric_constraints(path, n, &leaf.constraints, errors);
            }
        }
        Type::Boolean => {}
        Type::List(item_ty) => {
            if let Some(items) = value.as_array() {
                if let Some(min_items) = leaf.constraints.min_items {
                    if items.len() < min_items {
                        errors.push(Error::OutOfBounds {
                            path: path.to_string(),
                            value: items.len().to_string(),
                        });
                    }
                }
                let item_leaf = Leaf {
                    ty: (**item_ty).clone(),
                    constraints: Constraints::default(),
                };
                for (i, item) in items.iter().enumerate() {
                    validate_leaf(&format!("{path}[{i}]"), &item_leaf, Some(item), errors);
                }
            }
        }
        Type::Map(value_ty) => {
            if let Some(map) = value.as_object() {
                let item_leaf = Leaf {
                    ty: (**value_ty).clone(),
                    constraints: Constraints::default(),
                };
                for (k, v) in map {
                    validate_leaf(&format!("{path}.{k}"), &item_leaf, Some(v), errors);
                }
            }
        }
        Type::Object(fields) => {
            let obj = value.as_object().cloned().unwrap_or_default();
            for (name, child) in fields {
                validate_leaf(&format!("{path}.{name}"), child, obj.get(name), errors);
            }
        }
    }
}

fn check_string_constraints(path: &str, s: &str, c: &Constraints, errors: &mut Vec<Error>) {
    if let Some(pattern) = &c.pattern {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => errors.push(Error::PatternMismatch {
                path: path.to_string(),
                pattern: pattern.clone(),
            }),
            Ok(_) => {}
            Err(source) => errors.push(Error::InvalidPattern {
                path: path.to_string(),
                pattern: pattern.clone(),
                source,
            }),
        }
    }
    if let Some(allowed) = &c.r#enum {
        if !allowed.iter().any(|v| v == s) {
            errors.push(Error::EnumMismatch {
                path: path.to_string(),
                value: s.to_string(),
                allowed: allowed.clone(),
            });
        }
    }
    if let Some(min) = c.min_length {
        if s.len() < min {
            errors.push(Error::OutOfBounds {
                path: path.to_string(),
                value: s.to_string(),
            });
        }
    }
    if let Some(max) = c.max_length {
        if s.len() > max {
            errors.push(Error::OutOfBounds {
                path: path.to_string(),
                value: s.to_string(),
            });
        }
    }
}

fn check_numeric_constraints(path: &str, n: f64, c: &Constraints, errors: &mut Vec<Error>) {
    if let Some(min) = c.minimum {
        if n < min {
            errors.push(Error::OutOfBounds {
                path: path.to_string(),
                value: n.to_string(),
            });
        }
    }
    if let Some(max) = c.maximum {
        if n > max {
            errors.push(Error::OutOfBounds {
                path: path.to_string(),
                value: n.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(parameters: &[(&str, &str)]) -> SchemaDocument {
        SchemaDocument {
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            env_overrides: BTreeMap::new(),
            types: BTreeMap::new(),
        }
    }

    #[test]
    fn required_field_without_default_is_missing() {
        let schema = CompiledSchema::compile(&doc(&[("name", "string | required=true")])).unwrap();
        let errors = schema.validate(&serde_json::json!({}));
        assert!(matches!(errors[0], Error::MissingRequired { .. }));
    }

    #[test]
    fn default_is_applied_and_satisfies_required() {
        let schema = CompiledSchema::compile(&doc(&[(
            "maxReplicas",
            "integer | required=true default=3",
        )]))
        .unwrap();
        let defaults = schema.defaults();
        assert_eq!(defaults["maxReplicas"], serde_json::json!(3));
        assert!(schema.validate(&defaults).is_empty());
    }

    #[test]
    fn enum_constraint_rejects_unknown_value() {
        let schema =
            CompiledSchema::compile(&doc(&[("tier", "string | enum=gold,silver,bronze")]))
                .unwrap();
        let errors = schema.validate(&serde_json::json!({"tier": "platinum"}));
        assert!(matches!(errors[0], Error::EnumMismatch { .. }));
    }

    #[test]
    fn list_and_map_types_parse_and_validate() {
        let schema =
            CompiledSchema::compile(&doc(&[("names", "[]string"), ("labels", "map[string]string")]))
                .unwrap();
        assert!(schema
            .validate(&serde_json::json!({"names": ["a", "b"], "labels": {"x": "y"}}))
            .is_empty());
    }

    #[test]
    fn cyclic_custom_type_is_rejected() {
        let mut types = BTreeMap::new();
        types.insert("A".to_string(), BTreeMap::from([("b".to_string(), "B".to_string())]));
        types.insert("B".to_string(), BTreeMap::from([("a".to_string(), "A".to_string())]));
        let d = SchemaDocument {
            parameters: BTreeMap::from([("root".to_string(), "A".to_string())]),
            env_overrides: BTreeMap::new(),
            types,
        };
        assert!(matches!(
            CompiledSchema::compile(&d),
            Err(Error::Cycle { .. })
        ));
    }

    #[test]
    fn unknown_hint_constraints_are_ignored() {
        let schema = CompiledSchema::compile(&doc(&[(
            "container",
            "string | queryContainers=true",
        )]))
        .unwrap();
        assert!(schema.validate(&serde_json::json!({"container": "app"})).is_empty());
    }
}
