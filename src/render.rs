//! C5 — the template renderer: walks a [`ResourceTemplate`], evaluates its
//! `forEach`/gate expressions, substitutes `${...}` interpolation through
//! the template body, strips `omit()` markers, and validates the result is
//! a well-formed Kubernetes resource shape.

use indexmap::IndexMap;
use serde_json::Value as Json;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::expr::{self, Context, ProgramCache};
use crate::model::{RenderedResource, ResourceTemplate};
use crate::validation;
use crate::value::Value;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("expression error evaluating {source_text:?}: {source}"))]
    Expr { source: expr::Error, source_text: String },

    #[snafu(display("forEach expression {source_text:?} did not evaluate to a list"))]
    ForEachNotList { source_text: String },

    #[snafu(display("rendered resource is missing required field {field:?}"))]
    MissingField { field: String },

    #[snafu(display("rendered resource metadata.name {name:?} is invalid: {reasons:?}"))]
    InvalidName { name: String, reasons: Vec<String> },

    #[snafu(display("recursion depth exceeded ({max_depth})"))]
    DepthExceeded { max_depth: usize },

    #[snafu(display("rendered document does not deserialize into a resource: {source}"))]
    Deserialize { source: serde_json::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Recursion/iteration guard. `max_depth` bounds nested document recursion
/// during substitution, not `forEach` fan-out width.
#[derive(Debug, Clone, Copy)]
pub struct RenderLimits {
    pub max_depth: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// Renders one [`ResourceTemplate`] against `ctx`, returning zero resources
/// if a gate expression is falsy, one if there is no `forEach`, or one per
/// `forEach` element otherwise.
#[tracing::instrument(skip_all, fields(template_id = %template.id))]
pub fn render_template(
    template: &ResourceTemplate,
    ctx: &Context,
    cache: &ProgramCache,
    limits: &RenderLimits,
) -> Result<Vec<RenderedResource>> {
    let mut out = Vec::new();

    match &template.for_each {
        None => {
            if gates_pass(template, ctx, cache)? {
                out.push(render_one(&template.template, ctx, cache, limits, 0)?);
            }
        }
        Some(expr_src) => {
            let list = cache
                .eval(expr_src, ctx)
                .context(ExprSnafu { source_text: expr_src.clone() })?;
            let Value::List(items) = list else {
                return ForEachNotListSnafu { source_text: expr_src.clone() }.fail();
            };
            for item in items {
                let child = ctx.bind(&template.var, item);
                if gates_pass(template, &child, cache)? {
                    out.push(render_one(&template.template, &child, cache, limits, 0)?);
                }
            }
        }
    }

    Ok(out)
}

fn gates_pass(template: &ResourceTemplate, ctx: &Context, cache: &ProgramCache) -> Result<bool> {
    for gate in template.gate_expressions() {
        let value = cache.eval(gate, ctx).context(ExprSnafu { source_text: gate.to_string() })?;
        if !value.is_truthy() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn render_one(
    template: &Json,
    ctx: &Context,
    cache: &ProgramCache,
    limits: &RenderLimits,
    depth: usize,
) -> Result<RenderedResource> {
    let mut value = substitute(template, ctx, cache, limits, depth)?;
    value.strip_omitted();
    let json = value.to_json();
    validate_shape(&json)?;
    serde_json::from_value(json).context(DeserializeSnafu)
}

/// Recursively walks a JSON template, interpolating every string leaf and
/// preserving object/array structure.
fn substitute(template: &Json, ctx: &Context, cache: &ProgramCache, limits: &RenderLimits, depth: usize) -> Result<Value> {
    ensure!(depth <= limits.max_depth, DepthExceededSnafu { max_depth: limits.max_depth });

    match template {
        Json::String(s) => expr::interpolate(s, ctx).context(ExprSnafu { source_text: s.clone() }),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute(item, ctx, cache, limits, depth + 1)?);
            }
            Ok(Value::List(out))
        }
        Json::Object(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, ctx, cache, limits, depth + 1)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(Value::from_json(other)),
    }
}

fn validate_shape(json: &Json) -> Result<()> {
    let api_version = json.get("apiVersion").and_then(Json::as_str);
    ensure!(api_version.is_some_and(|s| !s.is_empty()), MissingFieldSnafu { field: "apiVersion".to_string() });

    let kind = json.get("kind").and_then(Json::as_str);
    ensure!(kind.is_some_and(|s| !s.is_empty()), MissingFieldSnafu { field: "kind".to_string() });

    let name = json
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Json::as_str)
        .context(MissingFieldSnafu { field: "metadata.name".to_string() })?;

    validation::name_is_dns_subdomain(name, false)
        .map_err(|reasons| Error::InvalidName { name: name.to_string(), reasons })?;

    if let Some(namespace) = json.get("metadata").and_then(|m| m.get("namespace")).and_then(Json::as_str) {
        validation::validate_namespace_name(namespace, false)
            .map_err(|reasons| Error::InvalidName { name: namespace.to_string(), reasons })?;
    }

    Ok(())
}
