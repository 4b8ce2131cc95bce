//! C4 — the input merger: builds the evaluation context a resource template
//! or patch sees, by layering inputs in order of precedence (later layers
//! override earlier ones via [`crate::path::deep_merge`]).
//!
//! Component-scope layers: CTD schema defaults → `Component.parameters` →
//! `EnvSettings.overrides` (restricted to the `envOverrides` subtree of the
//! schema — anything else is an `override.static` error) → platform context.
//!
//! Addon-scope layers: addon schema defaults → `addons[i].config` →
//! `EnvSettings.addonOverrides[name][instanceId]` → injected
//! `instanceId`/component metadata/platform context.

use serde_json::{Map, Value as Json};
use snafu::{ResultExt, Snafu};

use crate::model::{Addon, AddonInstance, Component, ComponentTypeDefinition, EnvSettings, PlatformContext};
use crate::path::deep_merge;
use crate::schema::{self, CompiledSchema};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("schema error: {source}"))]
    Schema { source: schema::Error },

    #[snafu(display(
        "EnvSettings.overrides sets {field:?}, which is not declared under the component's envOverrides schema"
    ))]
    OverrideStatic { field: String },

    #[snafu(display("validation failed: {errors:?}"))]
    Validation { errors: Vec<schema::Error> },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Builds the merged, schema-validated context for a [`ComponentTypeDefinition`]'s
/// own resource templates.
pub fn build_component_context(
    ctd: &ComponentTypeDefinition,
    component: &Component,
    env: Option<&EnvSettings>,
    platform: &PlatformContext,
) -> Result<Json> {
    let compiled = CompiledSchema::compile(&ctd.schema).context(SchemaSnafu)?;

    let mut merged = compiled.defaults();
    merged = deep_merge(merged, component.parameters.clone());

    if let Some(env) = env {
        let overrides = restrict_to_env_overrides(&compiled, &env.overrides)?;
        merged = deep_merge(merged, overrides);
    }

    let errors = compiled.validate(&merged);
    if !errors.is_empty() {
        return ValidationSnafu { errors }.fail();
    }

    merged = inject_ambient(merged, &component.metadata, component, platform);
    Ok(merged)
}

/// Builds the merged, schema-validated context for one addon instance.
pub fn build_addon_context(
    addon: &Addon,
    instance: &AddonInstance,
    component: &Component,
    env: Option<&EnvSettings>,
    platform: &PlatformContext,
) -> Result<Json> {
    let compiled = CompiledSchema::compile(&addon.schema).context(SchemaSnafu)?;

    let mut merged = compiled.defaults();
    merged = deep_merge(merged, instance.config.clone());

    if let Some(env) = env {
        if let Some(per_instance) = env
            .addon_overrides
            .get(&addon.name)
            .and_then(|by_instance| by_instance.get(&instance.instance_id))
        {
            let overrides = restrict_to_env_overrides(&compiled, per_instance)?;
            merged = deep_merge(merged, overrides);
        }
    }

    let errors = compiled.validate(&merged);
    if !errors.is_empty() {
        return ValidationSnafu { errors }.fail();
    }

    merged = inject_ambient(merged, &component.metadata, component, platform);
    if let Json::Object(map) = &mut merged {
        map.insert("instanceId".to_string(), Json::String(instance.instance_id.clone()));
    }
    Ok(merged)
}

/// `EnvSettings.overrides`/`addonOverrides` may only touch fields declared
/// under the schema's `envOverrides` block. A top-level key in `raw` that
/// isn't one of those names is an `override.static` violation.
fn restrict_to_env_overrides(compiled: &CompiledSchema, raw: &Json) -> Result<Json> {
    let Some(obj) = raw.as_object() else {
        return Ok(Json::Null);
    };
    let mut out = Map::new();
    for (key, value) in obj {
        if !compiled.env_overrides.contains_key(key) {
            return OverrideStaticSnafu { field: key.clone() }.fail();
        }
        out.insert(key.clone(), value.clone());
    }
    Ok(Json::Object(out))
}

/// Wraps the layered parameters/envOverrides under the reserved `spec` key
/// and injects the ambient fields every template body can reference
/// regardless of schema declarations: `metadata`, `build`, `podSelectors`,
/// `configurations`, `secrets`. These reserved top-level keys cannot be
/// shadowed by `spec` contents.
fn inject_ambient(merged: Json, metadata: &crate::model::ComponentMetadata, component: &Component, platform: &PlatformContext) -> Json {
    let mut map = Map::new();
    map.insert("spec".to_string(), merged);
    map.insert("metadata".to_string(), serde_json::to_value(metadata).unwrap_or(Json::Null));
    map.insert("build".to_string(), deep_merge(platform.build.clone(), component.build.clone()));
    map.insert("podSelectors".to_string(), or_empty_object(&platform.pod_selectors));
    map.insert("configurations".to_string(), or_empty_object(&platform.configurations));
    map.insert("secrets".to_string(), or_empty_object(&platform.secrets));
    Json::Object(map)
}

/// Missing `secrets`/`configurations` default to an empty object rather
/// than `null`, so `has(...)` against these subtrees behaves uniformly
/// whether or not the caller populated them.
fn or_empty_object(value: &Json) -> Json {
    if value.is_null() {
        Json::Object(Map::new())
    } else {
        value.clone()
    }
}

/// Converts a built context document into the expression evaluator's
/// variable bindings. Shared by [`crate::addons::compose_instance`] and
/// [`crate::pipeline`], which both need to turn the `Json` this module
/// produces into an [`crate::expr::Context`] before rendering or evaluating
/// gates against it.
pub fn to_expr_context(json: &Json) -> crate::expr::Context<'static> {
    let value = crate::value::Value::from_json(json);
    let vars = match value {
        crate::value::Value::Map(map) => map,
        _ => indexmap::IndexMap::new(),
    };
    crate::expr::Context::from_map(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComponentMetadata, SchemaDocument};
    use std::collections::BTreeMap;

    fn component(parameters: Json) -> Component {
        Component {
            metadata: ComponentMetadata { name: "demo".to_string(), namespace: None },
            component_type: "web".to_string(),
            parameters,
            addons: Vec::new(),
            build: Json::Null,
        }
    }

    fn ctd(parameters: &[(&str, &str)], env_overrides: &[(&str, &str)]) -> ComponentTypeDefinition {
        ComponentTypeDefinition {
            name: "web".to_string(),
            schema: SchemaDocument {
                parameters: parameters.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                env_overrides: env_overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                types: BTreeMap::new(),
            },
            resources: Vec::new(),
        }
    }

    #[test]
    fn parameters_override_defaults() {
        let ctd = ctd(&[("replicas", "integer | required=true default=1")], &[]);
        let component = component(serde_json::json!({"replicas": 5}));
        let ctx = build_component_context(&ctd, &component, None, &PlatformContext::default()).unwrap();
        assert_eq!(ctx["spec"]["replicas"], serde_json::json!(5));
    }

    #[test]
    fn env_overrides_restricted_to_declared_schema() {
        let ctd = ctd(&[("replicas", "integer | default=1")], &[("replicas", "integer")]);
        let component = component(Json::Null);
        let env = EnvSettings {
            owner: Default::default(),
            environment: "prod".to_string(),
            overrides: serde_json::json!({"replicas": 9}),
            addon_overrides: BTreeMap::new(),
        };
        let ctx = build_component_context(&ctd, &component, Some(&env), &PlatformContext::default()).unwrap();
        assert_eq!(ctx["spec"]["replicas"], serde_json::json!(9));
    }

    #[test]
    fn env_overrides_outside_schema_is_rejected() {
        let ctd = ctd(&[("replicas", "integer | default=1")], &[]);
        let component = component(Json::Null);
        let env = EnvSettings {
            owner: Default::default(),
            environment: "prod".to_string(),
            overrides: serde_json::json!({"replicas": 9}),
            addon_overrides: BTreeMap::new(),
        };
        assert!(matches!(
            build_component_context(&ctd, &component, Some(&env), &PlatformContext::default()),
            Err(Error::OverrideStatic { .. })
        ));
    }
}
