//! C7 — the pipeline orchestrator: drives C1 (via context's schema
//! validation), C5 for the CTD's own resources, then folds addons via C6 in
//! dependency order, collecting diagnostics along the way.
//!
//! This is the crate's public facade — the out-of-scope CLI is expected to
//! call [`render`] (or build a reusable [`EngineHandle`]) rather than reach
//! into `schema`/`expr`/`path`/`context`/`render`/`addons` directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value as Json;
use snafu::ResultExt;

use crate::diag::{Diagnostic, Report, Severity};
use crate::error::{self, AddonsSnafu, ContextSnafu, Location, PathSnafu, RenderSnafu};
use crate::expr::ProgramCache;
use crate::model::{Addon, Component, ComponentTypeDefinition, EnvSettings, PatchOperation, PlatformContext, RenderedResource};
use crate::render::RenderLimits;
use crate::{addons, context, render};

/// A cooperative cancellation flag, checked between templates, addon
/// instances, and patch operations. Cloning shares the same underlying
/// flag; [`CancellationToken::cancel`] from any clone (e.g. on another
/// thread) is observed by the next check.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> error::Result<()> {
    if cancel.is_cancelled() {
        return Err(error::Error::Cancelled);
    }
    Ok(())
}

/// The final output of a render invocation: the ordered resource list plus
/// the accumulated diagnostic report. The engine never returns a partial
/// `resources` list alongside an `Err` — output is all-or-nothing per
/// invocation.
#[derive(Debug, Default)]
pub struct RenderOutput {
    pub resources: Vec<Json>,
    pub report: Report,
}

/// Holds a read-only, shared expression-program cache. A caller rendering
/// many [`Component`]s against a shared catalog of CTDs/addons (e.g. a
/// controller reconcile loop) builds one `EngineHandle` and derives a
/// [`Pipeline`] per render, paying expression parse cost once per distinct
/// source string rather than once per invocation.
#[derive(Clone, Default)]
pub struct EngineHandle {
    cache: Arc<ProgramCache>,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline { cache: self.cache.clone(), limits: RenderLimits::default() }
    }
}

/// One render invocation's configuration: a (possibly shared) expression
/// cache and the recursion/depth limits to enforce.
#[derive(Clone)]
pub struct Pipeline {
    cache: Arc<ProgramCache>,
    limits: RenderLimits,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { cache: Arc::new(ProgramCache::new()), limits: RenderLimits::default() }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: RenderLimits) -> Self {
        Self { cache: Arc::new(ProgramCache::new()), limits }
    }

    /// Runs the full pipeline: validates and orders `component.addons`
    /// against `addons`, renders `ctd.resources` into the base resource
    /// list, then folds each addon instance's `creates`/`patches` in
    /// dependency order.
    #[tracing::instrument(skip_all, fields(component_type = %ctd.name, component = %component.metadata.name))]
    pub fn render(
        &self,
        ctd: &ComponentTypeDefinition,
        component: &Component,
        addons_catalog: &[Addon],
        env: Option<&EnvSettings>,
        platform: &PlatformContext,
        cancel: &CancellationToken,
    ) -> error::Result<RenderOutput> {
        let mut report = Report::new();
        check_cancelled(cancel)?;

        let addons_by_name: HashMap<String, &Addon> = addons_catalog.iter().map(|a| (a.name.clone(), a)).collect();
        let order = addons::order_instances(&addons_by_name, &component.addons)
            .context(AddonsSnafu { location: Location::default() })?;

        let ctx_json = context::build_component_context(ctd, component, env, platform)
            .context(ContextSnafu { location: Location::default() })?;
        let ctx = context::to_expr_context(&ctx_json);

        let mut resources: Vec<RenderedResource> = Vec::new();
        for template in &ctd.resources {
            check_cancelled(cancel)?;
            let rendered = render::render_template(template, &ctx, &self.cache, &self.limits)
                .context(RenderSnafu { location: Location::template(template.id.clone()) })?;
            resources.extend(rendered);
        }

        for idx in order {
            check_cancelled(cancel)?;
            let instance = &component.addons[idx];
            let addon = *addons_by_name.get(instance.name.as_str()).expect("validated by order_instances");
            let location = Location::addon(addon.name.clone(), instance.instance_id.clone());

            let output = addons::compose_instance(addon, instance, component, env, platform, &self.cache, &self.limits)
                .context(AddonsSnafu { location: location.clone() })?;

            resources.extend(output.created);

            for (target, operations) in &output.patches {
                check_cancelled(cancel)?;
                apply_patch(target, operations, &mut resources, &location, &mut report)?;
            }
        }

        let resources = resources
            .into_iter()
            .map(|resource| serde_json::to_value(resource).expect("RenderedResource always serializes"))
            .collect();

        Ok(RenderOutput { resources, report })
    }
}

/// Applies one patch specification's operations to every resource its
/// `target` selector matches: zero matching resources is a warning, not an
/// error (mirroring the path engine's own no-op-on-empty-filter rule at the
/// resource-selection level).
fn apply_patch(
    target: &crate::model::TargetSelector,
    operations: &[PatchOperation],
    resources: &mut [RenderedResource],
    location: &Location,
    report: &mut Report,
) -> error::Result<()> {
    let matches = addons::find_targets(target, resources);
    if matches.is_empty() {
        tracing::warn!(?location, "patch target matched no resources");
        report.push(
            Diagnostic::new(Severity::Warning, "addon.noMatchingTargets", "patch target matched no resources")
                .at(location.clone()),
        );
        return Ok(());
    }

    for resource in matches {
        for operation in operations {
            let count = apply_operation_to_resource(resource, operation)
                .context(PathSnafu { location: location.clone().with_field(operation.path.clone()) })?;
            if count == 0 {
                tracing::warn!(?location, path = %operation.path, "patch matched no elements");
                report.push(
                    Diagnostic::new(Severity::Warning, "patch.noMatch", format!("path {:?} matched no elements", operation.path))
                        .at(location.clone().with_field(operation.path.clone())),
                );
            }
        }
    }
    Ok(())
}

/// Round-trips `resource` through JSON to apply `operation`: [`crate::path`]
/// operates on a plain document tree, while resources are carried as typed
/// [`RenderedResource`]s everywhere else so `kind`/`metadata.name` stay
/// strongly typed between patches.
fn apply_operation_to_resource(
    resource: &mut RenderedResource,
    operation: &PatchOperation,
) -> std::result::Result<usize, crate::path::patch::Error> {
    let mut json = serde_json::to_value(&*resource).expect("RenderedResource always serializes");
    let count = crate::path::apply(&mut json, operation)?;
    if count > 0 {
        *resource = serde_json::from_value(json).expect("a patched resource document still deserializes");
    }
    Ok(count)
}

/// Top-level facade: a one-shot render with a throwaway expression cache.
/// Callers rendering many components against the same CTD/addon catalog
/// should build an [`EngineHandle`] once and derive a [`Pipeline`] per
/// render instead, to reuse parsed expressions.
pub fn render(
    ctd: &ComponentTypeDefinition,
    component: &Component,
    addons_catalog: &[Addon],
    env: Option<&EnvSettings>,
    platform: &PlatformContext,
    limits: RenderLimits,
    cancel: &CancellationToken,
) -> error::Result<RenderOutput> {
    Pipeline::with_limits(limits).render(ctd, component, addons_catalog, env, platform, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComponentMetadata, ComponentTypeDefinition, ResourceTemplate, SchemaDocument};
    use std::collections::BTreeMap;

    fn ctd_with_resource(template: Json, parameters: &[(&str, &str)]) -> ComponentTypeDefinition {
        ComponentTypeDefinition {
            name: "web-app".to_string(),
            schema: SchemaDocument {
                parameters: parameters.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                env_overrides: BTreeMap::new(),
                types: BTreeMap::new(),
            },
            resources: vec![ResourceTemplate {
                id: "deployment".to_string(),
                template,
                for_each: None,
                var: "item".to_string(),
                include_when: None,
                condition: None,
            }],
        }
    }

    fn component(parameters: Json) -> Component {
        Component {
            metadata: ComponentMetadata { name: "demo".to_string(), namespace: None },
            component_type: "web-app".to_string(),
            parameters,
            addons: Vec::new(),
            build: Json::Null,
        }
    }

    #[test]
    fn s1_base_deployment_renders_replicas_from_spec() {
        let ctd = ctd_with_resource(
            serde_json::json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "demo"},
                "spec": {"replicas": "${spec.maxReplicas}"},
            }),
            &[("maxReplicas", "integer | required=true")],
        );
        let component = component(serde_json::json!({"maxReplicas": 3}));
        let output = Pipeline::new()
            .render(&ctd, &component, &[], None, &PlatformContext::default(), &CancellationToken::new())
            .unwrap();

        assert_eq!(output.resources.len(), 1);
        assert_eq!(output.resources[0]["kind"], "Deployment");
        assert_eq!(output.resources[0]["spec"]["replicas"], serde_json::json!(3));
    }

    #[test]
    fn cancellation_aborts_before_any_resource_is_emitted() {
        let ctd = ctd_with_resource(
            serde_json::json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "svc"}}),
            &[],
        );
        let component = component(Json::Null);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Pipeline::new().render(&ctd, &component, &[], None, &PlatformContext::default(), &cancel);
        assert!(matches!(result, Err(error::Error::Cancelled)));
    }
}
