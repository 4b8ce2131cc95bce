//! C6 — the addon composer: orders a component's addon instances by
//! declared `dependencies.loadOrder`, checks `requires`/`conflictsWith`,
//! then for each instance builds its context, validates it against the
//! addon's schema, renders its `creates` templates, and applies its
//! `patches` to already-rendered resources.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use snafu::{ResultExt, Snafu};

use crate::model::{Addon, AddonInstance, Component, EnvSettings, PatchOperation, PlatformContext, RenderedResource, TargetSelector};
use crate::{context, expr, render};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("addon instance {instance_id:?} references unknown addon {addon:?}"))]
    UnknownAddon { addon: String, instance_id: String },

    #[snafu(display("addon {addon:?} requires {required:?}, which is not used by this component"))]
    MissingRequired { addon: String, required: String },

    #[snafu(display("addon {a:?} conflicts with addon {b:?}, and both are used by this component"))]
    Conflict { a: String, b: String },

    #[snafu(display("addon load order contains a cycle"))]
    Cycle,

    #[snafu(display("addon {addon:?} instance {instance_id:?} is declared more than once"))]
    DuplicateInstance { addon: String, instance_id: String },

    #[snafu(display("context error for addon instance {instance_id:?}: {source}"))]
    Context { source: context::Error, instance_id: String },

    #[snafu(display("render error for addon instance {instance_id:?}: {source}"))]
    Render { source: render::Error, instance_id: String },

    #[snafu(display("expression error evaluating patch gate for {instance_id:?}: {source}"))]
    Expr { source: expr::Error, instance_id: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Topologically orders `instances` by their addons' `loadOrder.after`/
/// `before` constraints, returning the original-index order to apply them
/// in. Ties (no constraint between two instances) preserve declaration
/// order, since [`toposort`] is stable with respect to node insertion order
/// on an acyclic graph with no path between two nodes.
pub fn order_instances(addons_by_name: &HashMap<String, &Addon>, instances: &[AddonInstance]) -> Result<Vec<usize>> {
    check_requires_and_conflicts(addons_by_name, instances)?;

    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<NodeIndex> = (0..instances.len()).map(|i| graph.add_node(i)).collect();

    for (i, instance) in instances.iter().enumerate() {
        let Some(addon) = addons_by_name.get(&instance.name) else {
            continue;
        };
        for after_name in &addon.dependencies.load_order.after {
            for (j, other) in instances.iter().enumerate() {
                if other.name == *after_name {
                    graph.add_edge(nodes[j], nodes[i], ());
                }
            }
        }
        for before_name in &addon.dependencies.load_order.before {
            for (j, other) in instances.iter().enumerate() {
                if other.name == *before_name {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
    }

    let sorted = toposort(&graph, None).map_err(|_| Error::Cycle)?;
    Ok(sorted.into_iter().map(|n| graph[n]).collect())
}

fn check_requires_and_conflicts(addons_by_name: &HashMap<String, &Addon>, instances: &[AddonInstance]) -> Result<()> {
    let present: HashSet<&str> = instances.iter().map(|i| i.name.as_str()).collect();

    let mut seen = HashSet::new();
    for instance in instances {
        if !seen.insert((instance.name.as_str(), instance.instance_id.as_str())) {
            return DuplicateInstanceSnafu { addon: instance.name.clone(), instance_id: instance.instance_id.clone() }.fail();
        }
    }

    for instance in instances {
        let Some(addon) = addons_by_name.get(&instance.name) else {
            return UnknownAddonSnafu { addon: instance.name.clone(), instance_id: instance.instance_id.clone() }.fail();
        };
        for required in &addon.dependencies.requires {
            if !present.contains(required.as_str()) {
                return MissingRequiredSnafu { addon: addon.name.clone(), required: required.clone() }.fail();
            }
        }
        for conflicting in &addon.dependencies.conflicts_with {
            if present.contains(conflicting.as_str()) {
                return ConflictSnafu { a: addon.name.clone(), b: conflicting.clone() }.fail();
            }
        }
    }
    Ok(())
}

/// Result of composing one addon instance: any newly created resources, plus
/// the patch operations it wants applied (already gated by `patches[].condition`,
/// still carrying each patch's target selector and `forEach` expansion).
pub struct InstanceOutput {
    pub created: Vec<RenderedResource>,
    pub patches: Vec<(TargetSelector, Vec<PatchOperation>)>,
}

/// Runs one addon instance: builds its context, renders `creates`, and
/// evaluates each `patches[]` entry's gate/`forEach` (but does not apply the
/// patches — that happens once all instances' creates exist, so patches can
/// target resources created by earlier instances in load order).
#[tracing::instrument(skip_all, fields(addon = %addon.name, instance_id = %instance.instance_id))]
pub fn compose_instance(
    addon: &Addon,
    instance: &AddonInstance,
    component: &Component,
    env: Option<&EnvSettings>,
    platform: &PlatformContext,
    cache: &expr::ProgramCache,
    limits: &render::RenderLimits,
) -> Result<InstanceOutput> {
    let ctx_json =
        context::build_addon_context(addon, instance, component, env, platform).context(ContextSnafu {
            instance_id: instance.instance_id.clone(),
        })?;
    let ctx = context::to_expr_context(&ctx_json);

    let mut created = Vec::new();
    for template in &addon.creates {
        let rendered = render::render_template(template, &ctx, cache, limits).context(RenderSnafu {
            instance_id: instance.instance_id.clone(),
        })?;
        created.extend(rendered);
    }

    let mut patches = Vec::new();
    for patch in &addon.patches {
        if let Some(condition) = &patch.condition {
            let truthy = cache
                .eval(condition, &ctx)
                .context(ExprSnafu { instance_id: instance.instance_id.clone() })?
                .is_truthy();
            if !truthy {
                continue;
            }
        }
        match &patch.for_each {
            None => {
                let rendered_ops: Vec<PatchOperation> = patch
                    .operations
                    .iter()
                    .map(|op| interpolate_operation(op, &ctx, cache))
                    .collect::<std::result::Result<_, _>>()
                    .context(ExprSnafu { instance_id: instance.instance_id.clone() })?;
                patches.push((patch.target.clone(), rendered_ops));
            }
            Some(for_each) => {
                let list = cache
                    .eval(for_each, &ctx)
                    .context(ExprSnafu { instance_id: instance.instance_id.clone() })?;
                let crate::value::Value::List(items) = list else {
                    continue;
                };
                for item in items {
                    let child = ctx.bind(&patch.var, item);
                    let rendered_ops: Vec<PatchOperation> = patch
                        .operations
                        .iter()
                        .map(|op| interpolate_operation(op, &child, cache))
                        .collect::<std::result::Result<_, _>>()
                        .context(ExprSnafu { instance_id: instance.instance_id.clone() })?;
                    patches.push((patch.target.clone(), rendered_ops));
                }
            }
        }
    }

    Ok(InstanceOutput { created, patches })
}

fn interpolate_operation(op: &PatchOperation, ctx: &expr::Context, cache: &expr::ProgramCache) -> expr::eval::Result<PatchOperation> {
    let path = expr::interpolate(&op.path, ctx)?.stringify();
    let value = match &op.value {
        Some(v) => Some(interpolate_json(v, ctx, cache)?),
        None => None,
    };
    Ok(PatchOperation { op: op.op.clone(), path, value, from: op.from.clone() })
}

fn interpolate_json(value: &serde_json::Value, ctx: &expr::Context, _cache: &expr::ProgramCache) -> expr::eval::Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => expr::interpolate(s, ctx).map(|v| v.to_json()),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_json(item, ctx, _cache)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), interpolate_json(v, ctx, _cache)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Finds the resources a [`TargetSelector`] matches among already-rendered
/// resources.
pub fn find_targets<'a>(selector: &TargetSelector, resources: &'a mut [RenderedResource]) -> Vec<&'a mut RenderedResource> {
    resources
        .iter_mut()
        .filter(|r| matches_selector(selector, r))
        .collect()
}

fn matches_selector(selector: &TargetSelector, resource: &RenderedResource) -> bool {
    if let Some(kind) = &selector.kind {
        if resource.types.as_ref().and_then(|t| Some(t.kind.as_str())) != Some(kind.as_str()) {
            return false;
        }
    }
    if let Some(id) = &selector.id {
        if resource.metadata.name.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    if let Some(label_selector) = &selector.label_selector {
        let labels = resource.metadata.labels.clone().unwrap_or_default();
        if !label_selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependencies, LoadOrder, SchemaDocument};
    use std::collections::BTreeMap;

    fn addon(name: &str, dependencies: Dependencies) -> Addon {
        Addon {
            name: name.to_string(),
            schema: SchemaDocument { parameters: Default::default(), env_overrides: Default::default(), types: Default::default() },
            targets: Vec::new(),
            creates: Vec::new(),
            patches: Vec::new(),
            dependencies,
        }
    }

    fn instance(name: &str, id: &str) -> AddonInstance {
        AddonInstance { name: name.to_string(), instance_id: id.to_string(), config: serde_json::Value::Null }
    }

    #[test]
    fn orders_by_load_order_after() {
        let logging = addon("logging", Dependencies::default());
        let monitoring = addon(
            "monitoring",
            Dependencies { load_order: LoadOrder { after: vec!["logging".to_string()], before: Vec::new() }, ..Default::default() },
        );
        let by_name = HashMap::from([("logging".to_string(), &logging), ("monitoring".to_string(), &monitoring)]);
        let instances = vec![instance("monitoring", "m1"), instance("logging", "l1")];
        let order = order_instances(&by_name, &instances).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn detects_conflicting_addons() {
        let a = addon(
            "a",
            Dependencies { conflicts_with: vec!["b".to_string()], ..Default::default() },
        );
        let b = addon("b", Dependencies::default());
        let by_name = HashMap::from([("a".to_string(), &a), ("b".to_string(), &b)]);
        let instances = vec![instance("a", "a1"), instance("b", "b1")];
        assert!(matches!(order_instances(&by_name, &instances), Err(Error::Conflict { .. })));
    }

    #[test]
    fn detects_missing_required_addon() {
        let a = addon(
            "a",
            Dependencies { requires: vec!["b".to_string()], ..Default::default() },
        );
        let by_name = HashMap::from([("a".to_string(), &a)]);
        let instances = vec![instance("a", "a1")];
        assert!(matches!(order_instances(&by_name, &instances), Err(Error::MissingRequired { .. })));
    }

    #[test]
    fn detects_duplicate_instance_id() {
        let a = addon("a", Dependencies::default());
        let by_name = HashMap::from([("a".to_string(), &a)]);
        let instances = vec![instance("a", "same"), instance("a", "same")];
        assert!(matches!(order_instances(&by_name, &instances), Err(Error::DuplicateInstance { .. })));
    }

    #[test]
    fn detects_load_order_cycle() {
        let a = addon("a", Dependencies { load_order: LoadOrder { after: vec!["b".to_string()], before: Vec::new() }, ..Default::default() });
        let b = addon("b", Dependencies { load_order: LoadOrder { after: vec!["a".to_string()], before: Vec::new() }, ..Default::default() });
        let by_name = HashMap::from([("a".to_string(), &a), ("b".to_string(), &b)]);
        let instances = vec![instance("a", "a1"), instance("b", "b1")];
        assert!(matches!(order_instances(&by_name, &instances), Err(Error::Cycle)));
    }

    #[test]
    fn non_for_each_patch_still_interpolates_path_and_value() {
        let addon = Addon {
            name: "image-patch".to_string(),
            schema: SchemaDocument { parameters: Default::default(), env_overrides: Default::default(), types: Default::default() },
            targets: Vec::new(),
            creates: Vec::new(),
            patches: vec![crate::model::PatchSpec {
                target: TargetSelector::default(),
                for_each: None,
                var: "item".to_string(),
                condition: None,
                operations: vec![crate::model::PatchOperation {
                    op: crate::model::PatchOp::Replace,
                    path: "/spec/${fieldName}".to_string(),
                    value: Some(serde_json::json!("${spec.image}")),
                    from: None,
                }],
            }],
            dependencies: Dependencies::default(),
        };
        let instance = AddonInstance {
            name: "image-patch".to_string(),
            instance_id: "only".to_string(),
            config: serde_json::json!({"image": "registry/app:1", "fieldName": "image"}),
        };
        let addon_with_schema = Addon {
            schema: SchemaDocument {
                parameters: BTreeMap::from([
                    ("image".to_string(), "string | required=true".to_string()),
                    ("fieldName".to_string(), "string | required=true".to_string()),
                ]),
                env_overrides: Default::default(),
                types: Default::default(),
            },
            ..addon
        };
        let component = Component {
            metadata: crate::model::ComponentMetadata { name: "demo".to_string(), namespace: None },
            component_type: "web".to_string(),
            parameters: serde_json::Value::Null,
            addons: vec![instance.clone()],
            build: serde_json::Value::Null,
        };

        let output = compose_instance(
            &addon_with_schema,
            &instance,
            &component,
            None,
            &PlatformContext::default(),
            &expr::ProgramCache::new(),
            &render::RenderLimits::default(),
        )
        .unwrap();

        assert_eq!(output.patches.len(), 1);
        let (_, ops) = &output.patches[0];
        assert_eq!(ops[0].path, "/spec/image");
        assert_eq!(ops[0].value, Some(serde_json::json!("registry/app:1")));
    }
}
