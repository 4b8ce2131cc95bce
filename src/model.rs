//! The data model shared by every pipeline stage: component type
//! definitions, addons, components, environment settings, and the platform
//! context the caller injects.
//!
//! These types are pure data — `Deserialize`d by the external parser layer
//! and handed to [`crate::render`] already typed. `JsonSchema` is derived
//! throughout so that layer can generate a schema for the documents it
//! loads without this crate knowing anything about YAML or JSON Schema
//! itself.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The simple-schema DSL document: a mapping from field name to a leaf
/// token string, plus any named custom types. Parsing this into a
/// [`crate::schema::CompiledSchema`] is `schema`'s job; this type only
/// carries the raw, still-textual declarations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchemaDocument {
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, rename = "envOverrides")]
    pub env_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub types: BTreeMap<String, BTreeMap<String, String>>,
}

/// A single resource template: a document tree with embedded expressions,
/// optionally instantiated once per element of a `forEach` sequence and
/// gated by a condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceTemplate {
    pub id: String,
    pub template: Json,
    #[serde(default, rename = "forEach")]
    pub for_each: Option<String>,
    #[serde(default = "default_var")]
    pub var: String,
    #[serde(default, rename = "includeWhen")]
    pub include_when: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl ResourceTemplate {
    /// `includeWhen` and `condition` are accepted as synonyms; a template
    /// declaring both is not forbidden, both must hold.
    pub fn gate_expressions(&self) -> impl Iterator<Item = &str> {
        self.include_when
            .iter()
            .chain(self.condition.iter())
            .map(String::as_str)
    }
}

fn default_var() -> String {
    "item".to_string()
}

/// A target selector narrowing which resources a patch or addon applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TargetSelector {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "containerName")]
    pub container_name: Option<String>,
    #[serde(default, rename = "labelSelector")]
    pub label_selector: Option<BTreeMap<String, String>>,
}

/// A single patch operation, matching the RFC-6902 vocabulary plus `merge`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
    Test,
    Move,
    Copy,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: Option<Json>,
    /// Source pointer for `move`/`copy`.
    #[serde(default)]
    pub from: Option<String>,
}

/// An ordered set of operations applied to resources matching `target`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchSpec {
    pub target: TargetSelector,
    #[serde(default, rename = "forEach")]
    pub for_each: Option<String>,
    #[serde(default = "default_var")]
    pub var: String,
    #[serde(default)]
    pub condition: Option<String>,
    pub operations: Vec<PatchOperation>,
}

/// Ordering constraints between addon instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LoadOrder {
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Dependencies {
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, rename = "conflictsWith")]
    pub conflicts_with: Vec<String>,
    #[serde(default, rename = "loadOrder")]
    pub load_order: LoadOrder,
}

/// A platform-engineer-authored base archetype.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComponentTypeDefinition {
    pub name: String,
    pub schema: SchemaDocument,
    pub resources: Vec<ResourceTemplate>,
}

/// A reusable composable augmentation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Addon {
    pub name: String,
    pub schema: SchemaDocument,
    #[serde(default)]
    pub targets: Vec<TargetSelector>,
    #[serde(default)]
    pub creates: Vec<ResourceTemplate>,
    #[serde(default)]
    pub patches: Vec<PatchSpec>,
    #[serde(default)]
    pub dependencies: Dependencies,
}

/// One use of an addon within a [`Component`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddonInstance {
    pub name: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(default)]
    pub config: Json,
}

/// Metadata every Component carries, injected into both component- and
/// addon-scope contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ComponentMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A developer-authored instance of a [`ComponentTypeDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Component {
    pub metadata: ComponentMetadata,
    #[serde(rename = "componentType")]
    pub component_type: String,
    #[serde(default)]
    pub parameters: Json,
    #[serde(default)]
    pub addons: Vec<AddonInstance>,
    /// Opaque platform-populated build context; merged verbatim under the
    /// reserved `build` key, same as [`PlatformContext::build`].
    #[serde(default)]
    pub build: Json,
}

/// Per-environment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EnvSettingsOwner {
    #[serde(rename = "componentName")]
    pub component_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnvSettings {
    #[serde(default)]
    pub owner: EnvSettingsOwner,
    pub environment: String,
    #[serde(default)]
    pub overrides: Json,
    #[serde(default, rename = "addonOverrides")]
    pub addon_overrides: BTreeMap<String, BTreeMap<String, Json>>,
}

/// Caller-supplied injected context.
///
/// Missing `secrets`/`configurations` default to empty structures rather
/// than raising, so templates that use `has(...)` against these subtrees
/// behave uniformly whether or not the caller populated them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlatformContext {
    #[serde(default)]
    pub build: Json,
    #[serde(default, rename = "podSelectors")]
    pub pod_selectors: Json,
    #[serde(default)]
    pub configurations: Json,
    #[serde(default)]
    pub secrets: Json,
}

/// A fully-resolved Kubernetes resource document. Wraps [`DynamicObject`]
/// so `apiVersion`/`kind`/`metadata.name` are strongly typed while the rest
/// of the document stays an arbitrary JSON tree, matching how this crate
/// already treats dynamic resources in its merge/patch helpers.
pub type RenderedResource = DynamicObject;
