//! End-to-end tests for the full render pipeline (spec §8, scenarios S1-S6).
//!
//! CTDs/Components/Addons are loaded from YAML fixtures — the shape callers
//! actually hand this crate, once an out-of-scope loader has deserialized
//! them (spec §1) — rather than constructed field-by-field, so these tests
//! exercise the same `Deserialize` impls a real caller depends on.

use component_render_engine::model::{Addon, Component, ComponentTypeDefinition, EnvSettings, PlatformContext};
use component_render_engine::pipeline::{CancellationToken, Pipeline};
use indoc::indoc;
use rstest::rstest;

fn ctd_from_yaml(yaml: &str) -> ComponentTypeDefinition {
    serde_yaml::from_str(yaml).expect("fixture CTD must parse")
}

fn component_from_yaml(yaml: &str) -> Component {
    serde_yaml::from_str(yaml).expect("fixture Component must parse")
}

fn addon_from_yaml(yaml: &str) -> Addon {
    serde_yaml::from_str(yaml).expect("fixture Addon must parse")
}

#[rstest]
#[case(3, 3)]
#[case(1, 1)]
#[case(50, 50)]
fn s1_base_deployment_renders_replicas_from_spec(#[case] max_replicas: i64, #[case] expected: i64) {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters:
            maxReplicas: "integer | required=true"
          envOverrides: {}
          types: {}
        resources:
          - id: deployment
            template:
              apiVersion: apps/v1
              kind: Deployment
              metadata:
                name: demo
              spec:
                replicas: "${spec.maxReplicas}"
    "#});
    let template = indoc! {r#"
        metadata:
          name: demo
        componentType: web-app
        parameters:
          maxReplicas: {max_replicas}
    "#};
    let component = component_from_yaml(&template.replace("{max_replicas}", &max_replicas.to_string()));

    let output = Pipeline::new()
        .render(&ctd, &component, &[], None, &PlatformContext::default(), &CancellationToken::new())
        .expect("render should succeed");

    assert_eq!(output.resources.len(), 1);
    assert_eq!(output.resources[0]["kind"], "Deployment");
    assert_eq!(output.resources[0]["spec"]["replicas"], serde_json::json!(expected));
    assert!(!output.report.has_errors());
}

#[test]
fn s2_for_each_with_custom_var_preserves_declaration_order() {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters:
            services: "[]map[string]string"
          envOverrides: {}
          types: {}
        resources:
          - id: service
            forEach: "spec.services"
            var: svc
            template:
              apiVersion: v1
              kind: Service
              metadata:
                name: "${metadata.name}-${svc.name}"
              spec:
                port: "${svc.port}"
    "#});
    let component = component_from_yaml(indoc! {r#"
        metadata:
          name: demo
        componentType: web-app
        parameters:
          services:
            - name: a
              port: 80
            - name: b
              port: 90
    "#});

    let output = Pipeline::new()
        .render(&ctd, &component, &[], None, &PlatformContext::default(), &CancellationToken::new())
        .expect("render should succeed");

    assert_eq!(output.resources.len(), 2);
    assert_eq!(output.resources[0]["metadata"]["name"], "demo-a");
    assert_eq!(output.resources[0]["spec"]["port"], serde_json::json!(80));
    assert_eq!(output.resources[1]["metadata"]["name"], "demo-b");
    assert_eq!(output.resources[1]["spec"]["port"], serde_json::json!(90));
}

fn base_deployment_ctd_with_containers() -> ComponentTypeDefinition {
    ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        resources:
          - id: deployment
            template:
              apiVersion: apps/v1
              kind: Deployment
              metadata:
                name: demo
              spec:
                template:
                  spec:
                    containers:
                      - name: app
                        image: "x:1"
                      - name: sidecar
                        image: "y:1"
    "#})
}

fn demo_component() -> Component {
    component_from_yaml(indoc! {r#"
        metadata:
          name: demo
        componentType: web-app
    "#})
}

#[test]
fn s3_patch_with_filter_targets_only_the_matching_container() {
    let ctd = base_deployment_ctd_with_containers();
    let mut component = demo_component();
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: sidecar-env
        instanceId: only
    "#}).unwrap());

    let addon = addon_from_yaml(indoc! {r#"
        name: sidecar-env
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates: []
        patches:
          - target:
              kind: Deployment
            operations:
              - op: add
                path: "/spec/template/spec/containers/[?(@.name=='app')]/env/-"
                value:
                  name: FOO
                  value: bar
        dependencies: {}
    "#});

    let output = Pipeline::new()
        .render(&ctd, &component, &[addon], None, &PlatformContext::default(), &CancellationToken::new())
        .expect("render should succeed");

    let containers = output.resources[0]["spec"]["template"]["spec"]["containers"].as_array().unwrap();
    let app = containers.iter().find(|c| c["name"] == "app").unwrap();
    let sidecar = containers.iter().find(|c| c["name"] == "sidecar").unwrap();
    assert_eq!(app["env"], serde_json::json!([{"name": "FOO", "value": "bar"}]));
    assert!(sidecar.get("env").is_none());
    assert!(!output.report.has_errors());
}

#[test]
fn s3b_patch_with_filter_matching_nothing_is_a_warning_not_an_error() {
    let ctd = base_deployment_ctd_with_containers();
    let mut component = demo_component();
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: sidecar-env
        instanceId: only
    "#}).unwrap());

    let addon = addon_from_yaml(indoc! {r#"
        name: sidecar-env
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates: []
        patches:
          - target:
              kind: Deployment
            operations:
              - op: add
                path: "/spec/template/spec/containers/[?(@.name=='nonexistent')]/env/-"
                value:
                  name: FOO
                  value: bar
        dependencies: {}
    "#});

    let output = Pipeline::new()
        .render(&ctd, &component, &[addon], None, &PlatformContext::default(), &CancellationToken::new())
        .expect("a no-match filter is a warning, not a hard error");

    assert!(!output.report.has_errors());
    assert_eq!(output.report.warnings().count(), 1);
}

#[test]
fn s4_merge_preserves_existing_annotation_keys() {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        resources:
          - id: deployment
            template:
              apiVersion: apps/v1
              kind: Deployment
              metadata:
                name: demo
                annotations:
                  existing: "true"
    "#});
    let mut component = demo_component();
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: annotator
        instanceId: only
    "#}).unwrap());

    let addon = addon_from_yaml(indoc! {r#"
        name: annotator
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates: []
        patches:
          - target:
              kind: Deployment
            operations:
              - op: merge
                path: "/metadata/annotations"
                value:
                  added: "yes"
        dependencies: {}
    "#});

    let output = Pipeline::new()
        .render(&ctd, &component, &[addon], None, &PlatformContext::default(), &CancellationToken::new())
        .expect("render should succeed");

    assert_eq!(
        output.resources[0]["metadata"]["annotations"],
        serde_json::json!({"existing": "true", "added": "yes"})
    );
}

#[test]
fn s5_env_settings_addon_override_reaches_the_addon_instance_context() {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        resources: []
    "#});
    let mut component = demo_component();
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: pvc
        instanceId: data
    "#}).unwrap());

    let addon = addon_from_yaml(indoc! {r#"
        name: pvc
        schema:
          parameters:
            size: "string | default=10Gi"
          envOverrides:
            size: "string"
          types: {}
        targets: []
        creates:
          - id: claim
            template:
              apiVersion: v1
              kind: PersistentVolumeClaim
              metadata:
                name: "${metadata.name}-${instanceId}"
              spec:
                resources:
                  requests:
                    storage: "${spec.size}"
        patches: []
        dependencies: {}
    "#});

    let env: EnvSettings = serde_yaml::from_str(indoc! {r#"
        owner:
          componentName: demo
        environment: prod
        overrides: {}
        addonOverrides:
          pvc:
            data:
              size: 200Gi
    "#})
    .unwrap();

    let output = Pipeline::new()
        .render(&ctd, &component, &[addon], Some(&env), &PlatformContext::default(), &CancellationToken::new())
        .expect("render should succeed");

    assert_eq!(output.resources.len(), 1);
    assert_eq!(output.resources[0]["kind"], "PersistentVolumeClaim");
    assert_eq!(output.resources[0]["spec"]["resources"]["requests"]["storage"], "200Gi");
}

#[test]
fn s6_addons_declared_out_of_order_are_composed_in_dependency_order() {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        resources: []
    "#});
    let mut component = demo_component();
    // Declared b, a — b depends on a via loadOrder.after, so a must run first.
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: b
        instanceId: only
    "#}).unwrap());
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: a
        instanceId: only
    "#}).unwrap());

    let addon_a = addon_from_yaml(indoc! {r#"
        name: a
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates:
          - id: marker
            template:
              apiVersion: v1
              kind: ConfigMap
              metadata:
                name: from-a
        patches: []
        dependencies: {}
    "#});
    let addon_b = addon_from_yaml(indoc! {r#"
        name: b
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates:
          - id: marker
            template:
              apiVersion: v1
              kind: ConfigMap
              metadata:
                name: from-b
        patches: []
        dependencies:
          loadOrder:
            after: [a]
    "#});

    let output = Pipeline::new()
        .render(
            &ctd,
            &component,
            &[addon_a, addon_b],
            None,
            &PlatformContext::default(),
            &CancellationToken::new(),
        )
        .expect("render should succeed");

    assert_eq!(output.resources.len(), 2);
    assert_eq!(output.resources[0]["metadata"]["name"], "from-a");
    assert_eq!(output.resources[1]["metadata"]["name"], "from-b");
}

#[test]
fn duplicate_instance_id_is_rejected_before_any_resource_is_rendered() {
    let ctd = ctd_from_yaml(indoc! {r#"
        name: web-app
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        resources: []
    "#});
    let mut component = demo_component();
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: a
        instanceId: same
    "#}).unwrap());
    component.addons.push(serde_yaml::from_str(indoc! {r#"
        name: a
        instanceId: same
    "#}).unwrap());

    let addon_a = addon_from_yaml(indoc! {r#"
        name: a
        schema:
          parameters: {}
          envOverrides: {}
          types: {}
        targets: []
        creates: []
        patches: []
        dependencies: {}
    "#});

    let result = Pipeline::new().render(
        &ctd,
        &component,
        &[addon_a],
        None,
        &PlatformContext::default(),
        &CancellationToken::new(),
    );
    assert!(result.is_err());
}
