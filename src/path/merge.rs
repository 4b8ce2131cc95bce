//! Deep-merge for JSON documents, backing the expression language's
//! `merge(m1, m2)` builtin, the patch engine's custom `merge` op, and the
//! input merger's layered precedence stack.
//!
//! Deliberately NOT Kubernetes strategic-merge-patch semantics: lists are
//! replaced wholesale rather than merged by a `patchMergeKey`. Only object
//! maps recurse.

use serde_json::{Map, Value as Json};

/// Merges `overlay` onto `base`, consuming both. `overlay` wins on every key
/// it sets; nested objects recurse; any other value (including lists)
/// replaces the base value outright.
pub fn deep_merge(base: Json, overlay: Json) -> Json {
    match (base, overlay) {
        (Json::Object(mut base_map), Json::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Json::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merges a sequence of layers left to right, later layers overriding
/// earlier ones. Used by the C4 input merger's precedence chain.
pub fn merge_layers(layers: impl IntoIterator<Item = Json>) -> Json {
    layers
        .into_iter()
        .fold(Json::Object(Map::new()), deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_recurse() {
        let base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let overlay = json!({"nested": {"y": 3, "z": 4}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"a": 1, "nested": {"x": 1, "y": 3, "z": 4}})
        );
    }

    #[test]
    fn lists_are_replaced_not_appended() {
        let base = json!({"items": [1, 2, 3]});
        let overlay = json!({"items": [9]});
        assert_eq!(deep_merge(base, overlay), json!({"items": [9]}));
    }

    #[test]
    fn merge_layers_applies_left_to_right() {
        let merged = merge_layers([json!({"a": 1}), json!({"a": 2, "b": 3}), json!({"b": 4})]);
        assert_eq!(merged, json!({"a": 2, "b": 4}));
    }
}
