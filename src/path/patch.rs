//! RFC-6902 patch application plus the custom `merge` operation, over the
//! extended path grammar ([`super::parse`]).
//!
//! A filter-predicate segment (`[?(@.field=='value')]`) expands into one
//! concrete pointer per matching array element: the operation is applied
//! once per match, in document index order, and zero matches is a no-op
//! rather than an error. Non-filter segments are resolved the ordinary
//! RFC-6902 way; for `add` (and `move`/`copy`/`merge`, which also write a
//! new location) a missing intermediate key is materialized as an object or
//! array depending on what the next segment looks like.

use serde_json::{Map, Value as Json};
use snafu::{ensure, OptionExt, Snafu};

use super::merge::deep_merge;
use super::parse::{self, Segment};
use crate::model::{PatchOp, PatchOperation};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid path: {source}"))]
    Path { source: parse::Error },

    #[snafu(display("path {path:?} not found"))]
    NotFound { path: String },

    #[snafu(display("path {path:?} matched {count} elements, expected exactly one"))]
    AmbiguousFilter { path: String, count: usize },

    #[snafu(display("cannot index {type_name} with {segment:?}"))]
    TypeMismatch { type_name: &'static str, segment: String },

    #[snafu(display("{op} requires a 'value'"))]
    MissingValue { op: PatchOp },

    #[snafu(display("{op} requires a 'from' pointer"))]
    MissingFrom { op: PatchOp },

    #[snafu(display("test failed at {path:?}: expected {expected}, found {found}"))]
    TestFailed { path: String, expected: Json, found: Json },

    #[snafu(display("array index {index} out of bounds (length {len})"))]
    IndexOutOfBounds { index: usize, len: usize },

    #[snafu(display("'-' (array-append) is not allowed as the path of a {op} operation"))]
    AppendDisallowed { op: PatchOp },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Applies one patch operation to `doc`, returning the number of concrete
/// locations it was applied to (0 if a filter predicate in `op.path` matched
/// no array elements — a no-op, not an error).
pub fn apply(doc: &mut Json, op: &PatchOperation) -> Result<usize> {
    reject_append_with_disallowed_op(op)?;

    let segments = parse::parse(&op.path).map_err(|source| Error::Path { source })?;
    let expanded = expand(doc, &segments);
    if expanded.is_empty() {
        return Ok(0);
    }

    for concrete in &expanded {
        apply_concrete(doc, op, concrete)?;
    }
    Ok(expanded.len())
}

fn reject_append_with_disallowed_op(op: &PatchOperation) -> Result<()> {
    let ends_in_append = op.path.rsplit('/').next() == Some("-");
    let disallowed = matches!(op.op, PatchOp::Merge | PatchOp::Replace | PatchOp::Remove);
    ensure!(!(ends_in_append && disallowed), AppendDisallowedSnafu { op: op.op.clone() });
    Ok(())
}

fn apply_concrete(doc: &mut Json, op: &PatchOperation, segments: &[Segment]) -> Result<()> {
    match op.op {
        PatchOp::Add => {
            let value = op.value.clone().context(MissingValueSnafu { op: op.op.clone() })?;
            insert_materializing(doc, segments, value, &op.path)
        }
        PatchOp::Replace => {
            let value = op.value.clone().context(MissingValueSnafu { op: op.op.clone() })?;
            let target = resolve_mut(doc, segments, &op.path)?;
            *target = value;
            Ok(())
        }
        PatchOp::Remove => {
            let Some((last, parent_segments)) = segments.split_last() else {
                *doc = Json::Null;
                return Ok(());
            };
            let parent = resolve_mut(doc, parent_segments, &op.path)?;
            remove_at(parent, last, &op.path)
        }
        PatchOp::Test => {
            let expected = op.value.clone().context(MissingValueSnafu { op: op.op.clone() })?;
            let found = resolve_mut(doc, segments, &op.path)?;
            ensure!(*found == expected, TestFailedSnafu { path: op.path.clone(), expected, found: found.clone() });
            Ok(())
        }
        PatchOp::Move => {
            let from = op.from.clone().context(MissingFromSnafu { op: op.op.clone() })?;
            let value = take_single(doc, &from)?;
            insert_materializing(doc, segments, value, &op.path)
        }
        PatchOp::Copy => {
            let from = op.from.clone().context(MissingFromSnafu { op: op.op.clone() })?;
            let value = resolve_single(doc, &from)?.clone();
            insert_materializing(doc, segments, value, &op.path)
        }
        PatchOp::Merge => {
            let value = op.value.clone().context(MissingValueSnafu { op: op.op.clone() })?;
            let target = resolve_mut_or_null_materializing(doc, segments, &op.path)?;
            let merged = deep_merge(std::mem::replace(target, Json::Null), value);
            *target = merged;
            Ok(())
        }
    }
}

/// Expands `segments` against the current state of `doc`, resolving every
/// [`Segment::Filter`] into the concrete [`Segment::Index`] values of its
/// matches. A filter segment that matches nothing (or is applied to a
/// non-array) prunes that branch; a filter matching N elements branches
/// into N concrete paths, visited in document order. Non-filter segments
/// pass through unchanged (existence is checked later,
/// by the op-specific resolver).
fn expand(doc: &Json, segments: &[Segment]) -> Vec<Vec<Segment>> {
    let mut paths: Vec<Vec<Segment>> = vec![Vec::new()];
    let mut nodes: Vec<&Json> = vec![doc];

    for segment in segments {
        let mut next_paths = Vec::new();
        let mut next_nodes = Vec::new();

        for (path, node) in paths.iter().zip(nodes.iter()) {
            match segment {
                Segment::Filter { field, value } => {
                    if let Json::Array(items) = node {
                        for (i, item) in items.iter().enumerate() {
                            if get_dotted_field(item, field) == Some(value) {
                                let mut extended = path.clone();
                                extended.push(Segment::Index(i));
                                next_paths.push(extended);
                                next_nodes.push(item);
                            }
                        }
                    }
                }
                other => {
                    let mut extended = path.clone();
                    extended.push(other.clone());
                    let child = match (other, node) {
                        (Segment::Key(key), Json::Object(map)) => map.get(key.as_str()),
                        (Segment::Index(idx), Json::Array(items)) => items.get(*idx),
                        _ => None,
                    };
                    next_paths.push(extended);
                    next_nodes.push(child.unwrap_or(&Json::Null));
                }
            }
        }

        paths = next_paths;
        nodes = next_nodes;
    }

    paths
}

/// Walks a dot-separated field path (e.g. `metadata.name`) from `item`,
/// returning the value at the end, or `None` if any intermediate key is
/// missing or not an object.
fn get_dotted_field<'a>(item: &'a Json, field: &str) -> Option<&'a Json> {
    let mut current = item;
    for part in field.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Expands `path` and requires it resolve to exactly one location (used for
/// `move`/`copy` sources, which name a single value to relocate).
fn resolve_single<'a>(doc: &'a Json, path: &str) -> Result<&'a Json> {
    let segments = parse::parse(path).map_err(|source| Error::Path { source })?;
    let expanded = expand(doc, &segments);
    ensure!(!expanded.is_empty(), NotFoundSnafu { path: path.to_string() });
    ensure!(expanded.len() == 1, AmbiguousFilterSnafu { path: path.to_string(), count: expanded.len() });
    resolve_ref(doc, &expanded[0], path)
}

fn take_single(doc: &mut Json, path: &str) -> Result<Json> {
    let value = resolve_single(doc, path)?.clone();
    let segments = parse::parse(path).map_err(|source| Error::Path { source })?;
    let expanded = expand(doc, &segments);
    let Some((last, parent_segments)) = expanded[0].split_last() else {
        *doc = Json::Null;
        return Ok(value);
    };
    let parent = resolve_mut(doc, parent_segments, path)?;
    remove_at(parent, last, path)?;
    Ok(value)
}

fn resolve_ref<'a>(doc: &'a Json, segments: &[Segment], path: &str) -> Result<&'a Json> {
    let mut current = doc;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Json::Object(map)) => {
                map.get(key.as_str()).context(NotFoundSnafu { path: path.to_string() })?
            }
            (Segment::Index(idx), Json::Array(items)) => {
                items.get(*idx).context(IndexOutOfBoundsSnafu { index: *idx, len: items.len() })?
            }
            (segment, current) => {
                return TypeMismatchSnafu { type_name: json_type_name(current), segment: format!("{segment:?}") }.fail()
            }
        };
    }
    Ok(current)
}

/// Resolves `segments` (already filter-free) to a mutable reference,
/// requiring every intermediate to already exist.
fn resolve_mut<'a>(doc: &'a mut Json, segments: &[Segment], path: &str) -> Result<&'a mut Json> {
    let mut current = doc;
    for segment in segments {
        current = step(current, segment, path)?;
    }
    Ok(current)
}

fn step<'a>(current: &'a mut Json, segment: &Segment, path: &str) -> Result<&'a mut Json> {
    match (segment, current) {
        (Segment::Key(key), Json::Object(map)) => map.get_mut(key).context(NotFoundSnafu { path: path.to_string() }),
        (Segment::Index(idx), Json::Array(items)) => {
            let len = items.len();
            items.get_mut(*idx).context(IndexOutOfBoundsSnafu { index: *idx, len })
        }
        (segment, current) => {
            TypeMismatchSnafu { type_name: json_type_name(current), segment: format!("{segment:?}") }.fail()
        }
    }
}

/// Inserts `value` at `segments`, materializing missing intermediate object
/// keys as empty objects or arrays (looking ahead to the next segment to
/// decide which) as it walks.
fn insert_materializing(doc: &mut Json, segments: &[Segment], value: Json, path: &str) -> Result<()> {
    let Some((last, parent_segments)) = segments.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = resolve_parent_materializing(doc, parent_segments, last, path)?;
    insert_at(parent, last, value, path)
}

/// Like [`insert_materializing`], but used by `merge`: the target itself is
/// created as `null` if absent (so the caller can deep-merge into it)
/// instead of requiring a `value` to insert outright.
fn resolve_mut_or_null_materializing<'a>(doc: &'a mut Json, segments: &[Segment], path: &str) -> Result<&'a mut Json> {
    let Some((last, parent_segments)) = segments.split_last() else {
        return Ok(doc);
    };
    let parent = resolve_parent_materializing(doc, parent_segments, last, path)?;
    match (last, parent) {
        (Segment::Key(key), Json::Object(map)) => Ok(map.entry(key.clone()).or_insert(Json::Null)),
        (Segment::Index(idx), Json::Array(items)) => {
            let len = items.len();
            items.get_mut(*idx).context(IndexOutOfBoundsSnafu { index: *idx, len })
        }
        (segment, parent) => {
            TypeMismatchSnafu { type_name: json_type_name(parent), segment: format!("{segment:?}") }.fail()
        }
    }
}

fn resolve_parent_materializing<'a>(
    doc: &'a mut Json,
    parent_segments: &[Segment],
    final_segment: &Segment,
    path: &str,
) -> Result<&'a mut Json> {
    let mut current = doc;
    for (i, segment) in parent_segments.iter().enumerate() {
        let next = parent_segments.get(i + 1).unwrap_or(final_segment);
        current = step_materializing(current, segment, next, path)?;
    }
    Ok(current)
}

fn step_materializing<'a>(current: &'a mut Json, segment: &Segment, next: &Segment, path: &str) -> Result<&'a mut Json> {
    if matches!(current, Json::Null) {
        *current = match segment {
            Segment::Key(_) => Json::Object(Map::new()),
            Segment::Index(_) | Segment::Append => Json::Array(Vec::new()),
            Segment::Filter { .. } => {
                return TypeMismatchSnafu { type_name: "null", segment: format!("{segment:?}") }.fail()
            }
        };
    }

    match (segment, current) {
        (Segment::Key(key), Json::Object(map)) => {
            if !map.contains_key(key.as_str()) {
                let child = match next {
                    Segment::Index(_) | Segment::Append => Json::Array(Vec::new()),
                    _ => Json::Object(Map::new()),
                };
                map.insert(key.clone(), child);
            }
            Ok(map.get_mut(key.as_str()).unwrap())
        }
        (Segment::Index(idx), Json::Array(items)) => {
            let len = items.len();
            items.get_mut(*idx).context(IndexOutOfBoundsSnafu { index: *idx, len })
        }
        (segment, current) => {
            let _ = path;
            TypeMismatchSnafu { type_name: json_type_name(current), segment: format!("{segment:?}") }.fail()
        }
    }
}

fn insert_at(parent: &mut Json, segment: &Segment, value: Json, path: &str) -> Result<()> {
    match (segment, parent) {
        (Segment::Key(key), Json::Object(map)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Segment::Append, Json::Array(items)) => {
            items.push(value);
            Ok(())
        }
        (Segment::Index(idx), Json::Array(items)) => {
            ensure!(*idx <= items.len(), IndexOutOfBoundsSnafu { index: *idx, len: items.len() });
            items.insert(*idx, value);
            Ok(())
        }
        (segment, parent) => {
            let _ = path;
            TypeMismatchSnafu { type_name: json_type_name(parent), segment: format!("{segment:?}") }.fail()
        }
    }
}

fn remove_at(parent: &mut Json, segment: &Segment, path: &str) -> Result<()> {
    match (segment, parent) {
        (Segment::Key(key), Json::Object(map)) => {
            map.remove(key).context(NotFoundSnafu { path: path.to_string() })?;
            Ok(())
        }
        (Segment::Index(idx), Json::Array(items)) => {
            ensure!(*idx < items.len(), IndexOutOfBoundsSnafu { index: *idx, len: items.len() });
            items.remove(*idx);
            Ok(())
        }
        (segment, parent) => {
            TypeMismatchSnafu { type_name: json_type_name(parent), segment: format!("{segment:?}") }.fail()
        }
    }
}

fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PatchOp;
    use serde_json::json;

    fn op(o: PatchOp, path: &str, value: Option<Json>) -> PatchOperation {
        PatchOperation { op: o, path: path.to_string(), value, from: None }
    }

    #[test]
    fn add_sets_object_key() {
        let mut doc = json!({"spec": {}});
        apply(&mut doc, &op(PatchOp::Add, "/spec/replicas", Some(json!(3)))).unwrap();
        assert_eq!(doc, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn add_appends_to_list() {
        let mut doc = json!({"items": [1, 2]});
        apply(&mut doc, &op(PatchOp::Add, "/items/-", Some(json!(3)))).unwrap();
        assert_eq!(doc, json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn add_materializes_missing_intermediate_object() {
        let mut doc = json!({});
        apply(&mut doc, &op(PatchOp::Add, "/metadata/labels/app", Some(json!("x")))).unwrap();
        assert_eq!(doc, json!({"metadata": {"labels": {"app": "x"}}}));
    }

    #[test]
    fn add_materializes_missing_intermediate_array_for_append() {
        let mut doc = json!({"containers": [{"name": "app"}]});
        apply(
            &mut doc,
            &op(PatchOp::Add, "/containers/0/env/-", Some(json!({"name": "FOO", "value": "bar"}))),
        )
        .unwrap();
        assert_eq!(doc["containers"][0]["env"], json!([{"name": "FOO", "value": "bar"}]));
    }

    #[test]
    fn remove_deletes_key() {
        let mut doc = json!({"a": 1, "b": 2});
        apply(&mut doc, &op(PatchOp::Remove, "/a", None)).unwrap();
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn filter_predicate_targets_matching_element() {
        let mut doc = json!({"containers": [{"name": "app", "image": "old"}, {"name": "sidecar", "image": "x"}]});
        apply(
            &mut doc,
            &op(PatchOp::Replace, "/containers[?(@.name=='app')]/image", Some(json!("new"))),
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"containers": [{"name": "app", "image": "new"}, {"name": "sidecar", "image": "x"}]})
        );
    }

    #[test]
    fn filter_predicate_matches_on_nested_dotted_field() {
        let mut doc = json!({"items": [
            {"metadata": {"name": "keep"}, "n": 1},
            {"metadata": {"name": "app"}, "n": 2},
        ]});
        let count = apply(
            &mut doc,
            &op(PatchOp::Replace, "/items[?(@.metadata.name=='app')]/n", Some(json!(9))),
        )
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(doc["items"][0]["n"], json!(1));
        assert_eq!(doc["items"][1]["n"], json!(9));
    }

    #[test]
    fn filter_predicate_applies_to_every_match() {
        let mut doc = json!({"items": [{"k": "v", "n": 1}, {"k": "v", "n": 2}, {"k": "other", "n": 3}]});
        let count = apply(&mut doc, &op(PatchOp::Replace, "/items[?(@.k=='v')]/n", Some(json!(9)))).unwrap();
        assert_eq!(count, 2);
        assert_eq!(doc, json!({"items": [{"k": "v", "n": 9}, {"k": "v", "n": 9}, {"k": "other", "n": 3}]}));
    }

    #[test]
    fn filter_predicate_append_targets_matching_element_only() {
        let mut doc = json!({"containers": [
            {"name": "app", "image": "x:1"},
            {"name": "sidecar", "image": "y:1"},
        ]});
        apply(
            &mut doc,
            &op(PatchOp::Add, "/containers/[?(@.name=='app')]/env/-", Some(json!({"name": "FOO", "value": "bar"}))),
        )
        .unwrap();
        assert_eq!(doc["containers"][0]["env"], json!([{"name": "FOO", "value": "bar"}]));
        assert_eq!(doc["containers"][1].get("env"), None);
    }

    #[test]
    fn no_matching_filter_element_is_a_noop() {
        let mut doc = json!({"containers": [{"name": "sidecar"}]});
        let count = apply(
            &mut doc,
            &op(PatchOp::Add, "/containers/[?(@.name=='app')]/env/-", Some(json!({"name": "FOO", "value": "bar"}))),
        )
        .unwrap();
        assert_eq!(count, 0);
        assert_eq!(doc, json!({"containers": [{"name": "sidecar"}]}));
    }

    #[test]
    fn merge_op_deep_merges_into_existing_object() {
        let mut doc = json!({"metadata": {"labels": {"a": "1"}}});
        apply(&mut doc, &op(PatchOp::Merge, "/metadata/labels", Some(json!({"b": "2"})))).unwrap();
        assert_eq!(doc, json!({"metadata": {"labels": {"a": "1", "b": "2"}}}));
    }

    #[test]
    fn merge_op_creates_absent_target() {
        let mut doc = json!({"metadata": {}});
        apply(&mut doc, &op(PatchOp::Merge, "/metadata/annotations", Some(json!({"added": "yes"})))).unwrap();
        assert_eq!(doc, json!({"metadata": {"annotations": {"added": "yes"}}}));
    }

    #[test]
    fn test_op_fails_on_mismatch() {
        let mut doc = json!({"a": 1});
        assert!(apply(&mut doc, &op(PatchOp::Test, "/a", Some(json!(2)))).is_err());
    }

    #[test]
    fn move_relocates_value() {
        let mut doc = json!({"a": {"x": 1}, "b": {}});
        apply(
            &mut doc,
            &PatchOperation { op: PatchOp::Move, path: "/b/x".to_string(), value: None, from: Some("/a/x".to_string()) },
        )
        .unwrap();
        assert_eq!(doc, json!({"a": {}, "b": {"x": 1}}));
    }

    #[test]
    fn ambiguous_filter_match_on_from_errors() {
        let mut doc = json!({"items": [{"k": "v"}, {"k": "v"}], "dest": {}});
        assert!(apply(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Copy,
                path: "/dest/x".to_string(),
                value: None,
                from: Some("/items[?(@.k=='v')]".to_string())
            }
        )
        .is_err());
    }

    #[test]
    fn append_disallowed_with_merge() {
        let mut doc = json!({"items": []});
        assert!(matches!(
            apply(&mut doc, &op(PatchOp::Merge, "/items/-", Some(json!({"a": 1})))),
            Err(Error::AppendDisallowed { .. })
        ));
    }
}
