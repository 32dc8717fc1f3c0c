//! Patch verbs and the driver that applies them to a document.
//!
//! A [`Patch`] is the wire shape: a document id plus any combination of the
//! seven verbs, each mapping path strings to arguments. [`Patcher`] parses
//! the paths once and applies the verbs in their fixed order (set,
//! setIfMissing, unset, diffMatchPatch, inc, dec, insert) by running a
//! matcher over the document and handing resolved targets to each operator.

use std::collections::{BTreeMap, BTreeSet};

use eddy_jsonpath::{
    parse, resolve_bounds, resolve_index, ContainerKind, Expr, Matcher, Probe,
};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use tracing::debug;

use crate::dmp::{self, Hunk};
use crate::error::{PatchError, PatchResult};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<BTreeMap<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_if_missing: Option<BTreeMap<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unset: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_match_patch: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inc: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert: Option<InsertSpec>,
}

/// Insert location and payload. Exactly one of `before`/`after`/`replace`
/// must carry the position path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    pub items: Vec<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertLocation {
    Before,
    After,
    Replace,
}

/// One verb bound to its argument, ready to receive matcher targets.
#[derive(Debug, Clone)]
enum Operator {
    Set { value: Value },
    SetIfMissing { value: Value },
    Unset,
    DiffMatchPatch { hunks: Vec<Hunk> },
    Inc { delta: f64 },
    Dec { delta: f64 },
    Insert { location: InsertLocation, items: Vec<Value> },
}

/// Applies one parsed patch to documents.
#[derive(Debug, Clone)]
pub struct Patcher {
    id: String,
    operations: Vec<(Expr, Operator)>,
}

impl Patcher {
    /// Parse every path and verb argument up front, so a malformed patch
    /// fails before anything touches a document.
    pub fn new(patch: &Patch) -> PatchResult<Patcher> {
        let mut operations = Vec::new();
        if let Some(assignments) = &patch.set {
            for (path, value) in assignments {
                operations.push((
                    parse_path(path)?,
                    Operator::Set {
                        value: Value::from_json(value),
                    },
                ));
            }
        }
        if let Some(assignments) = &patch.set_if_missing {
            for (path, value) in assignments {
                operations.push((
                    parse_path(path)?,
                    Operator::SetIfMissing {
                        value: Value::from_json(value),
                    },
                ));
            }
        }
        if let Some(paths) = &patch.unset {
            for path in paths {
                operations.push((parse_path(path)?, Operator::Unset));
            }
        }
        if let Some(patches) = &patch.diff_match_patch {
            for (path, body) in patches {
                operations.push((
                    parse_path(path)?,
                    Operator::DiffMatchPatch {
                        hunks: dmp::parse(body)?,
                    },
                ));
            }
        }
        if let Some(deltas) = &patch.inc {
            for (path, delta) in deltas {
                operations.push((parse_path(path)?, Operator::Inc { delta: *delta }));
            }
        }
        if let Some(deltas) = &patch.dec {
            for (path, delta) in deltas {
                operations.push((parse_path(path)?, Operator::Dec { delta: *delta }));
            }
        }
        if let Some(spec) = &patch.insert {
            let (location, path) = insert_location(spec)?;
            operations.push((
                parse_path(path)?,
                Operator::Insert {
                    location,
                    items: spec.items.iter().map(Value::from_json).collect(),
                },
            ));
        }
        Ok(Patcher {
            id: patch.id.clone(),
            operations,
        })
    }

    /// Apply to a document. A patch addressed to another document id returns
    /// the document handle unchanged; a document without an `_id` cannot be
    /// patched at all.
    pub fn apply(&self, document: &Value) -> PatchResult<Value> {
        let Some(id) = document.attribute_str("_id") else {
            return Err(PatchError::MissingDocumentId);
        };
        if id != self.id {
            debug!(document = id, patch = %self.id, "patch targets another document, ignoring");
            return Ok(document.clone());
        }
        let mut current = document.clone();
        for (path, operator) in &self.operations {
            let matcher = Matcher::from_expr(path);
            current = apply_matcher(&matcher, &current, operator)?;
        }
        Ok(current)
    }
}

fn parse_path(path: &str) -> PatchResult<Expr> {
    parse(path).map_err(|source| PatchError::invalid_path(path, source))
}

fn insert_location(spec: &InsertSpec) -> PatchResult<(InsertLocation, &str)> {
    match (&spec.before, &spec.after, &spec.replace) {
        (Some(path), None, None) => Ok((InsertLocation::Before, path)),
        (None, Some(path), None) => Ok((InsertLocation::After, path)),
        (None, None, Some(path)) => Ok((InsertLocation::Replace, path)),
        _ => Err(PatchError::AmbiguousInsertLocation),
    }
}

/// Follow leads depth-first, recomposing each rewritten child into its
/// parent, then let the operator consume any targets delivered at this
/// level. Missing attributes prune their lead; a patch never creates the
/// intermediate steps of a path.
fn apply_matcher(matcher: &Matcher, value: &Value, operator: &Operator) -> PatchResult<Value> {
    let result = matcher.match_probe(value);
    let mut current = value.clone();

    for lead in &result.leads {
        match &lead.target {
            Expr::Attribute { name } => {
                if let Some(child) = current.get_attribute(name) {
                    let rewritten = apply_matcher(&lead.matcher, &child, operator)?;
                    if !rewritten.ptr_eq(&child) {
                        current = current.set_attribute(name, rewritten);
                    }
                }
            }
            Expr::Index { .. } | Expr::Range { .. } => {
                let length = current.length().unwrap_or(0);
                for index in lead.target.to_indices(length) {
                    if let Some(child) = current.get_index(index) {
                        let rewritten = apply_matcher(&lead.matcher, &child, operator)?;
                        if !rewritten.ptr_eq(&child) {
                            current = current.set_index(index, rewritten);
                        }
                    }
                }
            }
            Expr::This => {
                current = apply_matcher(&lead.matcher, &current, operator)?;
            }
            _ => {}
        }
    }

    if let Some(targets) = result.targets {
        current = apply_operator(operator, &targets, &current)?;
    }
    Ok(current)
}

fn apply_operator(operator: &Operator, targets: &[Expr], accessor: &Value) -> PatchResult<Value> {
    match operator {
        Operator::Set { value } => Ok(apply_set(targets, accessor, value)),
        Operator::SetIfMissing { value } => apply_set_if_missing(targets, accessor, value),
        Operator::Unset => apply_unset(targets, accessor),
        Operator::DiffMatchPatch { hunks } => apply_dmp(targets, accessor, hunks),
        Operator::Inc { delta } => Ok(apply_inc(targets, accessor, *delta)),
        Operator::Dec { delta } => Ok(apply_inc(targets, accessor, -*delta)),
        Operator::Insert { location, items } => {
            apply_insert(targets, accessor, *location, items)
        }
    }
}

fn apply_set(targets: &[Expr], accessor: &Value, value: &Value) -> Value {
    let mut current = accessor.clone();
    for target in targets {
        match target {
            Expr::This => current = current.set(value),
            Expr::Attribute { name } => {
                current = set_attribute_splitting(&current, name, value.clone());
            }
            Expr::Index { .. } | Expr::Range { .. } => {
                let length = current.length().unwrap_or(0);
                for index in target.to_indices(length) {
                    current = current.set_index(index, value.clone());
                }
            }
            _ => {}
        }
    }
    current
}

/// Setting an attribute of a primitive replaces it with `{name: value}`.
/// Arrays cannot grow attributes, so those writes fall away.
fn set_attribute_splitting(current: &Value, name: &str, value: Value) -> Value {
    match current.container_kind() {
        ContainerKind::Object => current.set_attribute(name, value),
        ContainerKind::Primitive => {
            let mut entries = BTreeMap::new();
            entries.insert(name.to_string(), value);
            Value::object(entries)
        }
        ContainerKind::Array => current.clone(),
    }
}

fn apply_set_if_missing(targets: &[Expr], accessor: &Value, value: &Value) -> PatchResult<Value> {
    let mut current = accessor.clone();
    for target in targets {
        match target {
            Expr::Attribute { name } => match current.container_kind() {
                ContainerKind::Object => {
                    let missing = current
                        .get_attribute(name)
                        .map_or(true, |existing| existing.is_null());
                    if missing {
                        current = current.set_attribute(name, value.clone());
                    }
                }
                ContainerKind::Primitive => {
                    current = set_attribute_splitting(&current, name, value.clone());
                }
                ContainerKind::Array => {}
            },
            Expr::This => {
                if current.is_null() {
                    current = value.clone();
                }
            }
            Expr::Index { .. } | Expr::Range { .. } => {
                return Err(PatchError::incompatible_target("setIfMissing", "array index"));
            }
            _ => {}
        }
    }
    Ok(current)
}

fn apply_unset(targets: &[Expr], accessor: &Value) -> PatchResult<Value> {
    match accessor.container_kind() {
        ContainerKind::Array => {
            let length = accessor.length().unwrap_or(0);
            let mut indices = BTreeSet::new();
            for target in targets {
                if matches!(target, Expr::Index { .. } | Expr::Range { .. }) {
                    indices.extend(target.to_indices(length));
                }
            }
            Ok(accessor.unset_indices(&indices))
        }
        ContainerKind::Object => {
            let mut current = accessor.clone();
            for target in targets {
                if let Expr::Attribute { name } = target {
                    current = current.unset_attribute(name);
                }
            }
            Ok(current)
        }
        ContainerKind::Primitive => Err(PatchError::incompatible_target("unset", "primitive")),
    }
}

fn apply_dmp(targets: &[Expr], accessor: &Value, hunks: &[Hunk]) -> PatchResult<Value> {
    let mut current = accessor.clone();
    for target in targets {
        match target {
            Expr::This => {
                if let Some(text) = current.as_str() {
                    current = Value::string(dmp::apply(hunks, text));
                }
            }
            Expr::Attribute { name } => {
                if current.container_kind() == ContainerKind::Primitive {
                    return Err(PatchError::incompatible_target("diffMatchPatch", "primitive"));
                }
                if let Some(existing) = current.get_attribute(name) {
                    match existing.as_str() {
                        Some(text) => {
                            current =
                                current.set_attribute(name, Value::string(dmp::apply(hunks, text)));
                        }
                        None => {
                            debug!(
                                attribute = name.as_str(),
                                "diffMatchPatch target is not a string, skipping"
                            );
                        }
                    }
                }
            }
            Expr::Index { .. } | Expr::Range { .. } => {
                if current.container_kind() == ContainerKind::Primitive {
                    return Err(PatchError::incompatible_target("diffMatchPatch", "primitive"));
                }
                let length = current.length().unwrap_or(0);
                for index in target.to_indices(length) {
                    if let Some(existing) = current.get_index(index) {
                        if let Some(text) = existing.as_str() {
                            current =
                                current.set_index(index, Value::string(dmp::apply(hunks, text)));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(current)
}

fn apply_inc(targets: &[Expr], accessor: &Value, delta: f64) -> Value {
    let mut current = accessor.clone();
    for target in targets {
        match target {
            Expr::Attribute { name } => {
                if let Some(existing) = current.get_attribute(name) {
                    if let Some(next) = add_delta(&existing, delta) {
                        current = current.set_attribute(name, next);
                    }
                }
            }
            Expr::Index { .. } | Expr::Range { .. } => {
                let length = current.length().unwrap_or(0);
                for index in target.to_indices(length) {
                    if let Some(existing) = current.get_index(index) {
                        if let Some(next) = add_delta(&existing, delta) {
                            current = current.set_index(index, next);
                        }
                    }
                }
            }
            Expr::This => {
                if let Some(next) = add_delta(&current, delta) {
                    current = next;
                }
            }
            _ => {}
        }
    }
    current
}

/// Numeric add that keeps whole numbers whole, so `2 + 1` prints as `3`
/// rather than `3.0`. Non-numbers and non-finite results yield `None` and
/// the slot is left unchanged.
fn add_delta(value: &Value, delta: f64) -> Option<Value> {
    let number = value.as_number()?;
    if let (Some(current), Some(whole)) = (number.as_i64(), f64_to_i64(delta)) {
        if let Some(sum) = current.checked_add(whole) {
            return Some(Value::number(Number::from(sum)));
        }
    }
    let sum = number.as_f64()? + delta;
    Number::from_f64(sum).map(Value::number)
}

fn f64_to_i64(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64)
        .then_some(value as i64)
}

fn apply_insert(
    targets: &[Expr],
    accessor: &Value,
    location: InsertLocation,
    items: &[Value],
) -> PatchResult<Value> {
    if accessor.container_kind() != ContainerKind::Array {
        return Err(PatchError::incompatible_target("insert", "non-array"));
    }
    let length = accessor.length().unwrap_or(0);

    let mut remove: BTreeSet<usize> = BTreeSet::new();
    let mut min_start: Option<usize> = None;
    let mut max_end: Option<usize> = None;
    for target in targets {
        let (from, to) = match target {
            Expr::Index { value } => match resolve_index(*value, length) {
                Some(index) => (index, index + 1),
                None => continue,
            },
            // A zero-length range holds no elements but still pins the
            // insertion point.
            Expr::Range { start, end, .. } => resolve_bounds(*start, *end, length),
            _ => continue,
        };
        remove.extend(target.to_indices(length));
        min_start = Some(min_start.map_or(from, |p| p.min(from)));
        max_end = Some(max_end.map_or(to, |p| p.max(to)));
    }

    let position = match location {
        InsertLocation::Before | InsertLocation::Replace => min_start,
        InsertLocation::After => max_end,
    };
    let position = match position {
        Some(position) => position,
        // Any position of an empty array is the front.
        None if length == 0 => 0,
        None => return Ok(accessor.clone()),
    };

    match location {
        InsertLocation::Before | InsertLocation::After => {
            Ok(accessor.insert_items_at(position, items))
        }
        // Every removed index sits at or after the span minimum, so the
        // insertion point is unaffected by the removal.
        InsertLocation::Replace => Ok(accessor.unset_indices(&remove).insert_items_at(position, items)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Value {
        Value::from_json(&json)
    }

    fn patched(document: serde_json::Value, patch: Patch) -> Value {
        Patcher::new(&patch).unwrap().apply(&doc(document)).unwrap()
    }

    fn set_patch(id: &str, path: &str, value: serde_json::Value) -> Patch {
        Patch {
            id: id.to_string(),
            set: Some([(path.to_string(), value)].into_iter().collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_set_nested_attribute() {
        let result = patched(
            json!({"_id": "a", "title": {"en": "Hello"}}),
            set_patch("a", "title.en", json!("Hi")),
        );
        assert_eq!(result, json!({"_id": "a", "title": {"en": "Hi"}}));
    }

    #[test]
    fn test_set_creates_final_attribute_only() {
        let result = patched(
            json!({"_id": "a"}),
            set_patch("a", "title", json!("Hello")),
        );
        assert_eq!(result, json!({"_id": "a", "title": "Hello"}));

        // Intermediate steps are never created.
        let document = doc(json!({"_id": "a"}));
        let untouched = Patcher::new(&set_patch("a", "deep.er.path", json!(1)))
            .unwrap()
            .apply(&document)
            .unwrap();
        assert!(untouched.ptr_eq(&document));
    }

    #[test]
    fn test_set_splits_primitive() {
        let result = patched(
            json!({"_id": "a", "num": 5}),
            set_patch("a", "num.label", json!("five")),
        );
        assert_eq!(result, json!({"_id": "a", "num": {"label": "five"}}));
    }

    #[test]
    fn test_set_array_elements_by_range() {
        let result = patched(
            json!({"_id": "a", "items": [1, 2, 3, 4]}),
            set_patch("a", "items[1:3]", json!(0)),
        );
        assert_eq!(result, json!({"_id": "a", "items": [1, 0, 0, 4]}));
    }

    #[test]
    fn test_set_by_constraint() {
        let result = patched(
            json!({"_id": "a", "rows": [
                {"_key": "x", "done": false},
                {"_key": "y", "done": false},
            ]}),
            set_patch("a", "rows[_key == \"y\"].done", json!(true)),
        );
        assert_eq!(
            result,
            json!({"_id": "a", "rows": [
                {"_key": "x", "done": false},
                {"_key": "y", "done": true},
            ]})
        );
    }

    #[test]
    fn test_foreign_id_is_ignored() {
        let document = doc(json!({"_id": "a", "title": "Hello"}));
        let result = Patcher::new(&set_patch("other", "title", json!("Hi")))
            .unwrap()
            .apply(&document)
            .unwrap();
        assert!(result.ptr_eq(&document));
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let document = doc(json!({"title": "Hello"}));
        let result = Patcher::new(&set_patch("a", "title", json!("Hi")))
            .unwrap()
            .apply(&document);
        assert_eq!(result, Err(PatchError::MissingDocumentId));
    }

    #[test]
    fn test_set_if_missing() {
        let patch = Patch {
            id: "a".to_string(),
            set_if_missing: Some(
                [
                    ("existing".to_string(), json!("ignored")),
                    ("empty".to_string(), json!("filled")),
                    ("fresh".to_string(), json!("created")),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };
        let result = patched(json!({"_id": "a", "existing": "kept", "empty": null}), patch);
        assert_eq!(
            result,
            json!({"_id": "a", "existing": "kept", "empty": "filled", "fresh": "created"})
        );
    }

    #[test]
    fn test_set_if_missing_rejects_indices() {
        let patch = Patch {
            id: "a".to_string(),
            set_if_missing: Some([("items[0]".to_string(), json!(1))].into_iter().collect()),
            ..Default::default()
        };
        let result = Patcher::new(&patch)
            .unwrap()
            .apply(&doc(json!({"_id": "a", "items": [null]})));
        assert!(matches!(
            result,
            Err(PatchError::IncompatibleTarget { verb: "setIfMissing", .. })
        ));
    }

    #[test]
    fn test_unset_attribute_and_elements() {
        let patch = Patch {
            id: "a".to_string(),
            unset: Some(vec!["legacy".to_string(), "items[0,2]".to_string()]),
            ..Default::default()
        };
        let result = patched(
            json!({"_id": "a", "legacy": true, "items": ["a", "b", "c"]}),
            patch,
        );
        assert_eq!(result, json!({"_id": "a", "items": ["b"]}));
    }

    #[test]
    fn test_unset_missing_attribute_is_noop() {
        let document = doc(json!({"_id": "a"}));
        let patch = Patch {
            id: "a".to_string(),
            unset: Some(vec!["ghost".to_string()]),
            ..Default::default()
        };
        let result = Patcher::new(&patch).unwrap().apply(&document).unwrap();
        assert!(result.ptr_eq(&document));
    }

    #[test]
    fn test_unset_on_primitive_is_an_error() {
        let patch = Patch {
            id: "a".to_string(),
            unset: Some(vec!["num.label".to_string()]),
            ..Default::default()
        };
        let result = Patcher::new(&patch)
            .unwrap()
            .apply(&doc(json!({"_id": "a", "num": 5})));
        assert!(matches!(
            result,
            Err(PatchError::IncompatibleTarget { verb: "unset", .. })
        ));
    }

    #[test]
    fn test_inc_and_dec() {
        let patch = Patch {
            id: "a".to_string(),
            inc: Some([("count".to_string(), 2.0)].into_iter().collect()),
            dec: Some([("score".to_string(), 0.5)].into_iter().collect()),
            ..Default::default()
        };
        let result = patched(json!({"_id": "a", "count": 1, "score": 2.0}), patch);
        assert_eq!(result, json!({"_id": "a", "count": 3, "score": 1.5}));
    }

    #[test]
    fn test_inc_skips_non_numbers() {
        let patch = Patch {
            id: "a".to_string(),
            inc: Some(
                [
                    ("title".to_string(), 1.0),
                    ("missing".to_string(), 1.0),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };
        let document = doc(json!({"_id": "a", "title": "text"}));
        let result = Patcher::new(&patch).unwrap().apply(&document).unwrap();
        assert!(result.ptr_eq(&document));
    }

    #[test]
    fn test_insert_before_and_after() {
        let before = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                before: Some("items[1]".to_string()),
                items: vec![json!("!")],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "items": ["a", "b", "c"]}), before),
            json!({"_id": "a", "items": ["a", "!", "b", "c"]})
        );

        let after = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                after: Some("items[-1]".to_string()),
                items: vec![json!("!")],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "items": ["a", "b", "c"]}), after),
            json!({"_id": "a", "items": ["a", "b", "c", "!"]})
        );
    }

    #[test]
    fn test_insert_into_empty_array() {
        let patch = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                before: Some("items[0]".to_string()),
                items: vec![json!(1), json!(2)],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "items": []}), patch),
            json!({"_id": "a", "items": [1, 2]})
        );
    }

    #[test]
    fn test_insert_replace_span() {
        let patch = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                replace: Some("items[1:3]".to_string()),
                items: vec![json!("!"), json!("?")],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "items": ["a", "b", "c", "d"]}), patch),
            json!({"_id": "a", "items": ["a", "!", "?", "d"]})
        );
    }

    #[test]
    fn test_insert_requires_exactly_one_location() {
        let patch = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                before: Some("items[0]".to_string()),
                after: Some("items[0]".to_string()),
                items: vec![json!(1)],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            Patcher::new(&patch).err(),
            Some(PatchError::AmbiguousInsertLocation)
        );
    }

    #[test]
    fn test_insert_into_non_array_is_an_error() {
        let patch = Patch {
            id: "a".to_string(),
            insert: Some(InsertSpec {
                before: Some("meta[0]".to_string()),
                items: vec![json!(1)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = Patcher::new(&patch)
            .unwrap()
            .apply(&doc(json!({"_id": "a", "meta": {"x": 1}})));
        assert!(matches!(
            result,
            Err(PatchError::IncompatibleTarget { verb: "insert", .. })
        ));
    }

    #[test]
    fn test_diff_match_patch_rewrites_string() {
        let body = dmp::make("The quick brown fox", "The quick red fox");
        let patch = Patch {
            id: "a".to_string(),
            diff_match_patch: Some([("title".to_string(), body)].into_iter().collect()),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "title": "The quick brown fox"}), patch),
            json!({"_id": "a", "title": "The quick red fox"})
        );
    }

    #[test]
    fn test_diff_match_patch_skips_non_string_target() {
        let body = dmp::make("a", "b");
        let patch = Patch {
            id: "a".to_string(),
            diff_match_patch: Some([("count".to_string(), body)].into_iter().collect()),
            ..Default::default()
        };
        let document = doc(json!({"_id": "a", "count": 7}));
        let result = Patcher::new(&patch).unwrap().apply(&document).unwrap();
        assert!(result.ptr_eq(&document));
    }

    #[test]
    fn test_malformed_diff_fails_at_construction() {
        let patch = Patch {
            id: "a".to_string(),
            diff_match_patch: Some(
                [("title".to_string(), "garbage".to_string())].into_iter().collect(),
            ),
            ..Default::default()
        };
        assert!(matches!(
            Patcher::new(&patch),
            Err(PatchError::MalformedDiff { .. })
        ));
    }

    #[test]
    fn test_verbs_apply_in_fixed_order() {
        // set runs before unset, so the attribute set here is removed again.
        let patch = Patch {
            id: "a".to_string(),
            set: Some([("n".to_string(), json!(1))].into_iter().collect()),
            unset: Some(vec!["n".to_string()]),
            ..Default::default()
        };
        assert_eq!(patched(json!({"_id": "a"}), patch), json!({"_id": "a"}));

        // inc sees the array before insert splices into it.
        let patch = Patch {
            id: "a".to_string(),
            inc: Some([("items[0]".to_string(), 10.0)].into_iter().collect()),
            insert: Some(InsertSpec {
                before: Some("items[0]".to_string()),
                items: vec![json!(0)],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            patched(json!({"_id": "a", "items": [1, 2]}), patch),
            json!({"_id": "a", "items": [0, 11, 2]})
        );
    }

    #[test]
    fn test_recursive_unset() {
        let patch = Patch {
            id: "a".to_string(),
            unset: Some(vec!["..legacy".to_string()]),
            ..Default::default()
        };
        let result = patched(
            json!({"_id": "a", "legacy": 1, "nested": {"legacy": 2, "keep": 3}}),
            patch,
        );
        assert_eq!(result, json!({"_id": "a", "nested": {"keep": 3}}));
    }

    #[test]
    fn test_wire_shape_round_trip() {
        let json = json!({
            "id": "doc1",
            "set": {"title": "Hello"},
            "setIfMissing": {"meta": {}},
            "unset": ["legacy"],
            "diffMatchPatch": {"body": "@@ -1 +1 @@\n-a\n+b\n"},
            "inc": {"count": 1.0},
            "insert": {"after": "items[-1]", "items": [1, 2]},
        });
        let patch: Patch = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(patch.id, "doc1");
        assert_eq!(patch.set_if_missing.as_ref().unwrap().len(), 1);
        assert_eq!(
            patch.insert.as_ref().unwrap().after.as_deref(),
            Some("items[-1]")
        );
        assert_eq!(serde_json::to_value(&patch).unwrap(), json);
    }
}
