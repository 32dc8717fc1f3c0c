//! Persistent document values.
//!
//! A [`Value`] is a handle to an immutable JSON-shaped tree. Every write
//! returns a new handle; subtrees the write did not touch are shared with the
//! input, and a write that changes nothing returns the original handle, so
//! "did anything change" is a pointer comparison rather than a deep diff.
//! The sync layer leans on this: rebases and patch application compare
//! snapshots by identity before firing change callbacks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use eddy_jsonpath::{ContainerKind, Probe, Scalar};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

#[derive(Debug, Clone)]
pub struct Value(Arc<Repr>);

#[derive(Debug, Clone)]
enum Repr {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn null() -> Value {
        Value(Arc::new(Repr::Null))
    }

    pub fn string(value: impl Into<String>) -> Value {
        Value(Arc::new(Repr::String(value.into())))
    }

    pub fn number(value: Number) -> Value {
        Value(Arc::new(Repr::Number(value)))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value(Arc::new(Repr::Array(items)))
    }

    pub fn object(entries: BTreeMap<String, Value>) -> Value {
        Value(Arc::new(Repr::Object(entries)))
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::null(),
            JsonValue::Bool(value) => Value(Arc::new(Repr::Bool(*value))),
            JsonValue::Number(value) => Value::number(value.clone()),
            JsonValue::String(value) => Value::string(value.clone()),
            JsonValue::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            JsonValue::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match &*self.0 {
            Repr::Null => JsonValue::Null,
            Repr::Bool(value) => JsonValue::Bool(*value),
            Repr::Number(value) => JsonValue::Number(value.clone()),
            Repr::String(value) => JsonValue::String(value.clone()),
            Repr::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Repr::Object(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Same handle, not just same content.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_null(&self) -> bool {
        matches!(&*self.0, Repr::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            Repr::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match &*self.0 {
            Repr::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().and_then(Number::as_f64)
    }

    /// Borrowing read of a string attribute, for `_id`/`_rev`-style lookups.
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        match &*self.0 {
            Repr::Object(entries) => entries.get(name).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Replace the whole value. Returns the original handle when the new
    /// content is equal to the current content.
    pub fn set(&self, new_value: &Value) -> Value {
        if self == new_value {
            self.clone()
        } else {
            new_value.clone()
        }
    }

    /// Copy-on-write element replacement. Out-of-bounds indices and
    /// non-array receivers are no-ops.
    pub fn set_index(&self, index: usize, item: Value) -> Value {
        let Repr::Array(items) = &*self.0 else {
            return self.clone();
        };
        match items.get(index) {
            None => self.clone(),
            Some(existing) if *existing == item => self.clone(),
            Some(_) => {
                let mut next = items.clone();
                next[index] = item;
                Value::array(next)
            }
        }
    }

    /// Copy-on-write attribute write, creating the attribute when absent.
    /// Non-object receivers are no-ops.
    pub fn set_attribute(&self, name: &str, item: Value) -> Value {
        let Repr::Object(entries) = &*self.0 else {
            return self.clone();
        };
        if entries.get(name).is_some_and(|existing| *existing == item) {
            return self.clone();
        }
        let mut next = entries.clone();
        next.insert(name.to_string(), item);
        Value::object(next)
    }

    pub fn unset_attribute(&self, name: &str) -> Value {
        let Repr::Object(entries) = &*self.0 else {
            return self.clone();
        };
        if !entries.contains_key(name) {
            return self.clone();
        }
        let mut next = entries.clone();
        next.remove(name);
        Value::object(next)
    }

    /// Drop the elements at the given indices, keeping the rest in order.
    pub fn unset_indices(&self, indices: &BTreeSet<usize>) -> Value {
        let Repr::Array(items) = &*self.0 else {
            return self.clone();
        };
        if !indices.iter().any(|index| *index < items.len()) {
            return self.clone();
        }
        Value::array(
            items
                .iter()
                .enumerate()
                .filter(|(index, _)| !indices.contains(index))
                .map(|(_, item)| item.clone())
                .collect(),
        )
    }

    /// Splice `items` in at `position` (clamped to the array length).
    pub fn insert_items_at(&self, position: usize, items: &[Value]) -> Value {
        let Repr::Array(existing) = &*self.0 else {
            return self.clone();
        };
        if items.is_empty() {
            return self.clone();
        }
        let position = position.min(existing.len());
        let mut next = Vec::with_capacity(existing.len() + items.len());
        next.extend_from_slice(&existing[..position]);
        next.extend_from_slice(items);
        next.extend_from_slice(&existing[position..]);
        Value::array(next)
    }

    /// Rebuild the top-level handle so the result never compares
    /// pointer-equal to `self`, even though the content is unchanged.
    /// Revision stamping uses this to make "a mutation ran" observable
    /// through identity.
    pub fn with_fresh_identity(&self) -> Value {
        Value(Arc::new((*self.0).clone()))
    }
}

fn number_eq(a: &Number, b: &Number) -> bool {
    // 1 and 1.0 are the same document value even though serde_json keeps
    // them as distinct variants.
    a.as_f64() == b.as_f64()
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (Repr::Null, Repr::Null) => true,
            (Repr::Bool(a), Repr::Bool(b)) => a == b,
            (Repr::Number(a), Repr::Number(b)) => number_eq(a, b),
            (Repr::String(a), Repr::String(b)) => a == b,
            (Repr::Array(a), Repr::Array(b)) => a == b,
            (Repr::Object(a), Repr::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq<JsonValue> for Value {
    fn eq(&self, other: &JsonValue) -> bool {
        match (&*self.0, other) {
            (Repr::Null, JsonValue::Null) => true,
            (Repr::Bool(a), JsonValue::Bool(b)) => a == b,
            (Repr::Number(a), JsonValue::Number(b)) => number_eq(a, b),
            (Repr::String(a), JsonValue::String(b)) => a == b,
            (Repr::Array(a), JsonValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (Repr::Object(a), JsonValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|w| value == w))
            }
            _ => false,
        }
    }
}

impl From<&JsonValue> for Value {
    fn from(json: &JsonValue) -> Value {
        Value::from_json(json)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Value {
        Value::from_json(&json)
    }
}

impl Probe for Value {
    fn container_kind(&self) -> ContainerKind {
        match &*self.0 {
            Repr::Array(_) => ContainerKind::Array,
            Repr::Object(_) => ContainerKind::Object,
            _ => ContainerKind::Primitive,
        }
    }

    fn length(&self) -> Option<usize> {
        match &*self.0 {
            Repr::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    fn get_index(&self, index: usize) -> Option<Value> {
        match &*self.0 {
            Repr::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    fn has_attribute(&self, name: &str) -> bool {
        match &*self.0 {
            Repr::Object(entries) => entries.contains_key(name),
            _ => false,
        }
    }

    fn get_attribute(&self, name: &str) -> Option<Value> {
        match &*self.0 {
            Repr::Object(entries) => entries.get(name).cloned(),
            _ => None,
        }
    }

    fn attribute_keys(&self) -> Vec<String> {
        match &*self.0 {
            Repr::Object(entries) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn scalar(&self) -> Option<Scalar> {
        match &*self.0 {
            Repr::Null => Some(Scalar::Null),
            Repr::Bool(value) => Some(Scalar::Bool(*value)),
            Repr::Number(value) => Some(Scalar::Number(value.as_f64().unwrap_or(f64::MAX))),
            Repr::String(value) => Some(Scalar::String(value.clone())),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &*self.0 {
            Repr::Null => serializer.serialize_unit(),
            Repr::Bool(value) => serializer.serialize_bool(*value),
            Repr::Number(value) => value.serialize(serializer),
            Repr::String(value) => serializer.serialize_str(value),
            Repr::Array(items) => serializer.collect_seq(items),
            Repr::Object(entries) => serializer.collect_map(entries),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = JsonValue::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(&json)
    }

    #[test]
    fn test_noop_set_returns_same_handle() {
        let doc = value(json!({"a": 1, "b": [1, 2]}));
        let same = value(json!({"a": 1, "b": [1, 2]}));

        let result = doc.set(&same);
        assert!(result.ptr_eq(&doc));

        let changed = doc.set(&value(json!({"a": 2})));
        assert!(!changed.ptr_eq(&doc));
    }

    #[test]
    fn test_set_attribute_shares_untouched_siblings() {
        let doc = value(json!({"a": {"x": 1}, "b": {"y": 2}}));
        let b_before = doc.get_attribute("b").unwrap();

        let next = doc.set_attribute("a", value(json!({"x": 99})));

        assert_eq!(next, json!({"a": {"x": 99}, "b": {"y": 2}}));
        assert!(next.get_attribute("b").unwrap().ptr_eq(&b_before));
    }

    #[test]
    fn test_set_attribute_equal_value_is_noop() {
        let doc = value(json!({"a": 1}));
        let result = doc.set_attribute("a", value(json!(1)));
        assert!(result.ptr_eq(&doc));
    }

    #[test]
    fn test_set_index_out_of_bounds_is_noop() {
        let doc = value(json!([1, 2]));
        let result = doc.set_index(5, value(json!(9)));
        assert!(result.ptr_eq(&doc));
    }

    #[test]
    fn test_unset_indices() {
        let doc = value(json!(["a", "b", "c", "d"]));
        let indices: BTreeSet<usize> = [1, 3].into_iter().collect();

        assert_eq!(doc.unset_indices(&indices), json!(["a", "c"]));

        let out_of_bounds: BTreeSet<usize> = [9].into_iter().collect();
        assert!(doc.unset_indices(&out_of_bounds).ptr_eq(&doc));
    }

    #[test]
    fn test_unset_attribute_missing_is_noop() {
        let doc = value(json!({"a": 1}));
        assert!(doc.unset_attribute("b").ptr_eq(&doc));
        assert_eq!(doc.unset_attribute("a"), json!({}));
    }

    #[test]
    fn test_insert_items_at() {
        let doc = value(json!(["a", "d"]));
        let items = vec![value(json!("b")), value(json!("c"))];

        assert_eq!(doc.insert_items_at(1, &items), json!(["a", "b", "c", "d"]));
        assert_eq!(doc.insert_items_at(99, &items), json!(["a", "d", "b", "c"]));

        let empty = value(json!([]));
        assert_eq!(empty.insert_items_at(0, &items), json!(["b", "c"]));
    }

    #[test]
    fn test_fresh_identity_keeps_content() {
        let doc = value(json!({"a": [1, 2, 3]}));
        let fresh = doc.with_fresh_identity();

        assert!(!fresh.ptr_eq(&doc));
        assert_eq!(fresh, doc);
        // The rebuild is shallow; children are still shared.
        assert!(fresh
            .get_attribute("a")
            .unwrap()
            .ptr_eq(&doc.get_attribute("a").unwrap()));
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert_eq!(value(json!(1)), value(json!(1.0)));
        assert_ne!(value(json!(1)), value(json!(1.5)));
    }

    #[test]
    fn test_json_round_trip() {
        let json = json!({
            "_id": "doc1",
            "title": "Hello",
            "tags": ["a", "b"],
            "meta": {"deep": {"n": 1.5, "flag": true, "none": null}},
        });
        assert_eq!(value(json.clone()).to_json(), json);
    }

    #[test]
    fn test_serde_embeds_as_plain_json() {
        let json = json!({"a": [1, "two", null], "b": true});
        let doc = value(json.clone());

        assert_eq!(serde_json::to_value(&doc).unwrap(), json);

        let back: Value = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, json);
    }
}
