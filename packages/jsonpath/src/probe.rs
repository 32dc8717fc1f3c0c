//! Read-only structural access to tree values.
//!
//! Matching never touches a concrete value type directly; everything the
//! matcher learns about a document goes through the `Probe` trait. That keeps
//! the path engine usable both against plain `serde_json` values and against
//! whatever persistent document representation the patch layer provides.

use serde_json::Value as JsonValue;

/// Structural class of a probed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Array,
    Object,
    Primitive,
}

/// Scalar view of a primitive value, used when evaluating constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Read-only view over one node of a tree value.
///
/// `get_index`/`get_attribute` return a probe over the child, so traversal
/// composes without the caller knowing the backing representation. Cloning a
/// probe must be cheap (a reference or a handle, never a deep copy).
pub trait Probe: Sized + Clone {
    fn container_kind(&self) -> ContainerKind;

    /// Number of elements. `None` for anything that is not an array.
    fn length(&self) -> Option<usize>;

    /// Child at `index`; `None` when out of bounds or not an array.
    fn get_index(&self, index: usize) -> Option<Self>;

    fn has_attribute(&self, name: &str) -> bool;

    /// Child under `name`; `None` when absent or not an object.
    fn get_attribute(&self, name: &str) -> Option<Self>;

    fn attribute_keys(&self) -> Vec<String>;

    /// Scalar content for primitives, `None` for containers.
    fn scalar(&self) -> Option<Scalar>;
}

impl<'a> Probe for &'a JsonValue {
    fn container_kind(&self) -> ContainerKind {
        match self {
            JsonValue::Array(_) => ContainerKind::Array,
            JsonValue::Object(_) => ContainerKind::Object,
            _ => ContainerKind::Primitive,
        }
    }

    fn length(&self) -> Option<usize> {
        match self {
            JsonValue::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    fn get_index(&self, index: usize) -> Option<Self> {
        match self {
            JsonValue::Array(items) => items.get(index),
            _ => None,
        }
    }

    fn has_attribute(&self, name: &str) -> bool {
        match self {
            JsonValue::Object(map) => map.contains_key(name),
            _ => false,
        }
    }

    fn get_attribute(&self, name: &str) -> Option<Self> {
        match self {
            JsonValue::Object(map) => map.get(name),
            _ => None,
        }
    }

    fn attribute_keys(&self) -> Vec<String> {
        match self {
            JsonValue::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn scalar(&self) -> Option<Scalar> {
        match self {
            JsonValue::Null => Some(Scalar::Null),
            JsonValue::Bool(b) => Some(Scalar::Bool(*b)),
            JsonValue::Number(n) => Some(Scalar::Number(n.as_f64().unwrap_or(f64::MAX))),
            JsonValue::String(s) => Some(Scalar::String(s.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_container_kinds() {
        let doc = json!({"a": [1, 2], "b": "text"});
        let probe = &doc;

        assert_eq!(probe.container_kind(), ContainerKind::Object);
        assert_eq!(
            probe.get_attribute("a").unwrap().container_kind(),
            ContainerKind::Array
        );
        assert_eq!(
            probe.get_attribute("b").unwrap().container_kind(),
            ContainerKind::Primitive
        );
    }

    #[test]
    fn test_length_is_array_only() {
        let doc = json!({"a": [1, 2, 3]});
        let probe = &doc;

        assert_eq!(probe.length(), None);
        assert_eq!(probe.get_attribute("a").unwrap().length(), Some(3));
    }

    #[test]
    fn test_scalar_access() {
        let doc = json!(["x", 2.5, true, null]);
        let probe = &doc;

        assert_eq!(
            probe.get_index(0).unwrap().scalar(),
            Some(Scalar::String("x".to_string()))
        );
        assert_eq!(probe.get_index(1).unwrap().scalar(), Some(Scalar::Number(2.5)));
        assert_eq!(probe.get_index(2).unwrap().scalar(), Some(Scalar::Bool(true)));
        assert_eq!(probe.get_index(3).unwrap().scalar(), Some(Scalar::Null));
        assert_eq!(probe.scalar(), None);
    }

    #[test]
    fn test_out_of_bounds_index() {
        let doc = json!([1]);
        let probe = &doc;

        assert!(probe.get_index(1).is_none());
    }
}
