//! Mutations: ordered lists of document operations with revision stamping.
//!
//! A [`Mutation`] is the unit the server exchanges with clients. It wraps a
//! list of [`Operation`]s plus transaction metadata, and compiles once into
//! a reusable pipeline of steps. Applying a mutation enforces the
//! `previousRev` precondition, runs the steps, and stamps the result
//! revision with a fresh value identity so callers can use handle
//! inequality as "did something run".

use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use eddy_jsonpath::Probe;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{MutationError, MutationResult, PatchResult};
use crate::patch::{Patch, Patcher};
use crate::value::Value;

/// One document operation, externally tagged on the wire:
/// `{"create": {...}}`, `{"delete": {"id": "..."}}` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Create(JsonValue),
    CreateIfNotExists(JsonValue),
    CreateOrReplace(JsonValue),
    Delete(DeleteTarget),
    Patch(PatchSelection),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTarget {
    pub id: String,
}

/// Patches normally address a document id, but the wire format also admits
/// a `query` selector form, which this layer does not evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchSelection {
    Id(Patch),
    Query { query: String },
}

#[derive(Debug, Clone)]
enum Step {
    Create(Value),
    CreateIfNotExists(Value),
    CreateOrReplace(Value),
    Delete,
    Patch(Patcher),
}

/// An ordered list of operations plus transaction metadata. Immutable by
/// contract once constructed; the compiled step list is a derived cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub mutations: Vec<Operation>,
    #[serde(skip)]
    compiled: OnceLock<PatchResult<Vec<Step>>>,
}

impl Mutation {
    /// A bare, unstamped mutation. Metadata fields are public and can be
    /// assigned afterwards.
    pub fn new(operations: Vec<Operation>) -> Mutation {
        Mutation {
            transaction_id: None,
            previous_rev: None,
            result_rev: None,
            timestamp: None,
            mutations: operations,
            compiled: OnceLock::new(),
        }
    }

    /// The revision this mutation stamps on its output, when known.
    pub fn final_revision(&self) -> Option<&str> {
        self.result_rev.as_deref().or(self.transaction_id.as_deref())
    }

    /// True when the first operation can start from a nonexistent document.
    /// An empty mutation trivially applies to anything.
    pub fn applies_to_missing_document(&self) -> bool {
        match self.mutations.first() {
            Some(
                Operation::Create(_)
                | Operation::CreateIfNotExists(_)
                | Operation::CreateOrReplace(_),
            ) => true,
            Some(_) => false,
            None => true,
        }
    }

    /// Apply to a document state, `None` meaning "does not exist".
    pub fn apply(&self, document: Option<&Value>) -> MutationResult<Option<Value>> {
        if let Some(expected) = &self.previous_rev {
            let actual = document.and_then(|doc| doc.attribute_str("_rev"));
            if actual != Some(expected.as_str()) {
                return Err(MutationError::revision_mismatch(
                    expected,
                    actual.map(str::to_string),
                ));
            }
        }

        let stamp = self
            .timestamp
            .map(|timestamp| timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
        let mut current = document.cloned();
        for step in self.steps()? {
            current = match step {
                Step::Create(payload) | Step::CreateIfNotExists(payload) => match current {
                    Some(existing) => Some(existing),
                    None => Some(with_created_at(payload, stamp.as_deref())),
                },
                Step::CreateOrReplace(payload) => Some(with_created_at(payload, stamp.as_deref())),
                Step::Delete => None,
                Step::Patch(patcher) => match current {
                    Some(existing) => Some(patcher.apply(&existing)?),
                    None => None,
                },
            };
        }

        if let (Some(doc), Some(stamp)) = (&current, &stamp) {
            current = Some(doc.set_attribute("_updatedAt", Value::string(stamp.clone())));
        }
        match (current, self.final_revision()) {
            (Some(doc), Some(revision)) => {
                // Even a logically no-op mutation must hand back a new identity.
                Ok(Some(
                    doc.set_attribute("_rev", Value::string(revision.to_string()))
                        .with_fresh_identity(),
                ))
            }
            (other, _) => Ok(other),
        }
    }

    /// Fold a list of mutations over a document, left to right.
    pub fn apply_all(
        document: Option<&Value>,
        mutations: &[Mutation],
    ) -> MutationResult<Option<Value>> {
        let mut current = document.cloned();
        for mutation in mutations {
            current = mutation.apply(current.as_ref())?;
        }
        Ok(current)
    }

    /// Concatenate the operations of many mutations into one unstamped
    /// mutation. The caller assigns transaction identity and revisions.
    pub fn squash(mutations: &[Mutation]) -> Mutation {
        let operations = mutations
            .iter()
            .flat_map(|mutation| mutation.mutations.iter().cloned())
            .collect();
        Mutation::new(operations)
    }

    fn steps(&self) -> MutationResult<&[Step]> {
        match self.compiled.get_or_init(|| compile(&self.mutations)) {
            Ok(steps) => Ok(steps),
            Err(error) => Err(error.clone().into()),
        }
    }
}

fn compile(operations: &[Operation]) -> PatchResult<Vec<Step>> {
    let mut steps = Vec::with_capacity(operations.len());
    for operation in operations {
        match operation {
            Operation::Create(document) => steps.push(Step::Create(Value::from_json(document))),
            Operation::CreateIfNotExists(document) => {
                steps.push(Step::CreateIfNotExists(Value::from_json(document)));
            }
            Operation::CreateOrReplace(document) => {
                steps.push(Step::CreateOrReplace(Value::from_json(document)));
            }
            Operation::Delete(_) => steps.push(Step::Delete),
            Operation::Patch(PatchSelection::Id(patch)) => {
                steps.push(Step::Patch(Patcher::new(patch)?));
            }
            Operation::Patch(PatchSelection::Query { .. }) => {
                warn!("query patches are not supported here, skipping");
            }
        }
    }
    Ok(steps)
}

/// Created documents keep their own `_createdAt` when the payload carries
/// one, otherwise the mutation timestamp fills it in.
fn with_created_at(payload: &Value, stamp: Option<&str>) -> Value {
    let missing = payload
        .get_attribute("_createdAt")
        .map_or(true, |existing| existing.is_null());
    match (missing, stamp) {
        (true, Some(stamp)) => payload.set_attribute("_createdAt", Value::string(stamp.to_string())),
        _ => payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MutationError;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Value {
        Value::from_json(&json)
    }

    fn patch_op(patch: Patch) -> Operation {
        Operation::Patch(PatchSelection::Id(patch))
    }

    fn set_title(id: &str, title: &str) -> Operation {
        patch_op(Patch {
            id: id.to_string(),
            set: Some(
                [("title".to_string(), json!(title))].into_iter().collect(),
            ),
            ..Default::default()
        })
    }

    #[test]
    fn test_create_only_when_missing() {
        let mutation = Mutation::new(vec![Operation::Create(json!({"_id": "a", "n": 1}))]);
        let created = mutation.apply(None).unwrap().unwrap();
        assert_eq!(created, json!({"_id": "a", "n": 1}));

        let existing = doc(json!({"_id": "a", "n": 2}));
        let kept = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert!(kept.ptr_eq(&existing));
    }

    #[test]
    fn test_create_or_replace_overwrites() {
        let mutation =
            Mutation::new(vec![Operation::CreateOrReplace(json!({"_id": "a", "n": 9}))]);
        let existing = doc(json!({"_id": "a", "n": 1, "extra": true}));
        let replaced = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert_eq!(replaced, json!({"_id": "a", "n": 9}));
    }

    #[test]
    fn test_create_stamps_created_at_from_timestamp() {
        let mut mutation = Mutation::new(vec![Operation::Create(json!({"_id": "a"}))]);
        mutation.timestamp = Some("2021-01-01T12:00:00.000Z".parse().unwrap());
        let created = mutation.apply(None).unwrap().unwrap();
        assert_eq!(
            created,
            json!({
                "_id": "a",
                "_createdAt": "2021-01-01T12:00:00.000Z",
                "_updatedAt": "2021-01-01T12:00:00.000Z",
            })
        );

        // A payload that brings its own _createdAt keeps it.
        let mut mutation = Mutation::new(vec![Operation::Create(
            json!({"_id": "a", "_createdAt": "2020-06-06T00:00:00.000Z"}),
        )]);
        mutation.timestamp = Some("2021-01-01T12:00:00.000Z".parse().unwrap());
        let created = mutation.apply(None).unwrap().unwrap();
        assert_eq!(
            created.attribute_str("_createdAt"),
            Some("2020-06-06T00:00:00.000Z")
        );
    }

    #[test]
    fn test_delete_yields_missing() {
        let mutation = Mutation::new(vec![Operation::Delete(DeleteTarget {
            id: "a".to_string(),
        })]);
        let existing = doc(json!({"_id": "a"}));
        assert_eq!(mutation.apply(Some(&existing)).unwrap(), None);
    }

    #[test]
    fn test_patch_operation_applies() {
        let mutation = Mutation::new(vec![set_title("a", "Hello")]);
        let result = mutation
            .apply(Some(&doc(json!({"_id": "a", "title": "old"}))))
            .unwrap()
            .unwrap();
        assert_eq!(result, json!({"_id": "a", "title": "Hello"}));
    }

    #[test]
    fn test_patch_on_missing_document_is_skipped() {
        let mutation = Mutation::new(vec![set_title("a", "Hello")]);
        assert_eq!(mutation.apply(None).unwrap(), None);
    }

    #[test]
    fn test_previous_rev_precondition() {
        let mut mutation = Mutation::new(vec![set_title("a", "Hello")]);
        mutation.previous_rev = Some("r1".to_string());

        let stale = doc(json!({"_id": "a", "_rev": "r0", "title": "old"}));
        assert_eq!(
            mutation.apply(Some(&stale)),
            Err(MutationError::RevisionMismatch {
                expected: "r1".to_string(),
                actual: Some("r0".to_string()),
            })
        );
        assert_eq!(
            mutation.apply(None),
            Err(MutationError::RevisionMismatch {
                expected: "r1".to_string(),
                actual: None,
            })
        );

        let current = doc(json!({"_id": "a", "_rev": "r1", "title": "old"}));
        let result = mutation.apply(Some(&current)).unwrap().unwrap();
        assert_eq!(result.attribute_str("title"), Some("Hello"));
    }

    #[test]
    fn test_result_revision_is_stamped_with_fresh_identity() {
        // The patch is a logical no-op, yet the output must be a new handle
        // carrying the new revision.
        let mut mutation = Mutation::new(vec![set_title("a", "same")]);
        mutation.transaction_id = Some("txn1".to_string());

        let existing = doc(json!({"_id": "a", "_rev": "r0", "title": "same"}));
        let result = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert!(!result.ptr_eq(&existing));
        assert_eq!(result.attribute_str("_rev"), Some("txn1"));

        // resultRev wins over transactionId.
        let mut mutation = Mutation::new(vec![set_title("a", "same")]);
        mutation.transaction_id = Some("txn1".to_string());
        mutation.result_rev = Some("r9".to_string());
        let result = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert_eq!(result.attribute_str("_rev"), Some("r9"));
    }

    #[test]
    fn test_reapply_with_satisfied_result_rev_keeps_content() {
        let mut mutation = Mutation::new(vec![set_title("a", "Hello")]);
        mutation.result_rev = Some("r9".to_string());

        let existing = doc(json!({"_id": "a", "_rev": "r0", "title": "old"}));
        let once = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert_eq!(once.attribute_str("_rev"), Some("r9"));

        let twice = mutation.apply(Some(&once)).unwrap().unwrap();
        assert_eq!(twice, once);
        assert_eq!(twice.attribute_str("_rev"), Some("r9"));
    }

    #[test]
    fn test_applies_to_missing_document() {
        let create = Mutation::new(vec![Operation::Create(json!({"_id": "a"}))]);
        assert!(create.applies_to_missing_document());

        let patch = Mutation::new(vec![set_title("a", "x")]);
        assert!(!patch.applies_to_missing_document());

        let empty = Mutation::new(Vec::new());
        assert!(empty.applies_to_missing_document());
    }

    #[test]
    fn test_apply_all_folds_left_to_right() {
        let mutations = vec![
            Mutation::new(vec![Operation::Create(json!({"_id": "a", "n": 1}))]),
            Mutation::new(vec![patch_op(Patch {
                id: "a".to_string(),
                inc: Some([("n".to_string(), 2.0)].into_iter().collect()),
                ..Default::default()
            })]),
        ];
        let result = Mutation::apply_all(None, &mutations).unwrap().unwrap();
        assert_eq!(result, json!({"_id": "a", "n": 3}));
    }

    #[test]
    fn test_squash_concatenates_unstamped() {
        let mut first = Mutation::new(vec![set_title("a", "one")]);
        first.transaction_id = Some("t1".to_string());
        let second = Mutation::new(vec![Operation::Delete(DeleteTarget {
            id: "a".to_string(),
        })]);

        let squashed = Mutation::squash(&[first.clone(), second.clone()]);
        assert_eq!(squashed.transaction_id, None);
        assert_eq!(squashed.result_rev, None);
        assert_eq!(
            squashed.mutations,
            vec![first.mutations[0].clone(), second.mutations[0].clone()]
        );
    }

    #[test]
    fn test_query_patch_is_skipped() {
        let mutation = Mutation::new(vec![Operation::Patch(PatchSelection::Query {
            query: "*[_type == 'post']".to_string(),
        })]);
        let existing = doc(json!({"_id": "a"}));
        let result = mutation.apply(Some(&existing)).unwrap().unwrap();
        assert!(result.ptr_eq(&existing));
    }

    #[test]
    fn test_wire_round_trip() {
        let json = json!({
            "transactionId": "txn1",
            "previousRev": "r0",
            "timestamp": "2021-01-01T12:00:00Z",
            "mutations": [
                {"createIfNotExists": {"_id": "a", "_type": "post"}},
                {"patch": {"id": "a", "set": {"title": "Hello"}}},
                {"delete": {"id": "b"}},
            ],
        });
        let mutation: Mutation = serde_json::from_value(json).unwrap();
        assert_eq!(mutation.transaction_id.as_deref(), Some("txn1"));
        assert_eq!(mutation.mutations.len(), 3);
        assert!(matches!(mutation.mutations[2], Operation::Delete(_)));

        let back = serde_json::to_value(&mutation).unwrap();
        assert_eq!(back["mutations"][1]["patch"]["id"], json!("a"));
        assert_eq!(back["previousRev"], json!("r0"));
    }
}
