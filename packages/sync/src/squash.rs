//! Coalesces locally staged mutations into the fewest operations that still
//! have the same net effect.
//!
//! The buffer keeps `PRESTAGE`, its model of the document with every
//! accepted edit applied, and three holding areas: `set_operations` (the
//! net set per concrete path, latest write wins), `staged` (operations
//! waiting to be flushed) and `out` (flushed, ready to be purged into a
//! mutation). Set patches targeting a single existing primitive slot are
//! rewritten against `PRESTAGE`: dropped when they change nothing, turned
//! into a string diff when both sides are strings, kept as plain sets
//! otherwise.

use std::collections::BTreeMap;
use std::mem;

use eddy_jsonpath::{matches_with_path, parse, to_path_string, ContainerKind, Expr, Probe};
use eddy_patch::{
    dmp, Mutation, MutationResult, Operation, Patch, PatchError, PatchSelection, Value,
};
use serde_json::Value as JsonValue;
use tracing::debug;

pub struct SquashingBuffer {
    prestage: Option<Value>,
    set_operations: BTreeMap<String, Operation>,
    staged: Vec<Operation>,
    out: Vec<Operation>,
    document_present: bool,
}

impl SquashingBuffer {
    pub fn new(basis: Option<&Value>) -> SquashingBuffer {
        SquashingBuffer {
            prestage: basis.cloned(),
            set_operations: BTreeMap::new(),
            staged: Vec::new(),
            out: Vec::new(),
            document_present: basis.is_some(),
        }
    }

    /// True when any optimized, staged or flushed-but-unpurged operation is
    /// held.
    pub fn has_changes(&self) -> bool {
        !self.set_operations.is_empty() || !self.staged.is_empty() || !self.out.is_empty()
    }

    pub fn add(&mut self, mutation: &Mutation) -> MutationResult<()> {
        for operation in &mutation.mutations {
            self.add_operation(operation)?;
        }
        Ok(())
    }

    pub fn add_operation(&mut self, operation: &Operation) -> MutationResult<()> {
        match operation {
            Operation::Patch(PatchSelection::Id(patch))
                if self.targets_prestage(&patch.id) && only_set(patch) =>
            {
                self.optimise_set(patch)
            }
            Operation::Patch(PatchSelection::Id(patch))
                if self.targets_prestage(&patch.id) && only_set_if_missing(patch) =>
            {
                self.optimise_set_if_missing(patch)
            }
            Operation::CreateIfNotExists(document)
                if self.document_present
                    && document.get("_id").and_then(JsonValue::as_str) == self.prestage_id() =>
            {
                debug!("document already exists, dropping createIfNotExists");
                Ok(())
            }
            _ => {
                self.staged.push(operation.clone());
                self.stash_staged_operations()
            }
        }
    }

    /// Final flush. Everything accumulated so far becomes one mutation
    /// stamped with `transaction_id`, or `None` when nothing changed. The
    /// buffer itself ends up empty; callers build a fresh buffer on the
    /// post-purge document.
    pub fn purge(&mut self, transaction_id: Option<&str>) -> MutationResult<Option<Mutation>> {
        self.stash_staged_operations()?;
        let mut result = None;
        if !self.out.is_empty() {
            debug!(operations = self.out.len(), "purging buffer");
            let mut mutation = Mutation::new(mem::take(&mut self.out));
            mutation.transaction_id = transaction_id.map(str::to_string);
            result = Some(mutation);
        }
        self.prestage = None;
        self.document_present = false;
        Ok(result)
    }

    /// Re-anchor the buffer on a new basis, replaying unpurged operations
    /// onto it. A `None` basis means the document was deleted; local edits
    /// are discarded. Returns the new `PRESTAGE`.
    pub fn rebase(&mut self, new_basis: Option<&Value>) -> MutationResult<Option<Value>> {
        self.stash_staged_operations()?;
        let Some(new_basis) = new_basis else {
            debug!("rebase onto deleted document, discarding local changes");
            self.out.clear();
            self.prestage = None;
            self.document_present = false;
            return Ok(None);
        };
        self.prestage = Mutation::new(self.out.clone()).apply(Some(new_basis))?;
        self.document_present = self.prestage.is_some();
        Ok(self.prestage.clone())
    }

    fn targets_prestage(&self, id: &str) -> bool {
        self.prestage_id() == Some(id)
    }

    fn prestage_id(&self) -> Option<&str> {
        self.prestage.as_ref().and_then(|doc| doc.attribute_str("_id"))
    }

    fn optimise_set(&mut self, patch: &Patch) -> MutationResult<()> {
        let Some(prestage) = self.prestage.clone() else {
            self.staged.push(Operation::Patch(PatchSelection::Id(patch.clone())));
            return self.stash_staged_operations();
        };
        let Some(assignments) = &patch.set else {
            return Ok(());
        };

        let mut unoptimizable = BTreeMap::new();
        for (path, next_value) in assignments {
            let expr = parse_path(path)?;
            let matches = matches_with_path(&expr, &prestage);
            if matches.len() != 1 {
                unoptimizable.insert(path.clone(), next_value.clone());
                continue;
            }
            let (concrete, existing) = &matches[0];
            if existing.container_kind() != ContainerKind::Primitive {
                unoptimizable.insert(path.clone(), next_value.clone());
                continue;
            }
            let canonical = to_path_string(concrete);
            if existing == next_value {
                debug!(path = %canonical, "set changes nothing, dropping");
                self.set_operations.remove(&canonical);
                continue;
            }
            let operation = match (existing.as_str(), next_value.as_str()) {
                (Some(old), Some(new)) => {
                    debug!(path = %canonical, "rewriting set as string diff");
                    single_diff(&patch.id, canonical.clone(), dmp::make(old, new))
                }
                _ => single_set(&patch.id, canonical.clone(), next_value.clone()),
            };
            self.set_operations.insert(canonical, operation);
        }

        if !unoptimizable.is_empty() {
            self.staged.push(Operation::Patch(PatchSelection::Id(Patch {
                id: patch.id.clone(),
                set: Some(unoptimizable),
                ..Default::default()
            })));
            self.stash_staged_operations()?;
        }
        Ok(())
    }

    fn optimise_set_if_missing(&mut self, patch: &Patch) -> MutationResult<()> {
        let Some(prestage) = self.prestage.clone() else {
            self.staged.push(Operation::Patch(PatchSelection::Id(patch.clone())));
            return self.stash_staged_operations();
        };
        let Some(assignments) = &patch.set_if_missing else {
            return Ok(());
        };

        let mut survivors = BTreeMap::new();
        for (path, value) in assignments {
            let expr = parse_path(path)?;
            let matches = matches_with_path(&expr, &prestage);
            let satisfied =
                !matches.is_empty() && matches.iter().all(|(_, existing)| !existing.is_null());
            if satisfied {
                debug!(path = path.as_str(), "setIfMissing already satisfied, dropping");
                continue;
            }
            survivors.insert(path.clone(), value.clone());
        }
        if survivors.is_empty() {
            return Ok(());
        }

        let operation = Operation::Patch(PatchSelection::Id(Patch {
            id: patch.id.clone(),
            set_if_missing: Some(survivors),
            ..Default::default()
        }));
        // Staged without flushing, so pending optimized sets survive. Folded
        // into PRESTAGE at once so later checks see these paths as present.
        self.prestage = Mutation::new(vec![operation.clone()]).apply(Some(&prestage))?;
        self.document_present = self.prestage.is_some();
        self.staged.push(operation);
        Ok(())
    }

    /// Flush: materialize pending set rewrites plus staged operations into
    /// `out` and replay them onto `PRESTAGE`.
    fn stash_staged_operations(&mut self) -> MutationResult<()> {
        let set_operations = mem::take(&mut self.set_operations);
        let staged = mem::take(&mut self.staged);
        let mut operations: Vec<Operation> = set_operations.into_values().collect();
        operations.extend(staged);
        if operations.is_empty() {
            return Ok(());
        }
        self.out.extend(operations.iter().cloned());
        self.prestage = Mutation::new(operations).apply(self.prestage.as_ref())?;
        self.document_present = self.prestage.is_some();
        Ok(())
    }
}

fn parse_path(path: &str) -> MutationResult<Expr> {
    parse(path).map_err(|source| PatchError::invalid_path(path, source).into())
}

fn only_set(patch: &Patch) -> bool {
    patch.set.is_some()
        && patch.set_if_missing.is_none()
        && patch.unset.is_none()
        && patch.diff_match_patch.is_none()
        && patch.inc.is_none()
        && patch.dec.is_none()
        && patch.insert.is_none()
}

fn only_set_if_missing(patch: &Patch) -> bool {
    patch.set_if_missing.is_some()
        && patch.set.is_none()
        && patch.unset.is_none()
        && patch.diff_match_patch.is_none()
        && patch.inc.is_none()
        && patch.dec.is_none()
        && patch.insert.is_none()
}

fn single_set(id: &str, path: String, value: JsonValue) -> Operation {
    Operation::Patch(PatchSelection::Id(Patch {
        id: id.to_string(),
        set: Some([(path, value)].into_iter().collect()),
        ..Default::default()
    }))
}

fn single_diff(id: &str, path: String, body: String) -> Operation {
    Operation::Patch(PatchSelection::Id(Patch {
        id: id.to_string(),
        diff_match_patch: Some([(path, body)].into_iter().collect()),
        ..Default::default()
    }))
}
