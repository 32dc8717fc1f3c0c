//! Local model of a document as it is changed by our own submissions and by
//! mutations arriving from the server.
//!
//! Two versions are maintained. `HEAD` is the last state confirmed by the
//! server, advanced only by incoming mutations chained in revision order.
//! `EDGE` is the optimistic state the user sees: `HEAD` plus every locally
//! submitted or pending mutation. As long as confirmations arrive in the
//! order we predicted, `EDGE` never moves backwards; when a foreign mutation
//! slips in between ours, or one of ours fails, `EDGE` is recomputed from
//! `HEAD` and the host is told through `on_rebase`.

use chrono::{DateTime, Utc};
use eddy_jsonpath::Probe;
use eddy_patch::{Mutation, Value};
use tracing::debug;

use crate::error::{DocumentError, DocumentResult};

/// Payload for `on_mutation`: a mutation that just advanced `EDGE`, and the
/// document it produced.
pub struct MutationEvent<'a> {
    pub mutation: &'a Mutation,
    pub document: Option<&'a Value>,
    pub remote: bool,
}

/// Payload for `on_rebase`: the recomputed `EDGE`, the incoming mutations
/// that forced the rebase and the local mutations still awaiting
/// submission.
pub struct RebaseEvent<'a> {
    pub document: Option<&'a Value>,
    pub remote_mutations: &'a [Mutation],
    pub local_mutations: &'a [Mutation],
}

pub type MutationCallback = Box<dyn FnMut(MutationEvent<'_>) + Send>;
pub type RemoteMutationCallback = Box<dyn FnMut(&Mutation) + Send>;
pub type RebaseCallback = Box<dyn FnMut(RebaseEvent<'_>) + Send>;
pub type ConsistencyCallback = Box<dyn FnMut(bool) + Send>;

/// Ticket handed out by [`Document::stage`]. Whoever submits the mutation
/// to the server reports the outcome of that round trip through it.
#[derive(Debug, Clone)]
pub struct SubmissionResponder {
    transaction_id: String,
}

impl SubmissionResponder {
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn success(&self, document: &mut Document) -> DocumentResult<()> {
        document.pending_successfully_submitted(&self.transaction_id)
    }

    pub fn failure(&self, document: &mut Document) -> DocumentResult<()> {
        document.pending_failed(&self.transaction_id)
    }
}

const MAX_INCOMING_ITERATIONS: u32 = 10;

pub struct Document {
    head: Option<Value>,
    edge: Option<Value>,
    incoming: Vec<Mutation>,
    submitted: Vec<Mutation>,
    pending: Vec<Mutation>,
    inconsistent_at: Option<DateTime<Utc>>,
    last_staged_at: Option<DateTime<Utc>>,
    /// Fired when `EDGE` advances in the normal order of things, locally
    /// staged or remotely confirmed.
    pub on_mutation: Option<MutationCallback>,
    /// Fired for every incoming mutation as it is applied to `HEAD`. These
    /// are always in confirmed server order.
    pub on_remote_mutation: Option<RemoteMutationCallback>,
    /// Fired when `EDGE` changes for any reason other than the normal
    /// order, meaning the host must re-render from the new document.
    pub on_rebase: Option<RebaseCallback>,
    pub on_consistency_changed: Option<ConsistencyCallback>,
}

impl Document {
    pub fn new(document: Option<Value>) -> Document {
        Document {
            head: document.clone(),
            edge: document,
            incoming: Vec::new(),
            submitted: Vec::new(),
            pending: Vec::new(),
            inconsistent_at: None,
            last_staged_at: None,
            on_mutation: None,
            on_remote_mutation: None,
            on_rebase: None,
            on_consistency_changed: None,
        }
    }

    /// Last state confirmed by the server.
    pub fn head(&self) -> Option<&Value> {
        self.head.as_ref()
    }

    /// Optimistic state with all local mutations applied.
    pub fn edge(&self) -> Option<&Value> {
        self.edge.as_ref()
    }

    /// True when there are no unresolved local mutations and no queued
    /// incoming mutations, so `HEAD` and `EDGE` agree with the server.
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_at.is_none()
    }

    /// When the document first became inconsistent, for host policies that
    /// reset after being stuck too long.
    pub fn inconsistent_at(&self) -> Option<DateTime<Utc>> {
        self.inconsistent_at
    }

    /// When a local mutation was last staged. A recent stamp usually means
    /// the inconsistency is just the user still typing.
    pub fn last_staged_at(&self) -> Option<DateTime<Utc>> {
        self.last_staged_at
    }

    /// Drop all queues and reload from a fresh snapshot. Used to recover
    /// from unsavory states.
    pub fn reset(&mut self, document: Option<Value>) {
        debug!("resetting document");
        self.incoming.clear();
        self.submitted.clear();
        self.pending.clear();
        self.inconsistent_at = None;
        self.head = document.clone();
        self.edge = document;
    }

    /// Call when a mutation arrives from the server.
    pub fn arrive(&mut self, mutation: Mutation) -> DocumentResult<()> {
        debug!(transaction = ?mutation.transaction_id, "mutation arrived");
        self.incoming.push(mutation);
        self.consider_incoming()?;
        self.update_consistency_flag();
        Ok(())
    }

    /// Call when submitting a local mutation. `EDGE` advances immediately;
    /// the returned responder must be told whether the submission succeeded
    /// or failed.
    pub fn stage(
        &mut self,
        mutation: Mutation,
        silent: bool,
    ) -> DocumentResult<SubmissionResponder> {
        let Some(transaction_id) = mutation.transaction_id.clone() else {
            return Err(DocumentError::MissingTransactionId);
        };
        debug!(transaction = transaction_id.as_str(), "staging mutation");
        self.last_staged_at = Some(Utc::now());
        self.edge = mutation.apply(self.edge.as_ref())?;
        if !silent {
            if let Some(callback) = &mut self.on_mutation {
                callback(MutationEvent {
                    mutation: &mutation,
                    document: self.edge.as_ref(),
                    remote: false,
                });
            }
        }
        self.pending.push(mutation);
        self.update_consistency_flag();
        Ok(SubmissionResponder { transaction_id })
    }

    /// The submission with this transaction id was accepted by the server.
    /// Moves it from `pending` to `submitted`, rebasing if it did not go in
    /// the order we predicted. An id no longer pending at all means its
    /// confirmation already arrived, which is fine.
    pub fn pending_successfully_submitted(&mut self, transaction_id: &str) -> DocumentResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.pending[0].transaction_id.as_deref() == Some(transaction_id) {
            let mutation = self.pending.remove(0);
            self.submitted.push(mutation);
            self.update_consistency_flag();
            return Ok(());
        }
        let index = self
            .pending
            .iter()
            .position(|mutation| mutation.transaction_id.as_deref() == Some(transaction_id));
        match index {
            Some(index) => {
                debug!(transaction = transaction_id, "mutation submitted out of order");
                let mutation = self.pending.remove(index);
                self.submitted.push(mutation);
                self.rebase(&[])?;
            }
            None => {
                debug!(
                    transaction = transaction_id,
                    "submitted mutation no longer pending, ignoring"
                );
            }
        }
        self.update_consistency_flag();
        Ok(())
    }

    /// The submission with this transaction id was rejected. Scrubs it from
    /// `pending` and rebases to drop its optimistic effect from `EDGE`.
    pub fn pending_failed(&mut self, transaction_id: &str) -> DocumentResult<()> {
        debug!(transaction = transaction_id, "submission failed, scrubbing");
        self.pending
            .retain(|mutation| mutation.transaction_id.as_deref() != Some(transaction_id));
        self.rebase(&[])?;
        self.update_consistency_flag();
        Ok(())
    }

    /// Recompute `EDGE` as `HEAD` with `submitted` then `pending` replayed
    /// on top. Fires `on_rebase` only when the content actually changed;
    /// the revision stamp alone does not count.
    pub fn rebase(&mut self, remote_mutations: &[Mutation]) -> DocumentResult<()> {
        let mut next = self.head.clone();
        for mutation in self.submitted.iter().chain(self.pending.iter()) {
            next = mutation.apply(next.as_ref())?;
        }
        let changed = !content_equal(self.edge.as_ref(), next.as_ref());
        self.edge = next;
        if changed {
            debug!("rebase changed the optimistic document");
            if let Some(callback) = &mut self.on_rebase {
                callback(RebaseEvent {
                    document: self.edge.as_ref(),
                    remote_mutations,
                    local_mutations: &self.pending,
                });
            }
        }
        Ok(())
    }

    /// Apply as many incoming mutations as can be chained onto `HEAD`.
    fn consider_incoming(&mut self) -> DocumentResult<()> {
        self.discard_stale_incoming();

        let mut must_rebase = false;
        let mut rebase_mutations = Vec::new();
        let mut iterations = 0u32;
        while let Some(index) = self.next_applicable_index() {
            if iterations > MAX_INCOMING_ITERATIONS {
                let transaction_id = self.incoming[index]
                    .transaction_id
                    .clone()
                    .unwrap_or_else(|| String::from("unknown"));
                return Err(DocumentError::StuckIncoming { transaction_id });
            }
            iterations += 1;
            let applicable = self.incoming.remove(index);
            // A transaction delivered more than once collapses into one
            // apply.
            if let Some(transaction_id) = applicable.transaction_id.as_deref() {
                self.incoming
                    .retain(|queued| queued.transaction_id.as_deref() != Some(transaction_id));
            }
            must_rebase |= self.apply_incoming(&applicable)?;
            if must_rebase {
                rebase_mutations.push(applicable);
            }
        }

        if !self.incoming.is_empty() {
            debug!(
                queued = self.incoming.len(),
                "incoming mutations not yet applicable"
            );
        }
        if must_rebase {
            self.rebase(&rebase_mutations)?;
        }
        Ok(())
    }

    /// Incoming mutations stamped older than the document itself can never
    /// chain onto it.
    fn discard_stale_incoming(&mut self) {
        let Some(updated_at) = self
            .head
            .as_ref()
            .and_then(|head| head.attribute_str("_updatedAt"))
            .and_then(|stamp| stamp.parse::<DateTime<Utc>>().ok())
        else {
            return;
        };
        self.incoming.retain(|incoming| match incoming.timestamp {
            Some(timestamp) if timestamp < updated_at => {
                debug!(
                    transaction = ?incoming.transaction_id,
                    "discarding stale incoming mutation"
                );
                false
            }
            _ => true,
        });
    }

    fn next_applicable_index(&self) -> Option<usize> {
        match &self.head {
            Some(head) => {
                let revision = head.attribute_str("_rev");
                self.incoming
                    .iter()
                    .position(|incoming| incoming.previous_rev.as_deref() == revision)
            }
            // A deleted document only accepts mutations that start by
            // creating it again.
            None => self
                .incoming
                .iter()
                .position(Mutation::applies_to_missing_document),
        }
    }

    /// Apply one prequalified incoming mutation to `HEAD`. Returns true
    /// when a rebase is required afterwards.
    fn apply_incoming(&mut self, mutation: &Mutation) -> DocumentResult<bool> {
        debug!(
            previous = ?mutation.previous_rev,
            result = ?mutation.result_rev,
            "applying incoming mutation to HEAD"
        );
        self.head = mutation.apply(self.head.as_ref())?;
        if let Some(callback) = &mut self.on_remote_mutation {
            callback(mutation);
        }

        if !self.submitted.is_empty() || !self.pending.is_empty() {
            return Ok(self.consume_unresolved(mutation.transaction_id.as_deref()));
        }

        // Nothing local in flight, so EDGE follows HEAD directly.
        self.edge = self.head.clone();
        if let Some(callback) = &mut self.on_mutation {
            callback(MutationEvent {
                mutation,
                document: self.edge.as_ref(),
                remote: true,
            });
        }
        Ok(false)
    }

    /// An incoming mutation was applied to `HEAD` while local mutations are
    /// in flight. If it confirms the upcoming local mutation, consume it;
    /// anything else means our predicted order was wrong and the caller
    /// must rebase.
    fn consume_unresolved(&mut self, transaction_id: Option<&str>) -> bool {
        if let Some(first) = self.submitted.first() {
            if first.transaction_id.as_deref() == transaction_id {
                debug!(transaction = ?transaction_id, "confirmed next submitted mutation");
                self.submitted.remove(0);
                return false;
            }
        } else if let Some(first) = self.pending.first() {
            if first.transaction_id.as_deref() == transaction_id {
                debug!(transaction = ?transaction_id, "confirmed next pending mutation");
                self.pending.remove(0);
                return false;
            }
        }
        // Not the upcoming one. Scrub it from both queues; whether it was
        // ours or foreign, the predicted order no longer holds.
        self.submitted
            .retain(|mutation| mutation.transaction_id.as_deref() != transaction_id);
        self.pending
            .retain(|mutation| mutation.transaction_id.as_deref() != transaction_id);
        true
    }

    fn update_consistency_flag(&mut self) {
        let was_consistent = self.is_consistent();
        let is_consistent =
            self.pending.is_empty() && self.submitted.is_empty() && self.incoming.is_empty();
        if is_consistent {
            self.inconsistent_at = None;
        } else if self.inconsistent_at.is_none() {
            self.inconsistent_at = Some(Utc::now());
        }
        if was_consistent != is_consistent {
            debug!(consistent = is_consistent, "consistency changed");
            if let Some(callback) = &mut self.on_consistency_changed {
                callback(is_consistent);
            }
        }
    }
}

/// Content comparison that does not count the revision stamp as a change.
pub(crate) fn content_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if a.ptr_eq(b) {
                return true;
            }
            let aligned = match b.get_attribute("_rev") {
                Some(revision) => a.set_attribute("_rev", revision),
                None => a.unset_attribute("_rev"),
            };
            aligned == *b
        }
        _ => false,
    }
}
