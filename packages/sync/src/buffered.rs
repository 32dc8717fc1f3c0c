//! Client-facing wrapper that buffers local edits on top of a [`Document`]
//! and drives the commit protocol against a transport.
//!
//! A third document version lives here: `LOCAL` is `EDGE` plus every edit
//! added to the squashing buffer but not yet committed. `commit()` purges
//! the buffer into one mutation, queues it and hands it to the installed
//! commit handler one at a time. Failures retry with linear backoff capped
//! at sixty seconds and two hundred attempts; the transport can also cancel
//! outright, which rejects everything queued and resets to the last server
//! snapshot.
//!
//! State is guarded by one lock per instance so transport responders and
//! retry timers may call in from any thread. The commit handler is invoked
//! with the lock released, so it may resolve its responder synchronously.
//! Host callbacks run under the lock and must not call back into the
//! [`BufferedDocument`] they came from.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use eddy_patch::{Mutation, MutationResult, Value};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::{
    content_equal, ConsistencyCallback, Document, MutationCallback, MutationEvent,
    RebaseCallback, RebaseEvent, RemoteMutationCallback, SubmissionResponder,
};
use crate::error::{CommitError, DocumentResult};
use crate::squash::SquashingBuffer;

const MAX_COMMIT_TRIES: u32 = 200;
const MAX_RETRY_BACKOFF_SECS: u64 = 60;

pub type CommitHandler = Arc<dyn Fn(CommitRequest) + Send + Sync>;
pub type DeleteCallback = Box<dyn FnMut(Option<&Value>) + Send>;

/// Handed to the commit handler for every submitted mutation. The transport
/// must eventually consume the responder with exactly one outcome.
pub struct CommitRequest {
    pub mutation: Mutation,
    pub responder: CommitResponder,
}

/// One buffered commit waiting for, or undergoing, submission.
struct PendingCommit {
    mutations: Vec<Mutation>,
    tries: u32,
    resolve: Option<oneshot::Sender<Result<(), CommitError>>>,
}

impl PendingCommit {
    fn resolve_ok(&mut self) {
        if let Some(sender) = self.resolve.take() {
            let _ = sender.send(Ok(()));
        }
    }

    fn reject(&mut self, error: CommitError) {
        if let Some(sender) = self.resolve.take() {
            let _ = sender.send(Err(error));
        }
    }
}

/// Resolves with the outcome of one `commit()` call.
pub struct CommitFuture {
    receiver: oneshot::Receiver<Result<(), CommitError>>,
}

impl Future for CommitFuture {
    type Output = Result<(), CommitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommitError::cancelled(
                "commit dropped without an outcome",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Events captured from the inner [`Document`]'s callbacks, replayed into
/// buffered handling once the document call returns. The document fires
/// them while the state lock is held, so they cannot be handled inline.
enum DocumentEvent {
    Mutation { mutation: Mutation, remote: bool },
    RemoteMutation(Mutation),
    Rebase {
        remote_mutations: Vec<Mutation>,
        local_mutations: Vec<Mutation>,
    },
    ConsistencyChanged(bool),
}

type DocumentOutbox = Arc<Mutex<Vec<DocumentEvent>>>;

struct State {
    document: Document,
    buffer: SquashingBuffer,
    local: Option<Value>,
    commits: VecDeque<PendingCommit>,
    committer_running: bool,
    retry_pending: bool,
    retry_epoch: u64,
    commit_handler: Option<CommitHandler>,
    on_mutation: Option<MutationCallback>,
    on_remote_mutation: Option<RemoteMutationCallback>,
    on_rebase: Option<RebaseCallback>,
    on_delete: Option<DeleteCallback>,
    on_consistency_changed: Option<ConsistencyCallback>,
}

struct Inner {
    state: Mutex<State>,
    outbox: DocumentOutbox,
}

impl Inner {
    fn drain_outbox(&self) -> Vec<DocumentEvent> {
        self.outbox.lock().drain(..).collect()
    }
}

#[derive(Clone)]
pub struct BufferedDocument {
    inner: Arc<Inner>,
}

impl BufferedDocument {
    pub fn new(document: Option<Value>) -> BufferedDocument {
        let outbox: DocumentOutbox = Arc::new(Mutex::new(Vec::new()));
        let mut inner_document = Document::new(document.clone());
        {
            let outbox = outbox.clone();
            inner_document.on_mutation = Some(Box::new(move |event: MutationEvent<'_>| {
                outbox.lock().push(DocumentEvent::Mutation {
                    mutation: event.mutation.clone(),
                    remote: event.remote,
                });
            }));
        }
        {
            let outbox = outbox.clone();
            inner_document.on_remote_mutation = Some(Box::new(move |mutation: &Mutation| {
                outbox.lock().push(DocumentEvent::RemoteMutation(mutation.clone()));
            }));
        }
        {
            let outbox = outbox.clone();
            inner_document.on_rebase = Some(Box::new(move |event: RebaseEvent<'_>| {
                outbox.lock().push(DocumentEvent::Rebase {
                    remote_mutations: event.remote_mutations.to_vec(),
                    local_mutations: event.local_mutations.to_vec(),
                });
            }));
        }
        {
            let outbox = outbox.clone();
            inner_document.on_consistency_changed = Some(Box::new(move |flag: bool| {
                outbox.lock().push(DocumentEvent::ConsistencyChanged(flag));
            }));
        }

        BufferedDocument {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    buffer: SquashingBuffer::new(document.as_ref()),
                    document: inner_document,
                    local: document,
                    commits: VecDeque::new(),
                    committer_running: false,
                    retry_pending: false,
                    retry_epoch: 0,
                    commit_handler: None,
                    on_mutation: None,
                    on_remote_mutation: None,
                    on_rebase: None,
                    on_delete: None,
                    on_consistency_changed: None,
                }),
                outbox,
            }),
        }
    }

    /// The transport that submits commits. Installing one drains anything
    /// already queued.
    pub fn set_commit_handler(&self, handler: CommitHandler) {
        self.inner.state.lock().commit_handler = Some(handler);
        drive_committer(&self.inner);
    }

    pub fn set_on_mutation(&self, callback: MutationCallback) {
        self.inner.state.lock().on_mutation = Some(callback);
    }

    pub fn set_on_remote_mutation(&self, callback: RemoteMutationCallback) {
        self.inner.state.lock().on_remote_mutation = Some(callback);
    }

    pub fn set_on_rebase(&self, callback: RebaseCallback) {
        self.inner.state.lock().on_rebase = Some(callback);
    }

    pub fn set_on_delete(&self, callback: DeleteCallback) {
        self.inner.state.lock().on_delete = Some(callback);
    }

    pub fn set_on_consistency_changed(&self, callback: ConsistencyCallback) {
        self.inner.state.lock().on_consistency_changed = Some(callback);
    }

    /// `EDGE` plus everything in the buffer.
    pub fn local(&self) -> Option<Value> {
        self.inner.state.lock().local.clone()
    }

    pub fn head(&self) -> Option<Value> {
        self.inner.state.lock().document.head().cloned()
    }

    pub fn edge(&self) -> Option<Value> {
        self.inner.state.lock().document.edge().cloned()
    }

    pub fn is_consistent(&self) -> bool {
        self.inner.state.lock().document.is_consistent()
    }

    pub fn inconsistent_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.state.lock().document.inconsistent_at()
    }

    pub fn last_staged_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.state.lock().document.last_staged_at()
    }

    /// Buffer a local edit. `LOCAL` advances immediately.
    pub fn add(&self, mutation: &Mutation) -> MutationResult<()> {
        self.inner.state.lock().add(mutation)
    }

    /// Feed a mutation that arrived from the server.
    pub fn arrive(&self, mutation: Mutation) -> DocumentResult<()> {
        let mut state = self.inner.state.lock();
        state.document.arrive(mutation)?;
        let events = self.inner.drain_outbox();
        state.handle_document_events(events)?;
        Ok(())
    }

    /// Send every buffered change to the transport as one mutation. The
    /// returned future resolves when the server accepts it, and rejects on
    /// cancellation or when retries run out. With nothing buffered the
    /// future resolves immediately.
    pub fn commit(&self) -> MutationResult<CommitFuture> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            match state.buffer.purge(None)? {
                Some(mutation) => {
                    debug!("queueing commit");
                    state.commits.push_back(PendingCommit {
                        mutations: vec![mutation],
                        tries: 0,
                        resolve: Some(sender),
                    });
                    state.buffer = SquashingBuffer::new(state.local.as_ref());
                }
                None => {
                    debug!("commit with no buffered changes is a no-op");
                    let _ = sender.send(Ok(()));
                }
            }
        }
        drive_committer(&self.inner);
        Ok(CommitFuture { receiver })
    }

    /// Throw away all local state and reload from a fresh snapshot. Queued
    /// commits are rejected; a commit already at the transport will still
    /// report its outcome through its responder.
    pub fn reset(&self, document: Option<Value>) {
        debug!("resetting buffered document");
        let mut state = self.inner.state.lock();
        state.reject_queued(CommitError::cancelled("document reset"));
        state.retry_epoch += 1;
        state.retry_pending = false;
        state.committer_running = false;
        state.document.reset(document.clone());
        state.local = document;
        state.buffer = SquashingBuffer::new(state.local.as_ref());
    }
}

impl State {
    fn add(&mut self, mutation: &Mutation) -> MutationResult<()> {
        debug!("buffering local mutation");
        self.buffer.add(mutation)?;

        let next = mutation.apply(self.local.as_ref())?;
        let deleted = self.local.is_some() && next.is_none();
        let unchanged = match (&self.local, &next) {
            (Some(old), Some(new)) => old.ptr_eq(new),
            (None, None) => true,
            _ => false,
        };
        self.local = next;

        if deleted {
            debug!("local mutation deleted the document");
            if let Some(callback) = &mut self.on_delete {
                callback(self.local.as_ref());
            }
        } else if !unchanged {
            if let Some(callback) = &mut self.on_mutation {
                callback(MutationEvent {
                    mutation,
                    document: self.local.as_ref(),
                    remote: false,
                });
            }
        }
        Ok(())
    }

    fn handle_document_events(&mut self, events: Vec<DocumentEvent>) -> MutationResult<()> {
        for event in events {
            match event {
                DocumentEvent::Mutation { mutation, remote } => {
                    self.handle_document_mutation(mutation, remote)?;
                }
                DocumentEvent::RemoteMutation(mutation) => {
                    if let Some(callback) = &mut self.on_remote_mutation {
                        callback(&mutation);
                    }
                }
                DocumentEvent::Rebase {
                    remote_mutations,
                    local_mutations,
                } => {
                    self.rebase_local(&remote_mutations, &local_mutations)?;
                }
                DocumentEvent::ConsistencyChanged(flag) => self.handle_consistency(flag),
            }
        }
        Ok(())
    }

    /// `EDGE` advanced in the normal order. With no local changes in flight
    /// the new document passes straight through to the host; otherwise the
    /// buffer replays on top of it.
    fn handle_document_mutation(&mut self, mutation: Mutation, remote: bool) -> MutationResult<()> {
        if self.commits.is_empty() && !self.buffer.has_changes() {
            self.local = self.document.edge().cloned();
            self.buffer = SquashingBuffer::new(self.local.as_ref());
            if let Some(callback) = &mut self.on_mutation {
                callback(MutationEvent {
                    mutation: &mutation,
                    document: self.local.as_ref(),
                    remote,
                });
            }
            return Ok(());
        }
        self.rebase_local(std::slice::from_ref(&mutation), &[])
    }

    fn rebase_local(
        &mut self,
        remote_mutations: &[Mutation],
        local_mutations: &[Mutation],
    ) -> MutationResult<()> {
        let old_local = self.local.clone();
        self.local = self.buffer.rebase(self.document.edge())?;
        if !content_equal(old_local.as_ref(), self.local.as_ref()) {
            debug!("rebase changed the local document");
            if let Some(callback) = &mut self.on_rebase {
                callback(RebaseEvent {
                    document: self.local.as_ref(),
                    remote_mutations,
                    local_mutations,
                });
            }
        }
        Ok(())
    }

    /// The buffered document is only consistent when the wrapped document
    /// is and nothing local is waiting either.
    fn handle_consistency(&mut self, document_consistent: bool) {
        if document_consistent {
            if self.commits.is_empty() && !self.buffer.has_changes() {
                if let Some(callback) = &mut self.on_consistency_changed {
                    callback(true);
                }
            }
        } else if let Some(callback) = &mut self.on_consistency_changed {
            callback(false);
        }
    }

    fn reject_queued(&mut self, error: CommitError) {
        for mut commit in self.commits.drain(..) {
            commit.reject(error.clone());
        }
    }
}

/// Submit the next queued commit unless one is already in flight or a
/// retry timer holds the queue. Loops so that a transport responding
/// synchronously immediately frees the committer for the next commit.
fn drive_committer(inner: &Arc<Inner>) {
    loop {
        let (handler, request) = {
            let mut state = inner.state.lock();
            if state.committer_running || state.retry_pending {
                return;
            }
            let Some(mut commit) = state.commits.pop_front() else {
                return;
            };
            let Some(handler) = state.commit_handler.clone() else {
                debug!("no commit handler installed, commit stays queued");
                state.commits.push_front(commit);
                return;
            };

            let mut squashed = Mutation::squash(&commit.mutations);
            squashed.transaction_id = Some(Uuid::new_v4().to_string());
            let submission = match state.document.stage(squashed.clone(), true) {
                Ok(submission) => submission,
                Err(error) => {
                    warn!(error = %error, "failed to stage commit, dropping it");
                    commit.reject(CommitError::cancelled(format!(
                        "failed to stage commit: {error}"
                    )));
                    continue;
                }
            };
            let events = inner.drain_outbox();
            if let Err(error) = state.handle_document_events(events) {
                warn!(error = %error, "error while handling staging events");
            }

            state.committer_running = true;
            debug!(
                transaction = submission.transaction_id(),
                tries = commit.tries,
                "submitting commit"
            );
            let responder = CommitResponder {
                inner: inner.clone(),
                commit,
                submission,
            };
            (handler, CommitRequest { mutation: squashed, responder })
        };
        handler(request);
    }
}

fn schedule_retry(inner: &Arc<Inner>, backoff: Duration, epoch: u64) {
    debug!(seconds = backoff.as_secs(), "scheduling commit retry");
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        {
            let mut state = inner.state.lock();
            if state.retry_epoch != epoch {
                debug!("commit retry overtaken by reset, skipping");
                return;
            }
            state.retry_pending = false;
        }
        drive_committer(&inner);
    });
}

/// Outcome channel for one submitted mutation. The transport must consume
/// it with exactly one of the three outcomes.
pub struct CommitResponder {
    inner: Arc<Inner>,
    commit: PendingCommit,
    submission: SubmissionResponder,
}

impl CommitResponder {
    /// The server accepted the mutation. Resolves the commit future and
    /// moves on to the next queued commit.
    pub fn success(self) {
        let CommitResponder {
            inner,
            mut commit,
            submission,
        } = self;
        {
            let mut state = inner.state.lock();
            debug!(transaction = submission.transaction_id(), "commit succeeded");
            if let Err(error) = submission.success(&mut state.document) {
                warn!(error = %error, "error resolving submitted mutation");
            }
            let events = inner.drain_outbox();
            if let Err(error) = state.handle_document_events(events) {
                warn!(error = %error, "error while handling commit events");
            }
            commit.resolve_ok();
            state.committer_running = false;
        }
        drive_committer(&inner);
    }

    /// The submission failed but may be worth retrying. Backs off by one
    /// second per attempt, capped at sixty seconds and two hundred tries.
    pub fn failure(self) {
        let CommitResponder {
            inner,
            mut commit,
            submission,
        } = self;
        let mut retry = None;
        {
            let mut state = inner.state.lock();
            commit.tries += 1;
            warn!(
                transaction = submission.transaction_id(),
                tries = commit.tries,
                "commit failed"
            );
            // Revert the optimistic effect before deciding what to do.
            if let Err(error) = submission.failure(&mut state.document) {
                warn!(error = %error, "error scrubbing failed mutation");
            }
            let events = inner.drain_outbox();
            if let Err(error) = state.handle_document_events(events) {
                warn!(error = %error, "error while handling failure events");
            }

            if state.local.is_none() {
                // The document is gone locally, retrying can never succeed.
                commit.reject(CommitError::cancelled("document was deleted"));
            } else if commit.tries >= MAX_COMMIT_TRIES {
                warn!(tries = commit.tries, "commit retries exhausted");
                commit.reject(CommitError::RetriesExhausted {
                    tries: commit.tries,
                });
            } else {
                let backoff =
                    Duration::from_secs(u64::from(commit.tries).min(MAX_RETRY_BACKOFF_SECS));
                state.commits.push_front(commit);
                state.retry_pending = true;
                retry = Some((backoff, state.retry_epoch));
            }
            state.committer_running = false;
        }
        match retry {
            Some((backoff, epoch)) => schedule_retry(&inner, backoff, epoch),
            None => drive_committer(&inner),
        }
    }

    /// The transport determined retrying is futile. Rejects this commit
    /// and everything queued, then resets to the last server snapshot.
    pub fn cancel(self, reason: impl Into<String>) {
        let CommitResponder {
            inner,
            mut commit,
            submission: _,
        } = self;
        let reason = reason.into();
        warn!(reason = reason.as_str(), "transport cancelled the commit");
        let mut state = inner.state.lock();
        let error = CommitError::cancelled(reason);
        commit.reject(error.clone());
        state.reject_queued(error);
        state.retry_epoch += 1;
        state.retry_pending = false;
        state.committer_running = false;
        let head = state.document.head().cloned();
        state.document.reset(head.clone());
        state.local = head;
        state.buffer = SquashingBuffer::new(state.local.as_ref());
    }
}
