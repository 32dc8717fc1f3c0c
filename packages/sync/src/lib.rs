//! Optimistic synchronization of documents against a remote store.
//!
//! A [`Document`] tracks two versions of one document: `HEAD`, the last
//! state confirmed by the server, and `EDGE`, `HEAD` plus every local
//! submission still awaiting confirmation. Mutations arriving out of order
//! queue until their revision chains up, and submissions that fail are
//! rolled back by rebasing.
//!
//! [`BufferedDocument`] adds the editing layer on top: local changes
//! collect in a [`SquashingBuffer`] where consecutive edits collapse, and
//! `commit()` ships them to a pluggable transport with retry and
//! cancellation handling.

pub mod buffered;
pub mod document;
pub mod error;
pub mod squash;

pub use buffered::{
    BufferedDocument, CommitFuture, CommitHandler, CommitRequest, CommitResponder,
    DeleteCallback,
};
pub use document::{
    ConsistencyCallback, Document, MutationCallback, MutationEvent, RebaseCallback,
    RebaseEvent, RemoteMutationCallback, SubmissionResponder,
};
pub use error::{CommitError, DocumentError, DocumentResult};
pub use squash::SquashingBuffer;
