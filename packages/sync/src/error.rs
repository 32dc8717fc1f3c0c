//! Error types for the synchronization layer.

use eddy_patch::MutationError;
use thiserror::Error;

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// Staged mutations must be addressable when the transport confirms or
    /// rejects them.
    #[error("mutations must carry a transactionId when staged")]
    MissingTransactionId,

    /// The incoming queue kept producing applicable mutations without
    /// draining, which means revision chaining is broken. The host should
    /// reset the document.
    #[error("stuck flushing incoming mutations, likely at transaction {transaction_id}")]
    StuckIncoming { transaction_id: String },

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Terminal outcome of a commit that never reached the server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    #[error("commit cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("commit failed after {tries} attempts")]
    RetriesExhausted { tries: u32 },
}

impl CommitError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}
