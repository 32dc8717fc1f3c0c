use eddy_jsonpath::ParseError;
use thiserror::Error;

pub type PatchResult<T> = Result<T, PatchError>;
pub type MutationResult<T> = Result<T, MutationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("Invalid path {path:?}: {source}")]
    InvalidPath { path: String, source: ParseError },

    #[error("Cannot apply patch: the target document has no _id")]
    MissingDocumentId,

    #[error("{verb} cannot be applied to {kind} values")]
    IncompatibleTarget {
        verb: &'static str,
        kind: &'static str,
    },

    #[error("Insert must use exactly one of before, after or replace")]
    AmbiguousInsertLocation,

    #[error("Malformed diff-match-patch at {pos}: {message}")]
    MalformedDiff { pos: usize, message: String },
}

impl PatchError {
    pub fn invalid_path(path: impl Into<String>, source: ParseError) -> Self {
        Self::InvalidPath {
            path: path.into(),
            source,
        }
    }

    pub fn incompatible_target(verb: &'static str, kind: &'static str) -> Self {
        Self::IncompatibleTarget { verb, kind }
    }

    pub fn malformed_diff(pos: usize, message: impl Into<String>) -> Self {
        Self::MalformedDiff {
            pos,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Stale revision: mutation expects {expected:?} but the document is at {actual:?}")]
    RevisionMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl MutationError {
    pub fn revision_mismatch(expected: impl Into<String>, actual: Option<String>) -> Self {
        Self::RevisionMismatch {
            expected: expected.into(),
            actual,
        }
    }
}
