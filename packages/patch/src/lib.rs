//! Patches and mutations over immutable document values.
//!
//! Documents are [`Value`] trees: persistent, structurally shared, and
//! copy-on-write. A [`Patch`] carries the seven edit verbs keyed by path
//! strings, a [`Patcher`] applies one patch to a document, and a
//! [`Mutation`] bundles create/delete/patch operations with revision
//! stamping so the same shape works for local edits and for transactions
//! arriving from a server.

pub mod dmp;
pub mod error;
pub mod mutation;
pub mod patch;
pub mod value;

pub use error::{MutationError, MutationResult, PatchError, PatchResult};
pub use mutation::{DeleteTarget, Mutation, Operation, PatchSelection};
pub use patch::{InsertSpec, Patch, Patcher};
pub use value::Value;
