//! Path expressions over JSON-shaped documents.
//!
//! A path selects locations inside a document: attribute chains (`a.b.c`),
//! indices and ranges (`items[0]`, `rows[2:4]`), unions (`[a,b]`),
//! constraints (`rows[_key == "abc"]`) and recursive descent (`..title`).
//! Parsing produces an [`Expr`] tree; [`Matcher`] walks that tree against
//! any value exposing the [`Probe`] interface, one level at a time, so the
//! write side can follow matches into its own document representation.

pub mod ast;
pub mod descender;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod parser;
pub mod probe;
pub mod serializer;
pub mod tokenizer;

pub use ast::{concat, resolve_bounds, resolve_index, Comparator, Expr};
pub use descender::Descender;
pub use error::{ParseError, ParseResult};
pub use extract::{extract, extract_with_path, matches_with_path, path_from_segments, PathSegment};
pub use matcher::{Lead, MatchResult, Matcher};
pub use parser::parse;
pub use probe::{ContainerKind, Probe, Scalar};
pub use serializer::{to_path_string, Serializer};
pub use tokenizer::{tokenize, Token};
