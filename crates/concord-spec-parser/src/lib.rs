//! Swagger 2.0 and OpenAPI 3.x document model.
//!
//! Reads YAML/JSON specs into a closed [`SchemaNode`] tree, detects the
//! dialect from the root `swagger` or `openapi` field, and provides the
//! pointer helpers shared by the resolver and the compiler.

pub mod error;
pub mod model;
pub mod parser;
pub mod pointer;

pub use error::ParseError;
pub use model::{Dialect, NodeMap, RefKind, RefNode, SchemaNode, SourceDocument};
pub use parser::{is_spec_file, parse_document};
