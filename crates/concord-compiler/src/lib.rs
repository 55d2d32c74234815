//! Unifies per-file Swagger 2.0 / OpenAPI 3.x documents into one
//! OpenAPI 3.0.3 document per domain.
//!
//! Converts legacy documents, prefixes paths with their base path, inlines
//! external references, merges with conflict resolution and records every
//! decision under `info.x-generated`.

pub mod base_path;
pub mod dialect;
pub mod document;
pub mod error;
pub mod merge;
pub mod metadata;
pub mod unify;

pub use base_path::{effective_base_path, prefix_path, server_origin, server_url};
pub use dialect::{normalize_dialect, Conversion, CONVERSION_SKIPPED_KEY};
pub use document::NormalizedDocument;
pub use error::{UnifyError, UnifyWarning};
pub use merge::{merge_documents, MergedDomain, DANGLING_KEY};
pub use metadata::{
    ConflictClass, ConflictLog, ConflictRecord, FlaggedReference, GenerationMetadata,
    PathNormalization, SkippedConversion, Strategy, UnresolvedReference, METADATA_KEY,
};
pub use unify::{
    assemble, discover_domains, discover_files, unify, unify_with_resolver, DomainReport,
    RunSummary, UnifyOptions, OUTPUT_INFO_VERSION, OUTPUT_OPENAPI_VERSION,
};
// Re-export resolver types callers need to configure a run
pub use concord_resolver::{CacheStats, Mirror};
