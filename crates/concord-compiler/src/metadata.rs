//! Generation metadata embedded under `info.x-generated`.
//!
//! Everything here is observability: nothing downstream of the merge reads
//! it back. Serialization order is fixed so two runs over the same input
//! differ only in `generatedAt`.

use std::collections::BTreeMap;

use concord_spec_parser::Dialect;
use serde::Serialize;

/// Key of the metadata object inside `info`.
pub const METADATA_KEY: &str = "x-generated";

/// Entity class a conflict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictClass {
    Path,
    Schema,
    Security,
    Other,
}

impl std::fmt::Display for ConflictClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictClass::Path => "path",
            ConflictClass::Schema => "schema",
            ConflictClass::Security => "security",
            ConflictClass::Other => "other",
        };
        f.write_str(name)
    }
}

/// How a conflict was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// The contribution with the newest modification time won.
    NewerFileWins,
    /// Modification times tied; the file later in processing order won.
    LaterInOrderWins,
    /// The first definition kept its name; the later one was renamed.
    FirstWinsRenamed,
    /// The first definition won; later ones were discarded.
    FirstDefinitionWins,
    /// The last definition in processing order overwrote earlier ones.
    LastWriteWins,
}

/// One resolution decision. Never mutated once appended to a [`ConflictLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub class: ConflictClass,
    pub key: String,
    pub winning_source: String,
    pub losing_sources: Vec<String>,
    pub strategy: Strategy,
    /// New name of the losing schema, for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed_to: Option<String>,
}

/// Append-only conflict records, grouped by class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictLog {
    paths: Vec<ConflictRecord>,
    schemas: Vec<ConflictRecord>,
    security: Vec<ConflictRecord>,
    other: Vec<ConflictRecord>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: ConflictRecord) {
        match record.class {
            ConflictClass::Path => self.paths.push(record),
            ConflictClass::Schema => self.schemas.push(record),
            ConflictClass::Security => self.security.push(record),
            ConflictClass::Other => self.other.push(record),
        }
    }

    pub fn by_class(&self, class: ConflictClass) -> &[ConflictRecord] {
        match class {
            ConflictClass::Path => &self.paths,
            ConflictClass::Schema => &self.schemas,
            ConflictClass::Security => &self.security,
            ConflictClass::Other => &self.other,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.paths
            .iter()
            .chain(&self.schemas)
            .chain(&self.security)
            .chain(&self.other)
    }

    pub fn len(&self) -> usize {
        self.paths.len() + self.schemas.len() + self.security.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps a unified path back to the file and path it was declared as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNormalization {
    pub file: String,
    pub original: String,
    pub normalized: String,
    pub base_path: String,
    pub dialect: Dialect,
}

/// A legacy construct left unconverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedConversion {
    pub file: String,
    pub location: String,
    pub reason: String,
}

/// An external pointer that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub file: String,
    pub pointer: String,
    pub error: String,
}

/// A pointer to a contested schema name from a file that did not define it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedReference {
    pub file: String,
    pub pointer: String,
    /// Source file of the definition the pointer now reaches.
    pub resolved_to: String,
}

/// The `info.x-generated` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub generated_at: String,
    pub source_files: Vec<String>,
    /// `"GET /v1/users"` -> winning file.
    pub operation_sources: BTreeMap<String, String>,
    pub path_normalizations: Vec<PathNormalization>,
    pub conflicts: ConflictLog,
    pub skipped_conversions: Vec<SkippedConversion>,
    pub unresolved_references: Vec<UnresolvedReference>,
    pub dangling_references: Vec<String>,
    pub flagged_references: Vec<FlaggedReference>,
    pub total_paths: usize,
    pub total_schemas: usize,
}
