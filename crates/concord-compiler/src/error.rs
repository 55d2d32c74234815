use serde::Serialize;
use thiserror::Error;

/// Fatal errors of a unification run.
///
/// Per-file and per-pointer problems are not errors; they are reported as
/// [`UnifyWarning`]s and in the generation metadata.
#[derive(Debug, Error)]
pub enum UnifyError {
    /// Spec parsing failed.
    #[error(transparent)]
    Parse(#[from] concord_spec_parser::ParseError),

    /// The resolver could not be constructed.
    #[error(transparent)]
    Resolve(#[from] concord_resolver::ResolveError),

    /// E2401: The input root cannot be read.
    #[error("E2401: cannot read input directory {path}: {source}")]
    InputUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// E2402: The output directory or an output file cannot be written.
    #[error("E2402: cannot write {path}: {source}")]
    OutputUnwritable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A non-fatal issue found while unifying a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifyWarning {
    /// Stable code (`E2001`, `E2101`, `E2201`, `E2301`, ...).
    pub code: String,
    pub message: String,
    /// File or `file: location` the warning applies to.
    pub location: Option<String>,
}

impl UnifyWarning {
    pub fn new(code: &str, message: impl Into<String>, location: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            location,
        }
    }
}

impl std::fmt::Display for UnifyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} [{}]: {}", self.code, location, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}
