use thiserror::Error;

/// Errors produced while loading a source document (E2001–E2003).
///
/// A document that fails to parse is skipped; the run continues.
#[derive(Debug, Error)]
pub enum ParseError {
    /// E2001: YAML/JSON parse error.
    #[error("E2001: parse error in {file}: {message}")]
    Syntax { file: String, message: String },

    /// E2002: Parsed, but not a Swagger 2.0 or OpenAPI 3.x document.
    #[error("E2002: {file} is not a valid Swagger/OpenAPI spec: {reason}")]
    NotAnApiSpec { file: String, reason: String },

    /// E2003: Recognized root field with an unsupported version.
    #[error("E2003: {file} declares unsupported version {version}")]
    UnsupportedVersion { file: String, version: String },

    /// I/O error reading the spec file.
    #[error("I/O error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}
