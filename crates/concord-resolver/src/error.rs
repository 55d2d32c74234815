use thiserror::Error;

/// Why a pointer could not be resolved (E2101–E2102).
///
/// `Clone` because one in-flight fetch result is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// E2101: Local file could not be read.
    #[error("E2101: failed to read {path}: {message}")]
    Read { path: String, message: String },

    /// E2101: Network request failed before a response arrived.
    #[error("E2101: failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// E2102: Server answered with a non-success status.
    #[error("E2102: HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// E2101: Body is not valid JSON/YAML.
    #[error("E2101: invalid document at {location}: {message}")]
    Parse { location: String, message: String },

    /// E2101: The fragment does not exist in the fetched document.
    #[error("E2101: fragment #{fragment} not found in {location}")]
    MissingFragment { location: String, fragment: String },

    /// E2101: A relative pointer could not be joined onto its base.
    #[error("E2101: cannot resolve {pointer} against {base}")]
    InvalidLocation { pointer: String, base: String },

    /// HTTP client construction failed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
