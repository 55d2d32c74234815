use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ParseError;
use crate::model::{Dialect, NodeMap, SchemaNode, SourceDocument};

/// File extensions we treat as spec documents.
const SPEC_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// Whether a file should be picked up by discovery.
///
/// Backup copies (`users.bak.json`, `users.json.bak`) are ignored.
pub fn is_spec_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };
    if name.contains(".bak") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SPEC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse a Swagger 2.0 or OpenAPI 3.x document from a YAML/JSON string.
pub fn parse_document(
    input: &str,
    domain: &str,
    file_id: &str,
    modified: DateTime<Utc>,
) -> Result<SourceDocument, ParseError> {
    // Parse YAML (also handles JSON since JSON is valid YAML)
    let root: Value = serde_yaml::from_str(input).map_err(|e| ParseError::Syntax {
        file: file_id.to_string(),
        message: e.to_string(),
    })?;

    let body = match SchemaNode::from(root) {
        SchemaNode::Object(map) => map,
        _ => {
            return Err(ParseError::NotAnApiSpec {
                file: file_id.to_string(),
                reason: "document root must be an object".into(),
            })
        }
    };

    let (dialect, version) = detect_dialect(&body, file_id)?;

    for required in ["info", "paths"] {
        if body.get(required).and_then(SchemaNode::as_object).is_none() {
            return Err(ParseError::NotAnApiSpec {
                file: file_id.to_string(),
                reason: format!("missing '{}' object", required),
            });
        }
    }

    Ok(SourceDocument {
        domain: domain.to_string(),
        file_id: file_id.to_string(),
        dialect,
        version,
        modified,
        body,
    })
}

/// Detect the dialect from the root `swagger` / `openapi` field.
fn detect_dialect(root: &NodeMap, file_id: &str) -> Result<(Dialect, String), ParseError> {
    if let Some(version) = root.get("swagger").and_then(version_string) {
        if !version.starts_with("2.") {
            return Err(ParseError::UnsupportedVersion {
                file: file_id.to_string(),
                version,
            });
        }
        Ok((Dialect::Legacy, version))
    } else if let Some(version) = root.get("openapi").and_then(version_string) {
        if !version.starts_with("3.") {
            return Err(ParseError::UnsupportedVersion {
                file: file_id.to_string(),
                version,
            });
        }
        Ok((Dialect::Current, version))
    } else {
        Err(ParseError::NotAnApiSpec {
            file: file_id.to_string(),
            reason: "no 'swagger' or 'openapi' root field".into(),
        })
    }
}

/// Unquoted YAML versions (`swagger: 2.0`) arrive as numbers.
fn version_string(node: &SchemaNode) -> Option<String> {
    match node {
        SchemaNode::String(s) => Some(s.clone()),
        SchemaNode::Number(n) => {
            let s = n.to_string();
            Some(if s.contains('.') { s } else { format!("{}.0", s) })
        }
        _ => None,
    }
}
