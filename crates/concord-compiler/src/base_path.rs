//! Effective base path per document and segment-aware path prefixing.

use concord_spec_parser::{Dialect, NodeMap, SchemaNode, SourceDocument};
use url::Url;

/// The base path every declared path of `doc` is prefixed with.
///
/// Legacy documents use `basePath` verbatim. Current documents use the path
/// of the first server URL, after substituting server variable defaults;
/// a relative server URL is itself the base path. A document under a
/// `legacy/` directory that declares nothing inherits `inherited`.
pub fn effective_base_path(doc: &SourceDocument, inherited: Option<&str>) -> String {
    let own = match doc.dialect {
        Dialect::Legacy => doc.declared_base_path().map(normalize_base),
        Dialect::Current => current_base_path(doc),
    };
    match own {
        Some(base) if !base.is_empty() => base,
        _ if doc.in_legacy_dir() => inherited.map(normalize_base).unwrap_or_default(),
        _ => String::new(),
    }
}

fn current_base_path(doc: &SourceDocument) -> Option<String> {
    let Some(server) = doc.servers().first() else {
        tracing::warn!(file = %doc.file_id, "no servers declared, using empty base path");
        return None;
    };
    let Some(url) = server_url(server) else {
        tracing::warn!(file = %doc.file_id, "server has no url, using empty base path");
        return None;
    };
    match server_url_path(&url) {
        Some(path) => Some(normalize_base(&path)),
        None => {
            tracing::warn!(file = %doc.file_id, url = %url, "unparsable server url, using empty base path");
            None
        }
    }
}

/// The server's `url` with `{variable}` placeholders replaced by defaults.
pub fn server_url(server: &SchemaNode) -> Option<String> {
    let mut url = server.get("url")?.as_str()?.to_string();
    if let Some(SchemaNode::Object(variables)) = server.get("variables") {
        for (name, variable) in variables {
            if let Some(default) = variable.get("default").and_then(SchemaNode::as_str) {
                url = url.replace(&format!("{{{}}}", name), default);
            }
        }
    }
    Some(url)
}

/// Path component of a server URL. Relative URLs are returned as-is.
pub fn server_url_path(url: &str) -> Option<String> {
    if url.starts_with('/') {
        let end = url.find(['?', '#']).unwrap_or(url.len());
        return Some(url[..end].to_string());
    }
    Url::parse(url).ok().map(|parsed| parsed.path().to_string())
}

/// `scheme://host[:port]` of an absolute server URL.
pub fn server_origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Trim trailing slashes and ensure a leading one; `/` becomes empty.
fn normalize_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Prefix `path` with `base` unless it already starts with it.
///
/// The check is per segment: base `/v1` does not match `/v10/x`. When `base`
/// ends in a version segment that `path` starts with, the segment is spliced
/// instead of repeated (`/platform/v1` + `/v1/users` -> `/platform/v1/users`).
pub fn prefix_path(base: &str, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    if base.is_empty() {
        return path;
    }
    if path == "/" {
        return base.to_string();
    }
    if starts_with_segments(&path, base) {
        return path;
    }
    if let Some(version) = base.rsplit('/').next().filter(|s| is_version_segment(s)) {
        let segment = format!("/{}", version);
        if starts_with_segments(&path, &segment) {
            let stem = &base[..base.len() - segment.len()];
            return format!("{}{}", stem, path);
        }
    }
    format!("{}{}", base, path)
}

fn starts_with_segments(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn is_version_segment(segment: &str) -> bool {
    match segment.strip_prefix('v') {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Origin of the first absolute server URL in a converted body.
pub(crate) fn body_server_origin(body: &NodeMap) -> Option<String> {
    let first = body.get("servers")?.as_array()?.first()?;
    server_origin(&server_url(first)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use concord_spec_parser::parse_document;

    fn doc(file_id: &str, yaml: &str) -> SourceDocument {
        parse_document(yaml, "billing", file_id, Utc::now()).unwrap()
    }

    #[test]
    fn no_double_prefix() {
        assert_eq!(prefix_path("/v1", "/v1/users"), "/v1/users");
        assert_eq!(prefix_path("/v1", "/v1"), "/v1");
        assert_eq!(prefix_path("/v1", "/users"), "/v1/users");
    }

    #[test]
    fn prefix_check_is_per_segment() {
        assert_eq!(prefix_path("/v1", "/v10/users"), "/v1/v10/users");
        assert_eq!(prefix_path("/api", "/apis"), "/api/apis");
    }

    #[test]
    fn version_segment_is_spliced() {
        assert_eq!(prefix_path("/platform/v1", "/v1/users"), "/platform/v1/users");
        assert_eq!(prefix_path("/platform/v1", "/v2/users"), "/platform/v1/v2/users");
    }

    #[test]
    fn empty_base_and_root_path() {
        assert_eq!(prefix_path("", "users"), "/users");
        assert_eq!(prefix_path("/v1", "/"), "/v1");
    }

    #[test]
    fn legacy_base_path_verbatim() {
        let d = doc(
            "pets.yaml",
            r#"
swagger: "2.0"
info: { title: t, version: "1" }
basePath: /billing/v2/
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&d, None), "/billing/v2");
    }

    #[test]
    fn current_base_path_from_server_with_variables() {
        let d = doc(
            "pets.yaml",
            r#"
openapi: "3.0.3"
info: { title: t, version: "1" }
servers:
  - url: "https://{region}.example.com/{version}"
    variables:
      region: { default: eu }
      version: { default: v3 }
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&d, None), "/v3");
    }

    #[test]
    fn relative_server_url_is_base_path() {
        let d = doc(
            "pets.yaml",
            r#"
openapi: "3.0.3"
info: { title: t, version: "1" }
servers: [ { url: /v2 } ]
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&d, None), "/v2");
    }

    #[test]
    fn missing_or_unparsable_server_gives_empty_base() {
        let none = doc(
            "a.yaml",
            r#"
openapi: "3.0.3"
info: { title: t, version: "1" }
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&none, None), "");

        let bad = doc(
            "b.yaml",
            r#"
openapi: "3.0.3"
info: { title: t, version: "1" }
servers: [ { url: "not a url" } ]
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&bad, None), "");
    }

    #[test]
    fn legacy_directory_inherits_domain_base() {
        let d = doc(
            "legacy/old.yaml",
            r#"
swagger: "2.0"
info: { title: t, version: "1" }
paths: {}
"#,
        );
        assert_eq!(effective_base_path(&d, Some("/billing/v1")), "/billing/v1");
        assert_eq!(effective_base_path(&d, None), "");
    }

    #[test]
    fn origin_of_server_url() {
        assert_eq!(
            server_origin("https://api.example.com:8443/v1").as_deref(),
            Some("https://api.example.com:8443")
        );
        assert_eq!(server_origin("/v1"), None);
    }
}
