//! `$ref` resolution for spec unification.
//!
//! External pointers (network locations and file paths) are fetched, cached
//! per run, and inlined recursively. Same-document pointers (`#/...`) are left
//! untouched: they only make sense once documents are merged.
//!
//! # Usage
//!
//! ```ignore
//! use concord_resolver::{BaseContext, Resolver, ResolverConfig};
//!
//! let resolver = Resolver::new(ResolverConfig::default())?;
//! let resolved = resolver.resolve_all(&schema, &BaseContext::dir("swagger/billing")).await;
//! ```

pub mod cache;
pub mod compose;
pub mod error;
pub mod fetch;

pub use cache::{CacheStats, ResolutionCache};
pub use compose::{flatten_composition, flatten_composition_with};
pub use error::ResolveError;
pub use fetch::{BaseContext, Location, Mirror, Target};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use concord_spec_parser::model::classify_pointer;
use concord_spec_parser::{NodeMap, RefKind, RefNode, SchemaNode};
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::redirect;

/// Annotation attached to a `$ref` node whose target could not be loaded.
pub const RESOLVE_ERROR_KEY: &str = "x-resolve-error";

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// URL prefixes served from local directories.
    pub mirrors: Vec<Mirror>,
    /// Maximum redirects followed per fetch (default: 10).
    pub max_redirects: usize,
    /// Connect timeout for remote fetches (default: 10s).
    pub connect_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            max_redirects: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve URLs under `prefix` from `dir` when the file exists.
    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirrors.push(mirror);
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }
}

/// Dereferences external pointers. One instance per run.
pub struct Resolver {
    client: reqwest::Client,
    mirrors: Vec<Mirror>,
    cache: Arc<ResolutionCache>,
}

impl Resolver {
    /// Create a resolver with a fresh cache.
    pub fn new(config: ResolverConfig) -> Result<Self, ResolveError> {
        Self::with_cache(config, Arc::new(ResolutionCache::new()))
    }

    /// Create a resolver over an existing cache.
    pub fn with_cache(
        config: ResolverConfig,
        cache: Arc<ResolutionCache>,
    ) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::limited(config.max_redirects))
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("concord/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::Client(e.to_string()))?;

        Ok(Self {
            client,
            mirrors: config.mirrors,
            cache,
        })
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Clear the cache between independent runs.
    pub fn reset(&self) {
        self.cache.clear();
    }

    /// Dereference one pointer to its schema body.
    ///
    /// Internal pointers are returned unchanged as a `$ref` node.
    pub async fn resolve(
        &self,
        pointer: &str,
        base: &BaseContext,
    ) -> Result<SchemaNode, ResolveError> {
        if let RefKind::Internal(_) = classify_pointer(pointer) {
            return Ok(SchemaNode::Ref(RefNode::new(pointer)));
        }
        let target = fetch::locate(pointer, base)?;
        self.load_cached(&target).await
    }

    async fn load_cached(&self, target: &Target) -> Result<SchemaNode, ResolveError> {
        let client = self.client.clone();
        let mirrors = self.mirrors.clone();
        let fetch_target = target.clone();

        self.cache
            .get_or_fetch(&target.key(), move || {
                tracing::debug!(location = %fetch_target.key(), "fetching external reference");
                fetch::load(client, mirrors, fetch_target).boxed()
            })
            .await
    }

    /// Replace every external `$ref` in `schema` with its resolved body,
    /// recursively. Internal pointers are left untouched; a pointer already
    /// being expanded higher up the same chain is left in place.
    ///
    /// A pointer that fails to resolve stays in place with an
    /// [`RESOLVE_ERROR_KEY`] annotation.
    pub async fn resolve_all(&self, schema: &SchemaNode, base: &BaseContext) -> SchemaNode {
        let mut visited = HashSet::new();
        self.resolve_node(schema, base, &mut visited).await
    }

    fn resolve_node<'a>(
        &'a self,
        node: &'a SchemaNode,
        base: &'a BaseContext,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, SchemaNode> {
        async move {
            match node {
                SchemaNode::Ref(r) if r.is_internal() => node.clone(),
                SchemaNode::Ref(r) => self.resolve_external(r, base, visited).await,
                SchemaNode::Object(map) => {
                    let mut out = NodeMap::new();
                    for (key, child) in map {
                        let resolved = self.resolve_node(child, base, visited).await;
                        out.insert(key.clone(), resolved);
                    }
                    SchemaNode::Object(out)
                }
                SchemaNode::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_node(item, base, visited).await);
                    }
                    SchemaNode::Array(out)
                }
                SchemaNode::Null
                | SchemaNode::Bool(_)
                | SchemaNode::Number(_)
                | SchemaNode::String(_) => node.clone(),
            }
        }
        .boxed()
    }

    async fn resolve_external(
        &self,
        r: &RefNode,
        base: &BaseContext,
        visited: &mut HashSet<String>,
    ) -> SchemaNode {
        let target = match fetch::locate(&r.pointer, base) {
            Ok(target) => target,
            Err(e) => return annotate_unresolved(r, &e),
        };
        let chain_key = target.key();
        if visited.contains(&chain_key) {
            tracing::debug!(pointer = %r.pointer, "cyclic external reference left in place");
            return SchemaNode::Ref(r.clone());
        }

        match self.load_cached(&target).await {
            Ok(body) => {
                visited.insert(chain_key.clone());
                let child_base = target.location.child_context();
                let mut resolved = self.resolve_node(&body, &child_base, visited).await;
                visited.remove(&chain_key);

                // Sibling keywords next to the pointer win over the body.
                if let SchemaNode::Object(map) = &mut resolved {
                    for (k, v) in &r.siblings {
                        map.insert(k.clone(), v.clone());
                    }
                }
                resolved
            }
            Err(e) => annotate_unresolved(r, &e),
        }
    }
}

fn annotate_unresolved(r: &RefNode, error: &ResolveError) -> SchemaNode {
    concord_telemetry::log_reference_unresolved!(
        pointer = %r.pointer,
        error = %error,
        "unresolved reference"
    );
    let mut annotated = r.clone();
    annotated.siblings.insert(
        RESOLVE_ERROR_KEY.to_string(),
        SchemaNode::string(error.to_string()),
    );
    SchemaNode::Ref(annotated)
}

/// External pointers still present in `schema` (sorted, de-duplicated).
pub fn collect_external_refs(schema: &SchemaNode) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    schema.walk_refs(&mut |r| {
        if !r.is_internal() {
            refs.insert(r.pointer.clone());
        }
    });
    refs
}

/// `(pointer, error)` for every pointer annotated as unresolved.
pub fn unresolved_refs(schema: &SchemaNode) -> Vec<(String, String)> {
    let mut out = Vec::new();
    schema.walk_refs(&mut |r| {
        if let Some(message) = r.siblings.get(RESOLVE_ERROR_KEY).and_then(SchemaNode::as_str) {
            out.push((r.pointer.clone(), message.to_string()));
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig::default()).unwrap()
    }

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        let file = dir.join(name);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[test]
    fn collect_external_refs_skips_internal() {
        let schema = SchemaNode::from(json!({
            "a": { "$ref": "#/components/schemas/User" },
            "b": { "$ref": "https://schemas.example.com/pet.json" },
            "c": [ { "$ref": "common/money.yaml" }, { "$ref": "common/money.yaml" } ]
        }));
        let refs: Vec<_> = collect_external_refs(&schema).into_iter().collect();
        assert_eq!(refs, vec!["common/money.yaml", "https://schemas.example.com/pet.json"]);
    }

    #[test]
    fn unresolved_refs_reads_annotations() {
        let schema = SchemaNode::from(json!({
            "a": { "$ref": "missing.json", "x-resolve-error": "E2101: boom" },
            "b": { "$ref": "#/components/schemas/User" }
        }));
        assert_eq!(
            unresolved_refs(&schema),
            vec![("missing.json".to_string(), "E2101: boom".to_string())]
        );
    }

    #[tokio::test]
    async fn internal_pointer_is_returned_untouched() {
        let r = resolver();
        let node = r
            .resolve("#/components/schemas/User", &BaseContext::dir("."))
            .await
            .unwrap();
        assert_eq!(node.as_ref_node().unwrap().pointer, "#/components/schemas/User");
        assert_eq!(r.cache_stats().fetches_started, 0);
    }

    #[tokio::test]
    async fn resolves_local_file_relative_to_base_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "shared/money.json", json!({ "type": "number", "format": "double" }));

        let r = resolver();
        let node = r
            .resolve("shared/money.json", &BaseContext::dir(dir.path()))
            .await
            .unwrap();
        assert_eq!(node, SchemaNode::from(json!({ "type": "number", "format": "double" })));
    }

    #[tokio::test]
    async fn resolves_fragment_inside_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "common.json",
            json!({ "definitions": { "Amount": { "type": "integer" } } }),
        );

        let r = resolver();
        let node = r
            .resolve("common.json#/definitions/Amount", &BaseContext::dir(dir.path()))
            .await
            .unwrap();
        assert_eq!(node, SchemaNode::from(json!({ "type": "integer" })));

        let missing = r
            .resolve("common.json#/definitions/Nope", &BaseContext::dir(dir.path()))
            .await;
        assert!(matches!(missing, Err(ResolveError::MissingFragment { .. })));
    }

    #[tokio::test]
    async fn resolve_all_inlines_nested_external_refs() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "entities/pet.json",
            json!({
                "type": "object",
                "properties": {
                    "category": { "$ref": "category.json" },
                    "owner": { "$ref": "#/components/schemas/User" }
                }
            }),
        );
        write(dir.path(), "entities/category.json", json!({ "type": "string" }));

        let schema = SchemaNode::from(json!({
            "items": { "$ref": "entities/pet.json", "description": "a pet" }
        }));
        let resolved = resolver()
            .resolve_all(&schema, &BaseContext::dir(dir.path()))
            .await;

        assert_eq!(
            resolved,
            SchemaNode::from(json!({
                "items": {
                    "type": "object",
                    "description": "a pet",
                    "properties": {
                        "category": { "type": "string" },
                        "owner": { "$ref": "#/components/schemas/User" }
                    }
                }
            }))
        );
    }

    #[tokio::test]
    async fn self_referential_external_schema_terminates() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node.json",
            json!({
                "type": "object",
                "properties": { "next": { "$ref": "node.json" } }
            }),
        );

        let schema = SchemaNode::from(json!({ "$ref": "node.json" }));
        let resolved = resolver()
            .resolve_all(&schema, &BaseContext::dir(dir.path()))
            .await;

        // One level expanded, the cycle left as a pointer.
        let next = resolved.get("properties").unwrap().get("next").unwrap();
        assert_eq!(next.as_ref_node().unwrap().pointer, "node.json");
    }

    async fn assert_mutual_cycle_expands_once(to_b: &str, to_a: &str, entry: &str) {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "shared/a.json",
            json!({ "type": "object", "properties": { "b": { "$ref": to_b } } }),
        );
        write(
            dir.path(),
            "shared/b.json",
            json!({ "type": "object", "properties": { "a": { "$ref": to_a } } }),
        );

        let resolver = resolver();
        let schema = SchemaNode::from(json!({ "$ref": entry }));
        let resolved = resolver
            .resolve_all(&schema, &BaseContext::dir(dir.path()))
            .await;

        assert_eq!(
            resolved,
            SchemaNode::from(json!({
                "type": "object",
                "properties": {
                    "b": {
                        "type": "object",
                        "properties": { "a": { "$ref": to_a } }
                    }
                }
            }))
        );
        assert_eq!(resolver.cache_stats().fetches_started, 2);
    }

    #[tokio::test]
    async fn mutual_cycle_through_parent_dir_terminates() {
        assert_mutual_cycle_expands_once("../shared/b.json", "../shared/a.json", "shared/a.json")
            .await;
    }

    #[tokio::test]
    async fn mutual_cycle_through_current_dir_terminates() {
        assert_mutual_cycle_expands_once("./b.json", "./a.json", "./shared/a.json").await;
    }

    #[tokio::test]
    async fn unreadable_file_is_annotated_in_place() {
        let dir = TempDir::new().unwrap();
        let schema = SchemaNode::from(json!({ "a": { "$ref": "missing.json" } }));
        let resolved = resolver()
            .resolve_all(&schema, &BaseContext::dir(dir.path()))
            .await;

        let a = resolved.get("a").unwrap().as_ref_node().unwrap();
        assert_eq!(a.pointer, "missing.json");
        let message = a.siblings.get(RESOLVE_ERROR_KEY).unwrap().as_str().unwrap();
        assert!(message.starts_with("E2101"));
        assert_eq!(unresolved_refs(&resolved).len(), 1);
    }

    #[tokio::test]
    async fn remote_fetch_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/pet.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "type": "object" })))
            .expect(1)
            .mount(&server)
            .await;

        let r = resolver();
        let url = format!("{}/entities/pet.json", server.uri());
        let base = BaseContext::dir(".");
        let first = r.resolve(&url, &base).await.unwrap();
        let second = r.resolve(&url, &base).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(r.cache_stats().resolved, 1);
    }

    #[tokio::test]
    async fn concurrent_resolutions_share_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "type": "string" }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let r = resolver();
        let url = format!("{}/slow.json", server.uri());
        let base = BaseContext::dir(".");
        let (a, b, c) = tokio::join!(
            r.resolve(&url, &base),
            r.resolve(&url, &base),
            r.resolve(&url, &base)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(r.cache_stats().fetches_started, 1);
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.json"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/new.json", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "type": "boolean" })))
            .mount(&server)
            .await;

        let node = resolver()
            .resolve(&format!("{}/old.json", server.uri()), &BaseContext::dir("."))
            .await
            .unwrap();
        assert_eq!(node, SchemaNode::from(json!({ "type": "boolean" })));
    }

    #[tokio::test]
    async fn non_success_status_fails_and_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let r = resolver();
        let url = format!("{}/gone.json", server.uri());
        let base = BaseContext::dir(".");
        let first = r.resolve(&url, &base).await;
        assert!(matches!(first, Err(ResolveError::Status { status: 404, .. })));
        // Failures are not cached, so a retry hits the network again.
        let second = r.resolve(&url, &base).await;
        assert!(second.is_err());
        assert_eq!(r.cache_stats().resolved, 0);
    }

    #[tokio::test]
    async fn mirror_serves_matching_urls_locally() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "billing/invoice.json", json!({ "title": "Invoice" }));

        let config = ResolverConfig::new().with_mirror(Mirror::new(
            "https://schemas.example.com/entities/",
            dir.path(),
        ));
        let r = Resolver::new(config).unwrap();
        let node = r
            .resolve(
                "https://schemas.example.com/entities/billing/invoice.json",
                &BaseContext::dir("."),
            )
            .await
            .unwrap();
        assert_eq!(node.get("title").unwrap().as_str(), Some("Invoice"));
    }

    #[tokio::test]
    async fn reset_clears_the_cache() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", json!({ "type": "string" }));
        let r = resolver();
        r.resolve("a.json", &BaseContext::dir(dir.path())).await.unwrap();
        assert_eq!(r.cache_stats().resolved, 1);

        r.reset();
        assert_eq!(r.cache_stats().resolved, 0);
    }
}
