//! Per-document normalization: dialect conversion, base-path prefixing and
//! external reference resolution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use concord_resolver::{unresolved_refs, BaseContext, Resolver};
use concord_spec_parser::{Dialect, NodeMap, SchemaNode, SourceDocument};

use crate::base_path::{body_server_origin, effective_base_path, prefix_path};
use crate::dialect::normalize_dialect;
use crate::metadata::{PathNormalization, SkippedConversion, UnresolvedReference};

/// A source document in current-dialect shape with absolute paths.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub file_id: String,
    /// Basename without extension; used for schema renames.
    pub file_stem: String,
    pub dialect: Dialect,
    pub modified: DateTime<Utc>,
    pub base_path: String,
    /// Absolute path -> path item.
    pub paths: NodeMap,
    /// Component kind (`schemas`, `parameters`, ...) -> name -> body.
    pub components: BTreeMap<String, NodeMap>,
    pub tags: Vec<SchemaNode>,
    /// Top-level security requirements.
    pub security: Vec<SchemaNode>,
    pub server_origin: Option<String>,
    pub normalizations: Vec<PathNormalization>,
    pub skipped: Vec<SkippedConversion>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl NormalizedDocument {
    /// Convert `doc` and prefix its paths.
    ///
    /// `inherited_base` is the domain's base path, used by documents under a
    /// `legacy/` directory that declare none.
    pub fn from_source(doc: &SourceDocument, inherited_base: Option<&str>) -> Self {
        let conversion = normalize_dialect(doc);
        let mut body = conversion.body;
        let base_path = effective_base_path(doc, inherited_base);
        let server_origin = body_server_origin(&body);

        let mut paths = NodeMap::new();
        let mut normalizations = Vec::new();
        if let Some(SchemaNode::Object(declared)) = body.remove("paths") {
            for (original, item) in declared {
                let normalized = prefix_path(&base_path, &original);
                if doc.dialect == Dialect::Legacy || doc.in_legacy_dir() || normalized != original {
                    normalizations.push(PathNormalization {
                        file: doc.file_id.clone(),
                        original: original.clone(),
                        normalized: normalized.clone(),
                        base_path: base_path.clone(),
                        dialect: doc.dialect,
                    });
                }
                // Two declared paths may land on the same absolute path.
                let item = match (paths.get_mut(&normalized), item) {
                    (Some(SchemaNode::Object(existing)), SchemaNode::Object(incoming)) => {
                        existing.extend(incoming);
                        continue;
                    }
                    (_, item) => item,
                };
                paths.insert(normalized, item);
            }
        }

        let mut components = BTreeMap::new();
        if let Some(SchemaNode::Object(declared)) = body.remove("components") {
            for (kind, entries) in declared {
                if let SchemaNode::Object(entries) = entries {
                    components.insert(kind, entries);
                }
            }
        }

        Self {
            file_id: doc.file_id.clone(),
            file_stem: doc.file_stem().to_string(),
            dialect: doc.dialect,
            modified: doc.modified,
            base_path,
            paths,
            components,
            tags: take_array(&mut body, "tags"),
            security: take_array(&mut body, "security"),
            server_origin,
            normalizations,
            skipped: conversion.skipped,
            unresolved: Vec::new(),
        }
    }

    /// Inline every external pointer in paths and components, resolving
    /// relative locations against `base`. Failures are annotated in place and
    /// listed in [`NormalizedDocument::unresolved`].
    pub async fn resolve_external(&mut self, resolver: &Resolver, base: &BaseContext) {
        let mut resolved_paths = NodeMap::new();
        for (path, item) in &self.paths {
            resolved_paths.insert(path.clone(), resolver.resolve_all(item, base).await);
        }
        self.paths = resolved_paths;

        for entries in self.components.values_mut() {
            for body in entries.values_mut() {
                *body = resolver.resolve_all(body, base).await;
            }
        }

        let mut unresolved = Vec::new();
        for node in self.nodes() {
            for (pointer, error) in unresolved_refs(node) {
                unresolved.push(UnresolvedReference {
                    file: self.file_id.clone(),
                    pointer,
                    error,
                });
            }
        }
        self.unresolved = unresolved;
    }

    /// Every node this document contributes to the merge.
    pub fn nodes(&self) -> impl Iterator<Item = &SchemaNode> {
        self.paths
            .values()
            .chain(self.components.values().flat_map(|entries| entries.values()))
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut SchemaNode> {
        self.paths.values_mut().chain(
            self.components
                .values_mut()
                .flat_map(|entries| entries.values_mut()),
        )
    }

    pub fn schemas(&self) -> Option<&NodeMap> {
        self.components.get("schemas")
    }
}

fn take_array(body: &mut NodeMap, key: &str) -> Vec<SchemaNode> {
    match body.remove(key) {
        Some(SchemaNode::Array(items)) => items,
        _ => Vec::new(),
    }
}
