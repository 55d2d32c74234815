//! Conflict resolution across the normalized documents of one domain.
//!
//! Each entity class is merged under its own policy:
//!
//! | Class | Key | Policy |
//! |---|---|---|
//! | operation | `(path, method)` | newest file wins; ties go to the later file in processing order |
//! | schema | name | first wins; a different later body is renamed `name_{stem}` |
//! | security scheme | name | first definition wins |
//! | other components | `kind/name` | last write wins |
//!
//! Documents are expected in processing order (lexicographic by file id).
//! Identical bodies under the same key are not conflicts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use concord_spec_parser::pointer::{navigate, rename_schema_refs, unescape_segment, SCHEMA_PREFIX};
use concord_spec_parser::{NodeMap, SchemaNode};

use crate::dialect::HTTP_METHODS;
use crate::document::NormalizedDocument;
use crate::error::UnifyWarning;
use crate::metadata::{ConflictClass, ConflictLog, ConflictRecord, FlaggedReference, Strategy};

/// Annotation attached to an internal pointer with no target after merge.
pub const DANGLING_KEY: &str = "x-dangling-reference";

const SCHEMAS: &str = "schemas";
const SECURITY_SCHEMES: &str = "securitySchemes";

/// The merged contents of one domain.
#[derive(Debug, Clone, Default)]
pub struct MergedDomain {
    pub paths: NodeMap,
    pub components: BTreeMap<String, NodeMap>,
    pub tags: Vec<SchemaNode>,
    pub security: Vec<SchemaNode>,
    pub conflicts: ConflictLog,
    /// `"GET /v1/users"` -> winning file.
    pub operation_sources: BTreeMap<String, String>,
    pub flagged_references: Vec<FlaggedReference>,
    pub dangling_references: Vec<String>,
    pub warnings: Vec<UnifyWarning>,
}

impl MergedDomain {
    pub fn schema_count(&self) -> usize {
        self.components.get(SCHEMAS).map_or(0, NodeMap::len)
    }
}

/// Merge `docs` (in processing order) into one domain.
pub fn merge_documents(docs: &[NormalizedDocument]) -> MergedDomain {
    let mut docs = docs.to_vec();
    let mut merged = MergedDomain::default();

    let contested = merge_schemas(&mut docs, &mut merged);
    merged.flagged_references = flag_coincidental_refs(&docs, &contested);
    merge_first_wins(&docs, SECURITY_SCHEMES, &mut merged);
    merge_last_wins(&docs, &mut merged);
    merge_paths(&docs, &mut merged);
    merged.tags = merge_tags(&docs);
    merged.security = union_requirements(&docs);
    merged.dangling_references = annotate_dangling(&mut merged.paths, &mut merged.components);

    for record in merged.conflicts.iter() {
        concord_telemetry::log_conflict_resolved!(
            class = %record.class,
            key = %record.key,
            winner = %record.winning_source,
            losers = ?record.losing_sources,
            "conflict resolved"
        );
    }
    for flagged in &merged.flagged_references {
        tracing::warn!(
            file = %flagged.file,
            pointer = %flagged.pointer,
            resolved_to = %flagged.resolved_to,
            "pointer reaches a contested schema defined elsewhere"
        );
    }

    merged
}

/// Merge component schemas, renaming conflicting later definitions and
/// rewriting the losing document's own pointers before its nodes are
/// merged. Returns contested name -> owning file.
fn merge_schemas(
    docs: &mut [NormalizedDocument],
    merged: &mut MergedDomain,
) -> BTreeMap<String, String> {
    let mut schemas = NodeMap::new();
    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    let mut contested = BTreeMap::new();

    for doc in docs.iter_mut() {
        let own = doc.schemas().cloned().unwrap_or_default();
        let renames = plan_renames(&own, &schemas, &doc.file_stem);

        if !renames.is_empty() {
            for node in doc.nodes_mut() {
                rename_schema_refs(node, &renames);
            }
            if let Some(entries) = doc.components.get_mut(SCHEMAS) {
                for (old, new) in &renames {
                    if let Some(body) = entries.remove(old) {
                        entries.insert(new.clone(), body);
                    }
                }
            }
            for (old, new) in &renames {
                let winner = owners.get(old).cloned().unwrap_or_default();
                merged.conflicts.append(ConflictRecord {
                    class: ConflictClass::Schema,
                    key: old.clone(),
                    winning_source: winner.clone(),
                    losing_sources: vec![doc.file_id.clone()],
                    strategy: Strategy::FirstWinsRenamed,
                    renamed_to: Some(new.clone()),
                });
                contested.insert(old.clone(), winner);
            }
        }

        for (name, body) in doc.schemas().into_iter().flatten() {
            if !schemas.contains_key(name) {
                schemas.insert(name.clone(), body.clone());
                owners.insert(name.clone(), doc.file_id.clone());
            }
        }
    }

    if !schemas.is_empty() {
        merged.components.insert(SCHEMAS.to_string(), schemas);
    }
    contested
}

/// Names in `own` that must be renamed to merge next to `merged`.
///
/// Renaming one schema can change the body of another that points at it,
/// so this runs until no new rename appears.
fn plan_renames(own: &NodeMap, merged: &NodeMap, stem: &str) -> BTreeMap<String, String> {
    let mut renames = BTreeMap::new();
    loop {
        let mut changed = false;
        for (name, body) in own {
            if renames.contains_key(name) {
                continue;
            }
            let Some(existing) = merged.get(name) else {
                continue;
            };
            let mut candidate = body.clone();
            rename_schema_refs(&mut candidate, &renames);
            if &candidate != existing {
                let target = rename_target(name, stem, own, merged, &renames);
                renames.insert(name.clone(), target);
                changed = true;
            }
        }
        if !changed {
            return renames;
        }
    }
}

fn rename_target(
    name: &str,
    stem: &str,
    own: &NodeMap,
    merged: &NodeMap,
    renames: &BTreeMap<String, String>,
) -> String {
    let taken = |candidate: &str| {
        merged.contains_key(candidate)
            || own.contains_key(candidate)
            || renames.values().any(|v| v == candidate)
    };
    let base = format!("{}_{}", name, stem);
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Pointers into a contested schema name from documents that never defined
/// that name themselves.
fn flag_coincidental_refs(
    docs: &[NormalizedDocument],
    contested: &BTreeMap<String, String>,
) -> Vec<FlaggedReference> {
    if contested.is_empty() {
        return Vec::new();
    }
    let mut flagged = BTreeSet::new();
    for doc in docs {
        let defines = |name: &str| doc.schemas().is_some_and(|s| s.contains_key(name));
        for node in doc.nodes() {
            node.walk_refs(&mut |r| {
                let Some(name) = schema_name(&r.pointer) else {
                    return;
                };
                if let Some(owner) = contested.get(&name) {
                    if !defines(&name) && owner != &doc.file_id {
                        flagged.insert((doc.file_id.clone(), r.pointer.clone(), owner.clone()));
                    }
                }
            });
        }
    }
    flagged
        .into_iter()
        .map(|(file, pointer, resolved_to)| FlaggedReference {
            file,
            pointer,
            resolved_to,
        })
        .collect()
}

/// Schema name a pointer reaches (`#/components/schemas/User/properties/id` -> `User`).
fn schema_name(pointer: &str) -> Option<String> {
    let rest = pointer.strip_prefix(SCHEMA_PREFIX)?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then(|| unescape_segment(name))
}

/// `name -> [(file, body)]` for one component kind, in processing order.
fn contributions<'a>(
    docs: &'a [NormalizedDocument],
    kind: &str,
) -> BTreeMap<&'a str, Vec<(&'a str, &'a SchemaNode)>> {
    let mut out: BTreeMap<&str, Vec<(&str, &SchemaNode)>> = BTreeMap::new();
    for doc in docs {
        for (name, body) in doc.components.get(kind).into_iter().flatten() {
            out.entry(name.as_str())
                .or_default()
                .push((doc.file_id.as_str(), body));
        }
    }
    out
}

/// Distinct files among `candidates` whose body differs from `winner`.
fn losers(winner: &SchemaNode, candidates: &[(&str, &SchemaNode)]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (file, body) in candidates {
        if *body != winner && !out.iter().any(|f| f.as_str() == *file) {
            out.push(file.to_string());
        }
    }
    out
}

fn merge_first_wins(docs: &[NormalizedDocument], kind: &str, merged: &mut MergedDomain) {
    let mut entries = NodeMap::new();
    for (name, list) in contributions(docs, kind) {
        let Some(((winner_file, winner), rest)) = list.split_first() else {
            continue;
        };
        let lost = losers(winner, rest);
        if !lost.is_empty() {
            merged.conflicts.append(ConflictRecord {
                class: ConflictClass::Security,
                key: name.to_string(),
                winning_source: winner_file.to_string(),
                losing_sources: lost,
                strategy: Strategy::FirstDefinitionWins,
                renamed_to: None,
            });
        }
        entries.insert(name.to_string(), (*winner).clone());
    }
    if !entries.is_empty() {
        merged.components.insert(kind.to_string(), entries);
    }
}

/// Every component kind other than schemas and security schemes.
fn merge_last_wins(docs: &[NormalizedDocument], merged: &mut MergedDomain) {
    let kinds: BTreeSet<&str> = docs
        .iter()
        .flat_map(|doc| doc.components.keys())
        .map(String::as_str)
        .filter(|kind| *kind != SCHEMAS && *kind != SECURITY_SCHEMES)
        .collect();

    for kind in kinds {
        let mut entries = NodeMap::new();
        for (name, list) in contributions(docs, kind) {
            let Some(((winner_file, winner), rest)) = list.split_last() else {
                continue;
            };
            let lost = losers(winner, rest);
            if !lost.is_empty() {
                merged.conflicts.append(ConflictRecord {
                    class: ConflictClass::Other,
                    key: format!("{}/{}", kind, name),
                    winning_source: winner_file.to_string(),
                    losing_sources: lost,
                    strategy: Strategy::LastWriteWins,
                    renamed_to: None,
                });
            }
            entries.insert(name.to_string(), (*winner).clone());
        }
        merged.components.insert(kind.to_string(), entries);
    }
}

struct Contribution<'a> {
    index: usize,
    file: &'a str,
    modified: DateTime<Utc>,
    body: &'a SchemaNode,
}

fn merge_paths(docs: &[NormalizedDocument], merged: &mut MergedDomain) {
    // Operations and non-operation path-item fields (`summary`, `servers`,
    // ...) are contested the same way, keyed by (path, key).
    let mut fields: BTreeMap<(&str, &str), Vec<Contribution>> = BTreeMap::new();
    let mut opaque: BTreeMap<&str, &SchemaNode> = BTreeMap::new();

    for (index, doc) in docs.iter().enumerate() {
        for (path, item) in &doc.paths {
            let SchemaNode::Object(item) = item else {
                opaque.insert(path.as_str(), item);
                continue;
            };
            for (key, value) in item {
                fields
                    .entry((path.as_str(), key.as_str()))
                    .or_default()
                    .push(Contribution {
                        index,
                        file: &doc.file_id,
                        modified: doc.modified,
                        body: value,
                    });
            }
        }
    }

    let mut paths: BTreeMap<&str, NodeMap> = BTreeMap::new();
    for ((path, field), list) in &fields {
        let is_operation = HTTP_METHODS.contains(field);
        let key = if is_operation {
            format!("{} {}", field.to_uppercase(), path)
        } else {
            format!("{} ({})", path, field)
        };
        let Some(winner) = pick_winner(list, &key, &mut merged.warnings) else {
            continue;
        };

        let candidates: Vec<(&str, &SchemaNode)> = list
            .iter()
            .filter(|c| c.index != winner.index)
            .map(|c| (c.file, c.body))
            .collect();
        let lost = losers(winner.body, &candidates);
        if !lost.is_empty() {
            let tied = list
                .iter()
                .any(|c| c.index != winner.index && c.body != winner.body && c.modified == winner.modified);
            merged.conflicts.append(ConflictRecord {
                class: ConflictClass::Path,
                key: key.clone(),
                winning_source: winner.file.to_string(),
                losing_sources: lost,
                strategy: if tied {
                    Strategy::LaterInOrderWins
                } else {
                    Strategy::NewerFileWins
                },
                renamed_to: None,
            });
        }

        if is_operation {
            merged.operation_sources.insert(key, winner.file.to_string());
        }
        paths
            .entry(*path)
            .or_default()
            .insert(field.to_string(), winner.body.clone());
    }

    let mut out: NodeMap = paths
        .into_iter()
        .map(|(path, item)| (path.to_string(), SchemaNode::Object(item)))
        .collect();
    for (path, node) in opaque {
        out.entry(path.to_string()).or_insert_with(|| node.clone());
    }
    merged.paths = out;
}

/// Newest modification time wins; ties go to the later file id.
///
/// Two contributions with the same time and the same file id cannot be
/// ordered: the first is kept and an E2301 warning recorded.
fn pick_winner<'a, 'b>(
    list: &'b [Contribution<'a>],
    key: &str,
    warnings: &mut Vec<UnifyWarning>,
) -> Option<&'b Contribution<'a>> {
    let newest = list.iter().map(|c| c.modified).max()?;
    let winner = list
        .iter()
        .filter(|c| c.modified == newest)
        .max_by(|a, b| a.file.cmp(b.file).then(b.index.cmp(&a.index)))?;

    let ambiguous = list.iter().any(|c| {
        c.index != winner.index
            && c.modified == winner.modified
            && c.file == winner.file
            && c.body != winner.body
    });
    if ambiguous {
        tracing::warn!(key = %key, file = %winner.file, "E2301: ambiguous collision");
        warnings.push(UnifyWarning::new(
            "E2301",
            format!("ambiguous collision on {}: same modification time and file id", key),
            Some(winner.file.to_string()),
        ));
    }
    Some(winner)
}

/// Tags de-duplicated by name; differing descriptions joined with ` | `.
fn merge_tags(docs: &[NormalizedDocument]) -> Vec<SchemaNode> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: BTreeMap<String, NodeMap> = BTreeMap::new();

    for tag in docs.iter().flat_map(|doc| &doc.tags) {
        let Some(map) = tag.as_object() else {
            continue;
        };
        let Some(name) = map.get("name").and_then(SchemaNode::as_str) else {
            continue;
        };
        let Some(existing) = by_name.get_mut(name) else {
            order.push(name.to_string());
            by_name.insert(name.to_string(), map.clone());
            continue;
        };

        if let Some(description) = map.get("description").and_then(SchemaNode::as_str) {
            let joined = match existing.get("description").and_then(SchemaNode::as_str) {
                Some(current) if current.split(" | ").any(|d| d == description) => None,
                Some(current) => Some(format!("{} | {}", current, description)),
                None => Some(description.to_string()),
            };
            if let Some(joined) = joined {
                existing.insert("description".into(), SchemaNode::string(joined));
            }
        }
        for (key, value) in map {
            existing.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .map(SchemaNode::Object)
        .collect()
}

fn union_requirements(docs: &[NormalizedDocument]) -> Vec<SchemaNode> {
    let mut out: Vec<SchemaNode> = Vec::new();
    for requirement in docs.iter().flat_map(|doc| &doc.security) {
        if !out.contains(requirement) {
            out.push(requirement.clone());
        }
    }
    out
}

/// Annotate internal pointers with no target and return them, sorted.
fn annotate_dangling(paths: &mut NodeMap, components: &mut BTreeMap<String, NodeMap>) -> Vec<String> {
    let root: SchemaNode = [
        ("paths".to_string(), SchemaNode::Object(paths.clone())),
        (
            "components".to_string(),
            components
                .iter()
                .map(|(kind, entries)| (kind.clone(), SchemaNode::Object(entries.clone())))
                .collect(),
        ),
    ]
    .into_iter()
    .collect();

    let mut missing = BTreeSet::new();
    root.walk_refs(&mut |r| {
        if r.is_internal() && navigate(&root, &r.pointer).is_none() {
            missing.insert(r.pointer.clone());
        }
    });
    if missing.is_empty() {
        return Vec::new();
    }

    let nodes = paths
        .values_mut()
        .chain(components.values_mut().flat_map(|entries| entries.values_mut()));
    for node in nodes {
        node.walk_refs_mut(&mut |r| {
            if missing.contains(&r.pointer) {
                r.siblings.insert(
                    DANGLING_KEY.to_string(),
                    SchemaNode::string("pointer target missing after merge"),
                );
            }
        });
    }
    for pointer in &missing {
        tracing::warn!(pointer = %pointer, "dangling internal reference");
    }
    missing.into_iter().collect()
}
