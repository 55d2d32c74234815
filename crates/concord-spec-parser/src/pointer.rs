//! JSON Pointer helpers for `$ref` strings.

use std::collections::BTreeMap;

use crate::model::SchemaNode;

/// Prefix of internal pointers into the component-schema container.
pub const SCHEMA_PREFIX: &str = "#/components/schemas/";

/// Escape one pointer segment (RFC 6901).
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape one pointer segment (RFC 6901).
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Build `#/components/{kind}/{name}`.
pub fn component_pointer(kind: &str, name: &str) -> String {
    format!("#/components/{}/{}", kind, escape_segment(name))
}

/// Split `#/components/{kind}/{name}` into `(kind, name)`.
///
/// Returns `None` for anything deeper or shaped differently.
pub fn parse_component_pointer(pointer: &str) -> Option<(&str, String)> {
    let rest = pointer.strip_prefix("#/components/")?;
    let (kind, name) = rest.split_once('/')?;
    if kind.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((kind, unescape_segment(name)))
}

/// Split a pointer into its location and optional fragment
/// (`common.json#/Pet` -> `("common.json", Some("/Pet"))`).
pub fn split_fragment(pointer: &str) -> (&str, Option<&str>) {
    match pointer.split_once('#') {
        Some((location, fragment)) => (location, Some(fragment)),
        None => (pointer, None),
    }
}

/// Navigate a node by a JSON Pointer fragment (`/a/b`, `#/a/b`, or empty).
pub fn navigate<'a>(root: &'a SchemaNode, fragment: &str) -> Option<&'a SchemaNode> {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    if fragment.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in fragment.strip_prefix('/')?.split('/') {
        let key = unescape_segment(segment);
        current = match current {
            SchemaNode::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            other => other.get(&key)?,
        };
    }
    Some(current)
}

/// Rewrite every pointer starting with `from` so it starts with `to` instead.
///
/// Returns the number of pointers rewritten.
pub fn rewrite_prefix(node: &mut SchemaNode, from: &str, to: &str) -> usize {
    let mut count = 0;
    node.walk_refs_mut(&mut |r| {
        if let Some(rest) = r.pointer.strip_prefix(from) {
            r.pointer = format!("{}{}", to, rest);
            count += 1;
        }
    });
    count
}

/// Rewrite `#/components/schemas/{old}` pointers (including deeper pointers
/// below a renamed schema) according to `renames`.
pub fn rename_schema_refs(node: &mut SchemaNode, renames: &BTreeMap<String, String>) -> usize {
    if renames.is_empty() {
        return 0;
    }
    let mut count = 0;
    node.walk_refs_mut(&mut |r| {
        let Some(rest) = r.pointer.strip_prefix(SCHEMA_PREFIX) else {
            return;
        };
        let (name, tail) = match rest.split_once('/') {
            Some((name, tail)) => (unescape_segment(name), Some(tail)),
            None => (unescape_segment(rest), None),
        };
        if let Some(new_name) = renames.get(&name) {
            r.pointer = match tail {
                Some(tail) => format!("{}{}/{}", SCHEMA_PREFIX, escape_segment(new_name), tail),
                None => format!("{}{}", SCHEMA_PREFIX, escape_segment(new_name)),
            };
            count += 1;
        }
    });
    count
}
