//! `allOf` flattening.
//!
//! Branches are flattened first, then merged in order: `properties` maps are
//! unioned (later branch wins on a name collision), `required` arrays are
//! unioned as a set, every other key is overwritten. Keys of the parent node
//! outside `allOf` are merged in last with the same rules.

use std::collections::BTreeSet;

use concord_spec_parser::pointer::parse_component_pointer;
use concord_spec_parser::{NodeMap, RefNode, SchemaNode};

/// Flatten every `allOf` in `schema`.
///
/// A composition with a `$ref` branch is left in place (with its branches
/// flattened), since the pointed-to body is not available here.
pub fn flatten_composition(schema: &SchemaNode) -> SchemaNode {
    Flattener {
        schemas: None,
        visiting: Vec::new(),
    }
    .flatten(schema)
}

/// Like [`flatten_composition`], but `#/components/schemas/{name}` branches
/// are looked up in `schemas` and inlined. Self-referential chains are left
/// unflattened.
pub fn flatten_composition_with(schema: &SchemaNode, schemas: &NodeMap) -> SchemaNode {
    Flattener {
        schemas: Some(schemas),
        visiting: Vec::new(),
    }
    .flatten(schema)
}

struct Flattener<'a> {
    schemas: Option<&'a NodeMap>,
    visiting: Vec<String>,
}

impl Flattener<'_> {
    fn flatten(&mut self, node: &SchemaNode) -> SchemaNode {
        match node {
            SchemaNode::Object(map) => match map.get("allOf") {
                Some(SchemaNode::Array(branches)) => self.flatten_all_of(map, branches),
                _ => SchemaNode::Object(self.flatten_children(map)),
            },
            SchemaNode::Array(items) => {
                SchemaNode::Array(items.iter().map(|item| self.flatten(item)).collect())
            }
            SchemaNode::Ref(r) => SchemaNode::Ref(RefNode {
                pointer: r.pointer.clone(),
                siblings: self.flatten_children(&r.siblings),
            }),
            SchemaNode::Null | SchemaNode::Bool(_) | SchemaNode::Number(_) | SchemaNode::String(_) => {
                node.clone()
            }
        }
    }

    fn flatten_children(&mut self, map: &NodeMap) -> NodeMap {
        map.iter()
            .map(|(k, v)| (k.clone(), self.flatten(v)))
            .collect()
    }

    fn flatten_all_of(&mut self, parent: &NodeMap, branches: &[SchemaNode]) -> SchemaNode {
        let mut flat_branches = Vec::with_capacity(branches.len());
        for branch in branches {
            match self.flatten_branch(branch) {
                Some(flat) => flat_branches.push(flat),
                None => return SchemaNode::Object(self.flatten_children(parent)),
            }
        }

        let mut merged = NodeMap::new();
        for branch in flat_branches {
            // `true`-style schemas add no keywords.
            if let SchemaNode::Object(map) = branch {
                merge_into(&mut merged, map);
            }
        }

        let rest: NodeMap = parent
            .iter()
            .filter(|(k, _)| k.as_str() != "allOf")
            .map(|(k, v)| (k.clone(), self.flatten(v)))
            .collect();
        merge_into(&mut merged, rest);

        SchemaNode::Object(merged)
    }

    /// Flatten one branch; `None` when it is a pointer we cannot inline.
    fn flatten_branch(&mut self, branch: &SchemaNode) -> Option<SchemaNode> {
        let SchemaNode::Ref(r) = branch else {
            return Some(self.flatten(branch));
        };
        let schemas = self.schemas?;
        let (kind, name) = parse_component_pointer(&r.pointer)?;
        if kind != "schemas" || self.visiting.contains(&name) {
            return None;
        }
        let target = schemas.get(&name)?;

        self.visiting.push(name);
        let mut flat = self.flatten(target);
        self.visiting.pop();

        // A pointer that still leads to a pointer cannot be merged.
        if matches!(flat, SchemaNode::Ref(_)) {
            return None;
        }
        let siblings = self.flatten_children(&r.siblings);
        if let SchemaNode::Object(map) = &mut flat {
            merge_into(map, siblings);
        }
        Some(flat)
    }
}

fn merge_into(target: &mut NodeMap, source: NodeMap) {
    for (key, value) in source {
        let value = match (key.as_str(), target.get_mut(&key), value) {
            ("properties", Some(SchemaNode::Object(existing)), SchemaNode::Object(incoming)) => {
                existing.extend(incoming);
                continue;
            }
            ("required", Some(SchemaNode::Array(existing)), SchemaNode::Array(incoming)) => {
                union_required(existing, incoming);
                continue;
            }
            (_, _, value) => value,
        };
        target.insert(key, value);
    }
}

fn union_required(existing: &mut Vec<SchemaNode>, incoming: Vec<SchemaNode>) {
    let mut seen: BTreeSet<String> = existing
        .iter()
        .filter_map(|n| n.as_str().map(str::to_string))
        .collect();
    for item in incoming {
        let is_new = match item.as_str() {
            Some(name) => seen.insert(name.to_string()),
            None => !existing.contains(&item),
        };
        if is_new {
            existing.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: serde_json::Value) -> SchemaNode {
        SchemaNode::from(value)
    }

    #[test]
    fn flattens_properties_and_required() {
        let schema = node(json!({
            "allOf": [
                { "properties": { "a": { "type": "string" } }, "required": ["a"] },
                { "properties": { "b": { "type": "number" } } }
            ]
        }));
        assert_eq!(
            flatten_composition(&schema),
            node(json!({
                "properties": { "a": { "type": "string" }, "b": { "type": "number" } },
                "required": ["a"]
            }))
        );
    }

    #[test]
    fn later_branch_wins_property_collision_and_required_is_a_set() {
        let schema = node(json!({
            "allOf": [
                { "type": "object", "properties": { "id": { "type": "integer" } }, "required": ["id"] },
                { "type": "object", "properties": { "id": { "type": "string" } }, "required": ["id", "name"] }
            ]
        }));
        let flat = flatten_composition(&schema);
        assert_eq!(
            flat,
            node(json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id", "name"]
            }))
        );
    }

    #[test]
    fn parent_keys_are_merged_last() {
        let schema = node(json!({
            "description": "a pet",
            "properties": { "c": { "type": "boolean" } },
            "allOf": [
                { "description": "base", "properties": { "a": { "type": "string" } } }
            ]
        }));
        assert_eq!(
            flatten_composition(&schema),
            node(json!({
                "description": "a pet",
                "properties": { "a": { "type": "string" }, "c": { "type": "boolean" } }
            }))
        );
    }

    #[test]
    fn nested_compositions_are_flattened() {
        let schema = node(json!({
            "type": "array",
            "items": {
                "allOf": [
                    { "allOf": [ { "required": ["x"] }, { "required": ["y"] } ] },
                    { "required": ["x", "z"] }
                ]
            }
        }));
        assert_eq!(
            flatten_composition(&schema),
            node(json!({
                "type": "array",
                "items": { "required": ["x", "y", "z"] }
            }))
        );
    }

    #[test]
    fn ref_branch_is_kept_without_lookup() {
        let schema = node(json!({
            "allOf": [
                { "$ref": "#/components/schemas/Base" },
                { "properties": { "b": { "type": "number" } } }
            ]
        }));
        assert_eq!(flatten_composition(&schema), schema);
    }

    #[test]
    fn ref_branch_is_inlined_with_lookup() {
        let schemas: NodeMap = [(
            "Base".to_string(),
            node(json!({ "properties": { "id": { "type": "string" } }, "required": ["id"] })),
        )]
        .into_iter()
        .collect();
        let schema = node(json!({
            "allOf": [
                { "$ref": "#/components/schemas/Base" },
                { "properties": { "b": { "type": "number" } } }
            ]
        }));
        assert_eq!(
            flatten_composition_with(&schema, &schemas),
            node(json!({
                "properties": { "id": { "type": "string" }, "b": { "type": "number" } },
                "required": ["id"]
            }))
        );
    }

    #[test]
    fn self_referential_composition_is_left_alone() {
        let schemas: NodeMap = [(
            "Node".to_string(),
            node(json!({ "allOf": [ { "$ref": "#/components/schemas/Node" } ] })),
        )]
        .into_iter()
        .collect();
        let schema = node(json!({ "allOf": [ { "$ref": "#/components/schemas/Node" } ] }));
        // Inlining Node reaches Node again; the inner composition stays as-is,
        // so the outer branch resolves to an object that still holds `allOf`.
        let flat = flatten_composition_with(&schema, &schemas);
        assert!(flat.get("allOf").is_some());
    }
}
