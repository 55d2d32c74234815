use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// Ordered object map. `BTreeMap` keeps serialized output byte-stable.
pub type NodeMap = BTreeMap<String, SchemaNode>;

/// A node of a parsed spec document.
///
/// Any object carrying a string `$ref` becomes [`SchemaNode::Ref`], so every
/// transformation stage has to decide explicitly what to do with pointers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchemaNode {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<SchemaNode>),
    Object(NodeMap),
    Ref(RefNode),
}

/// A `$ref`-bearing object. Keys other than `$ref` are kept in `siblings`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefNode {
    pub pointer: String,
    pub siblings: NodeMap,
}

/// Where a pointer points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind<'a> {
    /// Same-document pointer (`#/components/schemas/User`).
    Internal(&'a str),
    /// Network location (`https://...`).
    Remote(&'a str),
    /// File path relative to the caller's base directory.
    File(&'a str),
}

impl RefNode {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            siblings: NodeMap::new(),
        }
    }

    /// Classify the pointer.
    pub fn kind(&self) -> RefKind<'_> {
        classify_pointer(&self.pointer)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind(), RefKind::Internal(_))
    }
}

/// Classify a raw pointer string.
pub fn classify_pointer(pointer: &str) -> RefKind<'_> {
    if pointer.starts_with('#') {
        RefKind::Internal(pointer)
    } else if pointer.starts_with("http://") || pointer.starts_with("https://") {
        RefKind::Remote(pointer)
    } else {
        RefKind::File(pointer)
    }
}

impl SchemaNode {
    pub fn object() -> Self {
        SchemaNode::Object(NodeMap::new())
    }

    pub fn string(s: impl Into<String>) -> Self {
        SchemaNode::String(s.into())
    }

    pub fn as_object(&self) -> Option<&NodeMap> {
        match self {
            SchemaNode::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut NodeMap> {
        match self {
            SchemaNode::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<SchemaNode>> {
        match self {
            SchemaNode::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SchemaNode::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SchemaNode::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_ref_node(&self) -> Option<&RefNode> {
        match self {
            SchemaNode::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key in an object node (or in a ref node's siblings).
    pub fn get(&self, key: &str) -> Option<&SchemaNode> {
        match self {
            SchemaNode::Object(map) => map.get(key),
            SchemaNode::Ref(r) => r.siblings.get(key),
            _ => None,
        }
    }

    /// Visit every pointer in the tree, depth-first.
    pub fn walk_refs<F: FnMut(&RefNode)>(&self, f: &mut F) {
        match self {
            SchemaNode::Ref(r) => {
                f(r);
                for child in r.siblings.values() {
                    child.walk_refs(f);
                }
            }
            SchemaNode::Object(map) => {
                for child in map.values() {
                    child.walk_refs(f);
                }
            }
            SchemaNode::Array(items) => {
                for child in items {
                    child.walk_refs(f);
                }
            }
            SchemaNode::Null | SchemaNode::Bool(_) | SchemaNode::Number(_) | SchemaNode::String(_) => {}
        }
    }

    /// Visit every pointer in the tree mutably, depth-first.
    pub fn walk_refs_mut<F: FnMut(&mut RefNode)>(&mut self, f: &mut F) {
        match self {
            SchemaNode::Ref(r) => {
                f(r);
                for child in r.siblings.values_mut() {
                    child.walk_refs_mut(f);
                }
            }
            SchemaNode::Object(map) => {
                for child in map.values_mut() {
                    child.walk_refs_mut(f);
                }
            }
            SchemaNode::Array(items) => {
                for child in items {
                    child.walk_refs_mut(f);
                }
            }
            SchemaNode::Null | SchemaNode::Bool(_) | SchemaNode::Number(_) | SchemaNode::String(_) => {}
        }
    }

    /// Convert back into an untyped JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            SchemaNode::Null => Value::Null,
            SchemaNode::Bool(b) => Value::Bool(*b),
            SchemaNode::Number(n) => Value::Number(n.clone()),
            SchemaNode::String(s) => Value::String(s.clone()),
            SchemaNode::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            SchemaNode::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            SchemaNode::Ref(r) => {
                let mut obj: serde_json::Map<String, Value> = r
                    .siblings
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect();
                obj.insert("$ref".to_string(), Value::String(r.pointer.clone()));
                Value::Object(obj)
            }
        }
    }
}

impl From<Value> for SchemaNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SchemaNode::Null,
            Value::Bool(b) => SchemaNode::Bool(b),
            Value::Number(n) => SchemaNode::Number(n),
            Value::String(s) => SchemaNode::String(s),
            Value::Array(items) => SchemaNode::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(mut obj) => match obj.remove("$ref") {
                Some(Value::String(pointer)) => SchemaNode::Ref(RefNode {
                    pointer,
                    siblings: obj.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
                }),
                other => {
                    let mut map: NodeMap =
                        obj.into_iter().map(|(k, v)| (k, Self::from(v))).collect();
                    // A non-string `$ref` is not a pointer; keep it as data.
                    if let Some(v) = other {
                        map.insert("$ref".to_string(), Self::from(v));
                    }
                    SchemaNode::Object(map)
                }
            },
        }
    }
}

impl From<NodeMap> for SchemaNode {
    fn from(map: NodeMap) -> Self {
        SchemaNode::Object(map)
    }
}

impl FromIterator<(String, SchemaNode)> for SchemaNode {
    fn from_iter<I: IntoIterator<Item = (String, SchemaNode)>>(iter: I) -> Self {
        SchemaNode::Object(iter.into_iter().collect())
    }
}

impl Serialize for SchemaNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SchemaNode::Null => serializer.serialize_unit(),
            SchemaNode::Bool(b) => serializer.serialize_bool(*b),
            SchemaNode::Number(n) => n.serialize(serializer),
            SchemaNode::String(s) => serializer.serialize_str(s),
            SchemaNode::Array(items) => items.serialize(serializer),
            SchemaNode::Object(map) => map.serialize(serializer),
            SchemaNode::Ref(r) => {
                let mut out = serializer.serialize_map(Some(r.siblings.len() + 1))?;
                out.serialize_entry("$ref", &r.pointer)?;
                for (k, v) in &r.siblings {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SchemaNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(SchemaNode::from)
    }
}

/// Spec dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Swagger 2.0.
    Legacy,
    /// OpenAPI 3.x.
    Current,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Legacy => f.write_str("legacy"),
            Dialect::Current => f.write_str("current"),
        }
    }
}

/// One input spec file. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Domain name (the top-level directory the file was found in).
    pub domain: String,
    /// Domain-relative path with `/` separators (e.g. `legacy/users.json`).
    pub file_id: String,
    pub dialect: Dialect,
    /// The `swagger` or `openapi` version string.
    pub version: String,
    /// Last-modified time of the file.
    pub modified: DateTime<Utc>,
    /// Root object of the parsed document.
    pub body: NodeMap,
}

impl SourceDocument {
    /// File basename without its extension (`legacy/users.json` -> `users`).
    pub fn file_stem(&self) -> &str {
        let base = self.file_id.rsplit('/').next().unwrap_or(&self.file_id);
        match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        }
    }

    /// True when the file sits under a `legacy/` subdirectory of its domain.
    pub fn in_legacy_dir(&self) -> bool {
        self.file_id
            .split('/')
            .rev()
            .skip(1)
            .any(|segment| segment == "legacy")
    }

    pub fn paths(&self) -> Option<&NodeMap> {
        self.body.get("paths").and_then(SchemaNode::as_object)
    }

    /// The legacy `basePath` field, if declared.
    pub fn declared_base_path(&self) -> Option<&str> {
        self.body.get("basePath").and_then(SchemaNode::as_str)
    }

    /// The current-dialect `servers` array (empty when absent).
    pub fn servers(&self) -> &[SchemaNode] {
        self.body
            .get("servers")
            .and_then(SchemaNode::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
