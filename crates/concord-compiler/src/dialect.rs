//! Legacy (Swagger 2.0) to current (OpenAPI 3.x) shape conversion.
//!
//! Operations, parameters, responses and the document-level containers are
//! rewritten so the merge step only ever sees one shape. An operation that
//! cannot be mapped is passed through unchanged with an
//! [`CONVERSION_SKIPPED_KEY`] marker.

use std::collections::{BTreeMap, BTreeSet};

use concord_spec_parser::pointer::rewrite_prefix;
use concord_spec_parser::{Dialect, NodeMap, SchemaNode, SourceDocument};

use crate::metadata::SkippedConversion;

/// Marker attached to a construct that could not be converted.
pub const CONVERSION_SKIPPED_KEY: &str = "x-conversion-skipped";

/// Operation keys of a path item.
pub const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

const DEFAULT_MEDIA_TYPE: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Keywords that move from a legacy parameter or header into its `schema`.
const SCHEMA_KEYWORDS: &[&str] = &[
    "type",
    "format",
    "enum",
    "items",
    "default",
    "maximum",
    "exclusiveMaximum",
    "minimum",
    "exclusiveMinimum",
    "maxLength",
    "minLength",
    "pattern",
    "maxItems",
    "minItems",
    "uniqueItems",
    "multipleOf",
];

const LEGACY_POINTER_PREFIXES: &[(&str, &str)] = &[
    ("#/definitions/", "#/components/schemas/"),
    ("#/parameters/", "#/components/parameters/"),
    ("#/responses/", "#/components/responses/"),
];

/// Legacy root keys with no place in a current-dialect document.
const LEGACY_ROOT_KEYS: &[&str] = &[
    "swagger",
    "host",
    "basePath",
    "schemes",
    "consumes",
    "produces",
    "definitions",
    "parameters",
    "responses",
    "securityDefinitions",
];

/// A document body in current-dialect shape.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub body: NodeMap,
    pub skipped: Vec<SkippedConversion>,
}

/// `collectionFormat` -> `(style, explode)`.
pub fn collection_format_style(format: &str) -> (&'static str, bool) {
    match format {
        "multi" => ("form", true),
        "csv" => ("simple", false),
        "ssv" => ("spaceDelimited", false),
        "tsv" => ("form", false),
        "pipes" => ("pipeDelimited", false),
        _ => ("form", true),
    }
}

/// Convert `doc` to current-dialect shape.
///
/// Path-level parameters are pushed down into operations for both dialects.
pub fn normalize_dialect(doc: &SourceDocument) -> Conversion {
    let mut body = doc.body.clone();
    let mut skipped = Vec::new();

    push_down_path_parameters(&mut body);

    let prefixes = match doc.dialect {
        Dialect::Legacy => {
            convert_legacy(&mut body, &doc.file_id, &mut skipped);
            LEGACY_POINTER_PREFIXES
        }
        // A current document may still point into a hand-kept `definitions`.
        Dialect::Current => &LEGACY_POINTER_PREFIXES[..1],
    };
    for value in body.values_mut() {
        for (from, to) in prefixes {
            rewrite_prefix(value, from, to);
        }
    }

    for entry in &skipped {
        concord_telemetry::log_conversion_skipped!(
            file = %entry.file,
            location = %entry.location,
            reason = %entry.reason,
            "E2201: conversion skipped"
        );
    }

    Conversion { body, skipped }
}

/// Move path-item `parameters` into every operation of that item.
/// Operation entries with the same `(name, in)` win.
pub fn push_down_path_parameters(body: &mut NodeMap) {
    let Some(SchemaNode::Object(paths)) = body.get_mut("paths") else {
        return;
    };
    for item in paths.values_mut() {
        let Some(item) = item.as_object_mut() else {
            continue;
        };
        let shared = match item.remove("parameters") {
            Some(SchemaNode::Array(shared)) => shared,
            Some(other) => {
                item.insert("parameters".into(), other);
                continue;
            }
            None => continue,
        };
        for method in HTTP_METHODS {
            let Some(SchemaNode::Object(op)) = item.get_mut(*method) else {
                continue;
            };
            let own = match op.get("parameters") {
                Some(SchemaNode::Array(own)) => own.clone(),
                Some(_) => continue,
                None => Vec::new(),
            };
            let overridden: BTreeSet<(String, String)> = own.iter().filter_map(param_key).collect();
            let mut merged: Vec<SchemaNode> = shared
                .iter()
                .filter(|p| param_key(p).map_or(true, |key| !overridden.contains(&key)))
                .cloned()
                .collect();
            merged.extend(own);
            op.insert("parameters".into(), SchemaNode::Array(merged));
        }
    }
}

fn param_key(param: &SchemaNode) -> Option<(String, String)> {
    Some((
        param.get("name")?.as_str()?.to_string(),
        param.get("in")?.as_str()?.to_string(),
    ))
}

fn convert_legacy(body: &mut NodeMap, file: &str, skipped: &mut Vec<SkippedConversion>) {
    let ctx = LegacyContext {
        consumes: body.get("consumes").and_then(media_types).unwrap_or_default(),
        produces: body.get("produces").and_then(media_types).unwrap_or_default(),
        parameters: object_or_empty(body.get("parameters")),
    };
    let mut skip = |location: String, reason: String| {
        skipped.push(SkippedConversion {
            file: file.to_string(),
            location,
            reason,
        });
    };

    if let Some(SchemaNode::Object(paths)) = body.get_mut("paths") {
        for (path, item) in paths.iter_mut() {
            let Some(item) = item.as_object_mut() else {
                continue;
            };
            for method in HTTP_METHODS {
                let Some(op) = item.get_mut(*method) else {
                    continue;
                };
                match ctx.convert_operation(op) {
                    Ok(converted) => *op = converted,
                    Err(reason) => {
                        mark_skipped(op, &reason);
                        skip(format!("{} {}", method.to_uppercase(), path), reason);
                    }
                }
            }
        }
    }

    let mut components: BTreeMap<String, NodeMap> = BTreeMap::new();
    let mut malformed = NodeMap::new();
    for (kind, value) in object_or_empty(body.get("components")) {
        match value {
            SchemaNode::Object(map) => {
                components.insert(kind, map);
            }
            other => {
                malformed.insert(kind, other);
            }
        }
    }

    if let Some(SchemaNode::Object(definitions)) = body.get("definitions") {
        section(&mut components, "schemas").extend(definitions.clone());
    }

    for (name, param) in &ctx.parameters {
        match param.get("in").and_then(SchemaNode::as_str) {
            Some("body") | Some("formData") => {
                match ctx.payload_request_body(std::slice::from_ref(param)) {
                    Ok(request) => {
                        section(&mut components, "requestBodies").insert(name.clone(), request);
                    }
                    Err(reason) => {
                        let mut kept = param.clone();
                        mark_skipped(&mut kept, &reason);
                        section(&mut components, "parameters").insert(name.clone(), kept);
                        skip(format!("parameters/{}", name), reason);
                    }
                }
            }
            _ => {
                section(&mut components, "parameters")
                    .insert(name.clone(), convert_parameter(param.clone()));
            }
        }
    }

    if let Some(SchemaNode::Object(responses)) = body.get("responses") {
        let converted = section(&mut components, "responses");
        for (name, response) in responses {
            let mut response = response.clone();
            convert_response(&mut response, &ctx.produces);
            converted.insert(name.clone(), response);
        }
    }

    if let Some(SchemaNode::Object(schemes)) = body.get("securityDefinitions") {
        for (name, scheme) in schemes {
            let converted = match convert_security_scheme(scheme) {
                Ok(converted) => converted,
                Err(reason) => {
                    let mut kept = scheme.clone();
                    mark_skipped(&mut kept, &reason);
                    skip(format!("securityDefinitions/{}", name), reason);
                    kept
                }
            };
            section(&mut components, "securitySchemes").insert(name.clone(), converted);
        }
    }

    if let Some(server) = legacy_server(body) {
        body.insert("servers".into(), SchemaNode::Array(vec![server]));
    }
    for key in LEGACY_ROOT_KEYS {
        body.remove(*key);
    }
    body.insert("openapi".into(), SchemaNode::string("3.0.3"));
    let mut merged: NodeMap = components
        .into_iter()
        .map(|(kind, map)| (kind, SchemaNode::Object(map)))
        .collect();
    merged.extend(malformed);
    if !merged.is_empty() {
        body.insert("components".into(), SchemaNode::Object(merged));
    }
}

fn section<'a>(components: &'a mut BTreeMap<String, NodeMap>, kind: &str) -> &'a mut NodeMap {
    components.entry(kind.to_string()).or_default()
}

/// `scheme://host/basePath` from the legacy root fields.
fn legacy_server(body: &NodeMap) -> Option<SchemaNode> {
    let host = body.get("host")?.as_str()?;
    let scheme = body
        .get("schemes")
        .and_then(SchemaNode::as_array)
        .and_then(|s| s.first())
        .and_then(SchemaNode::as_str)
        .unwrap_or("https");
    let base = body.get("basePath").and_then(SchemaNode::as_str).unwrap_or("");
    let url = format!("{}://{}{}", scheme, host, base.trim_end_matches('/'));
    Some([("url".to_string(), SchemaNode::string(url))].into_iter().collect())
}

struct LegacyContext {
    consumes: Vec<String>,
    produces: Vec<String>,
    /// Reusable root-level parameters, for inlining payload references.
    parameters: NodeMap,
}

impl LegacyContext {
    fn convert_operation(&self, op: &SchemaNode) -> Result<SchemaNode, String> {
        let SchemaNode::Object(source) = op else {
            return Err("operation is not an object".into());
        };
        let mut out = source.clone();

        let consumes = match out.remove("consumes") {
            Some(node) => media_types(&node).ok_or("consumes is not a list of media types")?,
            None => self.consumes.clone(),
        };
        let produces = match out.remove("produces") {
            Some(node) => media_types(&node).ok_or("produces is not a list of media types")?,
            None => self.produces.clone(),
        };
        let params = match out.remove("parameters") {
            Some(SchemaNode::Array(items)) => items,
            Some(_) => return Err("parameters is not an array".into()),
            None => Vec::new(),
        };

        let mut body_param = None;
        let mut form_params = Vec::new();
        let mut kept = Vec::new();
        for param in params {
            let param = self.inline_payload_param(param);
            match param.get("in").and_then(SchemaNode::as_str) {
                Some("body") => {
                    if body_param.replace(param).is_some() {
                        return Err("more than one body parameter".into());
                    }
                }
                Some("formData") => form_params.push(param),
                _ => kept.push(convert_parameter(param)),
            }
        }
        if body_param.is_some() && !form_params.is_empty() {
            return Err("both body and formData parameters".into());
        }

        if !kept.is_empty() {
            out.insert("parameters".into(), SchemaNode::Array(kept));
        }
        let payload = match body_param {
            Some(body) => vec![body],
            None => form_params,
        };
        if !payload.is_empty() {
            let request = LegacyContext {
                consumes,
                produces: Vec::new(),
                parameters: NodeMap::new(),
            }
            .payload_request_body(&payload)?;
            out.insert("requestBody".into(), request);
        }

        match out.get_mut("responses") {
            Some(SchemaNode::Object(responses)) => {
                for response in responses.values_mut() {
                    convert_response(response, &produces);
                }
            }
            Some(_) => return Err("responses is not an object".into()),
            None => {}
        }

        Ok(SchemaNode::Object(out))
    }

    /// Replace a pointer to a root-level body/formData parameter with the
    /// parameter itself, since those become request bodies.
    fn inline_payload_param(&self, param: SchemaNode) -> SchemaNode {
        let target = match &param {
            SchemaNode::Ref(r) => r
                .pointer
                .strip_prefix("#/parameters/")
                .and_then(|name| self.parameters.get(name)),
            _ => None,
        };
        match target {
            Some(target)
                if matches!(
                    target.get("in").and_then(SchemaNode::as_str),
                    Some("body") | Some("formData")
                ) =>
            {
                target.clone()
            }
            _ => param,
        }
    }

    /// Build a `requestBody` from one body parameter or a set of formData
    /// parameters, using this context's `consumes`.
    fn payload_request_body(&self, params: &[SchemaNode]) -> Result<SchemaNode, String> {
        match params {
            [body] if body.get("in").and_then(SchemaNode::as_str) == Some("body") => {
                self.body_request(body)
            }
            _ => self.form_request(params),
        }
    }

    fn body_request(&self, body: &SchemaNode) -> Result<SchemaNode, String> {
        let schema = body
            .get("schema")
            .cloned()
            .ok_or("body parameter has no schema")?;
        let media = if self.consumes.is_empty() {
            vec![DEFAULT_MEDIA_TYPE.to_string()]
        } else {
            self.consumes.clone()
        };

        let content: NodeMap = media
            .into_iter()
            .map(|mt| (mt, single("schema", schema.clone())))
            .collect();
        let mut request = NodeMap::new();
        request.insert("content".into(), SchemaNode::Object(content));
        for key in ["description", "required"] {
            if let Some(value) = body.get(key) {
                request.insert(key.into(), value.clone());
            }
        }
        Ok(SchemaNode::Object(request))
    }

    fn form_request(&self, params: &[SchemaNode]) -> Result<SchemaNode, String> {
        let mut properties = NodeMap::new();
        let mut required = Vec::new();
        let mut has_file = false;

        for param in params {
            let mut map = param
                .as_object()
                .cloned()
                .ok_or("formData parameter is not an object")?;
            let name = map
                .get("name")
                .and_then(SchemaNode::as_str)
                .ok_or("formData parameter has no name")?
                .to_string();
            if map.get("required").and_then(SchemaNode::as_bool) == Some(true) {
                required.push(SchemaNode::string(name.clone()));
            }
            let mut schema = take_schema_keywords(&mut map);
            if schema.get("type").and_then(SchemaNode::as_str) == Some("file") {
                has_file = true;
                schema.insert("type".into(), SchemaNode::string("string"));
                schema.insert("format".into(), SchemaNode::string("binary"));
            }
            if let Some(description) = map.remove("description") {
                schema.insert("description".into(), description);
            }
            properties.insert(name, SchemaNode::Object(schema));
        }

        let media = if has_file || self.consumes.iter().any(|mt| mt == MULTIPART) {
            MULTIPART
        } else {
            FORM_URLENCODED
        };

        let mut schema = NodeMap::new();
        schema.insert("type".into(), SchemaNode::string("object"));
        schema.insert("properties".into(), SchemaNode::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), SchemaNode::Array(required));
        }
        let content = single(media, single("schema", SchemaNode::Object(schema)));
        Ok(single("content", content))
    }
}

/// Move bare `type` & co into `schema`; map `collectionFormat`.
fn convert_parameter(param: SchemaNode) -> SchemaNode {
    let SchemaNode::Object(mut map) = param else {
        return param;
    };
    if let Some(format) = map.remove("collectionFormat") {
        let (style, explode) = collection_format_style(format.as_str().unwrap_or_default());
        map.insert("style".into(), SchemaNode::string(style));
        map.insert("explode".into(), SchemaNode::Bool(explode));
    }
    if !map.contains_key("schema") && map.contains_key("type") {
        let schema = take_schema_keywords(&mut map);
        map.insert("schema".into(), SchemaNode::Object(schema));
    }
    SchemaNode::Object(map)
}

fn convert_response(response: &mut SchemaNode, produces: &[String]) {
    let SchemaNode::Object(map) = response else {
        return;
    };
    let schema = map.remove("schema");
    let examples = match map.remove("examples") {
        Some(SchemaNode::Object(examples)) => examples,
        _ => NodeMap::new(),
    };

    let media: Vec<String> = if !produces.is_empty() {
        produces.to_vec()
    } else if !examples.is_empty() {
        examples.keys().cloned().collect()
    } else if schema.is_some() {
        vec![DEFAULT_MEDIA_TYPE.to_string()]
    } else {
        Vec::new()
    };

    if !media.is_empty() && (schema.is_some() || !examples.is_empty()) {
        let content: NodeMap = media
            .into_iter()
            .map(|mt| {
                let mut entry = NodeMap::new();
                if let Some(schema) = &schema {
                    entry.insert("schema".into(), schema.clone());
                }
                if let Some(example) = examples.get(&mt) {
                    entry.insert("example".into(), example.clone());
                }
                (mt, SchemaNode::Object(entry))
            })
            .collect();
        map.insert("content".into(), SchemaNode::Object(content));
    }

    if let Some(SchemaNode::Object(headers)) = map.get_mut("headers") {
        for header in headers.values_mut() {
            if let SchemaNode::Object(header) = header {
                if !header.contains_key("schema") && header.contains_key("type") {
                    let schema = take_schema_keywords(header);
                    header.insert("schema".into(), SchemaNode::Object(schema));
                }
            }
        }
    }
}

fn convert_security_scheme(scheme: &SchemaNode) -> Result<SchemaNode, String> {
    let SchemaNode::Object(source) = scheme else {
        return Err("security scheme is not an object".into());
    };
    let kind = source
        .get("type")
        .and_then(SchemaNode::as_str)
        .ok_or("security scheme has no type")?;

    let mut out: NodeMap = source
        .iter()
        .filter(|(k, _)| k.as_str() == "description" || k.starts_with("x-"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match kind {
        "basic" => {
            out.insert("type".into(), SchemaNode::string("http"));
            out.insert("scheme".into(), SchemaNode::string("basic"));
        }
        "apiKey" => return Ok(scheme.clone()),
        "oauth2" => {
            let flow = source
                .get("flow")
                .and_then(SchemaNode::as_str)
                .ok_or("oauth2 scheme has no flow")?;
            let flow_name = match flow {
                "implicit" => "implicit",
                "password" => "password",
                "application" => "clientCredentials",
                "accessCode" => "authorizationCode",
                other => return Err(format!("unknown oauth2 flow '{}'", other)),
            };
            let mut flow_obj = NodeMap::new();
            for key in ["authorizationUrl", "tokenUrl"] {
                if let Some(value) = source.get(key) {
                    flow_obj.insert(key.into(), value.clone());
                }
            }
            flow_obj.insert(
                "scopes".into(),
                source.get("scopes").cloned().unwrap_or_else(SchemaNode::object),
            );
            out.insert("type".into(), SchemaNode::string("oauth2"));
            out.insert("flows".into(), single(flow_name, SchemaNode::Object(flow_obj)));
        }
        other => return Err(format!("unknown security scheme type '{}'", other)),
    }
    Ok(SchemaNode::Object(out))
}

fn mark_skipped(node: &mut SchemaNode, reason: &str) {
    let marker = SchemaNode::string(reason);
    match node {
        SchemaNode::Object(map) => {
            map.insert(CONVERSION_SKIPPED_KEY.into(), marker);
        }
        SchemaNode::Ref(r) => {
            r.siblings.insert(CONVERSION_SKIPPED_KEY.into(), marker);
        }
        _ => {}
    }
}

fn take_schema_keywords(map: &mut NodeMap) -> NodeMap {
    SCHEMA_KEYWORDS
        .iter()
        .filter_map(|k| map.remove(*k).map(|v| (k.to_string(), v)))
        .collect()
}

fn media_types(node: &SchemaNode) -> Option<Vec<String>> {
    node.as_array()?
        .iter()
        .map(|mt| mt.as_str().map(str::to_string))
        .collect()
}

fn object_or_empty(node: Option<&SchemaNode>) -> NodeMap {
    node.and_then(SchemaNode::as_object).cloned().unwrap_or_default()
}

fn single(key: &str, value: SchemaNode) -> SchemaNode {
    SchemaNode::Object([(key.to_string(), value)].into_iter().collect())
}
