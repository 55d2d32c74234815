//! Unification orchestrator: discovery, per-domain pipeline, output.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use concord_resolver::{
    flatten_composition_with, BaseContext, CacheStats, Mirror, Resolver, ResolverConfig,
};
use concord_spec_parser::{parse_document, Dialect, NodeMap, ParseError, SchemaNode, SourceDocument};
use futures_util::future::join_all;
use walkdir::WalkDir;

use crate::base_path::effective_base_path;
use crate::document::NormalizedDocument;
use crate::error::{UnifyError, UnifyWarning};
use crate::merge::{merge_documents, MergedDomain};
use crate::metadata::{GenerationMetadata, METADATA_KEY};

/// `openapi` version of every unified document.
pub const OUTPUT_OPENAPI_VERSION: &str = "3.0.3";
/// `info.version` of every unified document.
pub const OUTPUT_INFO_VERSION: &str = "3.0";

/// Options for a unification run.
#[derive(Debug, Clone)]
pub struct UnifyOptions {
    /// Directory holding one subdirectory per domain (default: `./swagger`).
    pub input_dir: PathBuf,
    /// Where `<domain>.json` files are written (default: `./mcp_swagger`).
    pub output_dir: PathBuf,
    /// Compute and log everything, write nothing.
    pub dry_run: bool,
    /// Inline external `$ref`s (default: true).
    pub resolve_external: bool,
    /// Flatten `allOf` compositions after merge (default: false).
    pub flatten_compositions: bool,
    /// Server URL for every unified document; defaults to the origin of the
    /// first contributing document's server.
    pub server_url: Option<String>,
    /// URL prefixes served from local directories.
    pub mirrors: Vec<Mirror>,
    /// Fixed `generatedAt` timestamp; the current time when unset.
    pub generated_at: Option<DateTime<Utc>>,
}

impl Default for UnifyOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./swagger"),
            output_dir: PathBuf::from("./mcp_swagger"),
            dry_run: false,
            resolve_external: true,
            flatten_compositions: false,
            server_url: None,
            mirrors: Vec::new(),
            generated_at: None,
        }
    }
}

impl UnifyOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_resolve_external(mut self, resolve: bool) -> Self {
        self.resolve_external = resolve;
        self
    }

    pub fn with_flatten_compositions(mut self, flatten: bool) -> Self {
        self.flatten_compositions = flatten;
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirrors.push(mirror);
        self
    }

    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }
}

/// Outcome for one domain.
#[derive(Debug, Clone, Default)]
pub struct DomainReport {
    pub domain: String,
    /// Documents that parsed and were merged.
    pub files: usize,
    /// Documents skipped with a parse error.
    pub skipped_files: usize,
    pub paths: usize,
    pub schemas: usize,
    pub conflicts: usize,
    /// Written file; `None` for dry runs and empty domains.
    pub output: Option<PathBuf>,
    pub warnings: Vec<UnifyWarning>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub domains: Vec<DomainReport>,
    pub cache: CacheStats,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn total_files(&self) -> usize {
        self.domains.iter().map(|d| d.files).sum()
    }

    pub fn total_paths(&self) -> usize {
        self.domains.iter().map(|d| d.paths).sum()
    }

    pub fn total_conflicts(&self) -> usize {
        self.domains.iter().map(|d| d.conflicts).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &UnifyWarning> {
        self.domains.iter().flat_map(|d| &d.warnings)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Unified {} domain(s): {} file(s), {} path(s), {} conflict(s){}",
            self.domains.iter().filter(|d| d.files > 0).count(),
            self.total_files(),
            self.total_paths(),
            self.total_conflicts(),
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        for d in &self.domains {
            if d.files == 0 {
                writeln!(f, "  {}: no documents, skipped", d.domain)?;
                continue;
            }
            write!(
                f,
                "  {}: {} file(s), {} path(s), {} schema(s), {} conflict(s)",
                d.domain, d.files, d.paths, d.schemas, d.conflicts
            )?;
            if d.skipped_files > 0 {
                write!(f, ", {} skipped", d.skipped_files)?;
            }
            match &d.output {
                Some(path) => writeln!(f, " -> {}", path.display())?,
                None => writeln!(f)?,
            }
        }
        for warning in self.warnings() {
            writeln!(f, "warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Run unification with a fresh resolver.
pub async fn unify(options: &UnifyOptions) -> Result<RunSummary, UnifyError> {
    let mut config = ResolverConfig::default();
    for mirror in &options.mirrors {
        config = config.with_mirror(mirror.clone());
    }
    let resolver = Resolver::new(config)?;
    unify_with_resolver(options, &resolver).await
}

/// Run unification with an existing resolver. Its cache is cleared when the
/// run ends.
pub async fn unify_with_resolver(
    options: &UnifyOptions,
    resolver: &Resolver,
) -> Result<RunSummary, UnifyError> {
    let generated_at = options
        .generated_at
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    let domains = discover_domains(&options.input_dir)?;
    concord_telemetry::log_run_started!(
        input = %options.input_dir.display(),
        output = %options.output_dir.display(),
        domains = domains.len(),
        dry_run = options.dry_run,
        "unification started"
    );

    let mut summary = RunSummary {
        dry_run: options.dry_run,
        ..RunSummary::default()
    };
    for (domain, dir) in domains {
        let report = unify_domain(resolver, options, &domain, &dir, &generated_at).await?;
        summary.domains.push(report);
    }

    summary.cache = resolver.cache_stats();
    resolver.reset();

    concord_telemetry::log_run_finished!(
        domains = summary.domains.len(),
        files = summary.total_files(),
        paths = summary.total_paths(),
        conflicts = summary.total_conflicts(),
        fetched = summary.cache.fetches_started,
        "unification finished"
    );
    Ok(summary)
}

/// Domain subdirectories of `input_dir`, sorted by name. Hidden directories
/// are ignored.
pub fn discover_domains(input_dir: &Path) -> Result<Vec<(String, PathBuf)>, UnifyError> {
    let unreadable = |source| UnifyError::InputUnreadable {
        path: input_dir.display().to_string(),
        source,
    };
    let mut domains = Vec::new();
    for entry in std::fs::read_dir(input_dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        domains.push((name, entry.path()));
    }
    domains.sort();
    Ok(domains)
}

/// Spec files below `domain_dir` as `(file id, path)`, sorted by file id.
pub fn discover_files(domain_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut files = Vec::new();
    let walker = WalkDir::new(domain_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %domain_dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !concord_spec_parser::is_spec_file(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(domain_dir) else {
            continue;
        };
        let file_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((file_id, entry.path().to_path_buf()));
    }
    files.sort();
    files
}

async fn load_document(domain: &str, file_id: &str, path: &Path) -> Result<SourceDocument, ParseError> {
    let io_error = |source| ParseError::Io {
        file: file_id.to_string(),
        source,
    };
    let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map_err(io_error)?;
    parse_document(&content, domain, file_id, DateTime::<Utc>::from(modified))
}

fn parse_error_code(error: &ParseError) -> &'static str {
    match error {
        ParseError::Syntax { .. } | ParseError::Io { .. } => "E2001",
        ParseError::NotAnApiSpec { .. } => "E2002",
        ParseError::UnsupportedVersion { .. } => "E2003",
    }
}

async fn unify_domain(
    resolver: &Resolver,
    options: &UnifyOptions,
    domain: &str,
    dir: &Path,
    generated_at: &str,
) -> Result<DomainReport, UnifyError> {
    let mut report = DomainReport {
        domain: domain.to_string(),
        ..DomainReport::default()
    };

    let mut sources = Vec::new();
    for (file_id, path) in discover_files(dir) {
        match load_document(domain, &file_id, &path).await {
            Ok(doc) => sources.push((doc, path)),
            Err(e) => {
                concord_telemetry::log_document_skipped!(
                    domain = %domain,
                    file = %file_id,
                    error = %e,
                    "document skipped"
                );
                report.skipped_files += 1;
                report.warnings.push(UnifyWarning::new(
                    parse_error_code(&e),
                    e.to_string(),
                    Some(format!("{}/{}", domain, file_id)),
                ));
            }
        }
    }

    if sources.is_empty() {
        tracing::info!(domain = %domain, "no documents, nothing written");
        return Ok(report);
    }

    // Documents under `legacy/` inherit the base path of the domain's
    // first current document.
    let inherited = sources
        .iter()
        .map(|(doc, _)| doc)
        .find(|doc| doc.dialect == Dialect::Current && !doc.in_legacy_dir())
        .map(|doc| effective_base_path(doc, None))
        .filter(|base| !base.is_empty());

    let mut normalized: Vec<NormalizedDocument> = sources
        .iter()
        .map(|(doc, _)| NormalizedDocument::from_source(doc, inherited.as_deref()))
        .collect();

    if options.resolve_external {
        let bases: Vec<BaseContext> = sources
            .iter()
            .map(|(_, path)| BaseContext::dir(path.parent().unwrap_or(dir)))
            .collect();
        join_all(
            normalized
                .iter_mut()
                .zip(&bases)
                .map(|(doc, base)| doc.resolve_external(resolver, base)),
        )
        .await;
    }

    let mut merged = merge_documents(&normalized);
    if options.flatten_compositions {
        flatten(&mut merged);
    }

    for doc in &normalized {
        for skipped in &doc.skipped {
            report.warnings.push(UnifyWarning::new(
                "E2201",
                format!("conversion skipped: {}", skipped.reason),
                Some(format!("{}/{}: {}", domain, skipped.file, skipped.location)),
            ));
        }
        for unresolved in &doc.unresolved {
            let code = if unresolved.error.starts_with("E2102") {
                "E2102"
            } else {
                "E2101"
            };
            report.warnings.push(UnifyWarning::new(
                code,
                unresolved.error.clone(),
                Some(format!("{}/{}: {}", domain, unresolved.file, unresolved.pointer)),
            ));
        }
    }
    report.warnings.extend(merged.warnings.iter().cloned());

    let metadata = GenerationMetadata {
        generated_at: generated_at.to_string(),
        source_files: normalized.iter().map(|d| d.file_id.clone()).collect(),
        operation_sources: merged.operation_sources.clone(),
        path_normalizations: normalized
            .iter()
            .flat_map(|d| d.normalizations.iter().cloned())
            .collect(),
        conflicts: merged.conflicts.clone(),
        skipped_conversions: normalized
            .iter()
            .flat_map(|d| d.skipped.iter().cloned())
            .collect(),
        unresolved_references: normalized
            .iter()
            .flat_map(|d| d.unresolved.iter().cloned())
            .collect(),
        dangling_references: merged.dangling_references.clone(),
        flagged_references: merged.flagged_references.clone(),
        total_paths: merged.paths.len(),
        total_schemas: merged.schema_count(),
    };

    let server = options
        .server_url
        .clone()
        .or_else(|| normalized.iter().find_map(|d| d.server_origin.clone()));
    let document = assemble(domain, &merged, &metadata, server)?;

    report.files = normalized.len();
    report.paths = metadata.total_paths;
    report.schemas = metadata.total_schemas;
    report.conflicts = merged.conflicts.len();

    concord_telemetry::log_domain_unified!(
        domain = %domain,
        files = report.files,
        paths = report.paths,
        schemas = report.schemas,
        conflicts = report.conflicts,
        "domain unified"
    );

    if !options.dry_run {
        report.output = Some(write_output(&options.output_dir, domain, &document).await?);
    }
    Ok(report)
}

/// Flatten `allOf` in component schemas and path items, inlining
/// component-schema branches.
fn flatten(merged: &mut MergedDomain) {
    let schemas = merged.components.get("schemas").cloned().unwrap_or_default();
    if let Some(entries) = merged.components.get_mut("schemas") {
        for body in entries.values_mut() {
            *body = flatten_composition_with(body, &schemas);
        }
    }
    for item in merged.paths.values_mut() {
        *item = flatten_composition_with(item, &schemas);
    }
}

/// Build the unified document envelope around the merged contents.
pub fn assemble(
    domain: &str,
    merged: &MergedDomain,
    metadata: &GenerationMetadata,
    server_url: Option<String>,
) -> Result<SchemaNode, UnifyError> {
    let mut info = NodeMap::new();
    info.insert("title".into(), SchemaNode::string(capitalize(domain)));
    info.insert("version".into(), SchemaNode::string(OUTPUT_INFO_VERSION));
    info.insert(
        METADATA_KEY.into(),
        SchemaNode::from(serde_json::to_value(metadata)?),
    );

    let mut root = NodeMap::new();
    root.insert("openapi".into(), SchemaNode::string(OUTPUT_OPENAPI_VERSION));
    root.insert("info".into(), SchemaNode::Object(info));
    if let Some(url) = server_url {
        let server: SchemaNode = [("url".to_string(), SchemaNode::string(url))]
            .into_iter()
            .collect();
        root.insert("servers".into(), SchemaNode::Array(vec![server]));
    }
    if !merged.tags.is_empty() {
        root.insert("tags".into(), SchemaNode::Array(merged.tags.clone()));
    }
    if !merged.security.is_empty() {
        root.insert("security".into(), SchemaNode::Array(merged.security.clone()));
    }
    root.insert("paths".into(), SchemaNode::Object(merged.paths.clone()));
    if !merged.components.is_empty() {
        let components: SchemaNode = merged
            .components
            .iter()
            .map(|(kind, entries)| (kind.clone(), SchemaNode::Object(entries.clone())))
            .collect();
        root.insert("components".into(), components);
    }
    Ok(SchemaNode::Object(root))
}

async fn write_output(
    output_dir: &Path,
    domain: &str,
    document: &SchemaNode,
) -> Result<PathBuf, UnifyError> {
    let unwritable = |path: &Path| {
        let path = path.display().to_string();
        move |source| UnifyError::OutputUnwritable { path, source }
    };
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(unwritable(output_dir))?;

    let path = output_dir.join(format!("{}.json", domain));
    let mut json = serde_json::to_string_pretty(document)?;
    json.push('\n');
    tokio::fs::write(&path, json)
        .await
        .map_err(unwritable(&path))?;

    concord_telemetry::log_output_written!(domain = %domain, path = %path.display(), "output written");
    Ok(path)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
