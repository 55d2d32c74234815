//! TestWorkspace: in-process harness over a throwaway input tree.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;

use concord_compiler::{unify, RunSummary, UnifyOptions};

/// Errors from TestWorkspace operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("unification failed: {0}")]
    Unify(#[from] concord_compiler::UnifyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid output JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no output written for domain {0}")]
    MissingOutput(String),
}

/// Input and output directories for one or more unification runs.
///
/// Runs use a fixed `generatedAt` so outputs of repeated runs compare
/// byte-for-byte.
pub struct TestWorkspace {
    input: TempDir,
    output: TempDir,
    generated_at: DateTime<Utc>,
}

impl TestWorkspace {
    pub fn new() -> Result<Self, TestError> {
        Ok(Self {
            input: TempDir::new()?,
            output: TempDir::new()?,
            generated_at: Utc
                .timestamp_opt(1_704_067_200, 0)
                .single()
                .unwrap_or_default(),
        })
    }

    pub fn input_dir(&self) -> &Path {
        self.input.path()
    }

    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }

    /// Write `content` to `<input>/<domain>/<file_id>`.
    pub fn add(&self, domain: &str, file_id: &str, content: &str) -> Result<PathBuf, TestError> {
        let path = self.input.path().join(domain).join(file_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Like [`TestWorkspace::add`], with the file's mtime set to `secs` after
    /// the epoch.
    pub fn add_with_mtime(
        &self,
        domain: &str,
        file_id: &str,
        content: &str,
        secs: u64,
    ) -> Result<PathBuf, TestError> {
        let path = self.add(domain, file_id, content)?;
        let file = File::options().write(true).open(&path)?;
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))?;
        Ok(path)
    }

    /// Options for a run over this workspace.
    pub fn options(&self) -> UnifyOptions {
        UnifyOptions::new(self.input.path(), self.output.path())
            .with_generated_at(self.generated_at)
    }

    pub async fn run(&self) -> Result<RunSummary, TestError> {
        self.run_with(self.options()).await
    }

    pub async fn run_with(&self, options: UnifyOptions) -> Result<RunSummary, TestError> {
        Ok(unify(&options).await?)
    }

    /// Raw bytes of `<output>/<domain>.json`.
    pub fn output_bytes(&self, domain: &str) -> Result<Vec<u8>, TestError> {
        let path = self.output.path().join(format!("{}.json", domain));
        if !path.exists() {
            return Err(TestError::MissingOutput(domain.to_string()));
        }
        Ok(std::fs::read(path)?)
    }

    /// Parsed `<output>/<domain>.json`.
    pub fn output(&self, domain: &str) -> Result<Value, TestError> {
        Ok(serde_json::from_slice(&self.output_bytes(domain)?)?)
    }
}

/// Every internal `$ref` in `doc` whose target is missing.
pub fn dangling_refs(doc: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_internal_refs(doc, &mut refs);
    refs.into_iter()
        .filter(|pointer| lookup(doc, pointer).is_none())
        .collect()
}

fn collect_internal_refs(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(pointer)) = map.get("$ref") {
                if pointer.starts_with("#/") {
                    out.push(pointer.clone());
                }
            }
            map.values().for_each(|v| collect_internal_refs(v, out));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_internal_refs(v, out)),
        _ => {}
    }
}

fn lookup<'a>(doc: &'a Value, pointer: &str) -> Option<&'a Value> {
    doc.pointer(pointer.strip_prefix('#')?)
}
