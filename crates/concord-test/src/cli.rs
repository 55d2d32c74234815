//! CLI regression tests for the `concord` binary.
//!
//! These tests invoke the binary as a subprocess to catch regressions in flag
//! names, exit codes, and output formats that the library tests can't catch.
//!
//! Run with: `cargo test -p concord-test`
//! Requires the `concord` binary to be built first (`cargo build -p concord`).

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::workspace::dangling_refs;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns an assert_cmd Command wrapping the `concord` binary.
fn concord() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("concord")
        .expect("concord binary not found, run `cargo build -p concord` first")
}

/// Absolute path to the shared test fixtures directory.
fn fixtures() -> PathBuf {
    // CARGO_MANIFEST_DIR = .../crates/concord-test
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crates/")
        .parent()
        .expect("workspace root")
        .join("tests/fixtures")
}

/// Runs the binary over the fixture tree into `out`.
fn unify_fixtures(out: &Path) -> Command {
    let mut cmd = concord();
    cmd.arg("--input-dir")
        .arg(fixtures().join("swagger"))
        .arg("--output-dir")
        .arg(out);
    cmd
}

fn read_output(out: &Path, domain: &str) -> Value {
    let bytes = std::fs::read(out.join(format!("{}.json", domain))).expect("output written");
    serde_json::from_slice(&bytes).expect("valid JSON")
}

// ---------------------------------------------------------------------------
// concord --help / argument errors
// ---------------------------------------------------------------------------

#[test]
fn help_exits_zero_and_lists_flags() {
    concord()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--input-dir"))
        .stdout(contains("--output-dir"))
        .stdout(contains("--dry-run"))
        .stdout(contains("--verbose"));
}

#[test]
fn unknown_log_format_is_rejected() {
    concord()
        .args(["--log-format", "xml"])
        .assert()
        .failure()
        .stderr(contains("unknown log format"));
}

#[test]
fn missing_input_dir_exits_one() {
    let out = TempDir::new().unwrap();
    concord()
        .arg("--input-dir")
        .arg(out.path().join("does-not-exist"))
        .arg("--output-dir")
        .arg(out.path())
        .assert()
        .failure()
        .code(1)
        .stderr(contains("error:"))
        .stderr(contains("E2401"));
}

// ---------------------------------------------------------------------------
// concord (unify)
// ---------------------------------------------------------------------------

#[test]
fn unify_writes_one_document_per_domain() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path())
        .assert()
        .success()
        .stdout(contains("Unified 2 domain(s)"))
        .stdout(contains("notes: no documents, skipped"))
        .stdout(contains("warning: E2001"));

    assert!(out.path().join("billing.json").exists());
    assert!(out.path().join("users.json").exists());
    assert!(!out.path().join("notes.json").exists());
}

#[test]
fn unify_normalizes_legacy_documents_into_domain_base_path() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path()).assert().success();
    let doc = read_output(out.path(), "billing");

    assert_eq!(doc["openapi"], json!("3.0.3"));
    assert_eq!(doc["info"]["title"], json!("Billing"));
    assert_eq!(doc["servers"][0]["url"], json!("https://api.example.com"));
    assert!(doc["paths"]["/billing/v1/invoices"]["get"].is_object());

    let get = &doc["paths"]["/billing/v1/invoices/{id}"]["get"];
    assert_eq!(get["parameters"][0]["schema"], json!({ "type": "integer" }));
    assert_eq!(get["parameters"][1]["style"], json!("simple"));
    assert_eq!(get["parameters"][1]["explode"], json!(false));
    assert_eq!(
        get["responses"]["200"]["content"]["application/json"]["schema"]["$ref"],
        json!("#/components/schemas/Invoice_invoices")
    );

    let schemas = &doc["components"]["schemas"];
    assert_eq!(
        schemas["Invoice"]["properties"]["total"]["properties"]["currency"]["type"],
        json!("string")
    );
    assert!(schemas["Invoice_invoices"]["properties"]["amountCents"].is_object());

    let meta = &doc["info"]["x-generated"];
    assert_eq!(meta["sourceFiles"], json!(["billing.yaml", "legacy/invoices.json"]));
    assert_eq!(
        meta["operationSources"]["GET /billing/v1/invoices/{id}"],
        json!("legacy/invoices.json")
    );
    assert_eq!(
        doc["tags"][0]["description"],
        json!("Invoice management | Legacy invoice endpoints")
    );
    assert!(dangling_refs(&doc).is_empty());
}

#[test]
fn unify_records_conflicts_in_metadata() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path()).assert().success();
    let doc = read_output(out.path(), "users");

    let meta = &doc["info"]["x-generated"];
    assert_eq!(meta["sourceFiles"], json!(["users-a.yaml", "users-b.yaml"]));
    assert_eq!(meta["conflicts"]["paths"].as_array().map(Vec::len), Some(1));
    assert_eq!(meta["conflicts"]["paths"][0]["key"], json!("GET /v1/users"));
    assert_eq!(
        meta["conflicts"]["schemas"][0]["renamedTo"],
        json!("User_users-b")
    );
    assert_eq!(
        doc["paths"]["/v1/users/{id}"]["get"]["responses"]["200"]["content"]["application/json"]
            ["schema"]["$ref"],
        json!("#/components/schemas/User_users-b")
    );
    assert_eq!(doc["security"], json!([{ "bearerAuth": [] }]));
    assert!(dangling_refs(&doc).is_empty());
}

#[test]
fn dry_run_writes_nothing() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(contains("(dry run)"));
    assert!(!out.path().join("billing.json").exists());
}

#[test]
fn offline_leaves_external_refs_in_place() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path()).arg("--offline").assert().success();
    let doc = read_output(out.path(), "billing");
    assert_eq!(
        doc["components"]["schemas"]["Invoice"]["properties"]["total"]["$ref"],
        json!("../../shared/money.yaml#/Money")
    );
}

#[test]
fn server_url_overrides_envelope_server() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path())
        .args(["--server-url", "https://gateway.example.com"])
        .assert()
        .success();
    let doc = read_output(out.path(), "users");
    assert_eq!(doc["servers"], json!([{ "url": "https://gateway.example.com" }]));
}

#[test]
fn json_logs_go_to_stderr() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path())
        .args(["--log-format", "json"])
        .assert()
        .success()
        .stderr(contains(r#""event":"run_started""#))
        .stderr(contains(r#""event":"output_written""#))
        .stdout(contains("Unified"));
}

#[test]
fn repeated_runs_differ_only_in_generated_at() {
    let out = TempDir::new().unwrap();
    unify_fixtures(out.path()).assert().success();
    let mut first = read_output(out.path(), "users");
    unify_fixtures(out.path()).assert().success();
    let mut second = read_output(out.path(), "users");

    for doc in [&mut first, &mut second] {
        doc["info"]["x-generated"]["generatedAt"] = Value::Null;
    }
    assert_eq!(first, second);
}
