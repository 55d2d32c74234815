//! Concord spec unifier.
//!
//! Merges every Swagger 2.0 / OpenAPI 3.x document under each domain
//! directory of the input root into `<output-dir>/<domain>.json`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use concord_compiler::{unify, Mirror, RunSummary, UnifyOptions};
use concord_telemetry::{LogFormat, Telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(
    name = "concord",
    about = "Unify per-file Swagger/OpenAPI documents into one document per domain",
    version
)]
struct Cli {
    /// Directory holding one subdirectory per domain.
    #[arg(long, default_value = "./swagger")]
    input_dir: PathBuf,

    /// Directory the unified `<domain>.json` documents are written to.
    #[arg(long, default_value = "./mcp_swagger")]
    output_dir: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Compute and log everything, but write no files.
    #[arg(long)]
    dry_run: bool,

    /// Log output format (json or pretty).
    #[arg(long, default_value = "pretty", value_parser = parse_log_format)]
    log_format: LogFormat,

    /// Server URL for every unified document (default: origin of the first
    /// contributing document's server).
    #[arg(long)]
    server_url: Option<String>,

    /// Leave external references as they are instead of fetching them.
    #[arg(long)]
    offline: bool,

    /// Flatten `allOf` compositions in the unified output.
    #[arg(long)]
    flatten_compositions: bool,

    /// Serve a URL prefix from a local directory: `<prefix>=<dir>`.
    /// May be repeated.
    #[arg(long = "mirror", value_name = "PREFIX=DIR", value_parser = parse_mirror)]
    mirrors: Vec<Mirror>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format '{}' (expected json or pretty)", s))
}

fn parse_mirror(s: &str) -> Result<Mirror, String> {
    match s.split_once('=') {
        Some((prefix, dir)) if !prefix.is_empty() && !dir.is_empty() => {
            Ok(Mirror::new(prefix, dir))
        }
        _ => Err(format!("expected <prefix>=<dir>, got '{}'", s)),
    }
}

impl Cli {
    fn options(&self) -> UnifyOptions {
        let mut options = UnifyOptions::new(&self.input_dir, &self.output_dir)
            .with_dry_run(self.dry_run)
            .with_resolve_external(!self.offline)
            .with_flatten_compositions(self.flatten_compositions);
        if let Some(url) = &self.server_url {
            options = options.with_server_url(url);
        }
        for mirror in &self.mirrors {
            options = options.with_mirror(mirror.clone());
        }
        options
    }
}

async fn run(cli: &Cli) -> anyhow::Result<RunSummary> {
    let options = cli.options();
    tracing::debug!(?options, "resolved options");
    unify(&options)
        .await
        .with_context(|| format!("unification of {} failed", cli.input_dir.display()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig::new()
        .with_log_format(cli.log_format)
        .with_verbose(cli.verbose);
    let telemetry = match Telemetry::init(telemetry) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };
    tracing::debug!(
        level = %telemetry.config().log_level,
        format = ?telemetry.config().log_format,
        "logging initialized"
    );

    match run(&cli).await {
        Ok(summary) => {
            print!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_directories() {
        let cli = Cli::parse_from(["concord"]);
        assert_eq!(cli.input_dir, PathBuf::from("./swagger"));
        assert_eq!(cli.output_dir, PathBuf::from("./mcp_swagger"));
        assert_eq!(cli.log_format, LogFormat::Pretty);
        let options = cli.options();
        assert!(options.resolve_external);
        assert!(!options.dry_run);
    }

    #[test]
    fn mirrors_and_flags_reach_options() {
        let cli = Cli::parse_from([
            "concord",
            "--offline",
            "--dry-run",
            "--mirror",
            "https://schemas.example.com=./vendor/schemas",
            "--server-url",
            "https://api.example.com",
        ]);
        let options = cli.options();
        assert!(!options.resolve_external);
        assert!(options.dry_run);
        assert_eq!(
            options.mirrors,
            [Mirror::new("https://schemas.example.com", "./vendor/schemas")]
        );
        assert_eq!(options.server_url.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn rejects_malformed_mirror() {
        assert!(parse_mirror("no-separator").is_err());
        assert!(parse_mirror("=dir").is_err());
        assert!(Cli::try_parse_from(["concord", "--log-format", "xml"]).is_err());
    }
}
