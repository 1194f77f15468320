#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// rules-engine-cli/src/main.rs
// ============================================================================
// Module: Rules Engine CLI Entry Point
// Description: Operator-facing demo/debug binary driving the rule engine
//              from a rule file and NDJSON points on stdin.
// Purpose: Exercise the engine end to end without a southbound adapter.
// Dependencies: clap, rules-engine-core, rules-engine-forwarding, serde_json,
//               tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `rules-engine` loads a JSON array of [`rules_engine_core::Rule`] from a
//! file, builds a [`RuleEngine`] from an optional TOML config, and for each
//! NDJSON-encoded [`rules_engine_core::Point`] read from stdin calls
//! [`RuleEngine::process`], printing the outcome as one JSON line per point
//! on stdout. A malformed point line is logged and skipped rather than
//! aborting the stream, matching the engine's own "one bad input never
//! takes down the rest" posture.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::BufRead;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rules_engine_core::Point;
use rules_engine_core::Rule;
use rules_engine_core::RuleEngine;
use rules_engine_core::config::EngineConfig;
use rules_engine_core::engine::ProcessOutcome;
use rules_engine_forwarding::FileSink;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Runs a rule file against a stream of points.
#[derive(Parser, Debug)]
#[command(name = "rules-engine", arg_required_else_help = true)]
struct Cli {
    /// Path to a JSON file holding an array of rules.
    #[arg(long)]
    rules: PathBuf,
    /// Path to a TOML engine configuration file. Defaults to
    /// [`EngineConfig::default`] when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to append forwarded/aggregated envelopes to, as NDJSON.
    /// Forwarding actions report `published: false` when omitted.
    #[arg(long)]
    forward_to: Option<PathBuf>,
}

/// Everything that can send this binary to a non-zero exit.
#[derive(Debug, Error)]
enum CliError {
    /// A file on disk could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// The path that failed to open or read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The rules file was not a valid JSON array of [`Rule`].
    #[error("failed to parse rules file '{path}': {source}")]
    ParseRules {
        /// The rules file path.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The config file was not valid [`EngineConfig`] TOML.
    #[error("failed to load config '{path}': {source}")]
    LoadConfig {
        /// The config file path.
        path: PathBuf,
        /// The underlying config error.
        #[source]
        source: rules_engine_core::config::ConfigError,
    },
    /// A loaded rule set failed to compile.
    #[error("rule set failed to compile: {0}")]
    CompileRules(#[source] rules_engine_core::error::ConditionError),
    /// The forwarding sink file could not be opened.
    #[error("failed to open forward sink: {0}")]
    OpenForwardSink(#[source] rules_engine_core::forward::PublishError),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            write_stderr_line(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let rules = load_rules(&cli.rules)?;
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    let publisher = match &cli.forward_to {
        Some(path) => Some(Arc::new(FileSink::open(path).map_err(CliError::OpenForwardSink)?) as Arc<dyn rules_engine_core::forward::Publisher>),
        None => None,
    };

    let num_cpus = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
    let engine = RuleEngine::with_collaborators(num_cpus, config, Arc::new(rules_engine_core::SystemClock), publisher);
    engine.update_rules(rules).map_err(CliError::CompileRules)?;
    engine.start();

    process_stdin(&engine).await;

    engine.shutdown().await;
    Ok(())
}

async fn process_stdin(engine: &Arc<RuleEngine>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            tracing::warn!("failed to read a line from stdin, stopping");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let point: Point = match serde_json::from_str(&line) {
            Ok(point) => point,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed point line");
                continue;
            }
        };
        let outcome = engine.process(&point).await;
        write_stdout_line(&render_outcome(&point, &outcome));
    }
}

fn render_outcome(point: &Point, outcome: &ProcessOutcome) -> String {
    let record = serde_json::json!({
        "device_id": point.device_id,
        "key": point.key,
        "matched_rules": outcome.matched.iter().map(|m| &m.rule_id).collect::<Vec<_>>(),
        "failures": outcome.failures.iter().map(|f| &f.rule_id).collect::<Vec<_>>(),
    });
    record.to_string()
}

fn load_rules(path: &Path) -> Result<Vec<Rule>, CliError> {
    let contents = fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_path_buf(), source })?;
    serde_json::from_str(&contents).map_err(|source| CliError::ParseRules { path: path.to_path_buf(), source })
}

fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    let contents = fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_path_buf(), source })?;
    EngineConfig::from_toml(&contents).map_err(|source| CliError::LoadConfig { path: path.to_path_buf(), source })
}

fn write_stdout_line(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(&mut stdout, "{message}");
}

fn write_stderr_line(message: &str) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rules_engine_core::DataType;
    use rules_engine_core::ScalarValue;
    use rules_engine_core::engine::RuleOutcome;

    use super::*;

    #[test]
    fn render_outcome_lists_matched_and_failed_rule_ids() {
        let point = Point {
            device_id: "d1".to_string(),
            key: "temperature".to_string(),
            value: Some(ScalarValue::Float(1.0)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        };
        let outcome = ProcessOutcome { matched: vec![RuleOutcome { rule_id: "r1".to_string(), results: Vec::new() }], failures: Vec::new() };
        let rendered = render_outcome(&point, &outcome);
        assert!(rendered.contains("\"r1\""));
        assert!(rendered.contains("\"d1\""));
    }

    #[test]
    fn malformed_rules_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir creation never fails on a clean runner");
        let path = dir.path().join("rules.json");
        fs::write(&path, "not json").expect("write succeeds");
        assert!(matches!(load_rules(&path), Err(CliError::ParseRules { .. })));
    }
}
