//! Spec-to-React-project generator.
//!
//! `forge decompose` expands a spec into a tree of pages and components and
//! writes one file per leaf. `forge project` designs the whole file graph first,
//! writes every unit against it and repairs the build. Reports are printed to
//! stdout as JSON; logs go to stderr.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use forge::core::blueprint::{Blueprint, BlueprintValidation, GraphReport, validate_blueprint};
use forge::core::diagnostics::parse_diagnostics;
use forge::decompose::decompose;
use forge::error::ForgeError;
use forge::exit_codes;
use forge::io::build::CommandBuildService;
use forge::io::config::{DEFAULT_CONFIG_FILE, ForgeConfig, load_config, write_config};
use forge::io::dispatcher::{Dispatcher, ReqwestTransport, RetryPolicy, TokioSleeper};
use forge::io::sink::DiskSink;
use forge::io::tree_store::{load_tree, write_tree};
use forge::logging;
use forge::project::{ProjectBuilder, UnitReport};
use forge::repair::RepairReport;
use forge::schedule::{BranchFailure, RoundSummary, WrittenFile};

/// Manifest location inside the output directory.
const MANIFEST_PATH: &str = ".forge/tree.json";

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Generate a React + TypeScript project from a written spec"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Expand a spec into a work tree and write one file per leaf.
    Decompose {
        #[command(flatten)]
        input: SpecInput,
        /// Where to write the tree manifest (default: `<output_dir>/.forge/tree.json`).
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Design a blueprint, write every unit and repair the build.
    Project {
        #[command(flatten)]
        input: SpecInput,
        /// Skip the build and repair step.
        #[arg(long)]
        no_build: bool,
    },
    /// Check a blueprint JSON file for missing local imports and cycles.
    CheckBlueprint { path: PathBuf },
    /// Check a tree manifest against its schema and invariants.
    CheckTree { path: PathBuf },
    /// Parse compiler output into structured diagnostics (stdin when no file is given).
    ParseBuildLog { path: Option<PathBuf> },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SpecSource {
    /// Spec file (markdown or plain text).
    #[arg(long)]
    spec: Option<PathBuf>,
    /// Spec text given inline.
    #[arg(long)]
    text: Option<String>,
}

#[derive(Args)]
struct SpecInput {
    #[command(flatten)]
    source: SpecSource,
    /// Output directory, overriding `output_dir` from the config.
    #[arg(long)]
    out: Option<PathBuf>,
}

impl SpecInput {
    fn read(&self) -> Result<String> {
        let spec = match (&self.source.spec, &self.source.text) {
            (Some(path), _) => {
                fs::read_to_string(path).with_context(|| format!("read spec {}", path.display()))?
            }
            (None, Some(text)) => text.clone(),
            (None, None) => anyhow::bail!("one of --spec or --text is required"),
        };
        if spec.trim().is_empty() {
            anyhow::bail!("spec is empty");
        }
        Ok(spec)
    }

    /// Load the config and apply `--out`.
    fn config(&self, config_path: &Path) -> Result<ForgeConfig> {
        let mut config = load_config(config_path)?;
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Decompose { input, manifest } => {
            let config = input.config(&cli.config)?;
            cmd_decompose(&config, &input.read()?, manifest).await
        }
        Command::Project { input, no_build } => {
            let config = input.config(&cli.config)?;
            cmd_project(&config, &input.read()?, no_build).await
        }
        Command::CheckBlueprint { path } => cmd_check_blueprint(&path),
        Command::CheckTree { path } => cmd_check_tree(&path),
        Command::ParseBuildLog { path } => cmd_parse_build_log(path.as_deref()),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &ForgeConfig::default())?;
    Ok(exit_codes::OK)
}

fn dispatcher(config: &ForgeConfig) -> Dispatcher<ReqwestTransport, TokioSleeper> {
    Dispatcher::http(RetryPolicy {
        max_retries: config.retry.max_retries,
        base_delay: config.base_delay(),
    })
}

/// Report a typed failure, mapping run-fatal ones to [`exit_codes::ABORTED`].
fn forge_failure(err: ForgeError) -> Result<i32> {
    if err.is_run_fatal() {
        eprintln!("{err}");
        return Ok(exit_codes::ABORTED);
    }
    Err(err.into())
}

#[derive(Serialize)]
struct DecomposeSummary<'a> {
    root: &'a str,
    items: usize,
    rounds: &'a [RoundSummary],
    written: &'a [WrittenFile],
    failures: &'a [BranchFailure],
    aborted: Option<&'a str>,
    total_tokens: u64,
    manifest: String,
}

async fn cmd_decompose(config: &ForgeConfig, spec: &str, manifest: Option<PathBuf>) -> Result<i32> {
    let profile = match config.request_profile() {
        Ok(profile) => profile,
        Err(err) => return forge_failure(err),
    };
    let generator = dispatcher(config);
    let sink = DiskSink::new(&config.output_dir);

    let outcome = match decompose(&generator, &sink, profile, config, spec).await {
        Ok(outcome) => outcome,
        Err(err) => return forge_failure(err),
    };
    let report = &outcome.report;

    let manifest = manifest.unwrap_or_else(|| config.output_dir.join(MANIFEST_PATH));
    write_tree(&manifest, &report.tree)?;

    print_json(&DecomposeSummary {
        root: &report.tree.root().name,
        items: report.tree.len(),
        rounds: &report.rounds,
        written: &report.written,
        failures: &report.failures,
        aborted: report.aborted.as_deref(),
        total_tokens: outcome.usage().total_tokens(),
        manifest: manifest.display().to_string(),
    })?;

    Ok(if report.aborted.is_some() {
        exit_codes::ABORTED
    } else if !report.is_clean() {
        exit_codes::DEGRADED
    } else {
        exit_codes::OK
    })
}

#[derive(Serialize)]
struct ProjectSummary<'a> {
    files: usize,
    validation: BlueprintValidation,
    blueprint_issues: Vec<String>,
    blueprint_attempts: u32,
    units: &'a [UnitReport],
    repair: Option<&'a RepairReport>,
    aborted: Option<&'a str>,
    total_tokens: u64,
}

async fn cmd_project(config: &ForgeConfig, spec: &str, no_build: bool) -> Result<i32> {
    let profile = match config.request_profile() {
        Ok(profile) => profile,
        Err(err) => return forge_failure(err),
    };
    let generator = dispatcher(config);
    let sink = DiskSink::new(&config.output_dir);
    let build = CommandBuildService::new(
        &config.output_dir,
        config.repair.build_command.clone(),
        config.build_timeout(),
        config.repair.output_limit_bytes,
    );

    let builder = ProjectBuilder::new(&generator, &sink, profile, config);
    let result = if no_build {
        builder.run::<CommandBuildService>(spec, None).await
    } else {
        builder.run(spec, Some(&build)).await
    };
    let report = match result {
        Ok(report) => report,
        Err(err) => return forge_failure(err),
    };

    print_json(&ProjectSummary {
        files: report.blueprint.files().len(),
        validation: report.flags(),
        blueprint_issues: report.graph.issues(),
        blueprint_attempts: report.blueprint_attempts,
        units: &report.units,
        repair: report.repair.as_ref(),
        aborted: report.aborted.as_deref(),
        total_tokens: report.usage.total_tokens(),
    })?;

    Ok(if report.aborted.is_some() {
        exit_codes::ABORTED
    } else if !report.is_clean() {
        exit_codes::DEGRADED
    } else {
        exit_codes::OK
    })
}

#[derive(Serialize)]
struct BlueprintCheck {
    validation: BlueprintValidation,
    #[serde(flatten)]
    graph: GraphReport,
}

fn cmd_check_blueprint(path: &Path) -> Result<i32> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let blueprint: Blueprint =
        serde_json::from_str(&raw).with_context(|| format!("parse blueprint {}", path.display()))?;
    let (_, graph) = validate_blueprint(blueprint);
    let validation = graph.flags();
    print_json(&BlueprintCheck { validation, graph })?;
    Ok(if validation.is_clean() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_check_tree(path: &Path) -> Result<i32> {
    let tree = load_tree(path)?;
    print_json(&serde_json::json!({
        "root": tree.root().name,
        "items": tree.len(),
        "leaves": tree.leaves().len(),
    }))?;
    Ok(exit_codes::OK)
}

fn cmd_parse_build_log(path: Option<&Path>) -> Result<i32> {
    let raw = match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read build log from stdin")?;
            buf
        }
    };
    print_json(&parse_diagnostics(&raw))?;
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize report")?);
    Ok(())
}
