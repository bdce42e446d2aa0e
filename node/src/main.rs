// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Node
//!
//! Entry point for the `custody-node` binary. Parses CLI arguments,
//! initializes logging, and drives a custody vault wired to in-memory
//! collaborators.
//!
//! The binary supports three subcommands:
//!
//! - `simulate` — replay an operation script and print the final state
//! - `init`     — write a default configuration and a sample script
//! - `version`  — print build version information

mod cli;
mod logging;
mod script;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;

use custody_protocol::VaultConfig;

use cli::{Commands, CustodyNodeCli};
use logging::LogFormat;
use script::{Script, Simulation};

const CONFIG_FILE: &str = "vault.json";
const SCRIPT_FILE: &str = "script.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CustodyNodeCli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args).await,
        Commands::Init(args) => init(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the configuration and script, replays it, and prints the report
/// as pretty JSON on stdout.
async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            tracing::info!("no configuration given, using defaults");
            VaultConfig::default()
        }
    };

    let raw = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let script = Script::from_json(&raw)
        .with_context(|| format!("failed to parse script {}", args.script.display()))?;

    tracing::info!(
        script = %args.script.display(),
        steps = script.steps.len(),
        underlying = %config.underlying,
        strict = args.strict,
        "starting simulation"
    );

    let simulation = Simulation::new(config, script.start_unix, script.venue.clone())?;
    let report = simulation.run(&script, args.strict).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render report")?
    );
    Ok(())
}

fn load_config(path: &Path) -> Result<VaultConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))?;
    VaultConfig::from_json(&raw)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Writes `vault.json` and `script.json` into the output directory.
fn init(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::Pretty);

    let out = &args.out;
    std::fs::create_dir_all(out)
        .with_context(|| format!("failed to create directory {}", out.display()))?;

    let config_path = out.join(CONFIG_FILE);
    let script_path = out.join(SCRIPT_FILE);
    if !args.force {
        for path in [&config_path, &script_path] {
            if path.exists() {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
        }
    }

    let config = serde_json::to_string_pretty(&VaultConfig::default())?;
    std::fs::write(&config_path, config)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    let sample = serde_json::to_string_pretty(&script::sample_script())?;
    std::fs::write(&script_path, sample)
        .with_context(|| format!("failed to write {}", script_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        script = %script_path.display(),
        "sample files written"
    );

    println!("Initialized simulation files.");
    println!("  Configuration : {}", config_path.display());
    println!("  Script        : {}", script_path.display());
    println!();
    println!(
        "Run: custody-node simulate --config {} --script {}",
        config_path.display(),
        script_path.display()
    );

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("custody-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
