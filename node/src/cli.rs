//! # CLI Interface
//!
//! Defines the command-line argument structure for `custody-node` using
//! `clap` derive. Supports three subcommands: `simulate`, `init` and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Custody vault simulation harness.
///
/// Loads a vault configuration, replays an operation script against
/// in-memory token, price and exchange collaborators, and prints the
/// resulting pool state as JSON.
#[derive(Parser, Debug)]
#[command(
    name = "custody-node",
    about = "Custody vault simulation harness",
    version,
    propagate_version = true
)]
pub struct CustodyNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the custody node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay an operation script and print the final state.
    Simulate(SimulateArgs),
    /// Write a default vault configuration and a sample script.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Path to the vault configuration file (JSON).
    ///
    /// When omitted, the built-in default configuration is used.
    #[arg(long, short = 'c', env = "CUSTODY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the operation script (JSON).
    #[arg(long, short = 's')]
    pub script: PathBuf,

    /// Stop at the first step that fails instead of recording it.
    #[arg(long)]
    pub strict: bool,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "CUSTODY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to write `vault.json` and `script.json` into.
    #[arg(long, short = 'o', default_value = ".")]
    pub out: PathBuf,

    /// Overwrite existing files.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        CustodyNodeCli::command().debug_assert();
    }

    #[test]
    fn simulate_requires_a_script() {
        assert!(CustodyNodeCli::try_parse_from(["custody-node", "simulate"]).is_err());

        let cli = CustodyNodeCli::try_parse_from([
            "custody-node",
            "simulate",
            "--script",
            "steps.json",
            "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.script, PathBuf::from("steps.json"));
                assert!(args.strict);
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
