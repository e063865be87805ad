//! CLI argument definitions for ratewire.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Run the full pipeline: simulation, supervision, TCP server |
//! | `check-config` | Load and validate a configuration file |
//! | `simulate` | Print N engine cycles to stdout as NDJSON, no server |
//!
//! # Examples
//!
//! ```bash
//! # Run with a config file
//! ratewire run --config ratewire.json
//!
//! # Validate a config before deploying it
//! ratewire check-config --config ratewire.json
//!
//! # Inspect engine output offline
//! ratewire simulate --config ratewire.json --cycles 100
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Simulated rate generation and TCP distribution.
#[derive(Debug, Parser)]
#[command(
    name = "ratewire",
    author,
    version,
    about = "Simulated rate generation and TCP distribution"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline: subscribers, coordinator, TCP server.
    Run(RunArgs),
    /// Load and validate a configuration file, then exit.
    CheckConfig(CheckConfigArgs),
    /// Drive the engine for a fixed number of cycles and print each
    /// quote as NDJSON.
    Simulate(SimulateArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "ratewire.json")]
    pub config: PathBuf,
    /// Watch the config file and hot-reload on change.
    #[arg(long, default_value_t = true)]
    pub watch_config: bool,
}

#[derive(Debug, clap::Args)]
pub struct CheckConfigArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "ratewire.json")]
    pub config: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct SimulateArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "ratewire.json")]
    pub config: PathBuf,
    /// Number of engine cycles to run.
    #[arg(long, default_value_t = 100)]
    pub cycles: u64,
    /// Seed for deterministic output.
    #[arg(long)]
    pub seed: Option<u64>,
}
