use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "rlm", version, about = "Recursive language model driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an agent over a context read from a file or stdin.
    Run(RunArgs),
    /// Check that the proxy endpoint is reachable and advertises models.
    Smoke(SmokeArgs),
    /// Render a recorded event log.
    View(ViewArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// File holding the context; `-` or absent reads stdin.
    pub context: Option<PathBuf>,

    /// Optional TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for event logs.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Filename prefix for the event log.
    #[arg(long)]
    pub log_prefix: Option<String>,

    /// Write the final result to this file instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SmokeArgs {
    /// Optional TOML configuration file (for requested model names).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// Event log written by a previous run.
    pub log_file: PathBuf,

    #[arg(long, value_enum, default_value = "tree")]
    pub mode: ViewMode,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ViewMode {
    /// Agent tree with per-run steps.
    Tree,
    /// Aggregate counters.
    Stats,
    /// Chronological event listing.
    Linear,
}
