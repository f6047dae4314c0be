//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CancelCommand, EnvironmentsCommand, HistoryCommand, PromoteCommand, RunCommand, StatusCommand,
    ValidateCommand,
};

/// gantry pipeline orchestration CLI
#[derive(Debug, Parser, Clone)]
#[command(name = "gantry")]
#[command(version = "0.1.0")]
#[command(about = "A dependency-aware CI/CD pipeline orchestration engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Trigger a pipeline run
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// Show a run snapshot
    Status(StatusCommand),

    /// Mark a recorded run as cancelled
    Cancel(CancelCommand),

    /// Show run history
    History(HistoryCommand),

    /// Promote an artifact into an environment
    Promote(PromoteCommand),

    /// Show environment deployment state
    Environments(EnvironmentsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

use std::ffi::OsString;
