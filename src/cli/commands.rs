//! CLI command definitions

use clap::Args;

/// Which kind of event to simulate when triggering a run. Value names
/// follow clap's kebab-case convention ("pull-request").
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventKindArg {
    Push,
    PullRequest,
    Manual,
}

/// Trigger a pipeline run
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event kind to evaluate the trigger rules against
    #[arg(long, value_enum, default_value_t = EventKindArg::Manual)]
    pub event: EventKindArg,

    /// Branch the event refers to
    #[arg(short, long, default_value = "main")]
    pub branch: String,

    /// Target environment (required for manual dispatch)
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Skip test-tagged stages (they are recorded as skipped)
    #[arg(long)]
    pub skip_tests: bool,

    /// Allow later promotion to production without a healthy staging record
    #[arg(long)]
    pub promote_override: bool,

    /// Override the configured concurrency limit
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show a run snapshot
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Run ID
    pub run_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Mark a recorded run as cancelled
#[derive(Debug, Args, Clone)]
pub struct CancelCommand {
    /// Run ID
    pub run_id: String,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Promote an artifact into an environment
#[derive(Debug, Args, Clone)]
pub struct PromoteCommand {
    /// Artifact lineage name
    #[arg(short, long)]
    pub name: String,

    /// Version to promote ("latest" or a number)
    #[arg(long, default_value = "latest")]
    pub version: String,

    /// Target environment
    #[arg(short, long)]
    pub environment: String,

    /// Skip the staging-before-production ordering check
    #[arg(long)]
    pub promote_override: bool,

    /// Platforms that must all be present before promotion
    #[arg(long)]
    pub platform: Vec<String>,
}

/// Show environment deployment state
#[derive(Debug, Args, Clone)]
pub struct EnvironmentsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
