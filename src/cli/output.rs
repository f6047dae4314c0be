//! CLI output formatting

use crate::{
    core::{GateOutcome, RunStatus, RunSummary, StageStatus},
    deploy::DeploymentStatus,
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SHIELD: Emoji<'_, '_> = Emoji("🛡️  ", "# ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::Success => style("SUCCESS").green().to_string(),
        StageStatus::Failure => style("FAILURE").red().to_string(),
        StageStatus::Skipped => style("SKIPPED").dim().to_string(),
        StageStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a deployment status for display
pub fn format_deployment_status(status: DeploymentStatus) -> String {
    match status {
        DeploymentStatus::Idle => style("IDLE").dim().to_string(),
        DeploymentStatus::Deploying => style("DEPLOYING").yellow().to_string(),
        DeploymentStatus::Healthy => style("HEALTHY").green().to_string(),
        DeploymentStatus::Degraded => style("DEGRADED").red().to_string(),
        DeploymentStatus::RolledBack => style("ROLLED BACK").red().to_string(),
    }
}

/// Format a run summary line for history display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} @ {} - {} ({}/{})",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        style(&summary.branch).cyan(),
        format_run_status(summary.status),
        summary.succeeded_stages,
        summary.total_stages,
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StageStarted { stage } => {
            format!("{} {}", SPINNER, style(stage).cyan())
        }
        ExecutionEvent::StageFinished { stage, status } => match status {
            StageStatus::Success => format!("{} {}", CHECK, style(stage).green()),
            StageStatus::Failure => format!("{} {}", CROSS, style(stage).red()),
            StageStatus::Cancelled => format!("{} {} (cancelled)", WARN, style(stage).yellow()),
            StageStatus::Skipped => format!("{} {} (skipped)", INFO, style(stage).dim()),
        },
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!("{} {} ({})", INFO, style(stage).dim(), reason)
        }
        ExecutionEvent::StagesCancelled { stages } => format!(
            "{} Cancelled downstream: {}",
            WARN,
            style(stages.join(", ")).yellow()
        ),
        ExecutionEvent::GateEvaluated { gate, outcome } => match outcome {
            GateOutcome::Pass => format!("{} Gate {} passed", SHIELD, style(gate).green()),
            GateOutcome::Warn(reason) => format!(
                "{} Gate {} warned: {}",
                WARN,
                style(gate).yellow(),
                style(reason).dim()
            ),
            GateOutcome::Block(reason) => format!(
                "{} Gate {} blocked: {}",
                CROSS,
                style(gate).red(),
                style(reason).dim()
            ),
            GateOutcome::Skipped => format!("{} Gate {} skipped", INFO, style(gate).dim()),
        },
        ExecutionEvent::RunFinished { run_id, status } => {
            let status_str = match status {
                RunStatus::Succeeded => format!("{} succeeded", style("run").green()),
                RunStatus::Failed => style("run failed").red().to_string(),
                RunStatus::Cancelled => style("run cancelled").yellow().to_string(),
                _ => format!("{:?}", status),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}
