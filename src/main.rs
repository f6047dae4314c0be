use anyhow::{Context, Result};
use gantry::cli::commands::{
    CancelCommand, EnvironmentsCommand, EventKindArg, HistoryCommand, PromoteCommand, RunCommand,
    StatusCommand, ValidateCommand,
};
use gantry::cli::output::*;
use gantry::cli::{Cli, Command};
use gantry::core::config::PipelineConfig;
use gantry::core::{
    Environment, ManualParameters, RunStatus, TriggerEvaluator, TriggerEvent,
};
use gantry::deploy::{DeploymentController, HealthCheckPolicy, LoggingDeployTarget};
use gantry::execution::{ExecutionEngine, SimulatedInvoker};
use gantry::persistence::{InMemoryPersistence, PersistenceBackend};
use gantry::registry::{ArtifactRegistry, VersionSelector};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

// Exit code for configuration and trigger evaluation failures. Run
// outcomes use RunStatus::exit_code (0, 1 or 2).
const EXIT_CONFIG: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::Cancel(cmd) => cancel_run(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Promote(cmd) => promote_artifact(cmd).await?,
        Command::Environments(cmd) => show_environments(cmd).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(ephemeral: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if ephemeral {
        Ok(Arc::new(InMemoryPersistence::new()))
    } else {
        Ok(Arc::new(
            gantry::persistence::SqliteStore::with_default_path().await?,
        ))
    }
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_ephemeral: bool) -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    // Load pipeline config
    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Failed to load pipeline config:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(EXIT_CONFIG);
        }
    };

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    // Build the trigger event from CLI arguments
    let event = match cmd.event {
        EventKindArg::Push => TriggerEvent::push(&cmd.branch),
        EventKindArg::PullRequest => TriggerEvent::pull_request(&cmd.branch),
        EventKindArg::Manual => {
            let Some(environment) = cmd.environment.clone() else {
                println!(
                    "{} Manual dispatch requires {}",
                    CROSS,
                    style("--environment").bold()
                );
                std::process::exit(EXIT_CONFIG);
            };
            TriggerEvent::manual(
                &cmd.branch,
                ManualParameters {
                    environment,
                    skip_tests: cmd.skip_tests,
                    promote_override: cmd.promote_override,
                },
            )
        }
    };

    // Evaluate trigger rules into a run plan
    let mut plan = match TriggerEvaluator::evaluate(&config, &event) {
        Ok(plan) => plan,
        Err(e) => {
            println!("{} Trigger evaluation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Some(concurrency) = cmd.concurrency {
        plan.concurrency = concurrency.max(1);
    }

    println!(
        "{} {} of {} stages enabled for {} on {}",
        INFO,
        style(plan.graph.len()).cyan(),
        style(config.stages.len()).cyan(),
        style(&event.kind.to_string()).bold(),
        style(&cmd.branch).cyan()
    );

    // Set up persistence
    let store = open_store(cmd.no_history).await?;

    // Create execution engine
    let engine = ExecutionEngine::new(SimulatedInvoker::default());

    // Set up event handler for console output
    let progress = create_progress_bar(plan.graph.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        if matches!(
            event,
            gantry::execution::ExecutionEvent::StageFinished { .. }
                | gantry::execution::ExecutionEvent::StageSkipped { .. }
        ) {
            bar.inc(1);
        }
    });

    // Ctrl-C cancels the run; completed stage results are kept
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    // Execute the plan
    let gates = plan.gates.clone();
    let total_stages = plan.graph.len();
    println!();
    let run = engine.execute(plan).await;
    progress.finish_and_clear();

    // Register build outputs so they become promotable
    let registry = ArtifactRegistry::with_store(store.clone()).await?;
    match registry.register_run_outputs(&run, &gates).await {
        Ok(artifacts) => {
            for artifact in &artifacts {
                println!(
                    "{} Registered artifact {} ({})",
                    INFO,
                    style(artifact.coordinate()).bold(),
                    style(&artifact.platform).dim()
                );
            }
        }
        Err(e) => error!("artifact registration failed: {}", e),
    }

    // Save to history
    if !cmd.no_history {
        let summary = gantry::core::RunSummary::from_run(&run, total_stages);
        store.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    // Print final status
    match run.status {
        RunStatus::Succeeded => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&run.pipeline_name).bold(),
                style("successfully").green()
            );
        }
        RunStatus::Cancelled => {
            println!(
                "\n{} {} {}",
                WARN,
                style(&run.pipeline_name).bold(),
                style("cancelled").yellow()
            );
        }
        _ => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&run.pipeline_name).bold(),
                style("failed").red()
            );
            if let Some(gate) = run.gate_blocked() {
                println!("  blocked by gate {}", style(gate).red());
            }
        }
    }

    let code = run.status.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        config.validate()?;
        config.to_graph()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Gates: {}", style(config.gates.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(EXIT_CONFIG);
        }
    }
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let store = open_store(false).await?;
    let run_id = uuid::Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;

    let Some(summary) = store.load_run(run_id).await? else {
        println!("{} Run not found", WARN);
        return Ok(());
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Trigger: {} @ {}", summary.trigger, style(&summary.branch).cyan());
    if let Some(environment) = summary.environment {
        println!("  Environment: {}", style(environment).cyan());
    }
    println!("  Status: {}", format_run_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} succeeded, {} failed, {} total",
        style(summary.succeeded_stages).green(),
        style(summary.failed_stages).red(),
        summary.total_stages
    );

    Ok(())
}

async fn cancel_run(cmd: &CancelCommand) -> Result<()> {
    let store = open_store(false).await?;
    let run_id = uuid::Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;

    let Some(mut summary) = store.load_run(run_id).await? else {
        println!("{} Run not found", WARN);
        return Ok(());
    };

    if summary.status.is_terminal() {
        println!(
            "{} Run already finished: {}",
            INFO,
            format_run_status(summary.status)
        );
        return Ok(());
    }

    summary.status = RunStatus::Cancelled;
    summary.finished_at = Some(chrono::Utc::now());
    store.save_run(&summary).await?;

    println!(
        "{} Run {} marked cancelled",
        WARN,
        style(&summary.run_id.to_string()[..8]).dim()
    );
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;
    let runs = store.list_runs(cmd.limit).await?;

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

async fn promote_artifact(cmd: &PromoteCommand) -> Result<()> {
    let environment: Environment = match cmd.environment.parse() {
        Ok(environment) => environment,
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            std::process::exit(EXIT_CONFIG);
        }
    };
    let selector: VersionSelector = match cmd.version.parse() {
        Ok(selector) => selector,
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            std::process::exit(EXIT_CONFIG);
        }
    };

    let store = open_store(false).await?;
    let registry = Arc::new(ArtifactRegistry::with_store(store.clone()).await?);
    let controller = DeploymentController::new(
        LoggingDeployTarget,
        registry,
        store,
        HealthCheckPolicy::default(),
        cmd.platform.clone(),
    )
    .await?;

    println!(
        "{} Promoting {}:{} to {}",
        ROCKET,
        style(&cmd.name).bold(),
        style(&cmd.version).cyan(),
        style(environment).bold()
    );

    match controller
        .promote(environment, &cmd.name, selector, cmd.promote_override, None)
        .await
    {
        Ok(artifact) => {
            println!(
                "{} {} is {} in {}",
                CHECK,
                style(artifact.coordinate()).bold(),
                style("healthy").green(),
                style(environment).bold()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} Promotion failed: {}", CROSS, style(&e).red());
            let state = controller.environment_state(environment).await;
            println!(
                "  {} is now {}",
                style(environment).bold(),
                format_deployment_status(state.status)
            );
            std::process::exit(1);
        }
    }
}

async fn show_environments(cmd: &EnvironmentsCommand) -> Result<()> {
    let store = open_store(false).await?;
    let mut states = store.load_environments().await?;
    states.sort_by_key(|s| s.environment.as_str());

    if cmd.json {
        let data = serde_json::json!({ "environments": states });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("{} No deployments recorded", INFO);
        return Ok(());
    }

    println!("{} Environments:", INFO);
    for state in &states {
        let deployed = state
            .deployed
            .as_ref()
            .map(|v| format!("{}:{}", v.name, v.version))
            .unwrap_or_else(|| "nothing".to_string());
        println!(
            "  {} - {} - {}",
            style(state.environment).bold(),
            format_deployment_status(state.status),
            style(deployed).cyan()
        );
    }

    Ok(())
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
