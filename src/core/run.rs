//! Pipeline run state

use crate::core::gate::GateOutcome;
use crate::core::stage::{StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of event triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Manual,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::PullRequest => write!(f, "pull_request"),
            TriggerKind::Manual => write!(f, "manual"),
        }
    }
}

/// Deployment environments form a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters resolved at trigger time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunParameters {
    /// Mark all test-tagged stages as skip-if-flag
    pub skip_tests: bool,

    /// Allow promotion to production without a prior healthy staging
    /// record for the same version
    pub promote_override: bool,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Process exit code for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::Cancelled => 2,
            RunStatus::Pending | RunStatus::Running => 1,
        }
    }
}

/// One end-to-end execution of the stage graph.
///
/// Created by the trigger evaluator, mutated only by the execution
/// engine, terminal once `status` leaves `Running`.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub trigger: TriggerKind,
    pub branch: String,
    pub environment: Option<Environment>,
    pub parameters: RunParameters,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Exactly one result per stage, written once
    pub results: HashMap<String, StageResult>,

    /// Gate id -> outcome, each gate evaluated exactly once
    pub gate_outcomes: HashMap<String, GateOutcome>,
}

impl PipelineRun {
    pub fn new(
        pipeline_name: impl Into<String>,
        trigger: TriggerKind,
        branch: impl Into<String>,
        environment: Option<Environment>,
        parameters: RunParameters,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            trigger,
            branch: branch.into(),
            environment,
            parameters,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            results: HashMap::new(),
            gate_outcomes: HashMap::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn count_with_status(&self, status: StageStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Whether any block-severity gate outcome was recorded.
    pub fn gate_blocked(&self) -> Option<&str> {
        self.gate_outcomes
            .iter()
            .find(|(_, o)| o.is_block())
            .map(|(id, _)| id.as_str())
    }
}

/// Persisted snapshot of a finished or in-flight run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub trigger: TriggerKind,
    pub branch: String,
    pub environment: Option<Environment>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_stages: usize,
    pub succeeded_stages: usize,
    pub failed_stages: usize,
}

impl RunSummary {
    pub fn from_run(run: &PipelineRun, total_stages: usize) -> Self {
        Self {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
            trigger: run.trigger,
            branch: run.branch.clone(),
            environment: run.environment,
            status: run.status,
            started_at: run.started_at.unwrap_or_else(Utc::now),
            finished_at: run.finished_at,
            total_stages,
            succeeded_stages: run.count_with_status(StageStatus::Success),
            failed_stages: run.count_with_status(StageStatus::Failure),
        }
    }
}
