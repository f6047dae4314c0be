//! Error taxonomy for the orchestration core

use thiserror::Error;

/// Errors produced by the orchestration core.
///
/// Stage failures are never surfaced through this type: a failing stage
/// invocation becomes a `StageResult` with `Failure` status and propagates
/// through dependency blocking and gate evaluation instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline definition or trigger parameters. Fails fast,
    /// before any stage runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The stage dependency graph contains a cycle.
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// The offending cycle, closed (first element repeated last).
        path: Vec<String>,
    },

    /// A block-severity quality gate failed its predicate.
    #[error("quality gate '{gate}' blocked the run: {reason}")]
    GateBlocked { gate: String, reason: String },

    /// A promotion failed and was rolled back.
    #[error("deployment to '{environment}' failed: {reason}")]
    DeploymentFailed {
        environment: String,
        reason: String,
    },

    /// Another promotion currently holds the environment lock.
    #[error("environment '{environment}' is busy with another promotion")]
    EnvironmentBusy { environment: String },

    /// A requested artifact, run, or environment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage-layer failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl PipelineError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }
}
