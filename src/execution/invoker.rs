//! Stage invocation boundary
//!
//! The engine never interprets stage semantics. Concrete tools
//! (scanners, test runners, builders, deployers) live behind the
//! [`StageInvoker`] trait and return a normalized [`StageResult`].

use crate::core::run::{Environment, RunParameters};
use crate::core::stage::{Stage, StageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Per-invocation context handed to collaborators.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline: String,
    pub branch: String,
    pub environment: Option<Environment>,
    pub parameters: RunParameters,

    /// Results of the stage's (transitive) completed upstream stages
    pub upstream: HashMap<String, StageResult>,

    cancel: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        pipeline: String,
        branch: String,
        environment: Option<Environment>,
        parameters: RunParameters,
        upstream: HashMap<String, StageResult>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            pipeline,
            branch,
            environment,
            parameters,
            upstream,
            cancel,
        }
    }

    /// Whether run cancellation has been requested. Long-running
    /// invocations should poll this and stop cooperatively.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve once cancellation is requested. Useful in `select!`
    /// against the invocation's own work.
    pub async fn cancelled(&mut self) {
        // An error means the engine dropped the sender; treat that as
        // cancellation too.
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Opaque callable contract for running one stage.
///
/// Implementations must not panic on tool failure; any non-success
/// outcome is reported as a `StageResult` with `Failure` status. The
/// engine does not retry invocations: execution is at-most-once per
/// stage per run.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(&self, stage: &Stage, ctx: RunContext) -> StageResult;
}

/// Invoker used by the CLI binary until real collaborators are wired
/// in: every stage succeeds after a short pause, and build stages
/// report a synthetic output so the registry path is exercised.
// TODO: replace with a collaborator registry once tool adapters exist
pub struct SimulatedInvoker {
    pub stage_duration: std::time::Duration,
}

impl Default for SimulatedInvoker {
    fn default() -> Self {
        Self {
            stage_duration: std::time::Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl StageInvoker for SimulatedInvoker {
    async fn invoke(&self, stage: &Stage, mut ctx: RunContext) -> StageResult {
        tokio::select! {
            _ = tokio::time::sleep(self.stage_duration) => {}
            _ = ctx.cancelled() => return StageResult::cancelled(),
        }

        let result = StageResult::success();
        if stage.capability == crate::core::stage::Capability::Build {
            result.with_artifact(
                format!("{}/{}", ctx.pipeline, ctx.branch),
                "linux/amd64",
                format!("sim:{}:{}", stage.name, ctx.run_id),
            )
        } else {
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunParameters;

    #[tokio::test]
    async fn test_context_cancellation_flag() {
        let (tx, rx) = watch::channel(false);
        let mut ctx = RunContext::new(
            Uuid::new_v4(),
            "svc".to_string(),
            "main".to_string(),
            None,
            RunParameters::default(),
            HashMap::new(),
            rx,
        );

        assert!(!ctx.is_cancelled());
        tx.send(true).unwrap();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
