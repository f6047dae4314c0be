//! Persistence layer for run history, artifacts, and environment state

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::run::RunSummary;
use crate::deploy::EnvironmentState;
use crate::registry::Artifact;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for persistence backends.
///
/// Artifact and environment records must survive process restarts when
/// backed by a durable store; run summaries are history for the CLI.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn save_run(&self, summary: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    async fn save_artifact(&self, artifact: &Artifact) -> Result<()>;

    async fn load_artifacts(&self) -> Result<Vec<Artifact>>;

    /// Upsert keyed by environment name.
    async fn save_environment(&self, state: &EnvironmentState) -> Result<()>;

    async fn load_environments(&self) -> Result<Vec<EnvironmentState>>;
}

/// In-memory persistence (for testing or ephemeral use).
pub struct InMemoryPersistence {
    runs: RwLock<Vec<RunSummary>>,
    artifacts: RwLock<Vec<Artifact>>,
    environments: RwLock<HashMap<String, EnvironmentState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(Vec::new()),
            artifacts: RwLock::new(Vec::new()),
            environments: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.iter_mut().find(|r| r.run_id == summary.run_id) {
            *existing = summary.clone();
        } else {
            runs.push(summary.clone());
        }
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut out: Vec<RunSummary> = runs.clone();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn save_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.artifacts.write().await.push(artifact.clone());
        Ok(())
    }

    async fn load_artifacts(&self) -> Result<Vec<Artifact>> {
        Ok(self.artifacts.read().await.clone())
    }

    async fn save_environment(&self, state: &EnvironmentState) -> Result<()> {
        self.environments
            .write()
            .await
            .insert(state.environment.to_string(), state.clone());
        Ok(())
    }

    async fn load_environments(&self) -> Result<Vec<EnvironmentState>> {
        Ok(self.environments.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::{PipelineRun, RunParameters, RunStatus, TriggerKind};

    #[tokio::test]
    async fn test_run_round_trip() {
        let backend = InMemoryPersistence::new();
        let mut run = PipelineRun::new(
            "svc",
            TriggerKind::Push,
            "main",
            None,
            RunParameters::default(),
        );
        run.start();
        run.finish(RunStatus::Succeeded);

        let summary = RunSummary::from_run(&run, 3);
        backend.save_run(&summary).await.unwrap();

        let loaded = backend.load_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.pipeline_name, "svc");
        assert_eq!(loaded.status, RunStatus::Succeeded);

        let listed = backend.list_runs(10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
