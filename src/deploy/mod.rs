//! Environment/deployment controller
//!
//! Manages promotion of registered artifacts across named environments
//! with health-check-gated rollout and automatic rollback. Environment
//! state is process-wide: loaded from the store at startup, flushed on
//! every transition, shared across concurrent runs.

use crate::core::error::PipelineError;
use crate::core::run::Environment;
use crate::persistence::PersistenceBackend;
use crate::registry::{Artifact, ArtifactRegistry, VersionSelector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Deployment status of one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Idle,
    Deploying,
    Healthy,
    Degraded,
    RolledBack,
}

/// Reference to a deployed artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedVersion {
    pub name: String,
    pub version: u64,
}

impl DeployedVersion {
    fn of(artifact: &Artifact) -> Self {
        Self {
            name: artifact.name.clone(),
            version: artifact.version,
        }
    }
}

/// Result of the most recent health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}

/// Per-environment deployment state. One instance per environment name,
/// mutated only by the controller, persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub environment: Environment,
    pub deployed: Option<DeployedVersion>,
    pub status: DeploymentStatus,
    pub last_check: Option<HealthCheckRecord>,

    /// Versions that reached healthy in this environment. Production
    /// promotion consults staging's record.
    #[serde(default)]
    pub healthy_history: Vec<DeployedVersion>,
}

impl EnvironmentState {
    pub fn idle(environment: Environment) -> Self {
        Self {
            environment,
            deployed: None,
            status: DeploymentStatus::Idle,
            last_check: None,
            healthy_history: Vec::new(),
        }
    }

    pub fn was_healthy(&self, name: &str, version: u64) -> bool {
        self.healthy_history
            .iter()
            .any(|v| v.name == name && v.version == version)
    }
}

/// External collaborator that applies a deployment and answers health
/// probes. Cluster specifics stay behind this trait.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Roll the artifact out to the environment. An `Err` carries a
    /// human-readable reason and triggers rollback.
    async fn deploy(&self, environment: Environment, artifact: &Artifact) -> Result<(), String>;

    /// One health probe against the just-deployed version.
    async fn check_health(&self, environment: Environment, artifact: &Artifact) -> bool;
}

/// Target used by the CLI binary until a real cluster adapter is wired
/// in: deploys are logged and health probes always pass.
// TODO: replace with a kubectl/registry adapter behind the same trait
pub struct LoggingDeployTarget;

#[async_trait]
impl DeployTarget for LoggingDeployTarget {
    async fn deploy(&self, environment: Environment, artifact: &Artifact) -> Result<(), String> {
        info!(environment = %environment, artifact = %artifact.coordinate(), "simulated deploy");
        Ok(())
    }

    async fn check_health(&self, _environment: Environment, _artifact: &Artifact) -> bool {
        true
    }
}

/// Bounded health-check polling with backoff.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

/// Promotion controller over a set of named environments.
///
/// Holds an exclusive per-environment lock for the duration of a
/// promotion; a concurrent promotion to the same environment is
/// rejected with `EnvironmentBusy` rather than queued.
pub struct DeploymentController<T> {
    target: Arc<T>,
    registry: Arc<ArtifactRegistry>,
    store: Arc<dyn PersistenceBackend>,
    policy: HealthCheckPolicy,

    /// Platforms that must all be present before promotion; empty means
    /// single-platform pipelines.
    required_platforms: Vec<String>,

    environments: HashMap<Environment, Arc<Mutex<EnvironmentState>>>,
}

impl<T: DeployTarget> DeploymentController<T> {
    /// Build the controller, hydrating environment state from the store.
    pub async fn new(
        target: T,
        registry: Arc<ArtifactRegistry>,
        store: Arc<dyn PersistenceBackend>,
        policy: HealthCheckPolicy,
        required_platforms: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let mut environments: HashMap<Environment, Arc<Mutex<EnvironmentState>>> = HashMap::new();
        for state in store.load_environments().await? {
            environments.insert(state.environment, Arc::new(Mutex::new(state)));
        }
        for env in [Environment::Staging, Environment::Production] {
            environments
                .entry(env)
                .or_insert_with(|| Arc::new(Mutex::new(EnvironmentState::idle(env))));
        }

        Ok(Self {
            target: Arc::new(target),
            registry,
            store,
            policy,
            required_platforms,
            environments,
        })
    }

    /// Snapshot of one environment's state.
    pub async fn environment_state(&self, environment: Environment) -> EnvironmentState {
        self.environments[&environment].lock().await.clone()
    }

    /// Snapshots of all environments.
    pub async fn environment_states(&self) -> Vec<EnvironmentState> {
        let mut out = Vec::new();
        for env in [Environment::Staging, Environment::Production] {
            out.push(self.environment_state(env).await);
        }
        out
    }

    /// Promote a registered artifact into an environment.
    ///
    /// Preconditions: the artifact exists, its platform group is
    /// complete, no promotion-blocking gate was violated on its run,
    /// and production promotion requires the same version previously
    /// healthy in staging unless `promote_override` is set.
    pub async fn promote(
        &self,
        environment: Environment,
        name: &str,
        selector: VersionSelector,
        promote_override: bool,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Artifact, PipelineError> {
        let artifact = self.registry.resolve(name, selector).await?;

        if !artifact.gates_clean {
            return Err(PipelineError::GateBlocked {
                gate: "promotion".to_string(),
                reason: format!(
                    "artifact {} has a violated promotion-blocking gate on its lineage",
                    artifact.coordinate()
                ),
            });
        }

        if !self.required_platforms.is_empty()
            && !self
                .registry
                .platforms_complete(name, artifact.version, &self.required_platforms)
                .await?
        {
            return Err(PipelineError::NotFound(format!(
                "artifact {} is missing platforms (required: {:?})",
                artifact.coordinate(),
                self.required_platforms
            )));
        }

        if environment == Environment::Production && !promote_override {
            let staging = self.environment_state(Environment::Staging).await;
            if !staging.was_healthy(&artifact.name, artifact.version) {
                return Err(PipelineError::config(format!(
                    "artifact {} was never healthy in staging; pass an explicit override to skip the ordering check",
                    artifact.coordinate()
                )));
            }
        }

        let lock = Arc::clone(&self.environments[&environment]);
        let mut state = lock.try_lock().map_err(|_| PipelineError::EnvironmentBusy {
            environment: environment.to_string(),
        })?;

        let previous = state.deployed.clone();
        state.status = DeploymentStatus::Deploying;
        self.flush(&state).await?;
        info!(environment = %environment, artifact = %artifact.coordinate(), "deploying");

        if let Err(reason) = self.target.deploy(environment, &artifact).await {
            return self
                .roll_back(&mut state, previous, environment, reason)
                .await;
        }

        let mut delay = self.policy.initial_delay;
        for attempt in 1..=self.policy.attempts {
            if let Some(rx) = &cancel {
                if *rx.borrow() {
                    return self
                        .roll_back(&mut state, previous, environment, "promotion cancelled".into())
                        .await;
                }
            }

            let healthy = self.target.check_health(environment, &artifact).await;
            state.last_check = Some(HealthCheckRecord {
                healthy,
                checked_at: Utc::now(),
            });

            if healthy {
                state.status = DeploymentStatus::Healthy;
                state.deployed = Some(DeployedVersion::of(&artifact));
                let record = DeployedVersion::of(&artifact);
                if !state.healthy_history.contains(&record) {
                    state.healthy_history.push(record);
                }
                self.flush(&state).await?;
                info!(
                    environment = %environment,
                    artifact = %artifact.coordinate(),
                    attempt,
                    "deployment healthy"
                );
                return Ok(artifact);
            }

            if attempt < self.policy.attempts {
                // Cancellation is observed at every polling interval
                match &mut cancel {
                    Some(rx) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = rx.changed() => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
                delay = delay.mul_f64(self.policy.backoff_factor);
            }
        }

        self.roll_back(
            &mut state,
            previous,
            environment,
            format!(
                "health check failed after {} attempts",
                self.policy.attempts
            ),
        )
        .await
    }

    /// Mark the environment degraded, restore the previously deployed
    /// version, and report the failure. Every failed promotion takes
    /// the same deploying -> degraded -> rolled_back path.
    async fn roll_back(
        &self,
        state: &mut EnvironmentState,
        previous: Option<DeployedVersion>,
        environment: Environment,
        reason: String,
    ) -> Result<Artifact, PipelineError> {
        warn!(environment = %environment, %reason, "rolling back");

        state.status = DeploymentStatus::Degraded;
        self.flush(state).await?;

        if let Some(prev) = &previous {
            match self
                .registry
                .resolve(&prev.name, VersionSelector::Exact(prev.version))
                .await
            {
                Ok(artifact) => {
                    // Best-effort restore; the state still records the
                    // rollback even if the target refuses.
                    if let Err(err) = self.target.deploy(environment, &artifact).await {
                        warn!(environment = %environment, error = %err, "restore of previous version failed");
                    }
                }
                Err(err) => {
                    warn!(environment = %environment, error = %err, "previous version missing from registry");
                }
            }
        }

        state.deployed = previous;
        state.status = DeploymentStatus::RolledBack;
        self.flush(state).await?;

        Err(PipelineError::DeploymentFailed {
            environment: environment.to_string(),
            reason,
        })
    }

    async fn flush(&self, state: &EnvironmentState) -> Result<(), PipelineError> {
        self.store.save_environment(state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunSummary;
    use crate::persistence::InMemoryPersistence;
    use crate::registry::RegisterArtifact;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Target that succeeds deploys and reports healthy after a
    /// configurable number of probes (u32::MAX = never healthy).
    struct ScriptedTarget {
        healthy_after: AtomicU32,
        probes: AtomicU32,
        deploys: Mutex<Vec<(Environment, String)>>,
    }

    impl ScriptedTarget {
        fn new(healthy_after: u32) -> Self {
            Self {
                healthy_after: AtomicU32::new(healthy_after),
                probes: AtomicU32::new(0),
                deploys: Mutex::new(Vec::new()),
            }
        }

        fn set_healthy_after(&self, healthy_after: u32) {
            self.healthy_after.store(healthy_after, Ordering::SeqCst);
            self.probes.store(0, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DeployTarget for ScriptedTarget {
        async fn deploy(&self, environment: Environment, artifact: &Artifact) -> Result<(), String> {
            self.deploys
                .lock()
                .await
                .push((environment, artifact.coordinate()));
            Ok(())
        }

        async fn check_health(&self, _environment: Environment, _artifact: &Artifact) -> bool {
            let probe = self.probes.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            probe >= self.healthy_after.load(Ordering::SeqCst)
        }
    }

    fn fast_policy() -> HealthCheckPolicy {
        HealthCheckPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
        }
    }

    async fn setup(
        healthy_after: u32,
    ) -> (DeploymentController<ScriptedTarget>, Arc<ArtifactRegistry>) {
        let store: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());
        let registry = Arc::new(ArtifactRegistry::new());
        registry
            .register(RegisterArtifact {
                name: "svc".to_string(),
                platform: "linux/amd64".to_string(),
                content_ref: "sha256:abc".to_string(),
                produced_by: "build".to_string(),
                run_id: Uuid::new_v4(),
                gates_clean: true,
            })
            .await
            .unwrap();

        let controller = DeploymentController::new(
            ScriptedTarget::new(healthy_after),
            Arc::clone(&registry),
            store,
            fast_policy(),
            Vec::new(),
        )
        .await
        .unwrap();
        (controller, registry)
    }

    #[tokio::test]
    async fn test_successful_promotion_to_staging() {
        let (controller, _) = setup(1).await;
        let artifact = controller
            .promote(Environment::Staging, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap();

        let state = controller.environment_state(Environment::Staging).await;
        assert_eq!(state.status, DeploymentStatus::Healthy);
        assert_eq!(
            state.deployed,
            Some(DeployedVersion {
                name: "svc".to_string(),
                version: artifact.version
            })
        );
        assert!(state.last_check.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_health_check_exhaustion_rolls_back() {
        let (controller, _) = setup(u32::MAX).await;

        let err = controller
            .promote(Environment::Staging, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeploymentFailed { .. }));

        let state = controller.environment_state(Environment::Staging).await;
        assert_eq!(state.status, DeploymentStatus::RolledBack);
        assert_eq!(state.deployed, None);
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_version() {
        let (controller, registry) = setup(1).await;
        controller
            .promote(Environment::Staging, "svc", VersionSelector::Exact(1), false, None)
            .await
            .unwrap();

        registry
            .register(RegisterArtifact {
                name: "svc".to_string(),
                platform: "linux/amd64".to_string(),
                content_ref: "sha256:def".to_string(),
                produced_by: "build".to_string(),
                run_id: Uuid::new_v4(),
                gates_clean: true,
            })
            .await
            .unwrap();

        // The next promotion's probes never succeed
        controller.target.set_healthy_after(u32::MAX);

        let err = controller
            .promote(Environment::Staging, "svc", VersionSelector::Exact(2), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeploymentFailed { .. }));

        let state = controller.environment_state(Environment::Staging).await;
        assert_eq!(state.status, DeploymentStatus::RolledBack);
        assert_eq!(
            state.deployed,
            Some(DeployedVersion {
                name: "svc".to_string(),
                version: 1
            })
        );
    }

    #[tokio::test]
    async fn test_production_requires_healthy_staging_record() {
        let (controller, _) = setup(1).await;

        let err = controller
            .promote(Environment::Production, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        // Healthy in staging first, then production goes through
        controller
            .promote(Environment::Staging, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap();
        controller
            .promote(Environment::Production, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap();
        let state = controller.environment_state(Environment::Production).await;
        assert_eq!(state.status, DeploymentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_override_skips_staging_ordering() {
        let (controller, _) = setup(1).await;
        controller
            .promote(Environment::Production, "svc", VersionSelector::Latest, true, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_gated_artifact_refused() {
        let store: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());
        let registry = Arc::new(ArtifactRegistry::new());
        registry
            .register(RegisterArtifact {
                name: "svc".to_string(),
                platform: "linux/amd64".to_string(),
                content_ref: "sha256:abc".to_string(),
                produced_by: "build".to_string(),
                run_id: Uuid::new_v4(),
                gates_clean: false,
            })
            .await
            .unwrap();
        let controller = DeploymentController::new(
            ScriptedTarget::new(1),
            registry,
            store,
            fast_policy(),
            Vec::new(),
        )
        .await
        .unwrap();

        let err = controller
            .promote(Environment::Staging, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GateBlocked { .. }));
    }

    /// Target whose deploys are refused outright.
    struct RefusingTarget;

    #[async_trait]
    impl DeployTarget for RefusingTarget {
        async fn deploy(
            &self,
            _environment: Environment,
            _artifact: &Artifact,
        ) -> Result<(), String> {
            Err("cluster unreachable".to_string())
        }

        async fn check_health(&self, _environment: Environment, _artifact: &Artifact) -> bool {
            true
        }
    }

    /// Store wrapper recording every flushed environment status.
    struct StatusLog {
        inner: InMemoryPersistence,
        statuses: Mutex<Vec<DeploymentStatus>>,
    }

    #[async_trait]
    impl PersistenceBackend for StatusLog {
        async fn save_run(&self, summary: &RunSummary) -> anyhow::Result<()> {
            self.inner.save_run(summary).await
        }

        async fn load_run(&self, run_id: Uuid) -> anyhow::Result<Option<RunSummary>> {
            self.inner.load_run(run_id).await
        }

        async fn list_runs(&self, limit: usize) -> anyhow::Result<Vec<RunSummary>> {
            self.inner.list_runs(limit).await
        }

        async fn save_artifact(&self, artifact: &Artifact) -> anyhow::Result<()> {
            self.inner.save_artifact(artifact).await
        }

        async fn load_artifacts(&self) -> anyhow::Result<Vec<Artifact>> {
            self.inner.load_artifacts().await
        }

        async fn save_environment(&self, state: &EnvironmentState) -> anyhow::Result<()> {
            self.statuses.lock().await.push(state.status);
            self.inner.save_environment(state).await
        }

        async fn load_environments(&self) -> anyhow::Result<Vec<EnvironmentState>> {
            self.inner.load_environments().await
        }
    }

    #[tokio::test]
    async fn test_refused_deploy_passes_through_degraded() {
        let store = Arc::new(StatusLog {
            inner: InMemoryPersistence::new(),
            statuses: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(ArtifactRegistry::new());
        registry
            .register(RegisterArtifact {
                name: "svc".to_string(),
                platform: "linux/amd64".to_string(),
                content_ref: "sha256:abc".to_string(),
                produced_by: "build".to_string(),
                run_id: Uuid::new_v4(),
                gates_clean: true,
            })
            .await
            .unwrap();
        let controller = DeploymentController::new(
            RefusingTarget,
            registry,
            Arc::clone(&store) as Arc<dyn PersistenceBackend>,
            fast_policy(),
            Vec::new(),
        )
        .await
        .unwrap();

        let err = controller
            .promote(Environment::Staging, "svc", VersionSelector::Latest, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeploymentFailed { .. }));

        let state = controller.environment_state(Environment::Staging).await;
        assert_eq!(state.status, DeploymentStatus::RolledBack);

        // A refused deploy takes the same path through degraded as an
        // exhausted health check.
        let flushed = store.statuses.lock().await.clone();
        assert_eq!(
            flushed,
            vec![
                DeploymentStatus::Deploying,
                DeploymentStatus::Degraded,
                DeploymentStatus::RolledBack
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let (controller, _) = setup(1).await;
        let err = controller
            .promote(Environment::Staging, "ghost", VersionSelector::Latest, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
