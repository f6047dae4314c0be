//! Artifact & version registry
//!
//! Tracks versioned build outputs and their provenance. Versions are
//! strictly increasing within a lineage and never reused; artifacts are
//! immutable after creation and referenced, never copied.

use crate::core::error::PipelineError;
use crate::persistence::PersistenceBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// A versioned, immutable build output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical lineage name (typically service + branch)
    pub name: String,

    /// Monotonic version within the lineage
    pub version: u64,

    /// Platform tag for multi-architecture outputs, e.g. "linux/amd64"
    pub platform: String,

    /// Opaque content locator (content hash, registry coordinate)
    pub content_ref: String,

    /// Stage that produced the artifact
    pub produced_by: String,

    /// Run that produced the artifact. Doubles as the group key:
    /// multi-platform outputs of one run share a version.
    pub run_id: Uuid,

    /// Whether the producing run recorded no violated
    /// promotion-blocking gate
    pub gates_clean: bool,

    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn coordinate(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// How to pick a version when resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Exact(u64),
}

impl std::str::FromStr for VersionSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            Ok(VersionSelector::Latest)
        } else {
            s.parse::<u64>()
                .map(VersionSelector::Exact)
                .map_err(|_| format!("invalid version selector '{}'", s))
        }
    }
}

/// Registration request for one build output.
#[derive(Debug, Clone)]
pub struct RegisterArtifact {
    pub name: String,
    pub platform: String,
    pub content_ref: String,
    pub produced_by: String,
    pub run_id: Uuid,
    pub gates_clean: bool,
}

/// In-process registry with optional write-through persistence.
///
/// Version assignment happens under a single lock, so versions stay
/// strictly increasing even under concurrent registration.
pub struct ArtifactRegistry {
    lineages: Mutex<HashMap<String, Vec<Artifact>>>,
    store: Option<Arc<dyn PersistenceBackend>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self {
            lineages: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Registry backed by a persistent store, hydrated at startup.
    pub async fn with_store(store: Arc<dyn PersistenceBackend>) -> Result<Self, PipelineError> {
        let artifacts = store.load_artifacts().await?;
        let mut lineages: HashMap<String, Vec<Artifact>> = HashMap::new();
        for artifact in artifacts {
            lineages.entry(artifact.name.clone()).or_default().push(artifact);
        }
        for versions in lineages.values_mut() {
            versions.sort_by_key(|a| a.version);
        }
        Ok(Self {
            lineages: Mutex::new(lineages),
            store: Some(store),
        })
    }

    /// Register a build output, assigning the next version in its
    /// lineage. A second platform registered from the same run joins
    /// that run's version instead of opening a new one.
    pub async fn register(&self, req: RegisterArtifact) -> Result<Artifact, PipelineError> {
        let mut lineages = self.lineages.lock().await;
        let versions = lineages.entry(req.name.clone()).or_default();

        let version = versions
            .iter()
            .rev()
            .find(|a| a.run_id == req.run_id)
            .map(|a| a.version)
            .unwrap_or_else(|| versions.last().map(|a| a.version + 1).unwrap_or(1));

        if versions
            .iter()
            .any(|a| a.version == version && a.platform == req.platform)
        {
            return Err(PipelineError::config(format!(
                "artifact {}:{} for platform '{}' already registered",
                req.name, version, req.platform
            )));
        }

        let artifact = Artifact {
            name: req.name,
            version,
            platform: req.platform,
            content_ref: req.content_ref,
            produced_by: req.produced_by,
            run_id: req.run_id,
            gates_clean: req.gates_clean,
            created_at: Utc::now(),
        };

        info!(
            artifact = %artifact.coordinate(),
            platform = %artifact.platform,
            "registered artifact"
        );

        if let Some(store) = &self.store {
            store.save_artifact(&artifact).await?;
        }

        versions.push(artifact.clone());
        Ok(artifact)
    }

    /// Resolve an artifact by name and version selector. With multiple
    /// platforms at one version this returns the first registered; use
    /// [`resolve_platforms`] for the full group.
    pub async fn resolve(
        &self,
        name: &str,
        selector: VersionSelector,
    ) -> Result<Artifact, PipelineError> {
        let lineages = self.lineages.lock().await;
        let versions = lineages
            .get(name)
            .ok_or_else(|| PipelineError::NotFound(format!("artifact lineage '{}'", name)))?;

        let artifact = match selector {
            VersionSelector::Latest => versions.last(),
            VersionSelector::Exact(v) => versions.iter().find(|a| a.version == v),
        };

        artifact.cloned().ok_or_else(|| {
            PipelineError::NotFound(format!("artifact '{}' at {:?}", name, selector))
        })
    }

    /// All artifacts registered at a given (name, version).
    pub async fn resolve_platforms(
        &self,
        name: &str,
        version: u64,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let lineages = self.lineages.lock().await;
        let versions = lineages
            .get(name)
            .ok_or_else(|| PipelineError::NotFound(format!("artifact lineage '{}'", name)))?;
        let group: Vec<Artifact> = versions
            .iter()
            .filter(|a| a.version == version)
            .cloned()
            .collect();
        if group.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "artifact '{}:{}'",
                name, version
            )));
        }
        Ok(group)
    }

    /// Whether every required platform is present at (name, version).
    /// The deployment controller requires this before promotion of
    /// multi-architecture outputs.
    pub async fn platforms_complete(
        &self,
        name: &str,
        version: u64,
        required: &[String],
    ) -> Result<bool, PipelineError> {
        let group = self.resolve_platforms(name, version).await?;
        Ok(required
            .iter()
            .all(|p| group.iter().any(|a| &a.platform == p)))
    }

    pub async fn list(&self, name: &str) -> Vec<Artifact> {
        let lineages = self.lineages.lock().await;
        lineages.get(name).cloned().unwrap_or_default()
    }

    /// Register every build output reported by the run's successful
    /// stages. `gates_clean` reflects whether any promotion-blocking
    /// gate recorded a violation in this run.
    pub async fn register_run_outputs(
        &self,
        run: &crate::core::run::PipelineRun,
        gates: &[crate::core::gate::QualityGate],
    ) -> Result<Vec<Artifact>, PipelineError> {
        use crate::core::gate::GateOutcome;

        let gates_clean = !gates.iter().any(|g| {
            g.blocks_promotion
                && matches!(
                    run.gate_outcomes.get(&g.id),
                    Some(GateOutcome::Block(_)) | Some(GateOutcome::Warn(_))
                )
        });

        let mut registered = Vec::new();
        for (stage_name, result) in &run.results {
            if !result.is_success() {
                continue;
            }
            for produced in &result.artifacts {
                let artifact = self
                    .register(RegisterArtifact {
                        name: produced.name.clone(),
                        platform: produced.platform.clone(),
                        content_ref: produced.content_ref.clone(),
                        produced_by: stage_name.clone(),
                        run_id: run.run_id,
                        gates_clean,
                    })
                    .await?;
                registered.push(artifact);
            }
        }
        Ok(registered)
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, platform: &str, run_id: Uuid) -> RegisterArtifact {
        RegisterArtifact {
            name: name.to_string(),
            platform: platform.to_string(),
            content_ref: format!("sha256:{}", platform),
            produced_by: "build".to_string(),
            run_id,
            gates_clean: true,
        }
    }

    #[tokio::test]
    async fn test_versions_are_monotonic() {
        let registry = ArtifactRegistry::new();
        let a = registry.register(req("svc", "linux/amd64", Uuid::new_v4())).await.unwrap();
        let b = registry.register(req("svc", "linux/amd64", Uuid::new_v4())).await.unwrap();
        let c = registry.register(req("svc", "linux/amd64", Uuid::new_v4())).await.unwrap();
        assert_eq!((a.version, b.version, c.version), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_same_run_platforms_share_version() {
        let registry = ArtifactRegistry::new();
        let run_id = Uuid::new_v4();
        let amd = registry.register(req("svc", "linux/amd64", run_id)).await.unwrap();
        let arm = registry.register(req("svc", "linux/arm64", run_id)).await.unwrap();
        assert_eq!(amd.version, arm.version);

        let complete = registry
            .platforms_complete(
                "svc",
                amd.version,
                &["linux/amd64".to_string(), "linux/arm64".to_string()],
            )
            .await
            .unwrap();
        assert!(complete);
    }

    #[tokio::test]
    async fn test_duplicate_platform_registration_rejected() {
        let registry = ArtifactRegistry::new();
        let run_id = Uuid::new_v4();
        registry.register(req("svc", "linux/amd64", run_id)).await.unwrap();
        assert!(registry.register(req("svc", "linux/amd64", run_id)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_registration_stays_monotonic() {
        let registry = Arc::new(ArtifactRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .register(req("svc", "linux/amd64", Uuid::new_v4()))
                    .await
                    .unwrap()
                    .version
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        let expected: Vec<u64> = (1..=16).collect();
        assert_eq!(versions, expected);
    }

    #[tokio::test]
    async fn test_resolve_latest_and_exact() {
        let registry = ArtifactRegistry::new();
        registry.register(req("svc", "linux/amd64", Uuid::new_v4())).await.unwrap();
        registry.register(req("svc", "linux/amd64", Uuid::new_v4())).await.unwrap();

        let latest = registry.resolve("svc", VersionSelector::Latest).await.unwrap();
        assert_eq!(latest.version, 2);

        let first = registry.resolve("svc", VersionSelector::Exact(1)).await.unwrap();
        assert_eq!(first.version, 1);

        assert!(matches!(
            registry.resolve("svc", VersionSelector::Exact(9)).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("ghost", VersionSelector::Latest).await,
            Err(PipelineError::NotFound(_))
        ));
    }
}
