//! Pipeline configuration from YAML

use crate::core::error::PipelineError;
use crate::core::gate::{GateAction, Predicate, QualityGate};
use crate::core::graph::StageGraph;
use crate::core::stage::{Capability, ExecutionPolicy, Stage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Branches whose pushes run the full stage set
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,

    /// Maximum number of concurrently running stage invocations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default timeout for stage invocations (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Pipeline stages, in declaration order
    pub stages: Vec<StageConfig>,

    /// Quality gates
    #[serde(default)]
    pub gates: Vec<GateConfig>,
}

fn default_protected_branches() -> Vec<String> {
    vec!["main".to_string(), "develop".to_string()]
}

fn default_concurrency() -> usize {
    4
}

/// Stage configuration as defined in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Capability tag: analysis, scan, test, build, deploy, report
    pub capability: Capability,

    /// Stage names this stage depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Execution policy (defaults to required)
    #[serde(default = "default_policy")]
    pub policy: ExecutionPolicy,

    /// Timeout for this stage (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_policy() -> ExecutionPolicy {
    ExecutionPolicy::Required
}

/// Quality gate configuration as defined in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Unique gate identifier
    pub id: String,

    /// Stage names whose results this gate inspects
    pub stages: Vec<String>,

    /// Predicate expressions, e.g. "coverage >= 80"
    pub require: Vec<String>,

    /// What a violation does: block or warn
    #[serde(default = "default_gate_action")]
    pub action: GateAction,

    /// Whether a violation vetoes artifact promotion. Defaults follow
    /// the action: block gates veto, warn gates do not.
    #[serde(default)]
    pub blocks_promotion: Option<bool>,
}

fn default_gate_action() -> GateAction {
    GateAction::Block
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("failed to parse pipeline YAML")?;
        config.validate().map_err(anyhow::Error::from)?;
        Ok(config)
    }

    /// Structural validation that doesn't need the graph: non-empty
    /// stage set, gates bound to known stages, parseable predicates.
    /// Cycle detection happens in [`StageGraph::new`].
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::config("pipeline has no stages"));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config("concurrency must be at least 1"));
        }

        for gate in &self.gates {
            if gate.stages.is_empty() {
                return Err(PipelineError::config(format!(
                    "gate '{}' is bound to no stages",
                    gate.id
                )));
            }
            for stage_name in &gate.stages {
                if !self.stages.iter().any(|s| &s.name == stage_name) {
                    return Err(PipelineError::config(format!(
                        "gate '{}' references unknown stage '{}'",
                        gate.id, stage_name
                    )));
                }
            }
            for expr in &gate.require {
                Predicate::parse(expr)?;
            }
        }

        Ok(())
    }

    /// Build domain stages from the config, applying defaults.
    pub fn to_stages(&self) -> Vec<Stage> {
        let default_timeout = self.default_timeout_secs.unwrap_or(600);
        self.stages
            .iter()
            .enumerate()
            .map(|(index, sc)| Stage {
                name: sc.name.clone(),
                dependencies: sc.depends_on.clone(),
                capability: sc.capability,
                policy: sc.policy,
                timeout_secs: sc.timeout_secs.unwrap_or(default_timeout),
                index,
            })
            .collect()
    }

    /// Build the validated stage graph for the full stage set.
    pub fn to_graph(&self) -> Result<StageGraph, PipelineError> {
        StageGraph::new(self.to_stages())
    }

    /// Build domain gates. Predicates were validated in `validate`, so
    /// parsing here cannot fail for a validated config.
    pub fn to_gates(&self) -> Result<Vec<QualityGate>, PipelineError> {
        self.gates
            .iter()
            .map(|gc| {
                let predicates = gc
                    .require
                    .iter()
                    .map(|e| Predicate::parse(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(QualityGate {
                    id: gc.id.clone(),
                    stages: gc.stages.clone(),
                    predicates,
                    action: gc.action,
                    blocks_promotion: gc
                        .blocks_promotion
                        .unwrap_or(gc.action == GateAction::Block),
                })
            })
            .collect()
    }

    pub fn is_protected_branch(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }
}
