//! Stage domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of work a stage performs.
///
/// The scheduler never interprets this; it exists for trigger-time stage
/// selection and for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Static analysis, linting, code quality
    Analysis,
    /// Security / dependency scanning
    Scan,
    /// Test execution
    Test,
    /// Producing build outputs
    Build,
    /// Deploying to an environment
    Deploy,
    /// Aggregating or publishing reports
    Report,
}

/// How a stage participates in run-status accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPolicy {
    /// Failure fails the run.
    Required,
    /// Failure blocks dependents but does not fail the run.
    Optional,
    /// Recorded as skipped without being invoked. Set at trigger time
    /// (e.g. manual dispatch with skip_tests); the stage stays in the
    /// graph so reporting sees the full stage set.
    SkipIfFlag,
}

/// A single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// Names of stages this stage depends on
    pub dependencies: Vec<String>,

    /// Capability tag (scan, test, build, deploy, ...)
    pub capability: Capability,

    /// Execution policy, resolved once at trigger time
    pub policy: ExecutionPolicy,

    /// Invocation timeout in seconds
    pub timeout_secs: u64,

    /// Position in the declaration order. Ready-set tie-breaking uses
    /// this so run ordering is reproducible.
    pub index: usize,
}

/// Terminal status of an executed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

/// A gating-relevant metric reported by a stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{}", b),
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A build output reported by a stage invocation, to be registered in
/// the artifact registry once the run's gates are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    /// Logical lineage name
    pub name: String,
    /// Platform tag, e.g. "linux/amd64"
    pub platform: String,
    /// Opaque content locator
    pub content_ref: String,
}

/// The recorded outcome of one stage in one run.
///
/// Written exactly once per stage per run and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageStatus,

    /// Normalized metrics for gate evaluation (coverage percent,
    /// vulnerability counts, pass rates, ...)
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,

    /// Build outputs produced by the invocation
    #[serde(default)]
    pub artifacts: Vec<ProducedArtifact>,

    /// Opaque reference to the invocation's log output
    #[serde(default)]
    pub log_ref: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn success() -> Self {
        Self::with_status(StageStatus::Success)
    }

    pub fn failure(log_ref: impl Into<String>) -> Self {
        let mut r = Self::with_status(StageStatus::Failure);
        r.log_ref = Some(log_ref.into());
        r
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        let mut r = Self::with_status(StageStatus::Skipped);
        r.log_ref = Some(reason.into());
        r
    }

    pub fn cancelled() -> Self {
        Self::with_status(StageStatus::Cancelled)
    }

    fn with_status(status: StageStatus) -> Self {
        let now = Utc::now();
        Self {
            status,
            metrics: HashMap::new(),
            artifacts: Vec::new(),
            log_ref: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Attach a metric, builder-style.
    pub fn with_metric(mut self, name: impl Into<String>, value: MetricValue) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Report a build output, builder-style.
    pub fn with_artifact(
        mut self,
        name: impl Into<String>,
        platform: impl Into<String>,
        content_ref: impl Into<String>,
    ) -> Self {
        self.artifacts.push(ProducedArtifact {
            name: name.into(),
            platform: platform.into(),
            content_ref: content_ref.into(),
        });
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}
