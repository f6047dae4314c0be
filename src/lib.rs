//! gantry - a dependency-aware CI/CD pipeline orchestration engine

pub mod cli;
pub mod core;
pub mod deploy;
pub mod execution;
pub mod persistence;
pub mod registry;

// Re-export commonly used types
pub use self::core::{
    Capability, Environment, ExecutionPolicy, GateAction, GateOutcome, MetricValue, PipelineError,
    PipelineRun, QualityGate, RunPlan, RunStatus, Stage, StageGraph, StageResult, StageStatus,
    TriggerEvaluator, TriggerEvent, TriggerKind,
};
pub use deploy::{DeployTarget, DeploymentController, DeploymentStatus, EnvironmentState};
pub use execution::{CancelHandle, ExecutionEngine, ExecutionEvent, RunContext, StageInvoker};
pub use registry::{Artifact, ArtifactRegistry, VersionSelector};
