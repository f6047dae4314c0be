//! Core domain models for gantry
//!
//! This module defines the fundamental data structures that represent
//! pipeline runs, stages, graphs, gates, and triggers.

pub mod config;
pub mod error;
pub mod gate;
pub mod graph;
pub mod run;
pub mod stage;
pub mod trigger;

pub use error::PipelineError;
pub use gate::{GateAction, GateOutcome, Predicate, QualityGate};
pub use graph::StageGraph;
pub use run::{Environment, PipelineRun, RunParameters, RunStatus, RunSummary, TriggerKind};
pub use stage::{
    Capability, ExecutionPolicy, MetricValue, ProducedArtifact, Stage, StageResult, StageStatus,
};
pub use trigger::{ManualParameters, RunPlan, TriggerEvaluator, TriggerEvent};
