//! Trigger evaluation - turning an event into a run plan

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::gate::QualityGate;
use crate::core::graph::StageGraph;
use crate::core::run::{Environment, PipelineRun, RunParameters, TriggerKind};
use crate::core::stage::{Capability, ExecutionPolicy, Stage};
use std::collections::HashSet;
use tracing::debug;

/// An event descriptor delivered by an external source (webhook
/// receiver, manual CLI/API call).
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub branch: String,
    pub reference: Option<String>,
    pub manual: Option<ManualParameters>,
}

/// Parameters supplied with a manual dispatch.
#[derive(Debug, Clone)]
pub struct ManualParameters {
    /// Target environment; must name a member of the closed set
    pub environment: String,
    pub skip_tests: bool,
    pub promote_override: bool,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            branch: branch.into(),
            reference: None,
            manual: None,
        }
    }

    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::PullRequest,
            branch: branch.into(),
            reference: None,
            manual: None,
        }
    }

    pub fn manual(branch: impl Into<String>, params: ManualParameters) -> Self {
        Self {
            kind: TriggerKind::Manual,
            branch: branch.into(),
            reference: None,
            manual: Some(params),
        }
    }
}

/// Everything the engine needs to drive one run: the run record, the
/// enabled stage graph, the gates bound to enabled stages, and the
/// concurrency limit.
#[derive(Debug)]
pub struct RunPlan {
    pub run: PipelineRun,
    pub graph: StageGraph,
    pub gates: Vec<QualityGate>,
    pub concurrency: usize,
}

/// Decides which pipeline variant executes for a given event.
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Derive a run plan from an event. Invalid manual parameters fail
    /// with a configuration error before any stage runs.
    pub fn evaluate(config: &PipelineConfig, event: &TriggerEvent) -> Result<RunPlan, PipelineError> {
        config.validate()?;

        let (environment, parameters) = match (event.kind, &event.manual) {
            (TriggerKind::Manual, Some(params)) => {
                let environment: Environment = params
                    .environment
                    .parse()
                    .map_err(PipelineError::Configuration)?;
                (
                    Some(environment),
                    RunParameters {
                        skip_tests: params.skip_tests,
                        promote_override: params.promote_override,
                    },
                )
            }
            (TriggerKind::Manual, None) => {
                return Err(PipelineError::config(
                    "manual dispatch requires a target environment",
                ));
            }
            (_, _) => (None, RunParameters::default()),
        };

        let mut stages = Self::enabled_stages(config, event)?;

        // skip_tests marks test-tagged stages skip-if-flag instead of
        // removing them: they stay in the graph and finish skipped, so
        // reporting sees the full stage set.
        if parameters.skip_tests {
            for stage in &mut stages {
                if stage.capability == Capability::Test {
                    stage.policy = ExecutionPolicy::SkipIfFlag;
                }
            }
        }

        let graph = StageGraph::new(stages)?;

        // Keep only gates whose bound stages are all in the plan.
        let gates: Vec<QualityGate> = config
            .to_gates()?
            .into_iter()
            .filter(|g| g.stages.iter().all(|s| graph.contains(s)))
            .collect();

        debug!(
            trigger = %event.kind,
            branch = %event.branch,
            stages = graph.len(),
            gates = gates.len(),
            "derived run plan"
        );

        let run = PipelineRun::new(
            config.name.clone(),
            event.kind,
            event.branch.clone(),
            environment,
            parameters,
        );

        Ok(RunPlan {
            run,
            graph,
            gates,
            concurrency: config.concurrency,
        })
    }

    /// Select the stage subset for the event. Dependencies on stages
    /// outside the subset are stripped: the excluded stage is treated
    /// as satisfied, since it was excluded deliberately, not failed.
    fn enabled_stages(
        config: &PipelineConfig,
        event: &TriggerEvent,
    ) -> Result<Vec<Stage>, PipelineError> {
        let all = config.to_stages();

        let allowed: Option<HashSet<Capability>> = match event.kind {
            // Full set on protected branches, analysis/test elsewhere
            TriggerKind::Push => {
                if config.is_protected_branch(&event.branch) {
                    None
                } else {
                    Some(HashSet::from([Capability::Analysis, Capability::Test]))
                }
            }
            // PRs get analysis, scanning and tests, never deployment
            TriggerKind::PullRequest => Some(HashSet::from([
                Capability::Analysis,
                Capability::Scan,
                Capability::Test,
            ])),
            // Manual dispatch runs the full set against the chosen environment
            TriggerKind::Manual => None,
        };

        let stages = match allowed {
            None => all,
            Some(allowed) => {
                let kept: HashSet<String> = all
                    .iter()
                    .filter(|s| allowed.contains(&s.capability))
                    .map(|s| s.name.clone())
                    .collect();

                all.into_iter()
                    .filter(|s| kept.contains(&s.name))
                    .map(|mut s| {
                        s.dependencies.retain(|d| kept.contains(d));
                        s
                    })
                    .collect()
            }
        };

        if stages.is_empty() {
            return Err(PipelineError::config(format!(
                "no stages enabled for {} on branch '{}'",
                event.kind, event.branch
            )));
        }

        Ok(stages)
    }
}
