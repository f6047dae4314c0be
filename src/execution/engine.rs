//! Main execution engine - drives a pipeline run to completion

use crate::core::gate::{GateOutcome, QualityGate};
use crate::core::graph::StageGraph;
use crate::core::run::{PipelineRun, RunStatus};
use crate::core::stage::{ExecutionPolicy, Stage, StageResult, StageStatus};
use crate::core::trigger::RunPlan;
use crate::execution::invoker::{RunContext, StageInvoker};
use crate::execution::scheduler::ExecutionScheduler;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
    },
    StageStarted {
        stage: String,
    },
    StageFinished {
        stage: String,
        status: StageStatus,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    StagesCancelled {
        stages: Vec<String>,
    },
    GateEvaluated {
        gate: String,
        outcome: GateOutcome,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Handle for requesting cancellation of a running engine from another
/// task (signal handler, API call).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Bookkeeping for one run in flight. All mutation goes through the
/// engine's single control loop, so result recording is serialized.
struct RunState<'a> {
    run: &'a mut PipelineRun,
    graph: &'a StageGraph,
    gates: &'a [QualityGate],
    terminal: HashSet<String>,
    started: HashSet<String>,
    evaluated_gates: HashSet<String>,
    gate_blocked: bool,
}

/// Drives a [`RunPlan`] to a terminal status.
///
/// Scheduling model: all currently-ready stages run concurrently up to
/// the plan's concurrency limit. The engine itself is single-threaded
/// control logic awaiting invocation completions; it never interprets
/// stage semantics.
pub struct ExecutionEngine<I> {
    invoker: Arc<I>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel_tx: watch::Sender<bool>,
}

impl<I: StageInvoker + 'static> ExecutionEngine<I> {
    pub fn new(invoker: I) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            invoker: Arc::new(invoker),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
            cancel_tx,
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .expect("event handler lock poisoned")
            .push(Arc::new(handler));
    }

    /// Handle for cancelling the run from outside the engine loop.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .expect("event handler lock poisoned");
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the plan and return the finished run.
    pub async fn execute(&self, plan: RunPlan) -> PipelineRun {
        let RunPlan {
            mut run,
            graph,
            gates,
            concurrency,
        } = plan;

        let scheduler = ExecutionScheduler::new(concurrency);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut in_flight: JoinSet<(String, StageResult)> = JoinSet::new();

        run.start();
        info!(run_id = %run.run_id, pipeline = %run.pipeline_name, "run started");
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
        });

        let mut state = RunState {
            run: &mut run,
            graph: &graph,
            gates: &gates,
            terminal: HashSet::new(),
            started: HashSet::new(),
            evaluated_gates: HashSet::new(),
            gate_blocked: false,
        };

        let cancelled = loop {
            if *cancel_rx.borrow() {
                self.drain_after_cancel(&mut in_flight, &mut state).await;
                break true;
            }

            // Skip-if-flag stages become terminal without being invoked.
            // Recording them may unlock dependents and gates, so restart
            // the loop before dispatching.
            let skip_now: Vec<String> = state
                .graph
                .ready(&state.terminal, &state.started)
                .into_iter()
                .filter(|s| s.policy == ExecutionPolicy::SkipIfFlag)
                .map(|s| s.name.clone())
                .collect();
            if !skip_now.is_empty() {
                for name in skip_now {
                    self.emit(ExecutionEvent::StageSkipped {
                        stage: name.clone(),
                        reason: "skip_tests".to_string(),
                    });
                    self.record_result(&mut state, &name, StageResult::skipped("skip_tests"));
                }
                continue;
            }

            // Dispatch ready stages up to the concurrency limit
            let batch: Vec<Stage> = scheduler
                .next_batch(&graph, &state.terminal, &state.started, in_flight.len())
                .into_iter()
                .cloned()
                .collect();

            for stage in batch {
                state.started.insert(stage.name.clone());
                self.emit(ExecutionEvent::StageStarted {
                    stage: stage.name.clone(),
                });
                self.dispatch(&mut in_flight, stage, state.run, cancel_rx.clone());
            }

            if in_flight.is_empty() {
                if state.terminal.len() == graph.len() {
                    break false;
                }
                // A valid DAG with nothing running and nothing ready can
                // only have stages stranded by a dependency that never
                // recorded (e.g. a panicked invocation). Cancel them so
                // the run terminates.
                warn!(run_id = %state.run.run_id, "stranded stages with no runnable work");
                let stranded: Vec<String> = graph
                    .stages()
                    .iter()
                    .filter(|s| !state.terminal.contains(&s.name))
                    .map(|s| s.name.clone())
                    .collect();
                self.cancel_stages(&mut state, stranded);
                break false;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    match joined {
                        Some(Ok((name, result))) => {
                            self.record_result(&mut state, &name, result);
                        }
                        Some(Err(err)) => {
                            // A panicked invocation; its stage stays
                            // unrecorded and is swept as stranded above.
                            warn!(error = %err, "stage invocation task failed");
                        }
                        None => {}
                    }
                }
                _ = cancel_rx.changed() => {}
            }
        };

        let status = if cancelled {
            RunStatus::Cancelled
        } else if state.gate_blocked || Self::required_stage_failed(&state) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        run.finish(status);
        info!(run_id = %run.run_id, ?status, "run finished");
        self.emit(ExecutionEvent::RunFinished {
            run_id: run.run_id,
            status,
        });
        run
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<(String, StageResult)>,
        stage: Stage,
        run: &PipelineRun,
        cancel: watch::Receiver<bool>,
    ) {
        // Dependencies are terminal by construction, so their results
        // are available to the invocation.
        let upstream: HashMap<String, StageResult> = stage
            .dependencies
            .iter()
            .filter_map(|d| run.results.get(d).map(|r| (d.clone(), r.clone())))
            .collect();

        let ctx = RunContext::new(
            run.run_id,
            run.pipeline_name.clone(),
            run.branch.clone(),
            run.environment,
            run.parameters,
            upstream,
            cancel,
        );

        let invoker = Arc::clone(&self.invoker);
        in_flight.spawn(async move {
            let started_at = Utc::now();
            let timeout = Duration::from_secs(stage.timeout_secs);
            let mut result =
                match tokio::time::timeout(timeout, invoker.invoke(&stage, ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        StageResult::failure(format!("timeout after {}s", stage.timeout_secs))
                    }
                };
            result.started_at = started_at;
            result.finished_at = Utc::now();
            (stage.name, result)
        });
    }

    /// Record a result exactly once, fan out cancellation on failure,
    /// then evaluate any gate whose bound stages just became terminal.
    /// Gates run here, before the loop recomputes the ready set, so a
    /// blocking gate is observed before any dependent is dispatched.
    fn record_result(&self, state: &mut RunState<'_>, name: &str, result: StageResult) {
        if state.terminal.contains(name) {
            // Late result after cancellation; discard.
            debug!(stage = name, "discarding result for terminal stage");
            return;
        }

        let status = result.status;
        state.run.results.insert(name.to_string(), result);
        state.terminal.insert(name.to_string());
        state.started.insert(name.to_string());
        self.emit(ExecutionEvent::StageFinished {
            stage: name.to_string(),
            status,
        });

        if status == StageStatus::Failure {
            // Only dependents are blocked; independent branches keep
            // running even though the run will end failed.
            let dependents = state.graph.transitive_dependents([name]);
            self.cancel_stages(state, dependents.into_iter().collect());
        }

        self.evaluate_eligible_gates(state);
    }

    fn evaluate_eligible_gates(&self, state: &mut RunState<'_>) {
        // Cancelling a blocking gate's dependents makes those stages
        // terminal, which can make further gates eligible. Sweep until a
        // pass cancels nothing; each pass consumes at least one gate, so
        // this terminates.
        loop {
            let eligible: Vec<&QualityGate> = state
                .gates
                .iter()
                .filter(|g| !state.evaluated_gates.contains(&g.id))
                .filter(|g| g.stages.iter().all(|s| state.terminal.contains(s)))
                .collect();

            if eligible.is_empty() {
                return;
            }

            let mut to_cancel: Vec<String> = Vec::new();
            let mut outcomes: Vec<(String, GateOutcome)> = Vec::new();

            for gate in eligible {
                let outcome = gate.evaluate(&state.run.results);
                if outcome.is_block() {
                    to_cancel.extend(
                        state
                            .graph
                            .transitive_dependents(gate.stages.iter().map(|s| s.as_str())),
                    );
                }
                outcomes.push((gate.id.clone(), outcome));
            }

            for (id, outcome) in outcomes {
                match &outcome {
                    GateOutcome::Block(reason) => {
                        warn!(gate = %id, %reason, "gate blocked the run");
                        state.gate_blocked = true;
                    }
                    GateOutcome::Warn(reason) => {
                        warn!(gate = %id, %reason, "gate violation (warn)");
                    }
                    GateOutcome::Pass | GateOutcome::Skipped => {
                        debug!(gate = %id, ?outcome, "gate evaluated");
                    }
                }
                state.evaluated_gates.insert(id.clone());
                self.emit(ExecutionEvent::GateEvaluated {
                    gate: id.clone(),
                    outcome: outcome.clone(),
                });
                state.run.gate_outcomes.insert(id, outcome);
            }

            if to_cancel.is_empty() {
                return;
            }
            self.cancel_stages(state, to_cancel);
        }
    }

    /// Mark not-yet-terminal stages cancelled. Already-recorded results
    /// are preserved unchanged.
    fn cancel_stages(&self, state: &mut RunState<'_>, stages: Vec<String>) {
        let mut cancelled = Vec::new();
        for name in stages {
            if state.terminal.contains(&name) {
                continue;
            }
            state.run.results.insert(name.clone(), StageResult::cancelled());
            state.terminal.insert(name.clone());
            state.started.insert(name.clone());
            cancelled.push(name);
        }
        if !cancelled.is_empty() {
            cancelled.sort();
            self.emit(ExecutionEvent::StagesCancelled { stages: cancelled });
        }
    }

    /// Cancellation: signal in-flight invocations, discard whatever they
    /// return, and mark everything not yet terminal as cancelled.
    async fn drain_after_cancel(
        &self,
        in_flight: &mut JoinSet<(String, StageResult)>,
        state: &mut RunState<'_>,
    ) {
        info!(run_id = %state.run.run_id, "cancellation requested");
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}

        let remaining: Vec<String> = state
            .graph
            .stages()
            .iter()
            .filter(|s| !state.terminal.contains(&s.name))
            .map(|s| s.name.clone())
            .collect();
        self.cancel_stages(state, remaining);
    }

    fn required_stage_failed(state: &RunState<'_>) -> bool {
        state.graph.stages().iter().any(|s| {
            s.policy == ExecutionPolicy::Required
                && state
                    .run
                    .results
                    .get(&s.name)
                    .map(|r| {
                        r.status == StageStatus::Failure || r.status == StageStatus::Cancelled
                    })
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::trigger::{TriggerEvaluator, TriggerEvent};
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl StageInvoker for AlwaysSucceeds {
        async fn invoke(&self, _stage: &Stage, _ctx: RunContext) -> StageResult {
            StageResult::success()
        }
    }

    fn plan(yaml: &str) -> RunPlan {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        TriggerEvaluator::evaluate(&config, &TriggerEvent::push("main")).unwrap()
    }

    #[tokio::test]
    async fn test_linear_pipeline_succeeds() {
        let plan = plan(
            r#"
name: "t"
stages:
  - name: "a"
    capability: build
  - name: "b"
    capability: build
    depends_on: ["a"]
"#,
        );
        let engine = ExecutionEngine::new(AlwaysSucceeds);
        let run = engine.execute(plan).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.results.len(), 2);
        assert!(run.results.values().all(|r| r.is_success()));
    }

    #[tokio::test]
    async fn test_events_cover_lifecycle() {
        let plan = plan(
            r#"
name: "t"
stages:
  - name: "a"
    capability: build
"#,
        );
        let engine = ExecutionEngine::new(AlwaysSucceeds);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        engine.add_event_handler(move |event| {
            seen_clone.lock().unwrap().push(format!("{:?}", event));
        });

        engine.execute(plan).await;

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|e| e.starts_with("RunStarted")));
        assert!(seen.iter().any(|e| e.starts_with("StageStarted")));
        assert!(seen.iter().any(|e| e.starts_with("StageFinished")));
        assert!(seen.iter().any(|e| e.starts_with("RunFinished")));
    }
}
