//! Shared test utilities: a scripted invoker and run assertions

// Not every test crate uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use gantry::core::config::PipelineConfig;
use gantry::core::{
    PipelineRun, RunPlan, Stage, StageResult, StageStatus, TriggerEvaluator, TriggerEvent,
};
use gantry::execution::{ExecutionEngine, RunContext, StageInvoker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Invoker that returns predefined results per stage name and records
/// the order in which stages were dispatched.
#[derive(Clone)]
pub struct ScriptedInvoker {
    results: Arc<HashMap<String, StageResult>>,
    order: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedInvoker {
    pub fn new(results: HashMap<String, StageResult>) -> Self {
        Self {
            results: Arc::new(results),
            order: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(20),
        }
    }

    /// Every stage succeeds with an empty result.
    pub fn all_success() -> Self {
        Self::new(HashMap::new())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stage names in dispatch order.
    pub fn invocation_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    /// High-water mark of simultaneously running invocations.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageInvoker for ScriptedInvoker {
    async fn invoke(&self, stage: &Stage, mut ctx: RunContext) -> StageResult {
        self.order.lock().unwrap().push(stage.name.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = tokio::time::sleep(self.delay) => self
                .results
                .get(&stage.name)
                .cloned()
                .unwrap_or_else(StageResult::success),
            _ = ctx.cancelled() => StageResult::cancelled(),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Parse a pipeline definition and evaluate the trigger into a plan.
pub fn plan_from_yaml(yaml: &str, event: &TriggerEvent) -> RunPlan {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    TriggerEvaluator::evaluate(&config, event).unwrap()
}

/// Drive a plan to completion with the given invoker.
pub async fn execute_plan(plan: RunPlan, invoker: ScriptedInvoker) -> PipelineRun {
    let engine = ExecutionEngine::new(invoker);
    engine.execute(plan).await
}

pub fn assert_stage_status(run: &PipelineRun, stage: &str, expected: StageStatus) {
    let result = run
        .results
        .get(stage)
        .unwrap_or_else(|| panic!("no result recorded for stage '{}'", stage));
    assert_eq!(
        result.status, expected,
        "stage '{}' finished {:?}, expected {:?}",
        stage, result.status, expected
    );
}

pub fn assert_ran_before(order: &[String], first: &str, second: &str) {
    let a = order
        .iter()
        .position(|s| s == first)
        .unwrap_or_else(|| panic!("'{}' was never dispatched", first));
    let b = order
        .iter()
        .position(|s| s == second)
        .unwrap_or_else(|| panic!("'{}' was never dispatched", second));
    assert!(
        a < b,
        "expected '{}' before '{}', got order {:?}",
        first, second, order
    );
}

pub fn assert_never_ran(order: &[String], stage: &str) {
    assert!(
        !order.iter().any(|s| s == stage),
        "'{}' should not have been dispatched, got order {:?}",
        stage, order
    );
}
