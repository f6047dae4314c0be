//! Execution scheduler - selects which stages to dispatch next

use crate::core::graph::StageGraph;
use crate::core::stage::Stage;
use std::collections::HashSet;

/// Concurrency-bounded ready-set selection.
///
/// The scheduler is policy-agnostic: execution policies were resolved
/// at trigger time, and the engine handles skip-if-flag stages before
/// asking for a dispatch batch.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionScheduler {
    concurrency: usize,
}

impl ExecutionScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The next batch of stages to dispatch: ready stages in declaration
    /// order, capped so that `running + batch` stays within the limit.
    pub fn next_batch<'g>(
        &self,
        graph: &'g StageGraph,
        terminal: &HashSet<String>,
        started: &HashSet<String>,
        running: usize,
    ) -> Vec<&'g Stage> {
        let capacity = self.concurrency.saturating_sub(running);
        if capacity == 0 {
            return Vec::new();
        }
        graph
            .ready(terminal, started)
            .into_iter()
            .take(capacity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::{Capability, ExecutionPolicy};

    fn stage(name: &str, deps: &[&str]) -> Stage {
        Stage {
            name: name.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            capability: Capability::Build,
            policy: ExecutionPolicy::Required,
            timeout_secs: 300,
            index: 0,
        }
    }

    #[test]
    fn test_batch_respects_concurrency_limit() {
        let graph = StageGraph::new(vec![
            stage("a", &[]),
            stage("b", &[]),
            stage("c", &[]),
        ])
        .unwrap();

        let scheduler = ExecutionScheduler::new(2);
        let batch = scheduler.next_batch(&graph, &HashSet::new(), &HashSet::new(), 0);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].name, "a");
        assert_eq!(batch[1].name, "b");

        // One slot taken by a running stage
        let started = HashSet::from(["a".to_string(), "b".to_string()]);
        let batch = scheduler.next_batch(&graph, &HashSet::new(), &started, 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name, "c");
    }

    #[test]
    fn test_saturated_scheduler_yields_nothing() {
        let graph = StageGraph::new(vec![stage("a", &[]), stage("b", &[])]).unwrap();
        let scheduler = ExecutionScheduler::new(1);
        let started = HashSet::from(["a".to_string()]);
        assert!(scheduler
            .next_batch(&graph, &HashSet::new(), &started, 1)
            .is_empty());
    }
}
