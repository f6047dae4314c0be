//! Stage dependency graph

use crate::core::error::PipelineError;
use crate::core::stage::Stage;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validated directed acyclic graph of stages.
///
/// Construction rejects unknown dependency names and cycles, so every
/// query on a built graph can assume a well-formed DAG. Stages keep
/// their declaration order, which is the tie-break for scheduling.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    by_name: HashMap<String, usize>,
}

impl StageGraph {
    /// Build a graph from stage definitions, validating acyclicity.
    pub fn new(mut stages: Vec<Stage>) -> Result<Self, PipelineError> {
        for (index, stage) in stages.iter_mut().enumerate() {
            stage.index = index;
        }

        let by_name: HashMap<String, usize> = stages
            .iter()
            .map(|s| (s.name.clone(), s.index))
            .collect();

        if by_name.len() != stages.len() {
            return Err(PipelineError::config("duplicate stage names in pipeline"));
        }

        for stage in &stages {
            for dep in &stage.dependencies {
                if !by_name.contains_key(dep) {
                    return Err(PipelineError::config(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.name, dep
                    )));
                }
                if dep == &stage.name {
                    return Err(PipelineError::Cycle {
                        path: vec![stage.name.clone(), stage.name.clone()],
                    });
                }
            }
        }

        let graph = Self { stages, by_name };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Depth-first cycle detection. On failure the error names the
    /// offending cycle, closed on itself.
    fn check_acyclic(&self) -> Result<(), PipelineError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks = vec![Mark::White; self.stages.len()];
        let mut path: Vec<usize> = Vec::new();

        fn visit(
            graph: &StageGraph,
            idx: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Result<(), PipelineError> {
            marks[idx] = Mark::Grey;
            path.push(idx);

            for dep in &graph.stages[idx].dependencies {
                let dep_idx = graph.by_name[dep];
                match marks[dep_idx] {
                    Mark::Black => {}
                    Mark::White => visit(graph, dep_idx, marks, path)?,
                    Mark::Grey => {
                        let start = path.iter().position(|&i| i == dep_idx).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&i| graph.stages[i].name.clone())
                            .collect();
                        cycle.push(graph.stages[dep_idx].name.clone());
                        return Err(PipelineError::Cycle { path: cycle });
                    }
                }
            }

            path.pop();
            marks[idx] = Mark::Black;
            Ok(())
        }

        for idx in 0..self.stages.len() {
            if marks[idx] == Mark::White {
                visit(self, idx, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    /// All stages, in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.by_name.get(name).map(|&i| &self.stages[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages whose dependencies are all terminal and which have not been
    /// started yet. Declaration order, for reproducible scheduling.
    pub fn ready(&self, terminal: &HashSet<String>, started: &HashSet<String>) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|s| !started.contains(&s.name) && !terminal.contains(&s.name))
            .filter(|s| s.dependencies.iter().all(|d| terminal.contains(d)))
            .collect()
    }

    /// Every stage that depends, directly or transitively, on any of the
    /// given stages. Used to fan out cancellation after a failure or a
    /// blocking gate.
    pub fn transitive_dependents<'a, I>(&self, roots: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        // Reverse adjacency: stage -> stages that list it as a dependency
        let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in &self.stages {
            for dep in &stage.dependencies {
                reverse.entry(dep.as_str()).or_default().push(&stage.name);
            }
        }

        let mut out = HashSet::new();
        let mut queue: VecDeque<&str> = roots.into_iter().collect();
        while let Some(name) = queue.pop_front() {
            if let Some(dependents) = reverse.get(name) {
                for &d in dependents {
                    if out.insert(d.to_string()) {
                        queue.push_back(d);
                    }
                }
            }
        }
        out
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
    fn test_ready_respects_dependencies() {
        let graph = StageGraph::new(vec![
            stage("a", &[]),
            stage("b", &["a"]),
            stage("c", &["a", "b"]),
        ])
        .unwrap();

        let mut terminal = HashSet::new();
        let started = HashSet::new();

        let ready: Vec<_> = graph.ready(&terminal, &started).iter().map(|s| s.name.clone()).collect();
        assert_eq!(ready, vec!["a"]);

        terminal.insert("a".to_string());
        let ready: Vec<_> = graph.ready(&terminal, &started).iter().map(|s| s.name.clone()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn test_ready_is_declaration_ordered() {
        let graph = StageGraph::new(vec![
            stage("zeta", &[]),
            stage("alpha", &[]),
            stage("mid", &[]),
        ])
        .unwrap();

        let ready: Vec<_> = graph
            .ready(&HashSet::new(), &HashSet::new())
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(ready, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_cycle_detection_names_the_cycle() {
        let err = StageGraph::new(vec![
            stage("a", &["c"]),
            stage("b", &["a"]),
            stage("c", &["b"]),
        ])
        .unwrap_err();

        match err {
            PipelineError::Cycle { path } => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
                assert!(path.contains(&"c".to_string()));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = StageGraph::new(vec![stage("a", &["a"])]).unwrap_err();
        assert!(matches!(err, PipelineError::Cycle { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = StageGraph::new(vec![stage("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = StageGraph::new(vec![
            stage("build", &[]),
            stage("test", &["build"]),
            stage("package", &["test"]),
            stage("lint", &[]),
        ])
        .unwrap();

        let deps = graph.transitive_dependents(["build"]);
        assert!(deps.contains("test"));
        assert!(deps.contains("package"));
        assert!(!deps.contains("lint"));
        assert!(!deps.contains("build"));
    }
}
