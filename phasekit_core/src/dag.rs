//! Intra-phase dependency graph using petgraph.
//!
//! Each phase's tasks form a DAG; edges point from a prerequisite to its
//! dependent. The graph is validated for missing dependencies and cycles
//! when the phase is entered, before anything is dispatched.

use crate::error::{PhaseKitError, Result};
use crate::spec::PhaseSpec;
use crate::types::TaskId;
use petgraph::algo::toposort as petgraph_toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Validated dependency graph of one phase.
pub struct PhaseGraph {
    phase: String,
    graph: DiGraph<TaskId, ()>,
}

impl PhaseGraph {
    /// Builds and validates the graph of a phase.
    ///
    /// # Returns
    ///
    /// - `Ok(PhaseGraph)` if every dependency exists in the phase and the graph is acyclic
    /// - `Err(PhaseKitError::MissingDependency)` for an unknown dependency
    /// - `Err(PhaseKitError::CycleDetected)` if the graph contains a cycle
    pub fn build(phase: &PhaseSpec) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut task_map: HashMap<TaskId, NodeIndex> = HashMap::new();

        for task in &phase.tasks {
            let idx = graph.add_node(task.id.clone());
            task_map.insert(task.id.clone(), idx);
        }

        for task in &phase.tasks {
            let to_idx = task_map[&task.id];
            for dep in &task.depends_on {
                let from_idx = *task_map.get(dep).ok_or_else(|| {
                    PhaseKitError::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.add_edge(from_idx, to_idx, ());
            }
        }

        let dag = Self {
            phase: phase.name.clone(),
            graph,
        };

        if petgraph_toposort(&dag.graph, None).is_err() {
            return Err(PhaseKitError::CycleDetected {
                phase: dag.phase.clone(),
                tasks: dag.detect_cycle_nodes(),
            });
        }

        Ok(dag)
    }

    /// Detects all nodes involved in cycles, self-loops included.
    fn detect_cycle_nodes(&self) -> Vec<TaskId> {
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .flat_map(|scc| {
                scc.into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TaskSpec;

    #[test]
    fn test_diamond_is_acyclic() {
        let phase = PhaseSpec::new(
            "implement",
            vec![
                TaskSpec::new("a"),
                TaskSpec::new("b").depends_on("a"),
                TaskSpec::new("c").depends_on("a"),
                TaskSpec::new("d").depends_on("b").depends_on("c"),
            ],
        );
        assert!(PhaseGraph::build(&phase).is_ok());
    }

    #[test]
    fn test_cycle_reports_members() {
        let phase = PhaseSpec::new(
            "p",
            vec![
                TaskSpec::new("a").depends_on("b"),
                TaskSpec::new("b").depends_on("a"),
                TaskSpec::new("c"),
            ],
        );
        match PhaseGraph::build(&phase) {
            Err(PhaseKitError::CycleDetected { phase, mut tasks }) => {
                assert_eq!(phase, "p");
                tasks.sort();
                assert_eq!(tasks, vec![TaskId::new("a"), TaskId::new("b")]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let phase = PhaseSpec::new("p", vec![TaskSpec::new("a").depends_on("a")]);
        match PhaseGraph::build(&phase) {
            Err(PhaseKitError::CycleDetected { tasks, .. }) => {
                assert_eq!(tasks, vec![TaskId::new("a")]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let phase = PhaseSpec::new("p", vec![TaskSpec::new("a").depends_on("zzz")]);
        assert!(matches!(
            PhaseGraph::build(&phase),
            Err(PhaseKitError::MissingDependency { .. })
        ));
    }
}
