//! Assignment of graph nodes to execution backends.

use crate::backend::registry::{CompiledModel, ErasedBackend};
use crate::builder::LoweringResult;
use crate::graph::{GraphView, NodeIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Claimed by the backend at this position in the priority list.
    Backend(usize),
    /// Left to the default execution path.
    Default,
}

/// Per-node backend assignment for one graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPartition {
    backend_names: Vec<String>,
    assignments: Vec<Assignment>,
}

impl GraphPartition {
    pub fn assignment(&self, index: NodeIndex) -> Option<&Assignment> {
        self.assignments.get(index.0)
    }

    /// Name of the backend that claimed `index`, or `None` for the default path.
    pub fn backend_of(&self, index: NodeIndex) -> Option<&str> {
        match self.assignment(index)? {
            Assignment::Backend(slot) => self.backend_names.get(*slot).map(String::as_str),
            Assignment::Default => None,
        }
    }

    /// Nodes claimed by `backend`, in graph order.
    pub fn nodes_for(&self, backend: &str) -> Vec<NodeIndex> {
        let Some(slot) = self.backend_names.iter().position(|name| name == backend) else {
            return Vec::new();
        };
        self.collect(|assignment| *assignment == Assignment::Backend(slot))
    }

    pub fn default_nodes(&self) -> Vec<NodeIndex> {
        self.collect(|assignment| *assignment == Assignment::Default)
    }

    fn collect(&self, predicate: impl Fn(&Assignment) -> bool) -> Vec<NodeIndex> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, assignment)| predicate(assignment))
            .map(|(index, _)| NodeIndex(index))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Assigns each node to the first backend in `backends` that supports it.
///
/// A backend rejecting a node is not an error; the node falls through to the next backend and
/// finally to the default execution path.
pub fn partition_graph(graph: &dyn GraphView, backends: &[&dyn ErasedBackend]) -> GraphPartition {
    let mut assignments = vec![Assignment::Default; graph.nodes().len()];
    for (slot, backend) in backends.iter().enumerate() {
        let claimed = backend.get_capability(graph);
        let mut taken = 0usize;
        for index in claimed {
            match assignments.get_mut(index.0) {
                Some(assignment) if *assignment == Assignment::Default => {
                    *assignment = Assignment::Backend(slot);
                    taken += 1;
                }
                _ => {}
            }
        }
        tracing::debug!(backend = backend.backend_name(), nodes = taken, "backend claimed nodes");
    }

    GraphPartition {
        backend_names: backends
            .iter()
            .map(|backend| backend.backend_name().to_string())
            .collect(),
        assignments,
    }
}

/// Compiles every backend's share of `partition`. Backends that claimed nothing are skipped.
pub fn compile_partition(
    graph: &dyn GraphView,
    partition: &GraphPartition,
    backends: &[&dyn ErasedBackend],
) -> LoweringResult<Vec<CompiledModel>> {
    let mut compiled = Vec::new();
    for backend in backends {
        let nodes = partition.nodes_for(backend.backend_name());
        if nodes.is_empty() {
            continue;
        }
        compiled.push(backend.compile(graph, &nodes)?);
    }
    Ok(compiled)
}
