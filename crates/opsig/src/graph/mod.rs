//! Read-only graph view consumed by capability resolution.
//!
//! Resolvers never mutate the graph. They read node argument definitions, the element types and
//! shapes known statically for those arguments, and the storage location of initializers.

mod element_type;
mod node;

use std::collections::HashMap;

pub use element_type::ElementType;
pub use node::{
    AttributeValue, DataLocation, Dimension, Initializer, Node, NodeArg, NodeIndex, Shape,
};

/// Read access to a computation graph.
pub trait GraphView: Send + Sync {
    /// Nodes in topological order.
    fn nodes(&self) -> &[Node];

    fn initializer(&self, name: &str) -> Option<&Initializer>;

    fn graph_inputs(&self) -> &[NodeArg];

    fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes().get(index.0)
    }

    /// Whether `name` is backed by a constant initializer.
    fn is_constant_initializer(&self, name: &str) -> bool {
        self.initializer(name).is_some()
    }
}

/// In-memory graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    initializers: HashMap<String, Initializer>,
    inputs: Vec<NodeArg>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        self.nodes.push(node);
        NodeIndex(self.nodes.len() - 1)
    }

    pub fn add_initializer(&mut self, initializer: Initializer) {
        self.initializers
            .insert(initializer.name.clone(), initializer);
    }

    pub fn add_input(&mut self, input: NodeArg) {
        self.inputs.push(input);
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.add_node(node);
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.add_initializer(initializer);
        self
    }

    pub fn initializers(&self) -> impl Iterator<Item = &Initializer> {
        self.initializers.values()
    }
}

impl GraphView for Graph {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.get(name)
    }

    fn graph_inputs(&self) -> &[NodeArg] {
        &self.inputs
    }
}
