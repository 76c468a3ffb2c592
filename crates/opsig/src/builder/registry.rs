use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::Node;
use crate::op_id::normalize_domain;

use super::{ModelBuilder, OpBuilder};

/// Flat table of builders keyed by `(domain, op_type)`.
///
/// One builder instance may serve several operator types, e.g. a single activation builder for
/// `Relu`, `Sigmoid` and `Tanh`.
pub struct OpBuilderRegistry<M: ModelBuilder> {
    builders: HashMap<(String, String), Arc<dyn OpBuilder<M>>>,
}

impl<M: ModelBuilder> Default for OpBuilderRegistry<M> {
    fn default() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }
}

impl<M: ModelBuilder> OpBuilderRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B>(&mut self, domain: &str, op_type: &str, builder: B)
    where
        B: OpBuilder<M> + 'static,
    {
        self.register_shared(domain, &[op_type], Arc::new(builder));
    }

    pub fn register_shared(
        &mut self,
        domain: &str,
        op_types: &[&str],
        builder: Arc<dyn OpBuilder<M>>,
    ) {
        for op_type in op_types {
            let key = (normalize_domain(domain).to_string(), op_type.to_string());
            if self.builders.insert(key, Arc::clone(&builder)).is_some() {
                tracing::warn!(domain, op_type, "replacing previously registered op builder");
            }
        }
    }

    pub fn get(&self, domain: &str, op_type: &str) -> Option<&dyn OpBuilder<M>> {
        self.builders
            .get(&(normalize_domain(domain).to_string(), op_type.to_string()))
            .map(|builder| builder.as_ref())
    }

    /// Builder registered for the node's domain and operator type.
    pub fn for_node(&self, node: &Node) -> Option<&dyn OpBuilder<M>> {
        self.get(&node.domain, &node.op_type)
    }

    pub fn contains(&self, domain: &str, op_type: &str) -> bool {
        self.get(domain, op_type).is_some()
    }

    /// Registered `(domain, op_type)` pairs in sorted order.
    pub fn op_types(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.builders.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
