//! Execution backends: a named set of op builders plus a model-builder factory.

pub mod registry;

use crate::builder::{BuilderConfig, ModelBuilder, OpBuilderInputParams, OpBuilderRegistry};
use crate::graph::{GraphView, Node};

/// Hardware backend that can claim graph nodes and lower them.
pub trait ExecutionBackend: Send + Sync {
    type Model: ModelBuilder;

    /// Returns a human-readable backend identifier (e.g. `"coreml"`).
    fn backend_name(&self) -> &str;

    fn builder_config(&self) -> &BuilderConfig;

    fn op_builders(&self) -> &OpBuilderRegistry<Self::Model>;

    /// Fresh accumulator for one compilation.
    fn new_model_builder(&self) -> Self::Model;

    /// Runs the registered builder's capability check. Nodes without a builder are unsupported.
    fn is_node_supported(&self, graph: &dyn GraphView, node: &Node) -> bool {
        let Some(builder) = self.op_builders().for_node(node) else {
            tracing::trace!(
                backend = self.backend_name(),
                node = %node.name,
                op_type = %node.op_type,
                domain = %node.domain,
                "no op builder registered"
            );
            return false;
        };
        let params = OpBuilderInputParams::new(graph, self.builder_config());
        builder.is_op_supported(node, &params)
    }
}
