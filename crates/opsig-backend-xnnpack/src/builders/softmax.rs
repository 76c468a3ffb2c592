use opsig::builder::{normalize_axis, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::Node;

use crate::model::{SubgraphBuilder, XnnOperator};

use super::unsupported;

/// Softmax over the innermost dimension.
pub struct SoftmaxOpBuilder;

impl OpBuilder<SubgraphBuilder> for SoftmaxOpBuilder {
    fn max_supported_opset(&self, _node: &Node) -> u32 {
        13
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(shape) = node.input(0).and_then(|arg| params.shape(arg)) else {
            return unsupported(node, "input shape is unknown");
        };
        let rank = shape.rank();
        let default_axis = if node.since_version < 13 { 1 } else { -1 };
        let axis = node.attr_int_or("axis", default_axis);
        match normalize_axis(axis, rank) {
            Some(axis) if axis + 1 == rank => true,
            _ => unsupported(node, format_args!("axis {axis} is not the last of rank {rank}")),
        }
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut SubgraphBuilder,
        node: &Node,
        _params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let xnn_node = model.node_for(node, XnnOperator::Softmax, 1);
        model.append(xnn_node)
    }
}
