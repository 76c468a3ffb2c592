use opsig::builder::{LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::Node;

use crate::model::{SubgraphBuilder, XnnOperator};

use super::{conv_params, unsupported};

/// Float `Conv` from the internal NHWC domain with static weights.
pub struct ConvOpBuilder;

impl OpBuilder<SubgraphBuilder> for ConvOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match conv_params(node, params, 1, 2) {
            Ok(_) => true,
            Err(reason) => unsupported(node, reason),
        }
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut SubgraphBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let conv = conv_params(node, params, 1, 2)
            .map_err(|reason| LoweringError::builder(node, reason))?;
        let xnn_node = model.node_for(node, XnnOperator::Convolution2d(conv), 1);
        model.append(xnn_node)
    }
}
