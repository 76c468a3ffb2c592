use opsig::builder::{
    normalize_axis, LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams,
};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::{input_rank, unsupported};

pub struct SoftmaxOpBuilder;

/// Normalized softmax axis. Before opset 13 the default axis is 1 and the input is coerced to 2D
/// around it, which only matches a per-axis softmax when the axis is the last one.
fn softmax_axis(node: &Node, rank: usize) -> Option<usize> {
    let legacy = node.since_version < 13;
    let axis = node.attr_int_or("axis", if legacy { 1 } else { -1 });
    let axis = normalize_axis(axis, rank)?;
    (!legacy || axis + 1 == rank).then_some(axis)
}

impl OpBuilder<MlModelBuilder> for SoftmaxOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(rank) = input_rank(node, 0, params) else {
            return unsupported(node, "input shape is unknown");
        };
        if softmax_axis(node, rank).is_none() {
            return unsupported(node, "axis is out of range or not the last axis");
        }
        true
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let axis = input_rank(node, 0, params)
            .and_then(|rank| softmax_axis(node, rank))
            .ok_or_else(|| LoweringError::invalid_attribute(node, "axis", "unsupported axis"))?;
        model.append(Layer::from_node(node, LayerKind::Softmax { axis }))
    }
}
