use opsig::builder::{
    constant_float_scalar, LoweringError, LoweringResult, ModelBuilder, OpBuilder,
    OpBuilderInputParams,
};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::unsupported;

pub struct ClipOpBuilder;

/// `(min, max)` bounds. Opset 11 moved them from attributes to optional inputs, which must then be
/// constant scalars.
fn clip_bounds(node: &Node, params: &OpBuilderInputParams<'_>) -> Result<(f32, f32), String> {
    if node.since_version < 11 {
        return Ok((
            node.attr_float("min").unwrap_or(f32::NEG_INFINITY),
            node.attr_float("max").unwrap_or(f32::INFINITY),
        ));
    }

    let bound = |index: usize, default: f32| -> Result<f32, String> {
        if node.input(index).is_none() {
            return Ok(default);
        }
        constant_float_scalar(node, index, params)
            .ok_or_else(|| format!("input {index} must be a constant float scalar"))
    };
    Ok((bound(1, f32::NEG_INFINITY)?, bound(2, f32::INFINITY)?))
}

impl OpBuilder<MlModelBuilder> for ClipOpBuilder {
    fn min_supported_opset(&self, _node: &Node) -> u32 {
        6
    }

    fn max_supported_opset(&self, _node: &Node) -> u32 {
        21
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match clip_bounds(node, params) {
            Ok(_) => true,
            Err(reason) => unsupported(node, reason),
        }
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let (min, max) = clip_bounds(node, params)
            .map_err(|reason| LoweringError::invalid_attribute(node, "min/max", reason))?;
        model.append(Layer::from_node(node, LayerKind::Clip { min, max }).with_data_inputs(1))
    }
}
