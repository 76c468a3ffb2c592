use opsig::builder::{
    normalize_axis, LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams,
};
use opsig::graph::{ElementType, Node};

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::{input_rank, unsupported};

pub struct ConcatOpBuilder;

/// Shared rank of every present input, when all are known and equal.
fn common_rank(node: &Node, params: &OpBuilderInputParams<'_>) -> Option<usize> {
    let mut ranks = (0..node.inputs.len()).filter_map(|index| {
        node.input(index)
            .map(|_| input_rank(node, index, params))
    });
    let first = ranks.next()??;
    for rank in ranks {
        if rank != Some(first) {
            return None;
        }
    }
    Some(first)
}

fn concat_axis(node: &Node, params: &OpBuilderInputParams<'_>) -> Result<usize, String> {
    let rank = common_rank(node, params).ok_or("input ranks are unknown or differ")?;
    let axis = node.attr_int("axis").ok_or("axis attribute is required")?;
    let axis = normalize_axis(axis, rank).ok_or_else(|| format!("axis {axis} out of range"))?;
    // Layer-based concat only joins along the channel axis.
    if !params.config.create_ml_program && rank >= 3 && axis != rank - 3 {
        return Err(format!("axis {axis} is not the channel axis"));
    }
    Ok(axis)
}

impl OpBuilder<MlModelBuilder> for ConcatOpBuilder {
    /// Every present input must be `float`.
    fn has_supported_inputs_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let present: Vec<_> = node.inputs.iter().filter(|arg| arg.exists()).collect();
        if present.len() < 2 {
            return unsupported(node, "fewer than 2 inputs");
        }
        for arg in present {
            match params.element_type(arg) {
                Some(ElementType::Float) => {}
                Some(other) => {
                    return unsupported(node, format_args!("input {} has type {other}", arg.name))
                }
                None => return unsupported(node, format_args!("input {} type is unknown", arg.name)),
            }
        }
        true
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match concat_axis(node, params) {
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
        let axis = concat_axis(node, params)
            .map_err(|reason| LoweringError::invalid_attribute(node, "axis", reason))?;
        model.append(Layer::from_node(node, LayerKind::Concat { axis }))
    }
}
