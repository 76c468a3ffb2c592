use opsig::builder::{
    constant_int64_input, normalize_axis, static_input_dims, LoweringError, LoweringResult,
    ModelBuilder, OpBuilder, OpBuilderInputParams,
};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};
use crate::COREML_MAX_RANK;

use super::{input_rank, unsupported};

/// Squeeze and Unsqueeze. Axes moved from an attribute to an input in opset 13 and must then be
/// a constant initializer.
pub struct SqueezeOpBuilder;

enum Axes {
    Omitted,
    Constant(Vec<i64>),
    NonConstant,
}

fn read_axes(node: &Node, params: &OpBuilderInputParams<'_>) -> Axes {
    if node.since_version < 13 {
        return match node.attr_ints("axes") {
            Some(axes) => Axes::Constant(axes.to_vec()),
            None => Axes::Omitted,
        };
    }
    if node.input(1).is_none() {
        return Axes::Omitted;
    }
    match constant_int64_input(node, 1, params) {
        Some(axes) => Axes::Constant(axes),
        None => Axes::NonConstant,
    }
}

/// Sorted, normalized axes, or the reason they cannot be resolved.
fn resolve_axes(node: &Node, params: &OpBuilderInputParams<'_>) -> Result<Vec<usize>, String> {
    let rank = input_rank(node, 0, params).ok_or("input shape is unknown")?;
    let squeeze = node.op_type == "Squeeze";

    let raw = match read_axes(node, params) {
        Axes::Constant(axes) => axes,
        Axes::NonConstant => return Err("axes must be a constant initializer".into()),
        Axes::Omitted if squeeze => {
            // Drop every unit dimension, which needs a fully static input.
            let dims = static_input_dims(node, 0, params)
                .ok_or("squeezing all unit dims needs a static input shape")?;
            return Ok(dims
                .iter()
                .enumerate()
                .filter(|&(_, &dim)| dim == 1)
                .map(|(axis, _)| axis)
                .collect());
        }
        Axes::Omitted => return Err("axes are required".into()),
    };

    let output_rank = if squeeze { rank } else { rank + raw.len() };
    if output_rank > COREML_MAX_RANK {
        return Err(format!("output rank {output_rank}"));
    }
    let mut axes = Vec::with_capacity(raw.len());
    for axis in raw {
        let axis = normalize_axis(axis, output_rank)
            .ok_or_else(|| format!("axis {axis} out of range"))?;
        if axes.contains(&axis) {
            return Err(format!("axis {axis} repeated"));
        }
        axes.push(axis);
    }
    axes.sort_unstable();
    Ok(axes)
}

impl OpBuilder<MlModelBuilder> for SqueezeOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match resolve_axes(node, params) {
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
        let axes = resolve_axes(node, params)
            .map_err(|reason| LoweringError::invalid_attribute(node, "axes", reason))?;
        let kind = if node.op_type == "Squeeze" {
            LayerKind::Squeeze { axes }
        } else {
            LayerKind::ExpandDims { axes }
        };
        model.append(Layer::from_node(node, kind).with_data_inputs(1))
    }
}
