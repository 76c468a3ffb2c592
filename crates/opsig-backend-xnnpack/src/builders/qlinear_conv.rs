use opsig::builder::{
    constant_float_input, constant_float_scalar, input_element_type, LoweringError,
    LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams,
};
use opsig::graph::{ElementType, Node};

use crate::model::{QuantParams, SubgraphBuilder, XnnOperator};

use super::{conv_params, unsupported};

const X_SCALE: usize = 1;
const X_ZERO_POINT: usize = 2;
const W: usize = 3;
const W_SCALE: usize = 4;
const W_ZERO_POINT: usize = 5;
const Y_SCALE: usize = 6;
const Y_ZERO_POINT: usize = 7;
const BIAS: usize = 8;

/// Quantized 2D convolution over uint8 or int8 NHWC tensors.
///
/// Every quantization parameter must be a constant initializer. Per-channel weight scales are
/// accepted for int8 only.
pub struct QLinearConvOpBuilder;

fn zero_points(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
    element_type: ElementType,
) -> Result<Vec<i32>, String> {
    let init = node
        .input(index)
        .and_then(|arg| params.graph.initializer(&arg.name))
        .ok_or_else(|| format!("input {index} must be a constant initializer"))?;
    if init.element_type != element_type {
        return Err(format!(
            "input {index} has type {}, expected {element_type}",
            init.element_type
        ));
    }
    Ok(init
        .raw_data()
        .iter()
        .map(|&byte| match element_type {
            ElementType::Int8 => i32::from(byte as i8),
            _ => i32::from(byte),
        })
        .collect())
}

fn scalar_zero_point(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
    element_type: ElementType,
) -> Result<i32, String> {
    match zero_points(node, index, params, element_type)?.as_slice() {
        [zero_point] => Ok(*zero_point),
        values => Err(format!("input {index} must be a scalar, got {} values", values.len())),
    }
}

fn scalar_scale(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Result<f32, String> {
    constant_float_scalar(node, index, params)
        .filter(|scale| scale.is_finite() && *scale > 0.0)
        .ok_or_else(|| format!("input {index} must be a positive constant float scalar"))
}

fn quant_params(node: &Node, params: &OpBuilderInputParams<'_>) -> Result<QuantParams, String> {
    let element_type = input_element_type(node, 0, params).ok_or("input 0 type is unknown")?;
    let output_channels = node
        .input(W)
        .and_then(|arg| params.graph.initializer(&arg.name))
        .and_then(|init| init.dims.first().copied())
        .ok_or("weight must be a constant initializer")?;

    let weight_scales = constant_float_input(node, W_SCALE, params)
        .ok_or("weight scale must be a constant float initializer")?;
    let per_channel = weight_scales.len() as u64 == output_channels;
    if weight_scales.len() != 1 && !(per_channel && element_type == ElementType::Int8) {
        return Err(format!(
            "{} weight scales for {output_channels} output channels of {element_type}",
            weight_scales.len()
        ));
    }

    // Signed weights are symmetric.
    let weight_zero_point = scalar_zero_point(node, W_ZERO_POINT, params, element_type)?;
    if element_type == ElementType::Int8 && weight_zero_point != 0 {
        return Err(format!("int8 weight zero point {weight_zero_point}"));
    }

    if let Some(bias) = node.input(BIAS) {
        if params.element_type(bias) != Some(ElementType::Int32) {
            return Err("bias must be int32".into());
        }
    }

    Ok(QuantParams {
        element_type,
        input_scale: scalar_scale(node, X_SCALE, params)?,
        input_zero_point: scalar_zero_point(node, X_ZERO_POINT, params, element_type)?,
        weight_scales,
        weight_zero_point,
        output_scale: scalar_scale(node, Y_SCALE, params)?,
        output_zero_point: scalar_zero_point(node, Y_ZERO_POINT, params, element_type)?,
    })
}

impl OpBuilder<SubgraphBuilder> for QLinearConvOpBuilder {
    /// Activations and weights share one 8-bit type.
    fn has_supported_inputs_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let input = input_element_type(node, 0, params);
        let weight = input_element_type(node, W, params);
        match (input, weight) {
            (Some(input), Some(weight)) if input.is_quantized_8bit() && input == weight => true,
            (Some(input), Some(weight)) => {
                unsupported(node, format_args!("input type {input} with weight type {weight}"))
            }
            _ => unsupported(node, "input or weight type is unknown"),
        }
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        if let Err(reason) = quant_params(node, params) {
            return unsupported(node, reason);
        }
        match conv_params(node, params, W, BIAS) {
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
        let quant =
            quant_params(node, params).map_err(|reason| LoweringError::builder(node, reason))?;
        let conv = conv_params(node, params, W, BIAS)
            .map_err(|reason| LoweringError::builder(node, reason))?;
        let op = XnnOperator::QuantizedConvolution2d { conv, quant };
        let xnn_node = model.node_for(node, op, 1);
        model.append(xnn_node)
    }
}
