//! Op builders for the XNNPACK backend.

mod conv;
mod pool;
mod qlinear_conv;
mod softmax;

use std::fmt;
use std::sync::Arc;

use opsig::builder::{OpBuilder, OpBuilderInputParams, OpBuilderRegistry};
use opsig::graph::{Dimension, Node};
use opsig::op_id::{MS_DOMAIN, MS_INTERNAL_NHWC_DOMAIN, ONNX_DOMAIN};

use crate::model::{Conv2dParams, Pool2dParams, SubgraphBuilder};

pub use conv::ConvOpBuilder;
pub use pool::PoolOpBuilder;
pub use qlinear_conv::QLinearConvOpBuilder;
pub use softmax::SoftmaxOpBuilder;

pub fn register_all(registry: &mut OpBuilderRegistry<SubgraphBuilder>) {
    registry.register(MS_INTERNAL_NHWC_DOMAIN, "Conv", ConvOpBuilder);

    let pool: Arc<dyn OpBuilder<SubgraphBuilder>> = Arc::new(PoolOpBuilder);
    registry.register_shared(
        MS_INTERNAL_NHWC_DOMAIN,
        &["MaxPool", "AveragePool"],
        Arc::clone(&pool),
    );
    registry.register_shared(MS_DOMAIN, &["NhwcMaxPool"], pool);

    let qlinear_conv: Arc<dyn OpBuilder<SubgraphBuilder>> = Arc::new(QLinearConvOpBuilder);
    registry.register_shared(MS_DOMAIN, &["QLinearConv"], Arc::clone(&qlinear_conv));
    registry.register_shared(MS_INTERNAL_NHWC_DOMAIN, &["QLinearConv"], qlinear_conv);

    registry.register(ONNX_DOMAIN, "Softmax", SoftmaxOpBuilder);
}

/// Logs why `node` was rejected and returns `false`.
pub(crate) fn unsupported(node: &Node, reason: impl fmt::Display) -> bool {
    tracing::debug!(
        node = %node.name,
        op_type = %node.op_type,
        reason = %reason,
        "op not supported by xnnpack"
    );
    false
}

fn to_u32(value: i64, what: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{what} value {value} out of range"))
}

fn dim_to_u32(value: u64, what: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{what} value {value} out of range"))
}

/// `[h, w]` attribute with positive entries.
fn pair_attr(node: &Node, name: &str) -> Result<Option<[u32; 2]>, String> {
    let Some(values) = node.attr_ints(name) else {
        return Ok(None);
    };
    match values {
        [h, w] if *h > 0 && *w > 0 => Ok(Some([to_u32(*h, name)?, to_u32(*w, name)?])),
        _ => Err(format!("{name} must hold 2 positive values, got {values:?}")),
    }
}

/// Explicit pads as `[top, left, bottom, right]` and whether `SAME_UPPER` padding applies.
fn padding(node: &Node) -> Result<([u32; 4], bool), String> {
    let same = match node.attr_string("auto_pad").unwrap_or("NOTSET") {
        "NOTSET" | "VALID" => false,
        "SAME_UPPER" => true,
        other => return Err(format!("auto_pad {other}")),
    };
    let Some(values) = node.attr_ints("pads") else {
        return Ok(([0; 4], same));
    };
    if values.len() != 4 {
        return Err(format!("pads must hold 4 values, got {}", values.len()));
    }
    if same && values.iter().any(|&pad| pad != 0) {
        return Err("explicit pads with SAME_UPPER".into());
    }
    // ONNX orders pads as [h_begin, w_begin, h_end, w_end].
    let mut pads = [0; 4];
    for (slot, &pad) in pads.iter_mut().zip(values) {
        *slot = to_u32(pad, "pads")?;
    }
    Ok((pads, same))
}

/// Channel count of an NHWC input with a static last dimension.
fn nhwc_channels(node: &Node, params: &OpBuilderInputParams<'_>) -> Result<u64, String> {
    let shape = node
        .input(0)
        .and_then(|arg| params.shape(arg))
        .ok_or("input shape is unknown")?;
    if shape.rank() != 4 {
        return Err(format!("input rank {}, expected NHWC rank 4", shape.rank()));
    }
    match &shape.dims()[3] {
        Dimension::Static(channels) => Ok(*channels),
        Dimension::Dynamic(name) => Err(format!("channel dimension '{name}' is not static")),
    }
}

/// Convolution geometry for the weight at `weight_index` (OIHW) and optional bias at `bias_index`.
pub(crate) fn conv_params(
    node: &Node,
    params: &OpBuilderInputParams<'_>,
    weight_index: usize,
    bias_index: usize,
) -> Result<Conv2dParams, String> {
    let channels = nhwc_channels(node, params)?;
    let weight = node
        .input(weight_index)
        .and_then(|arg| params.graph.initializer(&arg.name))
        .ok_or("weight must be a constant initializer")?;
    let &[output_channels, group_input_channels, kh, kw] = weight.dims.as_slice() else {
        return Err(format!("weight rank {}, expected 4", weight.dims.len()));
    };

    let groups = node.attr_int_or("group", 1);
    if groups <= 0 {
        return Err(format!("group {groups}"));
    }
    let groups = groups as u64;
    if group_input_channels.checked_mul(groups) != Some(channels) {
        return Err(format!(
            "input has {channels} channels, weight expects {group_input_channels} x {groups}"
        ));
    }
    if output_channels % groups != 0 {
        return Err(format!("{output_channels} output channels not divisible by group {groups}"));
    }

    let kernel = [dim_to_u32(kh, "kernel")?, dim_to_u32(kw, "kernel")?];
    if let Some(declared) = pair_attr(node, "kernel_shape")? {
        if declared != kernel {
            return Err(format!("kernel_shape {declared:?} disagrees with weight {kernel:?}"));
        }
    }

    let has_bias = match node.input(bias_index) {
        None => false,
        Some(bias) => {
            let init = params
                .graph
                .initializer(&bias.name)
                .ok_or("bias must be a constant initializer")?;
            if init.element_count() != Some(output_channels) {
                return Err(format!(
                    "bias has dims {:?}, expected {output_channels} values",
                    init.dims
                ));
            }
            true
        }
    };

    let (pads, same_padding) = padding(node)?;
    Ok(Conv2dParams {
        kernel,
        strides: pair_attr(node, "strides")?.unwrap_or([1, 1]),
        dilations: pair_attr(node, "dilations")?.unwrap_or([1, 1]),
        pads,
        same_padding,
        groups: dim_to_u32(groups, "group")?,
        group_input_channels: dim_to_u32(group_input_channels, "weight")?,
        group_output_channels: dim_to_u32(output_channels / groups, "weight")?,
        has_bias,
    })
}

/// Pooling geometry shared by max and average pooling.
pub(crate) fn pool_params(
    node: &Node,
    params: &OpBuilderInputParams<'_>,
) -> Result<Pool2dParams, String> {
    nhwc_channels(node, params)?;
    let kernel = pair_attr(node, "kernel_shape")?.ok_or("kernel_shape is required")?;
    if node.output(1).is_some() {
        return Err("argmax indices output".into());
    }
    if node.attr_int_or("storage_order", 0) != 0 {
        return Err("column-major storage_order".into());
    }
    let (pads, same_padding) = padding(node)?;
    Ok(Pool2dParams {
        kernel,
        strides: pair_attr(node, "strides")?.unwrap_or([1, 1]),
        dilations: pair_attr(node, "dilations")?.unwrap_or([1, 1]),
        pads,
        same_padding,
        ceil_mode: node.attr_int_or("ceil_mode", 0) != 0,
    })
}
