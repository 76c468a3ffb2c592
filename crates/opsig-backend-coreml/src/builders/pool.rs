use opsig::builder::{LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder, PoolKind};

use super::{auto_pad_supported, input_rank, unsupported};

/// 2D average/max pooling and their global variants.
pub struct PoolOpBuilder;

fn is_global(node: &Node) -> bool {
    node.op_type.starts_with("Global")
}

impl OpBuilder<MlModelBuilder> for PoolOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match input_rank(node, 0, params) {
            Some(4) => {}
            Some(rank) => return unsupported(node, format_args!("input rank {rank}, only 2D pooling")),
            None => return unsupported(node, "input shape is unknown"),
        }
        if is_global(node) {
            return true;
        }

        if node.output(1).is_some() {
            return unsupported(node, "argmax indices output");
        }
        match node.attr_ints("kernel_shape") {
            Some(kernel) if kernel.len() == 2 => {}
            _ => return unsupported(node, "kernel_shape must have 2 values"),
        }
        if node.attr_int_or("ceil_mode", 0) != 0 {
            return unsupported(node, "ceil_mode");
        }
        if node.attr_int_or("storage_order", 0) != 0 {
            return unsupported(node, "column-major storage_order");
        }
        if node
            .attr_ints("dilations")
            .is_some_and(|dilations| dilations.iter().any(|&d| d != 1))
        {
            return unsupported(node, "dilated pooling");
        }
        if node.attr_ints("pads").is_some_and(|pads| pads.len() != 4) {
            return unsupported(node, "pads must have 4 values");
        }
        auto_pad_supported(node, params)
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        _params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let kind = if node.op_type.ends_with("MaxPool") {
            PoolKind::Max
        } else {
            PoolKind::Average
        };
        let global = is_global(node);
        let layer = LayerKind::Pooling {
            kind,
            global,
            kernel_shape: node.attr_ints("kernel_shape").unwrap_or_default().to_vec(),
            strides: node
                .attr_ints("strides")
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| vec![1, 1]),
            pads: node
                .attr_ints("pads")
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| vec![0; 4]),
            count_include_pad: node.attr_int_or("count_include_pad", 0) != 0,
        };
        model.append(Layer::from_node(node, layer))
    }
}
