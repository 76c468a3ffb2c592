use opsig::builder::{LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::{auto_pad_supported, unsupported};

/// 1D and 2D convolution with weights baked into the layer.
pub struct ConvOpBuilder;

impl OpBuilder<MlModelBuilder> for ConvOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(weight) = node.input(1) else {
            return unsupported(node, "missing weight input");
        };
        let Some(init) = params.graph.initializer(&weight.name) else {
            return unsupported(node, "weight must be a constant initializer");
        };
        let spatial = match init.dims.len() {
            3 => 1,
            4 => 2,
            rank => return unsupported(node, format_args!("weight rank {rank}, only 1D/2D conv")),
        };

        if let Some(bias) = node.input(2) {
            if !params.is_constant(bias) {
                return unsupported(node, "bias must be a constant initializer");
            }
        }

        for (name, expected) in [
            ("strides", spatial),
            ("dilations", spatial),
            ("kernel_shape", spatial),
            ("pads", 2 * spatial),
        ] {
            if let Some(values) = node.attr_ints(name) {
                if values.len() != expected {
                    return unsupported(
                        node,
                        format_args!("{name} has {} values, expected {expected}", values.len()),
                    );
                }
            }
        }

        auto_pad_supported(node, params)
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let weight = node
            .input(1)
            .and_then(|arg| params.graph.initializer(&arg.name))
            .ok_or_else(|| LoweringError::MissingInitializer {
                node: node.describe(),
                index: 1,
            })?;
        let kernel_shape = weight.dims[2..].to_vec();
        let spatial = kernel_shape.len();
        let ints_or = |name: &str, default: i64, len: usize| {
            node.attr_ints(name)
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| vec![default; len])
        };

        let kind = LayerKind::Convolution {
            strides: ints_or("strides", 1, spatial),
            dilations: ints_or("dilations", 1, spatial),
            pads: ints_or("pads", 0, 2 * spatial),
            auto_pad: node.attr_string("auto_pad").unwrap_or("NOTSET").to_string(),
            group: node.attr_int_or("group", 1),
            has_bias: node.input(2).is_some(),
            expand_1d: spatial == 1,
            kernel_shape,
        };
        model.append(Layer::from_node(node, kind).with_data_inputs(1))
    }
}
