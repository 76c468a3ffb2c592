use opsig::builder::{LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::{Dimension, Node};

use crate::model::{ActivationKind, Layer, LayerKind, MlModelBuilder};

use super::{input_shape, unsupported};

const LEAKY_RELU_DEFAULT_ALPHA: f32 = 0.01;

/// Relu, Sigmoid, Tanh, LeakyRelu and PRelu.
pub struct ActivationOpBuilder;

impl ActivationOpBuilder {
    /// PRelu needs a constant slope that is either a scalar or one value per channel.
    fn is_prelu_supported(node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(slope) = node.input(1) else {
            return unsupported(node, "missing slope input");
        };
        let Some(init) = params.graph.initializer(&slope.name) else {
            return unsupported(node, "slope must be a constant initializer");
        };
        let Some(shape) = input_shape(node, 0, params) else {
            return unsupported(node, "input shape is unknown");
        };
        let rank = shape.rank();
        if !(3..=4).contains(&rank) {
            return unsupported(node, format_args!("input rank {rank}, expected 3 or 4"));
        }

        let Some(slope_count) = init.element_count() else {
            return unsupported(node, "slope element count overflows");
        };
        if slope_count == 1 {
            return true;
        }
        match &shape.dims()[rank - 3] {
            Dimension::Static(channels) if *channels == slope_count => true,
            _ => unsupported(node, "slope is neither scalar nor per-channel"),
        }
    }
}

impl OpBuilder<MlModelBuilder> for ActivationOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        node.op_type != "PRelu" || Self::is_prelu_supported(node, params)
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        _params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let (function, alpha) = match node.op_type.as_str() {
            "Relu" => (ActivationKind::Relu, None),
            "Sigmoid" => (ActivationKind::Sigmoid, None),
            "Tanh" => (ActivationKind::Tanh, None),
            "LeakyRelu" => (
                ActivationKind::LeakyRelu,
                Some(node.attr_float("alpha").unwrap_or(LEAKY_RELU_DEFAULT_ALPHA)),
            ),
            "PRelu" => (ActivationKind::PRelu, None),
            other => {
                return Err(LoweringError::builder(
                    node,
                    format!("unexpected activation {other}"),
                ))
            }
        };

        let mut layer = Layer::from_node(node, LayerKind::Activation { function, alpha });
        if function == ActivationKind::PRelu {
            layer = layer.with_data_inputs(1);
        }
        model.append(layer)
    }
}
