use opsig::builder::{
    static_input_dims, LoweringError, LoweringResult, ModelBuilder, OpBuilder,
    OpBuilderInputParams,
};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::{input_rank, unsupported};

/// Gemm, and MatMul as either an inner product (constant 2D B) or a batched matmul.
pub struct GemmOpBuilder;

/// Constant `[K, N]` (or `[N, K]` when transposed) weight of an inner product.
fn constant_weight_dims(
    node: &Node,
    params: &OpBuilderInputParams<'_>,
) -> Option<Vec<u64>> {
    let weight = node.input(1)?;
    let init = params.graph.initializer(&weight.name)?;
    (init.dims.len() == 2).then(|| init.dims.clone())
}

impl GemmOpBuilder {
    fn is_gemm_supported(node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match input_rank(node, 0, params) {
            Some(2) => {}
            Some(rank) => return unsupported(node, format_args!("A has rank {rank}, expected 2")),
            None => return unsupported(node, "shape of A is unknown"),
        }
        if node.attr_int_or("transA", 0) != 0 {
            return unsupported(node, "transA is not supported");
        }
        let Some(dims) = constant_weight_dims(node, params) else {
            return unsupported(node, "B must be a constant 2D initializer");
        };

        if let Some(bias) = node.input(2) {
            let Some(init) = params.graph.initializer(&bias.name) else {
                return unsupported(node, "C must be a constant initializer");
            };
            let outputs = if node.attr_int_or("transB", 0) != 0 {
                dims[0]
            } else {
                dims[1]
            };
            if init.element_count() != Some(outputs) {
                return unsupported(node, "C must hold one value per output channel");
            }
        }
        true
    }

    fn is_matmul_supported(node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let (Some(a_rank), Some(b_rank)) = (input_rank(node, 0, params), input_rank(node, 1, params))
        else {
            return unsupported(node, "input shapes are unknown");
        };
        if a_rank < 2 || b_rank < 2 {
            return unsupported(node, "1D matmul operands are not supported");
        }
        if b_rank == 2 && constant_weight_dims(node, params).is_some() {
            return true;
        }
        if a_rank != b_rank {
            return unsupported(
                node,
                format_args!("batched matmul needs equal ranks, got {a_rank} and {b_rank}"),
            );
        }
        true
    }
}

impl OpBuilder<MlModelBuilder> for GemmOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        match node.op_type.as_str() {
            "Gemm" => Self::is_gemm_supported(node, params),
            _ => Self::is_matmul_supported(node, params),
        }
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let is_gemm = node.op_type == "Gemm";
        let Some(dims) = constant_weight_dims(node, params) else {
            if is_gemm {
                return Err(LoweringError::MissingInitializer {
                    node: node.describe(),
                    index: 1,
                });
            }
            return model.append(Layer::from_node(node, LayerKind::BatchedMatMul));
        };

        let transpose_b = is_gemm && node.attr_int_or("transB", 0) != 0;
        let (input_channels, output_channels) = if transpose_b {
            (dims[1], dims[0])
        } else {
            (dims[0], dims[1])
        };
        if let Some(a_dims) = static_input_dims(node, 0, params) {
            if a_dims.last() != Some(&input_channels) {
                return Err(LoweringError::builder(
                    node,
                    format!("A inner dim {:?} does not match weight {input_channels}", a_dims.last()),
                ));
            }
        }

        let kind = LayerKind::InnerProduct {
            input_channels,
            output_channels,
            transpose_b,
            alpha: if is_gemm { node.attr_float("alpha").unwrap_or(1.0) } else { 1.0 },
            beta: if is_gemm { node.attr_float("beta").unwrap_or(1.0) } else { 0.0 },
            has_bias: is_gemm && node.input(2).is_some(),
        };
        model.append(Layer::from_node(node, kind).with_data_inputs(1))
    }
}
