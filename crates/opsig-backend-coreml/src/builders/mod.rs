//! Op builders for the CoreML backend, one per operator family.

mod activation;
mod binary;
mod clip;
mod concat;
mod conv;
mod gemm;
mod pool;
mod reshape;
mod softmax;
mod squeeze;
mod transpose;

use std::fmt;
use std::sync::Arc;

use opsig::builder::{OpBuilderInputParams, OpBuilderRegistry};
use opsig::graph::{Node, Shape};
use opsig::op_id::ONNX_DOMAIN;

use crate::model::MlModelBuilder;

pub use activation::ActivationOpBuilder;
pub use binary::BinaryOpBuilder;
pub use clip::ClipOpBuilder;
pub use concat::ConcatOpBuilder;
pub use conv::ConvOpBuilder;
pub use gemm::GemmOpBuilder;
pub use pool::PoolOpBuilder;
pub use reshape::ReshapeOpBuilder;
pub use softmax::SoftmaxOpBuilder;
pub use squeeze::SqueezeOpBuilder;
pub use transpose::TransposeOpBuilder;

pub fn register_all(registry: &mut OpBuilderRegistry<MlModelBuilder>) {
    registry.register_shared(
        ONNX_DOMAIN,
        &["Relu", "Sigmoid", "Tanh", "LeakyRelu", "PRelu"],
        Arc::new(ActivationOpBuilder),
    );
    registry.register_shared(
        ONNX_DOMAIN,
        &["Add", "Sub", "Mul", "Div"],
        Arc::new(BinaryOpBuilder),
    );
    registry.register(ONNX_DOMAIN, "Conv", ConvOpBuilder);
    registry.register_shared(ONNX_DOMAIN, &["Gemm", "MatMul"], Arc::new(GemmOpBuilder));
    registry.register_shared(
        ONNX_DOMAIN,
        &["AveragePool", "MaxPool", "GlobalAveragePool", "GlobalMaxPool"],
        Arc::new(PoolOpBuilder),
    );
    registry.register(ONNX_DOMAIN, "Reshape", ReshapeOpBuilder);
    registry.register(ONNX_DOMAIN, "Transpose", TransposeOpBuilder);
    registry.register_shared(
        ONNX_DOMAIN,
        &["Squeeze", "Unsqueeze"],
        Arc::new(SqueezeOpBuilder),
    );
    registry.register(ONNX_DOMAIN, "Softmax", SoftmaxOpBuilder);
    registry.register(ONNX_DOMAIN, "Concat", ConcatOpBuilder);
    registry.register(ONNX_DOMAIN, "Clip", ClipOpBuilder);
}

/// Logs why `node` was rejected and returns `false`.
pub(crate) fn unsupported(node: &Node, reason: impl fmt::Display) -> bool {
    tracing::debug!(
        node = %node.name,
        op_type = %node.op_type,
        reason = %reason,
        "op not supported by coreml"
    );
    false
}

pub(crate) fn input_shape(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<Shape> {
    node.input(index).and_then(|arg| params.shape(arg))
}

pub(crate) fn input_rank(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<usize> {
    input_shape(node, index, params).map(|shape| shape.rank())
}

/// `auto_pad` values a layer-based model can express.
pub(crate) fn auto_pad_supported(node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
    match node.attr_string("auto_pad").unwrap_or("NOTSET") {
        "NOTSET" | "VALID" | "SAME_UPPER" => true,
        "SAME_LOWER" if params.config.create_ml_program => true,
        other => unsupported(node, format_args!("auto_pad {other}")),
    }
}
