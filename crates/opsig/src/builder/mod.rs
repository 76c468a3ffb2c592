//! Per-operator capability resolution and lowering.
//!
//! Every backend registers one [`OpBuilder`] per operator type. A builder answers whether a node
//! can run on its backend and, when it can, appends the lowered node to the backend's
//! [`ModelBuilder`]. The shared policy (input gating, external-initializer rejection, opset range,
//! re-validation before lowering) lives in the provided trait methods; concrete builders only
//! override the hooks they need.

mod registry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Dimension, ElementType, GraphView, Node, NodeArg, Shape};

pub use registry::OpBuilderRegistry;

/// Opset bounds used by builders that do not narrow them.
pub const DEFAULT_MIN_SUPPORTED_OPSET: u32 = 1;
pub const DEFAULT_MAX_SUPPORTED_OPSET: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

/// Backend build configuration visible to every builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub preferred_layout: TensorLayout,
    /// Reject inputs whose shape is unknown or has symbolic dimensions.
    pub require_static_input_shapes: bool,
    /// Target the ML-program model format instead of the layer-based one.
    pub create_ml_program: bool,
    /// Largest input rank the backend accepts. `0` disables the check.
    pub max_rank: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            preferred_layout: TensorLayout::Nchw,
            require_static_input_shapes: false,
            create_ml_program: false,
            max_rank: 0,
        }
    }
}

/// Read-only inputs to a single capability or lowering call.
#[derive(Clone, Copy)]
pub struct OpBuilderInputParams<'a> {
    pub graph: &'a dyn GraphView,
    pub config: &'a BuilderConfig,
}

impl<'a> OpBuilderInputParams<'a> {
    pub fn new(graph: &'a dyn GraphView, config: &'a BuilderConfig) -> Self {
        Self { graph, config }
    }

    /// Element type of `arg`, falling back to the initializer that backs it.
    pub fn element_type(&self, arg: &NodeArg) -> Option<ElementType> {
        arg.element_type
            .or_else(|| self.graph.initializer(&arg.name).map(|init| init.element_type))
    }

    /// Shape of `arg`, falling back to the dims of the initializer that backs it.
    pub fn shape(&self, arg: &NodeArg) -> Option<Shape> {
        arg.shape.clone().or_else(|| {
            self.graph
                .initializer(&arg.name)
                .map(|init| Shape::from_static(&init.dims))
        })
    }

    pub fn is_constant(&self, arg: &NodeArg) -> bool {
        arg.exists() && self.graph.is_constant_initializer(&arg.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("{node} is not supported by the {backend} backend")]
    Unsupported { node: String, backend: String },
    #[error("{node}: invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        node: String,
        name: String,
        reason: String,
    },
    #[error("{node}: input {index} must be a constant initializer")]
    MissingInitializer { node: String, index: usize },
    #[error("{node}: missing input {index}")]
    MissingInput { node: String, index: usize },
    #[error("{node}: model builder failure: {message}")]
    Builder { node: String, message: String },
    #[error("graph has no node at index {0}")]
    UnknownNode(usize),
}

impl LoweringError {
    pub fn invalid_attribute(node: &Node, name: &str, reason: impl Into<String>) -> Self {
        LoweringError::InvalidAttribute {
            node: node.describe(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn builder(node: &Node, message: impl Into<String>) -> Self {
        LoweringError::Builder {
            node: node.describe(),
            message: message.into(),
        }
    }
}

pub type LoweringResult<T> = Result<T, LoweringError>;

/// Backend-owned accumulator of lowered nodes.
pub trait ModelBuilder: Send + Sync + 'static {
    /// Native representation of one lowered node.
    type Record: std::fmt::Debug;

    fn backend_name(&self) -> &str;

    fn append(&mut self, record: Self::Record) -> LoweringResult<()>;

    fn records(&self) -> &[Self::Record];
}

/// Capability resolver and lowering step for one operator type on one backend.
///
/// Implementors override the hooks (`has_supported_inputs_impl`, the opset bounds,
/// `is_op_supported_impl`, `add_to_model_builder_impl`); `is_op_supported` and
/// `add_to_model_builder` drive the shared policy and are not meant to be overridden.
pub trait OpBuilder<M: ModelBuilder>: Send + Sync {
    /// Shape gate applied to every present input before the type hook runs.
    fn is_input_supported(
        &self,
        node: &Node,
        input: &NodeArg,
        params: &OpBuilderInputParams<'_>,
    ) -> bool {
        default_input_shape_supported(node, input, params)
    }

    /// Input element-type hook. The default accepts nodes whose first input is `float`.
    fn has_supported_inputs_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        input0_is_float(node, params)
    }

    fn min_supported_opset(&self, _node: &Node) -> u32 {
        DEFAULT_MIN_SUPPORTED_OPSET
    }

    fn max_supported_opset(&self, _node: &Node) -> u32 {
        DEFAULT_MAX_SUPPORTED_OPSET
    }

    /// Operator-specific checks on attributes, shapes and constant inputs.
    fn is_op_supported_impl(&self, _node: &Node, _params: &OpBuilderInputParams<'_>) -> bool {
        true
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut M,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()>;

    fn has_supported_inputs(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        for input in node.inputs.iter().filter(|arg| arg.exists()) {
            if !self.is_input_supported(node, input, params) {
                return false;
            }
        }
        self.has_supported_inputs_impl(node, params)
    }

    /// Whether `node` can be claimed by this backend.
    fn is_op_supported(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        if !self.has_supported_inputs(node, params) {
            return false;
        }

        if let Some(name) = external_initializer_input(node, params.graph) {
            tracing::debug!(
                node = %node.name,
                op_type = %node.op_type,
                initializer = name,
                "input is an initializer with external data; not supported"
            );
            return false;
        }

        let version = node.since_version;
        let min = self.min_supported_opset(node);
        let max = self.max_supported_opset(node);
        if version < min || version > max {
            tracing::debug!(
                node = %node.name,
                op_type = %node.op_type,
                version,
                min,
                max,
                "opset version outside supported range"
            );
            return false;
        }

        self.is_op_supported_impl(node, params)
    }

    /// Lowers `node` into `model`, re-checking support first.
    fn add_to_model_builder(
        &self,
        model: &mut M,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        if !self.is_op_supported(node, params) {
            return Err(LoweringError::Unsupported {
                node: node.describe(),
                backend: model.backend_name().to_string(),
            });
        }
        self.add_to_model_builder_impl(model, node, params)?;
        tracing::debug!(node = %node.name, op_type = %node.op_type, "lowered node");
        Ok(())
    }
}

/// Name of the first input of `node` backed by an initializer stored outside the model.
pub fn external_initializer_input<'a>(node: &'a Node, graph: &dyn GraphView) -> Option<&'a str> {
    node.inputs
        .iter()
        .filter(|arg| arg.exists())
        .find(|arg| {
            graph
                .initializer(&arg.name)
                .is_some_and(|init| init.is_external())
        })
        .map(|arg| arg.name.as_str())
}

pub fn has_external_initializer(node: &Node, graph: &dyn GraphView) -> bool {
    external_initializer_input(node, graph).is_some()
}

/// Element type of input `index`, if the input is present and its type is known.
pub fn input_element_type(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<ElementType> {
    node.input(index).and_then(|arg| params.element_type(arg))
}

pub fn input0_is_float(node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
    match input_element_type(node, 0, params) {
        Some(ElementType::Float) => true,
        Some(other) => {
            tracing::debug!(
                node = %node.name,
                op_type = %node.op_type,
                element_type = %other,
                "input 0 type is not supported"
            );
            false
        }
        None => {
            tracing::debug!(node = %node.name, op_type = %node.op_type, "input 0 type is unknown");
            false
        }
    }
}

/// Shape gate shared by all builders: rank limit, empty tensors, and the static-shape
/// requirement from the build configuration.
pub fn default_input_shape_supported(
    node: &Node,
    input: &NodeArg,
    params: &OpBuilderInputParams<'_>,
) -> bool {
    let Some(shape) = params.shape(input) else {
        if params.config.require_static_input_shapes {
            tracing::debug!(node = %node.name, input = %input.name, "input shape is unknown");
            return false;
        }
        return true;
    };

    if params.config.max_rank > 0 && shape.rank() > params.config.max_rank {
        tracing::debug!(
            node = %node.name,
            input = %input.name,
            rank = shape.rank(),
            max_rank = params.config.max_rank,
            "input rank exceeds backend limit"
        );
        return false;
    }

    for dim in shape.dims() {
        match dim {
            Dimension::Static(0) => {
                tracing::debug!(node = %node.name, input = %input.name, "empty input tensor");
                return false;
            }
            Dimension::Dynamic(_) if params.config.require_static_input_shapes => {
                tracing::debug!(node = %node.name, input = %input.name, "dynamic input shape");
                return false;
            }
            _ => {}
        }
    }
    true
}

/// Reads a constant `int64` input, e.g. a shape or axes tensor.
pub fn constant_int64_input(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<Vec<i64>> {
    let arg = node.input(index)?;
    params.graph.initializer(&arg.name)?.int64_data()
}

/// Reads a constant `float` input, e.g. a scale tensor.
pub fn constant_float_input(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<Vec<f32>> {
    let arg = node.input(index)?;
    params.graph.initializer(&arg.name)?.float_data()
}

/// Value of a constant single-element `float` input.
pub fn constant_float_scalar(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<f32> {
    match constant_float_input(node, index, params)?.as_slice() {
        [value] => Some(*value),
        _ => None,
    }
}

/// Static dims of input `index`, when fully known.
pub fn static_input_dims(
    node: &Node,
    index: usize,
    params: &OpBuilderInputParams<'_>,
) -> Option<Vec<u64>> {
    let arg = node.input(index)?;
    params.shape(arg)?.static_dims()
}

/// Normalizes a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

#[cfg(test)]
mod tests {
    use super::normalize_axis;

    #[test]
    fn normalizes_negative_axes() {
        assert_eq!(normalize_axis(-1, 4), Some(3));
        assert_eq!(normalize_axis(0, 4), Some(0));
        assert_eq!(normalize_axis(4, 4), None);
        assert_eq!(normalize_axis(-5, 4), None);
    }
}
