use opsig::builder::{
    input_element_type, LoweringError, LoweringResult, ModelBuilder, OpBuilder,
    OpBuilderInputParams,
};
use opsig::graph::{ElementType, Node};

use crate::model::{BinaryKind, Layer, LayerKind, MlModelBuilder};

use super::unsupported;

/// Elementwise Add, Sub, Mul and Div with multidirectional broadcasting.
pub struct BinaryOpBuilder;

impl OpBuilder<MlModelBuilder> for BinaryOpBuilder {
    // Opset 7 replaced the legacy `broadcast`/`axis` attributes.
    fn min_supported_opset(&self, _node: &Node) -> u32 {
        7
    }

    /// Both operands must share one type, `float` or `int64`.
    fn has_supported_inputs_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let lhs = input_element_type(node, 0, params);
        let rhs = input_element_type(node, 1, params);
        match (lhs, rhs) {
            (Some(lhs), Some(rhs)) if lhs != rhs => {
                unsupported(node, format_args!("mismatched input types {lhs} and {rhs}"))
            }
            (Some(ElementType::Float | ElementType::Int64), Some(_)) => true,
            (Some(other), Some(_)) => unsupported(node, format_args!("input type {other}")),
            _ => unsupported(node, "input type is unknown"),
        }
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        _params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let kind = match node.op_type.as_str() {
            "Add" => BinaryKind::Add,
            "Sub" => BinaryKind::Sub,
            "Mul" => BinaryKind::Mul,
            "Div" => BinaryKind::Div,
            other => {
                return Err(LoweringError::builder(
                    node,
                    format!("unexpected binary op {other}"),
                ))
            }
        };
        model.append(Layer::from_node(node, LayerKind::Binary(kind)))
    }
}
