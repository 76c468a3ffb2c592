use opsig::builder::{
    input_element_type, LoweringError, LoweringResult, ModelBuilder, OpBuilder,
    OpBuilderInputParams,
};
use opsig::graph::{ElementType, Node};

use crate::model::{SubgraphBuilder, XnnOperator};

use super::{pool_params, unsupported};

/// NHWC MaxPool and AveragePool, and the quantized `com.microsoft` NhwcMaxPool.
pub struct PoolOpBuilder;

fn is_max_pool(node: &Node) -> bool {
    node.op_type.ends_with("MaxPool")
}

impl OpBuilder<SubgraphBuilder> for PoolOpBuilder {
    /// Max pooling also runs on 8-bit tensors; NhwcMaxPool only on those.
    fn has_supported_inputs_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(element_type) = input_element_type(node, 0, params) else {
            return unsupported(node, "input 0 type is unknown");
        };
        let supported = match node.op_type.as_str() {
            "NhwcMaxPool" => element_type.is_quantized_8bit(),
            "MaxPool" => element_type == ElementType::Float || element_type.is_quantized_8bit(),
            _ => element_type == ElementType::Float,
        };
        supported || unsupported(node, format_args!("input type {element_type}"))
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let pool = match pool_params(node, params) {
            Ok(pool) => pool,
            Err(reason) => return unsupported(node, reason),
        };
        if is_max_pool(node) {
            return true;
        }
        if pool.dilations != [1, 1] {
            return unsupported(node, "dilated average pooling");
        }
        if pool.ceil_mode {
            return unsupported(node, "average pooling with ceil_mode");
        }
        let padded = pool.same_padding || pool.pads != [0; 4];
        if node.attr_int_or("count_include_pad", 0) != 0 && padded {
            return unsupported(node, "count_include_pad with padding");
        }
        true
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut SubgraphBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let pool =
            pool_params(node, params).map_err(|reason| LoweringError::builder(node, reason))?;
        let op = if is_max_pool(node) {
            XnnOperator::MaxPooling2d(pool)
        } else {
            XnnOperator::AveragePooling2d(pool)
        };
        let xnn_node = model.node_for(node, op, 1);
        model.append(xnn_node)
    }
}
