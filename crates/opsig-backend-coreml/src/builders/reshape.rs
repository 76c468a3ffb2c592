use opsig::builder::{
    constant_int64_input, static_input_dims, LoweringError, LoweringResult, ModelBuilder,
    OpBuilder, OpBuilderInputParams,
};
use opsig::graph::{Dimension, Node};

use crate::model::{Layer, LayerKind, MlModelBuilder};
use crate::COREML_MAX_RANK;

use super::{input_shape, unsupported};

/// Reshape to a constant target shape.
pub struct ReshapeOpBuilder;

impl OpBuilder<MlModelBuilder> for ReshapeOpBuilder {
    // The target shape became an input in opset 5.
    fn min_supported_opset(&self, _node: &Node) -> u32 {
        5
    }

    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(target) = constant_int64_input(node, 1, params) else {
            return unsupported(node, "shape must be a constant int64 initializer");
        };
        if target.is_empty() || target.len() > COREML_MAX_RANK {
            return unsupported(node, format_args!("target rank {}", target.len()));
        }
        if target.iter().filter(|&&dim| dim == -1).count() > 1 {
            return unsupported(node, "more than one inferred dimension");
        }
        if target.iter().any(|&dim| dim < -1) {
            return unsupported(node, "negative target dimension");
        }
        if !target.contains(&0) {
            return true;
        }
        if node.attr_int_or("allowzero", 0) != 0 {
            return unsupported(node, "allowzero with a zero target dimension");
        }

        // A zero copies the input extent at the same index, which must be known.
        let Some(shape) = input_shape(node, 0, params) else {
            return unsupported(node, "input shape is unknown");
        };
        for (index, &dim) in target.iter().enumerate() {
            if dim == 0 && !matches!(shape.dims().get(index), Some(Dimension::Static(_))) {
                return unsupported(node, format_args!("cannot copy input dim {index}"));
            }
        }
        true
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let mut target_shape =
            constant_int64_input(node, 1, params).ok_or_else(|| LoweringError::MissingInitializer {
                node: node.describe(),
                index: 1,
            })?;
        if target_shape.contains(&0) {
            let input_dims = input_shape(node, 0, params)
                .map(|shape| shape.dims().to_vec())
                .unwrap_or_default();
            for (index, dim) in target_shape.iter_mut().enumerate() {
                if *dim != 0 {
                    continue;
                }
                match input_dims.get(index).and_then(|extent| match extent {
                    Dimension::Static(extent) => i64::try_from(*extent).ok(),
                    Dimension::Dynamic(_) => None,
                }) {
                    Some(extent) => *dim = extent,
                    None => {
                        return Err(LoweringError::builder(
                            node,
                            format!("cannot resolve zero target dim {index}"),
                        ))
                    }
                }
            }
        }

        if let Some(input_dims) = static_input_dims(node, 0, params) {
            let known = target_shape
                .iter()
                .filter(|&&dim| dim > 0)
                .try_fold(1u64, |count, &dim| count.checked_mul(dim as u64));
            let total = input_dims
                .iter()
                .try_fold(1u64, |count, &dim| count.checked_mul(dim));
            let (Some(known), Some(total)) = (known, total) else {
                return Err(LoweringError::builder(node, "element count overflows"));
            };
            if !target_shape.contains(&-1) && known != total {
                return Err(LoweringError::builder(
                    node,
                    format!("cannot reshape {total} elements into {target_shape:?}"),
                ));
            }
        }

        model.append(Layer::from_node(node, LayerKind::Reshape { target_shape }).with_data_inputs(1))
    }
}
