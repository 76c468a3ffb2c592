use opsig::builder::{LoweringError, LoweringResult, ModelBuilder, OpBuilder, OpBuilderInputParams};
use opsig::graph::Node;

use crate::model::{Layer, LayerKind, MlModelBuilder};

use super::{input_rank, unsupported};

pub struct TransposeOpBuilder;

/// Permutation from the `perm` attribute, or the reversed axes when it is absent.
fn permutation(node: &Node, rank: usize) -> Option<Vec<usize>> {
    let Some(perm) = node.attr_ints("perm") else {
        return Some((0..rank).rev().collect());
    };
    if perm.len() != rank {
        return None;
    }
    let mut seen = vec![false; rank];
    let mut axes = Vec::with_capacity(rank);
    for &axis in perm {
        let axis = usize::try_from(axis).ok().filter(|&axis| axis < rank)?;
        if std::mem::replace(&mut seen[axis], true) {
            return None;
        }
        axes.push(axis);
    }
    Some(axes)
}

impl OpBuilder<MlModelBuilder> for TransposeOpBuilder {
    fn is_op_supported_impl(&self, node: &Node, params: &OpBuilderInputParams<'_>) -> bool {
        let Some(rank) = input_rank(node, 0, params) else {
            return unsupported(node, "input shape is unknown");
        };
        if permutation(node, rank).is_none() {
            return unsupported(node, "perm is not a permutation of the input axes");
        }
        true
    }

    fn add_to_model_builder_impl(
        &self,
        model: &mut MlModelBuilder,
        node: &Node,
        params: &OpBuilderInputParams<'_>,
    ) -> LoweringResult<()> {
        let perm = input_rank(node, 0, params)
            .and_then(|rank| permutation(node, rank))
            .ok_or_else(|| LoweringError::invalid_attribute(node, "perm", "not a permutation"))?;
        model.append(Layer::from_node(node, LayerKind::Transpose { perm }))
    }
}
