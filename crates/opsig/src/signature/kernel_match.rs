//! Kernel selection against recorded type signatures.
//!
//! A kernel declares, per type parameter, the element types it accepts. Matching a node looks up
//! the argument positions bound to each parameter in the [`TypeSignatureTable`] and checks the
//! element types found at those positions.

use std::collections::BTreeMap;

use crate::graph::{ElementType, GraphView, Node, NodeArg};

use super::table::{ArgType, ResolveResult, TypeSignatureTable};

/// Allowed element types per type parameter of one kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelTypeConstraints {
    allowed: BTreeMap<String, Vec<ElementType>>,
}

impl KernelTypeConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, type_str: impl Into<String>, types: &[ElementType]) -> Self {
        self.allowed
            .entry(type_str.into())
            .or_default()
            .extend_from_slice(types);
        self
    }

    pub fn allowed(&self, type_str: &str) -> Option<&[ElementType]> {
        self.allowed.get(type_str).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ElementType])> {
        self.allowed
            .iter()
            .map(|(name, types)| (name.as_str(), types.as_slice()))
    }
}

fn arg_element_type(arg: &NodeArg, graph: &dyn GraphView) -> Option<ElementType> {
    arg.element_type
        .or_else(|| graph.initializer(&arg.name).map(|init| init.element_type))
}

/// Element types bound to `type_str` on `node`, in position order.
///
/// Omitted optional arguments are skipped. `None` stands for a present argument whose type is not
/// statically known.
pub fn bound_element_types(
    table: &TypeSignatureTable,
    node: &Node,
    graph: &dyn GraphView,
    type_str: &str,
) -> ResolveResult<Vec<Option<ElementType>>> {
    let positions = table.resolve_type_str(&node.op_id(), type_str)?;
    let mut bound = Vec::new();
    for position in positions {
        let args = match position.arg_type {
            ArgType::Input => &node.inputs,
            ArgType::Output => &node.outputs,
        };
        for (index, arg) in args.iter().enumerate() {
            if arg.exists() && position.covers(position.arg_type, index) {
                bound.push(arg_element_type(arg, graph));
            }
        }
    }
    Ok(bound)
}

/// Whether `node` can run on a kernel declaring `constraints`.
///
/// Every argument bound to one type parameter must carry the same, known element type, and that
/// type must be in the kernel's allowed list. Parameters the kernel leaves unconstrained are not
/// checked.
pub fn constraints_satisfied(
    table: &TypeSignatureTable,
    node: &Node,
    graph: &dyn GraphView,
    constraints: &KernelTypeConstraints,
) -> ResolveResult<bool> {
    for (type_str, allowed) in constraints.iter() {
        let bound = bound_element_types(table, node, graph, type_str)?;
        let mut resolved: Option<ElementType> = None;
        for element_type in bound {
            let Some(element_type) = element_type else {
                tracing::debug!(node = %node.name, type_str, "type parameter bound to an untyped argument");
                return Ok(false);
            };
            match resolved {
                Some(existing) if existing != element_type => {
                    tracing::debug!(
                        node = %node.name,
                        type_str,
                        %existing,
                        found = %element_type,
                        "arguments sharing a type parameter disagree"
                    );
                    return Ok(false);
                }
                _ => resolved = Some(element_type),
            }
        }
        if let Some(element_type) = resolved {
            if !allowed.contains(&element_type) {
                tracing::debug!(node = %node.name, type_str, %element_type, "element type not accepted by kernel");
                return Ok(false);
            }
        }
    }
    Ok(true)
}
