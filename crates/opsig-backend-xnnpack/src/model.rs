//! XNNPACK subgraph under construction.
//!
//! Tensors are interned as numeric value ids the first time a node names them. Each value has at
//! most one producer.

use std::collections::HashMap;

use opsig::builder::{LoweringError, LoweringResult, ModelBuilder};
use opsig::graph::{ElementType, Node};
use smallvec::SmallVec;

pub type ValueId = u32;

pub type ValueIds = SmallVec<[ValueId; 4]>;

/// Geometry shared by float and quantized 2D convolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2dParams {
    pub kernel: [u32; 2],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    /// `[top, left, bottom, right]`.
    pub pads: [u32; 4],
    /// `SAME_UPPER` auto padding, resolved by XNNPACK at reshape time.
    pub same_padding: bool,
    pub groups: u32,
    pub group_input_channels: u32,
    pub group_output_channels: u32,
    pub has_bias: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool2dParams {
    pub kernel: [u32; 2],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub pads: [u32; 4],
    pub same_padding: bool,
    pub ceil_mode: bool,
}

/// Scales and zero points of a quantized convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantParams {
    pub element_type: ElementType,
    pub input_scale: f32,
    pub input_zero_point: i32,
    /// One value, or one per output channel.
    pub weight_scales: Vec<f32>,
    pub weight_zero_point: i32,
    pub output_scale: f32,
    pub output_zero_point: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XnnOperator {
    Convolution2d(Conv2dParams),
    QuantizedConvolution2d {
        conv: Conv2dParams,
        quant: QuantParams,
    },
    MaxPooling2d(Pool2dParams),
    AveragePooling2d(Pool2dParams),
    Softmax,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XnnNode {
    pub name: String,
    pub op: XnnOperator,
    pub inputs: ValueIds,
    pub outputs: ValueIds,
}

#[derive(Debug, Default)]
pub struct SubgraphBuilder {
    nodes: Vec<XnnNode>,
    values: HashMap<String, ValueId>,
    produced: Vec<bool>,
}

impl SubgraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the value named `name`, interning it on first use.
    pub fn value(&mut self, name: &str) -> ValueId {
        if let Some(&id) = self.values.get(name) {
            return id;
        }
        let id = self.produced.len() as ValueId;
        self.values.insert(name.to_string(), id);
        self.produced.push(false);
        id
    }

    pub fn value_id(&self, name: &str) -> Option<ValueId> {
        self.values.get(name).copied()
    }

    pub fn value_count(&self) -> usize {
        self.produced.len()
    }

    pub fn nodes(&self) -> &[XnnNode] {
        &self.nodes
    }

    /// Node for `op` wired to the first `data_inputs` inputs of `node` and all its outputs.
    ///
    /// Inputs past `data_inputs` are static parameters folded into `op`.
    pub fn node_for(&mut self, node: &Node, op: XnnOperator, data_inputs: usize) -> XnnNode {
        let inputs = node
            .inputs
            .iter()
            .take(data_inputs)
            .filter(|arg| arg.exists())
            .map(|arg| self.value(&arg.name))
            .collect();
        let outputs = node
            .outputs
            .iter()
            .filter(|arg| arg.exists())
            .map(|arg| self.value(&arg.name))
            .collect();
        XnnNode {
            name: node.name.clone(),
            op,
            inputs,
            outputs,
        }
    }
}

impl ModelBuilder for SubgraphBuilder {
    type Record = XnnNode;

    fn backend_name(&self) -> &str {
        "xnnpack"
    }

    fn append(&mut self, node: XnnNode) -> LoweringResult<()> {
        if node.outputs.is_empty() {
            return Err(LoweringError::Builder {
                node: node.name,
                message: "node has no outputs".to_string(),
            });
        }
        for &output in &node.outputs {
            match self.produced.get(output as usize) {
                None => {
                    return Err(LoweringError::Builder {
                        node: node.name,
                        message: format!("output value {output} was never defined"),
                    })
                }
                Some(true) => {
                    return Err(LoweringError::Builder {
                        node: node.name,
                        message: format!("value {output} already has a producer"),
                    })
                }
                Some(false) => {}
            }
        }
        for &output in &node.outputs {
            self.produced[output as usize] = true;
        }
        self.nodes.push(node);
        Ok(())
    }

    fn records(&self) -> &[XnnNode] {
        &self.nodes
    }
}
