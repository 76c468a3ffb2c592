//! Layer-based CoreML model under construction.

use std::collections::HashSet;

use opsig::builder::{LoweringError, LoweringResult, ModelBuilder};
use opsig::graph::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu,
    PRelu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Average,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Activation {
        function: ActivationKind,
        alpha: Option<f32>,
    },
    Binary(BinaryKind),
    Convolution {
        kernel_shape: Vec<u64>,
        strides: Vec<i64>,
        dilations: Vec<i64>,
        pads: Vec<i64>,
        auto_pad: String,
        group: i64,
        has_bias: bool,
        /// 1D convolutions run as 2D with a unit height.
        expand_1d: bool,
    },
    InnerProduct {
        input_channels: u64,
        output_channels: u64,
        transpose_b: bool,
        alpha: f32,
        beta: f32,
        has_bias: bool,
    },
    BatchedMatMul,
    Pooling {
        kind: PoolKind,
        global: bool,
        kernel_shape: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
        count_include_pad: bool,
    },
    Reshape {
        target_shape: Vec<i64>,
    },
    Transpose {
        perm: Vec<usize>,
    },
    Squeeze {
        axes: Vec<usize>,
    },
    ExpandDims {
        axes: Vec<usize>,
    },
    Softmax {
        axis: usize,
    },
    Concat {
        axis: usize,
    },
    Clip {
        min: f32,
        max: f32,
    },
}

/// One lowered node.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Layer {
    /// Layer named after `node`, wired to its present inputs and outputs.
    pub fn from_node(node: &Node, kind: LayerKind) -> Self {
        Self {
            name: node.name.clone(),
            kind,
            inputs: node
                .inputs
                .iter()
                .filter(|arg| arg.exists())
                .map(|arg| arg.name.clone())
                .collect(),
            outputs: node
                .outputs
                .iter()
                .filter(|arg| arg.exists())
                .map(|arg| arg.name.clone())
                .collect(),
        }
    }

    /// Keeps only the first `count` inputs; the rest were folded into the layer as constants.
    pub fn with_data_inputs(mut self, count: usize) -> Self {
        self.inputs.truncate(count);
        self
    }
}

#[derive(Debug, Default)]
pub struct MlModelBuilder {
    ml_program: bool,
    layers: Vec<Layer>,
    names: HashSet<String>,
}

impl MlModelBuilder {
    pub fn new(ml_program: bool) -> Self {
        Self {
            ml_program,
            ..Self::default()
        }
    }

    pub fn is_ml_program(&self) -> bool {
        self.ml_program
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

impl ModelBuilder for MlModelBuilder {
    type Record = Layer;

    fn backend_name(&self) -> &str {
        "coreml"
    }

    fn append(&mut self, layer: Layer) -> LoweringResult<()> {
        if layer.outputs.is_empty() {
            return Err(LoweringError::Builder {
                node: layer.name,
                message: "layer has no outputs".to_string(),
            });
        }
        if !self.names.insert(layer.name.clone()) {
            return Err(LoweringError::Builder {
                node: layer.name,
                message: "duplicate layer name".to_string(),
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    fn records(&self) -> &[Layer] {
        &self.layers
    }
}
