use anyhow::{anyhow, Result};
use opsig::backend::registry::erase_backend;
use opsig::builder::LoweringError;
use opsig::graph::{
    AttributeValue, Dimension, ElementType, Graph, GraphView, Initializer, Node, NodeArg,
    NodeIndex, Shape,
};
use opsig::op_id::{MS_DOMAIN, MS_INTERNAL_NHWC_DOMAIN};
use opsig::ExecutionBackend;
use opsig_backend_xnnpack::model::{Conv2dParams, Pool2dParams};
use opsig_backend_xnnpack::{SubgraphBuilder, XnnNode, XnnOperator, XnnpackBackend};

fn supported(graph: &Graph) -> bool {
    let node = graph.node(NodeIndex(0)).expect("graph has a node");
    XnnpackBackend::create().is_node_supported(graph, node)
}

fn compile(graph: &Graph) -> Result<Vec<XnnNode>, LoweringError> {
    let claimed: Vec<_> = (0..graph.nodes().len()).map(NodeIndex).collect();
    let compiled = erase_backend(XnnpackBackend::create()).compile(graph, &claimed)?;
    let model = compiled
        .downcast_ref::<SubgraphBuilder>()
        .expect("xnnpack compiles into a subgraph builder");
    Ok(model.nodes().to_vec())
}

fn lower(graph: &Graph) -> Result<XnnNode> {
    compile(graph)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no node appended"))
}

fn nhwc_input(channels: u64) -> NodeArg {
    NodeArg::tensor("x", ElementType::Float, &[1, 8, 8, channels])
}

fn conv_node(input: NodeArg) -> Node {
    Node::new("conv", "Conv", 11)
        .with_domain(MS_INTERNAL_NHWC_DOMAIN)
        .with_input(input)
        .with_input(NodeArg::new("w"))
        .with_input(NodeArg::new("b"))
        .with_output(NodeArg::new("y"))
}

fn conv_graph(weight_dims: Vec<u64>, node: Node) -> Graph {
    let count = weight_dims.iter().product::<u64>() as usize;
    let outputs = weight_dims[0] as usize;
    Graph::new()
        .with_initializer(Initializer::from_f32("w", weight_dims, &vec![0.1; count]))
        .with_initializer(Initializer::from_f32("b", vec![outputs as u64], &vec![0.0; outputs]))
        .with_node(node)
}

#[test]
fn conv_lowers_to_convolution_2d() -> Result<()> {
    let graph = conv_graph(vec![16, 3, 3, 3], conv_node(nhwc_input(3)));
    let node = lower(&graph)?;
    assert_eq!(
        node.op,
        XnnOperator::Convolution2d(Conv2dParams {
            kernel: [3, 3],
            strides: [1, 1],
            dilations: [1, 1],
            pads: [0, 0, 0, 0],
            same_padding: false,
            groups: 1,
            group_input_channels: 3,
            group_output_channels: 16,
            has_bias: true,
        })
    );
    // Weights and bias are static parameters, not subgraph values.
    assert_eq!(node.inputs.as_slice(), &[0]);
    assert_eq!(node.outputs.as_slice(), &[1]);
    Ok(())
}

#[test]
fn depthwise_conv_with_explicit_geometry() -> Result<()> {
    let node = conv_node(nhwc_input(8))
        .with_attr("group", AttributeValue::Int(8))
        .with_attr("strides", AttributeValue::Ints(vec![2, 2]))
        .with_attr("pads", AttributeValue::Ints(vec![1, 0, 1, 2]));
    let lowered = lower(&conv_graph(vec![8, 1, 3, 3], node))?;
    let XnnOperator::Convolution2d(conv) = lowered.op else {
        return Err(anyhow!("unexpected operator {:?}", lowered.op));
    };
    assert_eq!(conv.groups, 8);
    assert_eq!(conv.group_input_channels, 1);
    assert_eq!(conv.group_output_channels, 1);
    assert_eq!(conv.strides, [2, 2]);
    assert_eq!(conv.pads, [1, 0, 1, 2]);
    Ok(())
}

#[test]
fn conv_rejections() {
    // Channel count disagrees with the weight.
    assert!(!supported(&conv_graph(vec![16, 3, 3, 3], conv_node(nhwc_input(4)))));

    let dynamic_channels = NodeArg::new("x")
        .with_type(ElementType::Float)
        .with_shape(Shape::new(vec![
            Dimension::Static(1),
            Dimension::Static(8),
            Dimension::Static(8),
            Dimension::Dynamic("c".into()),
        ]));
    assert!(!supported(&conv_graph(vec![16, 3, 3, 3], conv_node(dynamic_channels))));

    let same_lower = conv_node(nhwc_input(3))
        .with_attr("auto_pad", AttributeValue::String("SAME_LOWER".into()));
    assert!(!supported(&conv_graph(vec![16, 3, 3, 3], same_lower)));

    let wrong_kernel = conv_node(nhwc_input(3))
        .with_attr("kernel_shape", AttributeValue::Ints(vec![5, 5]));
    assert!(!supported(&conv_graph(vec![16, 3, 3, 3], wrong_kernel)));

    let runtime_weight = Graph::new()
        .with_initializer(Initializer::from_f32("b", vec![16], &[0.0; 16]))
        .with_node(conv_node(nhwc_input(3)));
    assert!(!supported(&runtime_weight));
}

#[test]
fn conv_with_overflowing_dims_is_unsupported() {
    let huge_group = conv_node(nhwc_input(3)).with_attr("group", AttributeValue::Int(1 << 40));
    let graph = Graph::new()
        .with_initializer(Initializer::from_raw(
            "w",
            ElementType::Float,
            vec![1 << 40, 1 << 30, 1, 1],
            Vec::new(),
        ))
        .with_node(huge_group);
    assert!(!supported(&graph));

    let huge_bias = Graph::new()
        .with_initializer(Initializer::from_f32("w", vec![16, 3, 3, 3], &[0.1; 432]))
        .with_initializer(Initializer::from_raw(
            "b",
            ElementType::Float,
            vec![1 << 40, 1 << 40],
            Vec::new(),
        ))
        .with_node(conv_node(nhwc_input(3)));
    assert!(!supported(&huge_bias));
}

#[test]
fn same_upper_padding_is_deferred() -> Result<()> {
    let node = conv_node(nhwc_input(3))
        .with_attr("auto_pad", AttributeValue::String("SAME_UPPER".into()));
    let lowered = lower(&conv_graph(vec![16, 3, 3, 3], node))?;
    assert!(matches!(
        lowered.op,
        XnnOperator::Convolution2d(Conv2dParams {
            same_padding: true,
            pads: [0, 0, 0, 0],
            ..
        })
    ));
    Ok(())
}

fn pool(op_type: &str, domain: &str, element_type: ElementType) -> Node {
    Node::new("pool", op_type, 12)
        .with_domain(domain)
        .with_input(NodeArg::tensor("x", element_type, &[1, 8, 8, 3]))
        .with_output(NodeArg::new("y"))
        .with_attr("kernel_shape", AttributeValue::Ints(vec![2, 2]))
}

#[test]
fn max_pool_in_both_domains() -> Result<()> {
    let max = pool("MaxPool", MS_INTERNAL_NHWC_DOMAIN, ElementType::Float)
        .with_attr("strides", AttributeValue::Ints(vec![2, 2]))
        .with_attr("ceil_mode", AttributeValue::Int(1));
    let lowered = lower(&Graph::new().with_node(max))?;
    assert_eq!(
        lowered.op,
        XnnOperator::MaxPooling2d(Pool2dParams {
            kernel: [2, 2],
            strides: [2, 2],
            dilations: [1, 1],
            pads: [0, 0, 0, 0],
            same_padding: false,
            ceil_mode: true,
        })
    );

    let quantized = pool("MaxPool", MS_INTERNAL_NHWC_DOMAIN, ElementType::Uint8);
    assert!(supported(&Graph::new().with_node(quantized)));

    let nhwc_max_pool = pool("NhwcMaxPool", MS_DOMAIN, ElementType::Int8);
    assert!(matches!(
        lower(&Graph::new().with_node(nhwc_max_pool))?.op,
        XnnOperator::MaxPooling2d(_)
    ));
    let float_nhwc_max_pool = pool("NhwcMaxPool", MS_DOMAIN, ElementType::Float);
    assert!(!supported(&Graph::new().with_node(float_nhwc_max_pool)));

    // Not yet moved to NHWC by the layout rewrite.
    assert!(!supported(&Graph::new().with_node(pool("MaxPool", "", ElementType::Float))));
    Ok(())
}

#[test]
fn average_pool_restrictions() -> Result<()> {
    let average = || pool("AveragePool", MS_INTERNAL_NHWC_DOMAIN, ElementType::Float);
    assert!(matches!(
        lower(&Graph::new().with_node(average()))?.op,
        XnnOperator::AveragePooling2d(_)
    ));

    let quantized = pool("AveragePool", MS_INTERNAL_NHWC_DOMAIN, ElementType::Uint8);
    assert!(!supported(&Graph::new().with_node(quantized)));

    let ceil = average().with_attr("ceil_mode", AttributeValue::Int(1));
    assert!(!supported(&Graph::new().with_node(ceil)));

    let include_pad = average().with_attr("count_include_pad", AttributeValue::Int(1));
    assert!(supported(&Graph::new().with_node(include_pad.clone())));
    let padded = include_pad.with_attr("pads", AttributeValue::Ints(vec![1, 1, 1, 1]));
    assert!(!supported(&Graph::new().with_node(padded)));

    let no_kernel = Node::new("pool", "AveragePool", 12)
        .with_domain(MS_INTERNAL_NHWC_DOMAIN)
        .with_input(nhwc_input(3))
        .with_output(NodeArg::new("y"));
    assert!(!supported(&Graph::new().with_node(no_kernel)));
    Ok(())
}

fn softmax(version: u32, dims: &[u64], axis: Option<i64>) -> Graph {
    let mut node = Node::new("softmax", "Softmax", version)
        .with_input(NodeArg::tensor("x", ElementType::Float, dims))
        .with_output(NodeArg::new("y"));
    if let Some(axis) = axis {
        node = node.with_attr("axis", AttributeValue::Int(axis));
    }
    Graph::new().with_node(node)
}

#[test]
fn softmax_axis_must_be_last() {
    assert!(supported(&softmax(13, &[2, 3, 4], None)));
    // Legacy default axis 1 is the last axis only for rank 2.
    assert!(supported(&softmax(11, &[2, 10], None)));
    assert!(!supported(&softmax(11, &[2, 3, 4], None)));
    assert!(supported(&softmax(11, &[2, 3, 4], Some(2))));
    assert!(!supported(&softmax(13, &[2, 3, 4], Some(0))));
    // Opset range tops out at 13.
    assert!(!supported(&softmax(14, &[2, 10], None)));
}

struct QLinearConv {
    domain: &'static str,
    input_type: ElementType,
    weight_type: ElementType,
    weight_scales: Vec<f32>,
    weight_zero_point: u8,
    constant_output_scale: bool,
}

impl Default for QLinearConv {
    fn default() -> Self {
        Self {
            domain: MS_DOMAIN,
            input_type: ElementType::Uint8,
            weight_type: ElementType::Uint8,
            weight_scales: vec![0.05],
            weight_zero_point: 0,
            constant_output_scale: true,
        }
    }
}

impl QLinearConv {
    fn graph(&self) -> Graph {
        let byte = |name: &str, ty: ElementType, value: u8| {
            Initializer::from_raw(name, ty, vec![], vec![value])
        };
        let mut graph = Graph::new()
            .with_initializer(Initializer::from_f32("x_scale", vec![], &[0.02]))
            .with_initializer(byte("x_zero_point", self.input_type, 128))
            .with_initializer(Initializer::from_raw(
                "w",
                self.weight_type,
                vec![8, 3, 3, 3],
                vec![1u8; 216],
            ))
            .with_initializer(Initializer::from_f32(
                "w_scale",
                vec![self.weight_scales.len() as u64],
                &self.weight_scales,
            ))
            .with_initializer(byte("w_zero_point", self.weight_type, self.weight_zero_point))
            .with_initializer(byte("y_zero_point", self.input_type, 120))
            .with_initializer(Initializer::from_raw(
                "bias",
                ElementType::Int32,
                vec![8],
                vec![0u8; 32],
            ));
        if self.constant_output_scale {
            graph.add_initializer(Initializer::from_f32("y_scale", vec![], &[0.1]));
        }

        let inputs = [
            NodeArg::tensor("x", self.input_type, &[1, 8, 8, 3]),
            NodeArg::new("x_scale"),
            NodeArg::new("x_zero_point"),
            NodeArg::new("w"),
            NodeArg::new("w_scale"),
            NodeArg::new("w_zero_point"),
            NodeArg::tensor("y_scale", ElementType::Float, &[]),
            NodeArg::new("y_zero_point"),
            NodeArg::new("bias"),
        ];
        let mut node = Node::new("qconv", "QLinearConv", 1)
            .with_domain(self.domain)
            .with_output(NodeArg::tensor("y", self.input_type, &[1, 6, 6, 8]));
        for input in inputs {
            node = node.with_input(input);
        }
        graph.with_node(node)
    }
}

#[test]
fn qlinear_conv_lowers_with_constant_quantization() -> Result<()> {
    for domain in [MS_DOMAIN, MS_INTERNAL_NHWC_DOMAIN] {
        let graph = QLinearConv {
            domain,
            ..QLinearConv::default()
        }
        .graph();
        let lowered = lower(&graph)?;
        let XnnOperator::QuantizedConvolution2d { conv, quant } = lowered.op else {
            return Err(anyhow!("unexpected operator {:?}", lowered.op));
        };
        assert_eq!(conv.kernel, [3, 3]);
        assert_eq!(conv.group_output_channels, 8);
        assert!(conv.has_bias);
        assert_eq!(quant.element_type, ElementType::Uint8);
        assert_eq!(quant.input_scale, 0.02);
        assert_eq!(quant.input_zero_point, 128);
        assert_eq!(quant.weight_scales, vec![0.05]);
        assert_eq!(quant.output_scale, 0.1);
        assert_eq!(quant.output_zero_point, 120);
        assert_eq!(lowered.inputs.len(), 1);
    }
    Ok(())
}

#[test]
fn qlinear_conv_input_type_override() {
    let int8 = QLinearConv {
        input_type: ElementType::Int8,
        weight_type: ElementType::Int8,
        ..QLinearConv::default()
    };
    assert!(supported(&int8.graph()));

    let float = QLinearConv {
        input_type: ElementType::Float,
        ..QLinearConv::default()
    };
    assert!(!supported(&float.graph()));

    let mixed = QLinearConv {
        weight_type: ElementType::Int8,
        ..QLinearConv::default()
    };
    assert!(!supported(&mixed.graph()));
}

#[test]
fn qlinear_conv_quantization_params() -> Result<()> {
    let runtime_scale = QLinearConv {
        constant_output_scale: false,
        ..QLinearConv::default()
    };
    assert!(!supported(&runtime_scale.graph()));

    let per_channel = |ty: ElementType| QLinearConv {
        input_type: ty,
        weight_type: ty,
        weight_scales: vec![0.05; 8],
        ..QLinearConv::default()
    };
    assert!(supported(&per_channel(ElementType::Int8).graph()));
    assert!(!supported(&per_channel(ElementType::Uint8).graph()));

    let asymmetric_int8 = QLinearConv {
        input_type: ElementType::Int8,
        weight_type: ElementType::Int8,
        weight_zero_point: 0xff,
        ..QLinearConv::default()
    };
    assert!(!supported(&asymmetric_int8.graph()));

    let asymmetric_uint8 = QLinearConv {
        weight_zero_point: 3,
        ..QLinearConv::default()
    };
    let lowered = lower(&asymmetric_uint8.graph())?;
    assert!(matches!(
        lowered.op,
        XnnOperator::QuantizedConvolution2d { ref quant, .. } if quant.weight_zero_point == 3
    ));
    Ok(())
}

#[test]
fn subgraph_values_connect_nodes() -> Result<()> {
    let graph = conv_graph(vec![4, 3, 1, 1], conv_node(nhwc_input(3))).with_node(
        Node::new("softmax", "Softmax", 13)
            .with_input(NodeArg::tensor("y", ElementType::Float, &[1, 8, 8, 4]))
            .with_output(NodeArg::new("probs")),
    );
    let nodes = compile(&graph)?;
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].outputs, nodes[1].inputs);
    assert_eq!(nodes[1].outputs.as_slice(), &[2]);
    Ok(())
}

#[test]
fn value_with_two_producers_is_rejected() {
    let writer = |name: &str| {
        Node::new(name, "Softmax", 13)
            .with_input(NodeArg::tensor(format!("{name}_in"), ElementType::Float, &[1, 4]))
            .with_output(NodeArg::new("shared"))
    };
    let graph = Graph::new().with_node(writer("a")).with_node(writer("b"));
    assert!(matches!(
        compile(&graph),
        Err(LoweringError::Builder { .. })
    ));
}
