//! Checks of the resolver policy every backend shares, independent of the operator under test.
//!
//! Each check takes a backend and a reference graph whose first node the backend supports. The
//! first input of that node must be a float tensor.

use opsig::backend::registry::erase_backend;
use opsig::builder::{ModelBuilder, OpBuilderInputParams};
use opsig::graph::{ElementType, Graph, GraphView, Initializer, Node, NodeIndex};
use opsig::ExecutionBackend;

fn reference_node(graph: &Graph) -> &Node {
    graph
        .node(NodeIndex(0))
        .expect("reference graph must contain at least one node")
}

/// Copy of `graph` with its first node replaced by `edit(node)`.
pub fn with_reference_node(graph: &Graph, edit: impl FnOnce(&mut Node)) -> Graph {
    let mut rebuilt = Graph::new();
    for init in graph.initializers() {
        rebuilt.add_initializer(init.clone());
    }
    for input in graph.graph_inputs() {
        rebuilt.add_input(input.clone());
    }
    let mut edit = Some(edit);
    for node in graph.nodes() {
        let mut node = node.clone();
        if let Some(edit) = edit.take() {
            edit(&mut node);
        }
        rebuilt.add_node(node);
    }
    rebuilt
}

fn is_supported<B: ExecutionBackend>(backend: &B, graph: &Graph) -> bool {
    backend.is_node_supported(graph, reference_node(graph))
}

pub fn reference_node_is_supported<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    assert!(
        is_supported(backend, graph),
        "{} should support {}",
        backend.backend_name(),
        reference_node(graph).describe()
    );
}

pub fn reference_node_lowers<B: ExecutionBackend + 'static>(backend: B, graph: &Graph) {
    let erased = erase_backend(backend);
    let compiled = erased
        .compile(graph, &[NodeIndex(0)])
        .expect("reference node should lower");
    assert_eq!(compiled.nodes, vec![NodeIndex(0)]);
    let model = compiled
        .downcast_ref::<B::Model>()
        .expect("compiled model has the backend's builder type");
    assert!(!model.records().is_empty());
}

pub fn external_initializer_is_rejected<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    let node = reference_node(graph);
    let input = node.inputs[0].clone();
    let mut external = with_reference_node(graph, |_| {});
    external.add_initializer(Initializer::external(
        input.name.clone(),
        input.element_type.unwrap_or(ElementType::Float),
        input
            .shape
            .as_ref()
            .and_then(|shape| shape.static_dims())
            .unwrap_or_else(|| vec![1]),
    ));
    assert!(!is_supported(backend, &external));
}

pub fn opset_outside_range_is_rejected<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    for version in [0, 1000] {
        let edited = with_reference_node(graph, |node| node.since_version = version);
        assert!(
            !is_supported(backend, &edited),
            "since_version {version} should be rejected"
        );
    }
}

pub fn bool_input_is_rejected<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    let edited = with_reference_node(graph, |node| {
        node.inputs[0].element_type = Some(ElementType::Bool);
    });
    assert!(!is_supported(backend, &edited));
}

pub fn unregistered_operator_is_rejected<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    let edited = with_reference_node(graph, |node| node.op_type = "NotARealOp".to_string());
    assert!(!is_supported(backend, &edited));
}

pub fn lowering_guard_rejects_unsupported_node<B: ExecutionBackend>(backend: &B, graph: &Graph) {
    let edited = with_reference_node(graph, |node| node.since_version = 0);
    let node = reference_node(&edited);
    let builder = backend
        .op_builders()
        .for_node(node)
        .expect("reference operator is registered");
    let params = OpBuilderInputParams::new(&edited, backend.builder_config());
    let mut model = backend.new_model_builder();
    assert!(builder.add_to_model_builder(&mut model, node, &params).is_err());
    assert!(model.records().is_empty());
}
