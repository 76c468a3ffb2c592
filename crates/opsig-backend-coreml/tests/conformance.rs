use opsig::graph::{ElementType, Graph, Node, NodeArg};
use opsig_backend_coreml::{CoreMlBackend, CoreMlConfig};

fn coreml_backend() -> CoreMlBackend {
    CoreMlBackend::new(CoreMlConfig::default()).expect("default config is valid")
}

fn reference_relu_graph() -> Graph {
    Graph::new().with_node(
        Node::new("relu", "Relu", 14)
            .with_input(NodeArg::tensor("x", ElementType::Float, &[1, 3, 8, 8]))
            .with_output(NodeArg::tensor("y", ElementType::Float, &[1, 3, 8, 8])),
    )
}

// Item paths inside the generated module resolve relative to it.
opsig_backend_tests::define_builder_tests!(
    coreml_conformance,
    super::coreml_backend,
    super::reference_relu_graph
);
