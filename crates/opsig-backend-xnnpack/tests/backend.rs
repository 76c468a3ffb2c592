use anyhow::Result;
use opsig::backend::registry::{create_backend, erase_backend, get_typed_backend, has_backend};
use opsig::builder::TensorLayout;
use opsig::graph::{ElementType, Graph, Initializer, Node, NodeArg, NodeIndex};
use opsig::op_id::MS_INTERNAL_NHWC_DOMAIN;
use opsig::partition::partition_graph;
use opsig::ExecutionBackend;
use opsig_backend_xnnpack::{
    register_xnnpack_backend, ConfigError, XnnpackBackend, XnnpackConfig, XNNPACK_MAX_RANK,
};

#[test]
fn config_from_json() -> Result<()> {
    let config = XnnpackConfig::from_json_str(r#"{"require_static_input_shapes": true}"#)?;
    assert!(config.require_static_input_shapes);
    assert_eq!(config.max_rank, XNNPACK_MAX_RANK);

    let builder = config.builder_config();
    assert_eq!(builder.preferred_layout, TensorLayout::Nhwc);
    assert!(!builder.create_ml_program);

    assert!(matches!(
        XnnpackConfig::from_json_str(r#"{"max_rank": 0}"#),
        Err(ConfigError::MaxRank(0))
    ));
    Ok(())
}

#[test]
fn constructor_rejects_out_of_range_rank() {
    let config = XnnpackConfig {
        max_rank: 0,
        ..XnnpackConfig::default()
    };
    assert!(matches!(XnnpackBackend::new(config), Err(ConfigError::MaxRank(0))));
    assert!(XnnpackBackend::new(XnnpackConfig::default()).is_ok());
}

#[test]
fn registered_by_name() {
    register_xnnpack_backend();
    assert!(has_backend("xnnpack"));

    let backend = create_backend("xnnpack").expect("xnnpack backend is registered");
    assert_eq!(backend.backend_name(), "xnnpack");
    let typed = get_typed_backend::<XnnpackBackend>(backend.as_ref()).expect("typed backend");
    assert_eq!(typed.builder_config().preferred_layout, TensorLayout::Nhwc);
}

#[test]
fn claims_only_rewritten_convolutions() {
    let conv = |name: &str, domain: &str| {
        Node::new(name, "Conv", 11)
            .with_domain(domain)
            .with_input(NodeArg::tensor("x", ElementType::Float, &[1, 8, 8, 3]))
            .with_input(NodeArg::new("w"))
            .with_output(NodeArg::new(format!("{name}_out")))
    };
    let graph = Graph::new()
        .with_initializer(Initializer::from_f32("w", vec![4, 3, 1, 1], &[1.0; 12]))
        .with_node(conv("nchw", ""))
        .with_node(conv("nhwc", MS_INTERNAL_NHWC_DOMAIN));

    let backend = erase_backend(XnnpackBackend::create());
    let partition = partition_graph(&graph, &[backend.as_ref()]);
    assert_eq!(partition.nodes_for("xnnpack"), vec![NodeIndex(1)]);
    assert_eq!(partition.default_nodes(), vec![NodeIndex(0)]);
}
