pub mod conformance;

#[macro_export]
macro_rules! define_builder_tests {
    ($module:ident, $backend_ctor:expr, $reference_graph:expr) => {
        #[cfg(test)]
        mod $module {
            use $crate::conformance;

            macro_rules! conformance_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let backend = ($backend_ctor)();
                        let graph = ($reference_graph)();
                        conformance::$name(&backend, &graph);
                    }
                };
            }

            conformance_test!(reference_node_is_supported);
            conformance_test!(external_initializer_is_rejected);
            conformance_test!(opset_outside_range_is_rejected);
            conformance_test!(bool_input_is_rejected);
            conformance_test!(unregistered_operator_is_rejected);
            conformance_test!(lowering_guard_rejects_unsupported_node);

            #[test]
            fn reference_node_lowers() {
                let backend = ($backend_ctor)();
                let graph = ($reference_graph)();
                conformance::reference_node_lowers(backend, &graph);
            }
        }
    };
}
