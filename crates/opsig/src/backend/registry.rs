//! Runtime backend registry for selecting backends by name.
//!
//! Backend crates register a constructor either explicitly through [`register_backend`] or by
//! adding a function to [`BACKEND_REGISTRARS`], which runs the first time the registry is queried.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, RwLock};

use crate::builder::{LoweringError, LoweringResult, ModelBuilder, OpBuilderInputParams};
use crate::graph::{GraphView, NodeIndex};

use super::ExecutionBackend;

/// Functions that register backends, collected across crates at link time.
#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn()] = [..];

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Box<dyn ErasedBackend> + Send + Sync>;

/// Type-erased lowered model.
pub type CompiledHandle = Box<dyn Any + Send + Sync>;

/// Result of lowering a set of claimed nodes on one backend.
pub struct CompiledModel {
    pub backend: String,
    pub nodes: Vec<NodeIndex>,
    model: CompiledHandle,
}

impl CompiledModel {
    /// Recovers the backend's concrete model builder.
    pub fn downcast_ref<M: ModelBuilder>(&self) -> Option<&M> {
        self.model.downcast_ref::<M>()
    }
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("backend", &self.backend)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of an [`ExecutionBackend`].
pub trait ErasedBackend: Send + Sync {
    fn backend_name(&self) -> &str;

    /// Indices of the nodes this backend can run, in graph order.
    fn get_capability(&self, graph: &dyn GraphView) -> Vec<NodeIndex>;

    /// Lowers `nodes` in order; the first failure aborts the compilation.
    fn compile(&self, graph: &dyn GraphView, nodes: &[NodeIndex]) -> LoweringResult<CompiledModel>;

    fn clone_backend(&self) -> Box<dyn ErasedBackend>;

    fn as_any(&self) -> &dyn Any;
}

struct BackendWrapper<B: ExecutionBackend> {
    inner: Arc<B>,
}

impl<B: ExecutionBackend + 'static> ErasedBackend for BackendWrapper<B> {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn get_capability(&self, graph: &dyn GraphView) -> Vec<NodeIndex> {
        graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| self.inner.is_node_supported(graph, node))
            .map(|(index, _)| NodeIndex(index))
            .collect()
    }

    fn compile(&self, graph: &dyn GraphView, nodes: &[NodeIndex]) -> LoweringResult<CompiledModel> {
        let params = OpBuilderInputParams::new(graph, self.inner.builder_config());
        let mut model = self.inner.new_model_builder();
        for &index in nodes {
            let node = graph.node(index).ok_or(LoweringError::UnknownNode(index.0))?;
            let builder = self.inner.op_builders().for_node(node).ok_or_else(|| {
                LoweringError::Unsupported {
                    node: node.describe(),
                    backend: self.backend_name().to_string(),
                }
            })?;
            builder.add_to_model_builder(&mut model, node, &params)?;
        }
        tracing::debug!(
            backend = self.backend_name(),
            nodes = nodes.len(),
            "compiled partition"
        );
        Ok(CompiledModel {
            backend: self.backend_name().to_string(),
            nodes: nodes.to_vec(),
            model: Box::new(model),
        })
    }

    fn clone_backend(&self) -> Box<dyn ErasedBackend> {
        Box::new(BackendWrapper {
            inner: Arc::clone(&self.inner),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a concrete backend in its type-erased form.
pub fn erase_backend<B: ExecutionBackend + 'static>(backend: B) -> Box<dyn ErasedBackend> {
    Box::new(BackendWrapper {
        inner: Arc::new(backend),
    })
}

struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        self.backends
            .write()
            .expect("backend registry poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Box<dyn ErasedBackend>> {
        let registry = self.backends.read().expect("backend registry poisoned");
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .expect("backend registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

fn ensure_registrars_ran() {
    RUN_REGISTRARS.call_once(|| {
        for registrar in BACKEND_REGISTRARS.iter() {
            registrar();
        }
    });
}

/// Register a backend by name with a constructor function.
///
/// The constructor runs each time the backend is requested via [`create_backend`].
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Box<dyn ErasedBackend> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(backend = %name, "registering backend");
    global_registry().register(name, Box::new(constructor));
}

/// Register a concrete [`ExecutionBackend`] implementation.
pub fn register_execution_backend<B, F>(name: impl Into<String>, constructor: F)
where
    B: ExecutionBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    register_backend(name, move || erase_backend(constructor()));
}

/// Create a backend instance by name. Returns `None` if nothing is registered under `name`.
pub fn create_backend(name: &str) -> Option<Box<dyn ErasedBackend>> {
    ensure_registrars_ran();
    global_registry().create(name)
}

/// Registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    ensure_registrars_ran();
    global_registry().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    ensure_registrars_ran();
    global_registry().has_backend(name)
}

/// Recovers the concrete backend behind an erased handle.
pub fn get_typed_backend<B: ExecutionBackend + 'static>(
    backend: &dyn ErasedBackend,
) -> Option<Arc<B>> {
    backend
        .as_any()
        .downcast_ref::<BackendWrapper<B>>()
        .map(|wrapper| Arc::clone(&wrapper.inner))
}
