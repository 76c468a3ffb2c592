//! CoreML execution backend: NCHW neural-network layers built from graph nodes.

pub mod builders;
pub mod model;

use opsig::backend::registry::register_execution_backend;
use opsig::backend::ExecutionBackend;
use opsig::builder::{BuilderConfig, OpBuilderRegistry, TensorLayout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use model::{Layer, LayerKind, MlModelBuilder};

/// Highest tensor rank the layer-based format handles.
pub const COREML_MAX_RANK: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreMlConfig {
    pub require_static_input_shapes: bool,
    pub create_ml_program: bool,
    pub max_rank: usize,
}

impl Default for CoreMlConfig {
    fn default() -> Self {
        Self {
            require_static_input_shapes: false,
            create_ml_program: false,
            max_rank: COREML_MAX_RANK,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CoreML config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("max_rank must be between 1 and {COREML_MAX_RANK}, got {0}")]
    MaxRank(usize),
}

impl CoreMlConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rank == 0 || self.max_rank > COREML_MAX_RANK {
            return Err(ConfigError::MaxRank(self.max_rank));
        }
        Ok(())
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            preferred_layout: TensorLayout::Nchw,
            require_static_input_shapes: self.require_static_input_shapes,
            create_ml_program: self.create_ml_program,
            max_rank: self.max_rank,
        }
    }
}

pub struct CoreMlBackend {
    config: BuilderConfig,
    builders: OpBuilderRegistry<MlModelBuilder>,
}

impl CoreMlBackend {
    pub fn new(config: CoreMlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_builder_config(config.builder_config()))
    }

    /// Backend with the default configuration.
    pub fn create() -> Self {
        Self::with_builder_config(CoreMlConfig::default().builder_config())
    }

    fn with_builder_config(config: BuilderConfig) -> Self {
        let mut builders = OpBuilderRegistry::new();
        builders::register_all(&mut builders);
        Self { config, builders }
    }
}

impl ExecutionBackend for CoreMlBackend {
    type Model = MlModelBuilder;

    fn backend_name(&self) -> &str {
        "coreml"
    }

    fn builder_config(&self) -> &BuilderConfig {
        &self.config
    }

    fn op_builders(&self) -> &OpBuilderRegistry<MlModelBuilder> {
        &self.builders
    }

    fn new_model_builder(&self) -> MlModelBuilder {
        MlModelBuilder::new(self.config.create_ml_program)
    }
}

/// Register the CoreML backend with the global backend registry.
///
/// Runs automatically through the registrar slice; calling it again replaces the entry.
pub fn register_coreml_backend() {
    register_execution_backend("coreml", CoreMlBackend::create);
}

#[opsig::linkme::distributed_slice(opsig::backend::registry::BACKEND_REGISTRARS)]
static REGISTER_COREML_BACKEND: fn() = register_coreml_backend;
