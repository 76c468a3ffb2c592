//! XNNPACK execution backend.
//!
//! Claims nodes after the layout rewrite has moved convolutions and pooling into the internal
//! NHWC domain, plus the `com.microsoft` quantized operators that already run channels-last.

pub mod builders;
pub mod model;

use opsig::backend::registry::register_execution_backend;
use opsig::backend::ExecutionBackend;
use opsig::builder::{BuilderConfig, OpBuilderRegistry, TensorLayout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use model::{SubgraphBuilder, XnnNode, XnnOperator};

/// `XNN_MAX_TENSOR_DIMS`.
pub const XNNPACK_MAX_RANK: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XnnpackConfig {
    pub require_static_input_shapes: bool,
    pub max_rank: usize,
}

impl Default for XnnpackConfig {
    fn default() -> Self {
        Self {
            require_static_input_shapes: false,
            max_rank: XNNPACK_MAX_RANK,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid XNNPACK config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("max_rank must be between 1 and {XNNPACK_MAX_RANK}, got {0}")]
    MaxRank(usize),
}

impl XnnpackConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rank == 0 || self.max_rank > XNNPACK_MAX_RANK {
            return Err(ConfigError::MaxRank(self.max_rank));
        }
        Ok(())
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            preferred_layout: TensorLayout::Nhwc,
            require_static_input_shapes: self.require_static_input_shapes,
            create_ml_program: false,
            max_rank: self.max_rank,
        }
    }
}

pub struct XnnpackBackend {
    config: BuilderConfig,
    builders: OpBuilderRegistry<SubgraphBuilder>,
}

impl XnnpackBackend {
    pub fn new(config: XnnpackConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_builder_config(config.builder_config()))
    }

    /// Backend with the default configuration.
    pub fn create() -> Self {
        Self::with_builder_config(XnnpackConfig::default().builder_config())
    }

    fn with_builder_config(config: BuilderConfig) -> Self {
        let mut builders = OpBuilderRegistry::new();
        builders::register_all(&mut builders);
        Self { config, builders }
    }
}

impl ExecutionBackend for XnnpackBackend {
    type Model = SubgraphBuilder;

    fn backend_name(&self) -> &str {
        "xnnpack"
    }

    fn builder_config(&self) -> &BuilderConfig {
        &self.config
    }

    fn op_builders(&self) -> &OpBuilderRegistry<SubgraphBuilder> {
        &self.builders
    }

    fn new_model_builder(&self) -> SubgraphBuilder {
        SubgraphBuilder::new()
    }
}

/// Register the XNNPACK backend with the global backend registry.
pub fn register_xnnpack_backend() {
    register_execution_backend("xnnpack", XnnpackBackend::create);
}

#[opsig::linkme::distributed_slice(opsig::backend::registry::BACKEND_REGISTRARS)]
static REGISTER_XNNPACK_BACKEND: fn() = register_xnnpack_backend;
