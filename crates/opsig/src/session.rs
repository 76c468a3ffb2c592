//! Session-level construction of the type-signature table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env;
use crate::signature::{
    add_layout_rewrite_required_ops, load_from_buffer, BootstrapError, MergePolicy,
    TypeSignatureTable, VerificationError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Whether the layout rewrite will run, which requires the bootstrap signatures.
    pub run_layout_rewrite: bool,
    pub merge_policy: MergePolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            run_layout_rewrite: true,
            merge_policy: MergePolicy::Reject,
        }
    }
}

impl SessionOptions {
    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Layout rewrite setting after applying `OPSIG_DISABLE_LAYOUT_REWRITE`.
    pub fn layout_rewrite_enabled(&self) -> bool {
        self.run_layout_rewrite && !env::layout_rewrite_disabled()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session options: {0}")]
    Options(#[from] serde_json::Error),
    #[error("model type-signature metadata failed verification: {0}")]
    ModelMetadata(#[from] VerificationError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Builds the session's type-signature table.
///
/// The table is decoded from `model_metadata` when present, otherwise it starts empty. When the
/// layout rewrite will run, the bootstrap snapshot is merged in under `options.merge_policy`. The
/// returned table is frozen; share it across partitioning threads through the `Arc`.
pub fn initialize_signature_table(
    model_metadata: Option<&[u8]>,
    options: &SessionOptions,
) -> SessionResult<Arc<TypeSignatureTable>> {
    let mut table = match model_metadata {
        Some(bytes) => load_from_buffer(bytes)?,
        None => TypeSignatureTable::new(),
    };
    tracing::debug!(entries = table.len(), "loaded model type signatures");

    if options.layout_rewrite_enabled() {
        add_layout_rewrite_required_ops(&mut table, options.merge_policy)?;
    } else {
        tracing::debug!("layout rewrite disabled; skipping bootstrap signatures");
    }

    Ok(Arc::new(table))
}
