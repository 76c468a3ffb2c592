//! Type signatures for operators introduced by the layout rewrite.
//!
//! Builds without the full schema catalog cannot derive type signatures for nodes the layout
//! rewrite inserts after the model was loaded. The signatures of every operator that rewrite may
//! produce are therefore generated offline, embedded as a constant, and merged into the session
//! table before the rewrite runs.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::op_id::{OpIdentifier, OpIdentifierRef, MS_DOMAIN, ONNX_DOMAIN};

use super::bootstrap_bytes::LAYOUT_REWRITE_REQUIRED_OPS_SIGNATURE_BYTES;
use super::codec::{load_from_buffer, VerificationError};
use super::table::{MergeConflict, MergePolicy, TypeSignatureTable};

const fn onnx(op_type: &'static str, since_version: u32) -> OpIdentifierRef {
    OpIdentifierRef::new(ONNX_DOMAIN, op_type, since_version)
}

const fn ms(op_type: &'static str, since_version: u32) -> OpIdentifierRef {
    OpIdentifierRef::new(MS_DOMAIN, op_type, since_version)
}

/// Every operator revision the layout rewrite may add to a graph.
///
/// Keep in sync with the embedded snapshot; the bootstrap tests fail when the two diverge.
pub const LAYOUT_REWRITE_POTENTIALLY_ADDED_OPS: [OpIdentifierRef; 30] = [
    onnx("DequantizeLinear", 10),
    onnx("DequantizeLinear", 13),
    onnx("DequantizeLinear", 19),
    onnx("Gather", 1),
    onnx("Gather", 11),
    onnx("Gather", 13),
    onnx("Identity", 1),
    onnx("Identity", 13),
    onnx("Identity", 14),
    onnx("Identity", 16),
    onnx("Identity", 19),
    onnx("Identity", 21),
    onnx("QuantizeLinear", 10),
    onnx("QuantizeLinear", 13),
    onnx("QuantizeLinear", 19),
    onnx("Squeeze", 1),
    onnx("Squeeze", 11),
    onnx("Squeeze", 13),
    onnx("Squeeze", 21),
    onnx("Transpose", 1),
    onnx("Transpose", 13),
    onnx("Transpose", 21),
    onnx("Unsqueeze", 1),
    onnx("Unsqueeze", 11),
    onnx("Unsqueeze", 13),
    onnx("Unsqueeze", 21),
    ms("DequantizeLinear", 1),
    ms("NhwcMaxPool", 1),
    ms("QLinearConv", 1),
    ms("QuantizeLinear", 1),
];

pub fn required_operators_for_layout_rewrite() -> &'static [OpIdentifierRef] {
    &LAYOUT_REWRITE_POTENTIALLY_ADDED_OPS
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("embedded layout-rewrite signature snapshot is corrupt: {0}")]
    Snapshot(#[from] VerificationError),
    #[error(transparent)]
    Merge(#[from] MergeConflict),
}

/// Decodes the embedded snapshot.
///
/// A failure here means the build shipped a broken constant; callers propagate it instead of
/// continuing with a partial table.
pub fn load_bootstrap_snapshot() -> Result<TypeSignatureTable, BootstrapError> {
    Ok(load_from_buffer(LAYOUT_REWRITE_REQUIRED_OPS_SIGNATURE_BYTES)?)
}

/// Raw bytes of the embedded snapshot.
pub fn bootstrap_snapshot_bytes() -> &'static [u8] {
    LAYOUT_REWRITE_REQUIRED_OPS_SIGNATURE_BYTES
}

/// Merges the snapshot into `table`. Returns the number of identifiers added or replaced.
pub fn add_layout_rewrite_required_ops(
    table: &mut TypeSignatureTable,
    policy: MergePolicy,
) -> Result<usize, BootstrapError> {
    let snapshot = load_bootstrap_snapshot()?;
    let merged = table.merge_with_policy(snapshot, policy)?;
    tracing::debug!(
        merged,
        total = table.len(),
        "merged layout-rewrite type signatures"
    );
    Ok(merged)
}

/// Divergence between a snapshot and the required-operator enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "layout-rewrite snapshot is out of date (missing: [{}], unexpected: [{}]); regenerate it",
    join(.missing),
    join(.unexpected)
)]
pub struct ConsistencyError {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

fn join(ids: &[String]) -> String {
    ids.join(", ")
}

/// Checks that `snapshot` holds exactly the identifiers of
/// [`required_operators_for_layout_rewrite`].
pub fn check_bootstrap_consistency(snapshot: &TypeSignatureTable) -> Result<(), ConsistencyError> {
    let required: BTreeSet<String> = required_operators_for_layout_rewrite()
        .iter()
        .map(|id| id.to_string())
        .collect();
    let present: BTreeSet<String> = snapshot.identifiers().map(OpIdentifier::key).collect();

    let missing: Vec<String> = required.difference(&present).cloned().collect();
    let unexpected: Vec<String> = present.difference(&required).cloned().collect();
    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(ConsistencyError {
            missing,
            unexpected,
        })
    }
}
