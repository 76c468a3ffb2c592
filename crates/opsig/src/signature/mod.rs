//! Operator type signatures: the in-memory table, its binary codec, and the bootstrap snapshot
//! merged in for the layout rewrite.

pub mod bootstrap;
mod bootstrap_bytes;
pub mod codec;
pub mod kernel_match;
mod schema;
mod table;

pub use bootstrap::{
    add_layout_rewrite_required_ops, check_bootstrap_consistency, load_bootstrap_snapshot,
    required_operators_for_layout_rewrite, BootstrapError, ConsistencyError,
};
pub use codec::{
    has_file_identifier, load_from_buffer, save_to_buffer, EncodeError, VerificationError,
    VerificationResult, FILE_IDENTIFIER, FORMAT_VERSION,
};
pub use kernel_match::{bound_element_types, constraints_satisfied, KernelTypeConstraints};
pub use schema::{FormalParameter, FormalParameterOption, OpSchema};
pub use table::{
    ArgPosition, ArgPositions, ArgType, MergeConflict, MergePolicy, PositionAlreadyBound,
    ResolveError, ResolveResult, SignatureError, TypeConstraintGroups, TypeSignatureTable,
};
