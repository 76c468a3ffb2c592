extern crate self as opsig;

pub use linkme;

pub mod backend;
pub mod builder;
mod env;
pub mod graph;
pub mod hashing;
pub mod op_id;
pub mod partition;
pub mod session;
pub mod signature;

pub use backend::ExecutionBackend;
pub use builder::{OpBuilder, OpBuilderInputParams};
pub use op_id::OpIdentifier;
pub use session::{initialize_signature_table, SessionOptions};
pub use signature::TypeSignatureTable;
