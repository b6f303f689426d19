//! Dataflow graph engine: build typed computation graphs, execute pruned subgraphs against a
//! kernel backend, derive gradient graphs and persist graphs in a versioned binary format.

pub mod autodiff;
pub mod backend;
pub mod codec;
mod env;
pub mod graph;
mod hashing;
pub mod memory;
pub mod ops;
pub mod session;
pub mod tensor;
pub mod validation;

pub use autodiff::{build_gradient_graph, AutodiffBuilder, AutodiffError};
pub use backend::{BackendError, BackendResult, KernelBackend};
pub use codec::{CodecError, GraphCodec};
pub use graph::{Graph, GraphError, OpDef, OpId, Operation, VarId, Variable, VariableKind};
pub use ops::{OpArgs, OpKind, OpRegistry, OpType, PropertyValue};
pub use session::{Session, SessionConfig, SessionError, SessionPool};
pub use tensor::{ByteOrder, DType, Shape, Tensor, TensorSpec};
