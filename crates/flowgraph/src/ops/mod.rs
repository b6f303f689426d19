//! Operation kinds, their arguments and the dispatch registry.

mod args;
pub mod infer;
mod kind;
mod registry;

pub use args::{OpArgs, Properties, PropertyKind, PropertyValue};
pub use infer::{reduction_axes, split_sizes, InferInput};
pub use kind::{OpKind, OpType};
pub use registry::{OpDescriptor, OpRegistry, OpRegistryBuilder};
