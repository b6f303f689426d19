//! Kernel backend seam: the half of the op dispatch table that actually computes values.

use std::fmt;

use crate::graph::Operation;
use crate::tensor::Tensor;

/// Errors surfaced by kernel execution.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Executes single operations on host tensors.
///
/// The session pre-allocates `outputs` from the memory manager with dims inferred from the
/// concrete inputs; a kernel must overwrite every element because recycled buffers carry
/// stale contents.
pub trait KernelBackend: Send + Sync {
    /// Returns a human-readable backend identifier.
    fn backend_name(&self) -> &str;

    fn execute(
        &self,
        op: &Operation,
        inputs: &[&Tensor],
        outputs: &mut [Tensor],
    ) -> BackendResult<()>;
}

impl<B: KernelBackend + ?Sized> KernelBackend for std::sync::Arc<B> {
    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }

    fn execute(
        &self,
        op: &Operation,
        inputs: &[&Tensor],
        outputs: &mut [Tensor],
    ) -> BackendResult<()> {
        (**self).execute(op, inputs, outputs)
    }
}
