//! Tensor metadata and the host tensor handle.

mod dtype;
mod element;
mod host;
mod shape;

use serde::{Deserialize, Serialize};

pub use dtype::{ByteOrder, DType};
pub use element::Element;
pub use host::{compute_strides, Tensor, TensorData, TensorError};
pub use shape::{broadcast_dims, normalize_axis, Shape, UNKNOWN_DIM};

/// Declared element type and shape of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        TensorSpec {
            dtype,
            shape: shape.into(),
        }
    }

    /// Spec with concrete extents.
    pub fn concrete(dtype: DType, dims: &[usize]) -> Self {
        TensorSpec {
            dtype,
            shape: Shape::from_dims(dims),
        }
    }
}

impl std::fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}
