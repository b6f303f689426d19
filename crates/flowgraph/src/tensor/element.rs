//! Defines the scalar element trait implemented by host tensor storages.

use std::fmt;

use super::dtype::DType;
use super::host::TensorData;

/// Scalar element types a [`super::Tensor`] can store.
///
/// Each implementation pins its [`DType`] and knows how to project itself in and out of the
/// type-erased [`TensorData`] storage, which lets kernels and constructors run generically.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(values: Vec<Self>) -> TensorData;
    fn view(data: &TensorData) -> Option<&[Self]>;
    fn view_mut(data: &mut TensorData) -> Option<&mut [Self]>;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! numeric_element {
    ($ty:ty, $dtype:expr, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn wrap(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            fn view(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn view_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

numeric_element!(f32, DType::Float, F32);
numeric_element!(f64, DType::Double, F64);
numeric_element!(i32, DType::Int32, I32);
numeric_element!(i64, DType::Int64, I64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::Bool(values)
    }

    fn view(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::Bool(values) => Some(values),
            _ => None,
        }
    }

    fn view_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::Bool(values) => Some(values),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}
