//! Host-backed tensor handle used for feeds, bound values, intermediates and session outputs.

use rand::Rng;
use thiserror::Error;

use super::dtype::{ByteOrder, DType};
use super::element::Element;
use super::shape::Shape;
use super::TensorSpec;

/// Failures raised while constructing or re-interpreting host tensors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("dtype {0} has no host storage")]
    UnsupportedDType(DType),
    #[error("tensor data length ({actual}) does not match dims {dims:?}")]
    LengthMismatch { dims: Vec<usize>, actual: usize },
    #[error("byte payload of {actual} bytes does not hold {expected} bytes of {dtype}")]
    ByteLength {
        dtype: DType,
        expected: usize,
        actual: usize,
    },
    #[error("dims {dims:?} overflow the addressable size")]
    Overflow { dims: Vec<usize> },
}

/// Typed contiguous storage behind a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
}

impl TensorData {
    fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::Float,
            TensorData::F64(_) => DType::Double,
            TensorData::I32(_) => DType::Int32,
            TensorData::I64(_) => DType::Int64,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    fn zeroed(dtype: DType, len: usize) -> Result<Self, TensorError> {
        Ok(match dtype {
            DType::Float => TensorData::F32(vec![0.0; len]),
            DType::Double => TensorData::F64(vec![0.0; len]),
            DType::Int32 => TensorData::I32(vec![0; len]),
            DType::Int64 => TensorData::I64(vec![0; len]),
            DType::Bool => TensorData::Bool(vec![false; len]),
            other => return Err(TensorError::UnsupportedDType(other)),
        })
    }
}

/// Dense row-major host tensor.
///
/// Handles are moved, never copied behind the caller's back; duplicating one requires an
/// explicit `clone()`. The byte order only affects [`Tensor::to_bytes`] and
/// [`Tensor::from_bytes`]; in-memory values are always native.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: Vec<usize>,
    order: ByteOrder,
    data: TensorData,
}

impl Tensor {
    /// Constructs a tensor from raw values, validating the length against `dims`.
    pub fn from_vec<T: Element>(dims: &[usize], values: Vec<T>) -> Result<Self, TensorError> {
        let expected: usize = dims.iter().product();
        if values.len() != expected {
            return Err(TensorError::LengthMismatch {
                dims: dims.to_vec(),
                actual: values.len(),
            });
        }
        Ok(Tensor {
            dims: dims.to_vec(),
            order: ByteOrder::default(),
            data: T::wrap(values),
        })
    }

    pub fn from_f32(dims: &[usize], values: Vec<f32>) -> Result<Self, TensorError> {
        Self::from_vec(dims, values)
    }

    pub fn from_f64(dims: &[usize], values: Vec<f64>) -> Result<Self, TensorError> {
        Self::from_vec(dims, values)
    }

    pub fn from_i64(dims: &[usize], values: Vec<i64>) -> Result<Self, TensorError> {
        Self::from_vec(dims, values)
    }

    /// Rank-0 tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        Tensor {
            dims: Vec::new(),
            order: ByteOrder::default(),
            data: T::wrap(vec![value]),
        }
    }

    /// Tensor of `dims` where every element equals `value`.
    pub fn filled<T: Element>(dims: &[usize], value: T) -> Self {
        let len = dims.iter().product();
        Tensor {
            dims: dims.to_vec(),
            order: ByteOrder::default(),
            data: T::wrap(vec![value; len]),
        }
    }

    pub fn zeros(dtype: DType, dims: &[usize]) -> Result<Self, TensorError> {
        let len = dims.iter().product();
        Ok(Tensor {
            dims: dims.to_vec(),
            order: ByteOrder::default(),
            data: TensorData::zeroed(dtype, len)?,
        })
    }

    pub fn ones(dtype: DType, dims: &[usize]) -> Result<Self, TensorError> {
        let mut tensor = Self::zeros(dtype, dims)?;
        tensor.fill(1.0);
        Ok(tensor)
    }

    /// Samples an `f32` tensor from `N(0, std^2)` using the Box-Muller transform.
    pub fn randn(dims: &[usize], std: f32, rng: &mut impl Rng) -> Self {
        let len: usize = dims.iter().product();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Tensor {
            dims: dims.to_vec(),
            order: ByteOrder::default(),
            data: TensorData::F32(values),
        }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        compute_strides(&self.dims)
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.dtype(), Shape::from_dims(&self.dims))
    }

    /// Number of payload bytes held by this tensor.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.dtype().size_in_bytes().unwrap_or(1)
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    /// Borrows the values as `T`, or `None` if the dtype differs.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.data)
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::view_mut(&mut self.data)
    }

    /// Widens every element to `f64`. Intended for comparisons and gradient checking.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            TensorData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::F64(v) => v.clone(),
            TensorData::I32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::Bool(v) => v.iter().map(|&x| x.to_f64()).collect(),
        }
    }

    /// Overwrites every element with `value` converted to the tensor's dtype.
    pub fn fill(&mut self, value: f64) {
        match &mut self.data {
            TensorData::F32(v) => v.fill(value as f32),
            TensorData::F64(v) => v.fill(value),
            TensorData::I32(v) => v.fill(value as i32),
            TensorData::I64(v) => v.fill(value as i64),
            TensorData::Bool(v) => v.fill(value != 0.0),
        }
    }

    /// Reads element `index` (flat, row-major) as `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match &self.data {
            TensorData::F32(v) => v.get(index).map(|&x| x as f64),
            TensorData::F64(v) => v.get(index).copied(),
            TensorData::I32(v) => v.get(index).map(|&x| x as f64),
            TensorData::I64(v) => v.get(index).map(|&x| x as f64),
            TensorData::Bool(v) => v.get(index).map(|&x| x.to_f64()),
        }
    }

    /// Writes element `index` (flat, row-major) from an `f64`. Returns false when out of range.
    pub fn set_f64(&mut self, index: usize, value: f64) -> bool {
        macro_rules! store {
            ($v:expr, $conv:expr) => {
                match $v.get_mut(index) {
                    Some(slot) => {
                        *slot = $conv;
                        true
                    }
                    None => false,
                }
            };
        }
        match &mut self.data {
            TensorData::F32(v) => store!(v, value as f32),
            TensorData::F64(v) => store!(v, value),
            TensorData::I32(v) => store!(v, value as i32),
            TensorData::I64(v) => store!(v, value as i64),
            TensorData::Bool(v) => store!(v, value != 0.0),
        }
    }

    /// Changes the element type, converting every value through `f64`.
    pub fn cast(&self, dtype: DType) -> Result<Tensor, TensorError> {
        let mut out = Tensor::zeros(dtype, &self.dims)?;
        for (index, value) in self.to_f64_vec().into_iter().enumerate() {
            out.set_f64(index, value);
        }
        out.order = self.order;
        Ok(out)
    }

    /// Serializes the payload in this tensor's byte order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size_in_bytes());
        macro_rules! put {
            ($values:expr) => {
                for value in $values {
                    match self.order {
                        ByteOrder::LittleEndian => bytes.extend_from_slice(&value.to_le_bytes()),
                        ByteOrder::BigEndian => bytes.extend_from_slice(&value.to_be_bytes()),
                    }
                }
            };
        }
        match &self.data {
            TensorData::F32(v) => put!(v),
            TensorData::F64(v) => put!(v),
            TensorData::I32(v) => put!(v),
            TensorData::I64(v) => put!(v),
            TensorData::Bool(v) => bytes.extend(v.iter().map(|&b| u8::from(b))),
        }
        bytes
    }

    /// Rebuilds a tensor from a raw payload written in `order`.
    pub fn from_bytes(
        dtype: DType,
        dims: &[usize],
        order: ByteOrder,
        bytes: &[u8],
    ) -> Result<Tensor, TensorError> {
        let width = dtype
            .size_in_bytes()
            .ok_or(TensorError::UnsupportedDType(dtype))?;
        let expected = dims
            .iter()
            .try_fold(width, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| TensorError::Overflow {
                dims: dims.to_vec(),
            })?;
        if bytes.len() != expected {
            return Err(TensorError::ByteLength {
                dtype,
                expected,
                actual: bytes.len(),
            });
        }
        macro_rules! take {
            ($ty:ty, $n:expr) => {
                bytes
                    .chunks_exact($n)
                    .map(|chunk| {
                        let mut raw = [0u8; $n];
                        raw.copy_from_slice(chunk);
                        match order {
                            ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                            ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                        }
                    })
                    .collect()
            };
        }
        let data = match dtype {
            DType::Float => TensorData::F32(take!(f32, 4)),
            DType::Double => TensorData::F64(take!(f64, 8)),
            DType::Int32 => TensorData::I32(take!(i32, 4)),
            DType::Int64 => TensorData::I64(take!(i64, 8)),
            DType::Bool => TensorData::Bool(bytes.iter().map(|&b| b != 0).collect()),
            other => return Err(TensorError::UnsupportedDType(other)),
        };
        Ok(Tensor {
            dims: dims.to_vec(),
            order,
            data,
        })
    }
}

/// Row-major strides for `dims`, in elements.
pub fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}
