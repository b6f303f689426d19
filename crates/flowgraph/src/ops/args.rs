//! Positional argument vectors and the typed per-node property bag.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::DType;

/// Positional arguments attached to an operation.
///
/// Each op kind documents which slots it reads; unread slots are carried through untouched so
/// graphs produced by newer writers survive a round trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpArgs {
    /// Floating scalar arguments (e.g. the operand of `scalar_mul`).
    pub t_args: Vec<f64>,
    /// Integer arguments (e.g. softmax axis, split count).
    pub i_args: Vec<i64>,
    /// Boolean flags (e.g. matmul transposes, keep-dims).
    pub b_args: Vec<bool>,
    pub s_args: Vec<String>,
    pub d_args: Vec<DType>,
}

impl OpArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_t(mut self, value: f64) -> Self {
        self.t_args.push(value);
        self
    }

    pub fn with_i(mut self, value: i64) -> Self {
        self.i_args.push(value);
        self
    }

    pub fn with_b(mut self, value: bool) -> Self {
        self.b_args.push(value);
        self
    }

    pub fn with_s(mut self, value: impl Into<String>) -> Self {
        self.s_args.push(value.into());
        self
    }

    pub fn with_d(mut self, value: DType) -> Self {
        self.d_args.push(value);
        self
    }

    pub fn t(&self, index: usize) -> Option<f64> {
        self.t_args.get(index).copied()
    }

    pub fn i(&self, index: usize) -> Option<i64> {
        self.i_args.get(index).copied()
    }

    /// Boolean flag at `index`, defaulting to `false` when absent.
    pub fn flag(&self, index: usize) -> bool {
        self.b_args.get(index).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.t_args.is_empty()
            && self.i_args.is_empty()
            && self.b_args.is_empty()
            && self.s_args.is_empty()
            && self.d_args.is_empty()
    }
}

/// Typed value stored in an operation's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    String(String),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    BoolArray(Vec<bool>),
    StringArray(Vec<String>),
    /// Reference to another graph variable by name.
    TensorRef(String),
}

/// Kind tag of a [`PropertyValue`], with a fixed byte code for the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Int,
    Long,
    Double,
    Bool,
    String,
    LongArray,
    DoubleArray,
    BoolArray,
    StringArray,
    TensorRef,
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 10] = [
        PropertyKind::Int,
        PropertyKind::Long,
        PropertyKind::Double,
        PropertyKind::Bool,
        PropertyKind::String,
        PropertyKind::LongArray,
        PropertyKind::DoubleArray,
        PropertyKind::BoolArray,
        PropertyKind::StringArray,
        PropertyKind::TensorRef,
    ];

    pub fn code(self) -> u8 {
        match self {
            PropertyKind::Int => 0,
            PropertyKind::Long => 1,
            PropertyKind::Double => 2,
            PropertyKind::Bool => 3,
            PropertyKind::String => 4,
            PropertyKind::LongArray => 5,
            PropertyKind::DoubleArray => 6,
            PropertyKind::BoolArray => 7,
            PropertyKind::StringArray => 8,
            PropertyKind::TensorRef => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        PropertyKind::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Long(_) => PropertyKind::Long,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::LongArray(_) => PropertyKind::LongArray,
            PropertyValue::DoubleArray(_) => PropertyKind::DoubleArray,
            PropertyValue::BoolArray(_) => PropertyKind::BoolArray,
            PropertyValue::StringArray(_) => PropertyKind::StringArray,
            PropertyValue::TensorRef(_) => PropertyKind::TensorRef,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Long(v) => write!(f, "{v}L"),
            PropertyValue::Double(v) => write!(f, "{v:?}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v:?}"),
            PropertyValue::LongArray(v) => write!(f, "{v:?}"),
            PropertyValue::DoubleArray(v) => write!(f, "{v:?}"),
            PropertyValue::BoolArray(v) => write!(f, "{v:?}"),
            PropertyValue::StringArray(v) => write!(f, "{v:?}"),
            PropertyValue::TensorRef(v) => write!(f, "&{v}"),
        }
    }
}

/// Ordered property bag; keys sort lexicographically so encoding is deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;
