//! Declared variable shapes, where an extent of `-1` marks an unbound (batch) dimension.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Extent used for a dimension whose size is only known at run time.
pub const UNKNOWN_DIM: i64 = -1;

/// Logical dimensions of a graph variable.
///
/// Rank-0 shapes are allowed and describe scalars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<i64>,
}

impl Shape {
    pub fn new<D: Into<Vec<i64>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Builds a fully known shape from concrete extents.
    pub fn from_dims(dims: &[usize]) -> Self {
        Shape {
            dims: dims.iter().map(|&d| d as i64).collect(),
        }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_fully_known(&self) -> bool {
        self.dims.iter().all(|&d| d >= 0)
    }

    /// Returns the element count when every extent is known.
    pub fn num_elements(&self) -> Option<usize> {
        self.concrete().map(|dims| dims.iter().product())
    }

    /// Returns concrete extents when every dimension is bound.
    pub fn concrete(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|&d| if d >= 0 { Some(d as usize) } else { None })
            .collect()
    }

    /// Checks a concrete runtime shape against this declaration; unknown extents match anything.
    pub fn accepts(&self, dims: &[usize]) -> bool {
        self.dims.len() == dims.len()
            && self
                .dims
                .iter()
                .zip(dims)
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual)
    }

    /// Numpy-style broadcast of two declared shapes. Returns `None` when the extents conflict.
    ///
    /// An unknown extent only resolves against 1; against anything else the result stays
    /// unknown, since the runtime extent may be 1 or may conflict.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let mut out = vec![0i64; rank];
        for (i, slot) in out.iter_mut().enumerate() {
            let a = dim_from_right(&self.dims, rank - 1 - i);
            let b = dim_from_right(&other.dims, rank - 1 - i);
            *slot = match (a, b) {
                (1, d) | (d, 1) => d,
                (a, b) if a < 0 || b < 0 => UNKNOWN_DIM,
                (a, b) if a == b => a,
                _ => return None,
            };
        }
        Some(Shape { dims: out })
    }

    /// Normalizes a possibly negative axis against this shape's rank.
    pub fn normalize_axis(&self, axis: i64) -> Option<usize> {
        normalize_axis(axis, self.rank())
    }
}

fn dim_from_right(dims: &[i64], offset: usize) -> i64 {
    if offset < dims.len() {
        dims[dims.len() - 1 - offset]
    } else {
        1
    }
}

/// Normalizes a possibly negative axis for an array of `rank` dimensions.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&axis) {
        Some(axis as usize)
    } else {
        None
    }
}

/// Numpy-style broadcast of two concrete shapes.
pub fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0usize; rank];
    for (i, slot) in out.iter_mut().enumerate() {
        let offset = rank - 1 - i;
        let x = if offset < a.len() { a[a.len() - 1 - offset] } else { 1 };
        let y = if offset < b.len() { b[b.len() - 1 - offset] } else { 1 };
        *slot = match (x, y) {
            (1, d) | (d, 1) => d,
            (x, y) if x == y => x,
            _ => return None,
        };
    }
    Some(out)
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape { dims }
    }
}

impl<const N: usize> From<[i64; N]> for Shape {
    fn from(dims: [i64; N]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if *dim < 0 {
                f.write_str("?")?;
            } else {
                write!(f, "{dim}")?;
            }
        }
        f.write_str("]")
    }
}
