//! Output spec inference for every op kind.
//!
//! Inference runs twice: at graph-build time against declared specs (where `-1` extents
//! propagate) and inside the session against concrete input dims to size output buffers.

use crate::tensor::{normalize_axis, DType, Shape, TensorSpec, UNKNOWN_DIM};

use super::args::OpArgs;

/// Everything inference may look at for one operation.
pub struct InferInput<'a> {
    pub inputs: &'a [TensorSpec],
    pub args: &'a OpArgs,
    pub dimensions: &'a [i64],
}

pub type InferResult = Result<Vec<TensorSpec>, String>;

/// Signature of a per-kind inference routine stored in the registry.
pub type InferFn = fn(&InferInput<'_>) -> InferResult;

fn arity(input: &InferInput<'_>, expected: usize) -> Result<(), String> {
    if input.inputs.len() != expected {
        return Err(format!(
            "expected {expected} input(s), got {}",
            input.inputs.len()
        ));
    }
    Ok(())
}

fn same_shape(a: &Shape, b: &Shape) -> bool {
    a.rank() == b.rank()
        && a
            .dims()
            .iter()
            .zip(b.dims())
            .all(|(&x, &y)| x < 0 || y < 0 || x == y)
}

pub(crate) fn unary_same(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    Ok(vec![input.inputs[0].clone()])
}

pub(crate) fn unary_floating(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let spec = &input.inputs[0];
    if !spec.dtype.is_floating() {
        return Err(format!("requires a floating input, got {}", spec.dtype));
    }
    Ok(vec![spec.clone()])
}

pub(crate) fn cast(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let target = input
        .args
        .d_args
        .first()
        .copied()
        .ok_or_else(|| "cast requires a target dtype in d_args[0]".to_string())?;
    Ok(vec![TensorSpec::new(target, input.inputs[0].shape.clone())])
}

pub(crate) fn binary_broadcast(input: &InferInput<'_>) -> InferResult {
    arity(input, 2)?;
    let (lhs, rhs) = (&input.inputs[0], &input.inputs[1]);
    if lhs.dtype != rhs.dtype {
        return Err(format!("dtype mismatch {} vs {}", lhs.dtype, rhs.dtype));
    }
    let shape = lhs
        .shape
        .broadcast(&rhs.shape)
        .ok_or_else(|| format!("shapes {} and {} do not broadcast", lhs.shape, rhs.shape))?;
    Ok(vec![TensorSpec::new(lhs.dtype, shape)])
}

pub(crate) fn scalar(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    if input.args.t_args.is_empty() {
        return Err("scalar op requires its operand in t_args[0]".to_string());
    }
    Ok(vec![input.inputs[0].clone()])
}

/// `b_args[0]` transposes the lhs, `b_args[1]` the rhs.
pub(crate) fn matmul(input: &InferInput<'_>) -> InferResult {
    arity(input, 2)?;
    let (lhs, rhs) = (&input.inputs[0], &input.inputs[1]);
    if lhs.dtype != rhs.dtype {
        return Err(format!("dtype mismatch {} vs {}", lhs.dtype, rhs.dtype));
    }
    if lhs.shape.rank() != 2 || rhs.shape.rank() != 2 {
        return Err(format!(
            "matmul expects rank-2 operands, got {} and {}",
            lhs.shape, rhs.shape
        ));
    }
    let (l, r) = (lhs.shape.dims(), rhs.shape.dims());
    let (m, k_lhs) = if input.args.flag(0) { (l[1], l[0]) } else { (l[0], l[1]) };
    let (k_rhs, n) = if input.args.flag(1) { (r[1], r[0]) } else { (r[0], r[1]) };
    if k_lhs >= 0 && k_rhs >= 0 && k_lhs != k_rhs {
        return Err(format!(
            "contracting extents differ: {} vs {}",
            lhs.shape, rhs.shape
        ));
    }
    Ok(vec![TensorSpec::new(lhs.dtype, Shape::new([m, n]))])
}

/// Normalizes the reduction axes of `shape`; an empty list means every axis.
pub fn reduction_axes(shape: &Shape, dimensions: &[i64]) -> Result<Vec<usize>, String> {
    if dimensions.is_empty() {
        return Ok((0..shape.rank()).collect());
    }
    let mut axes = Vec::with_capacity(dimensions.len());
    for &axis in dimensions {
        let axis = shape
            .normalize_axis(axis)
            .ok_or_else(|| format!("axis {axis} out of range for {shape}"))?;
        if !axes.contains(&axis) {
            axes.push(axis);
        }
    }
    axes.sort_unstable();
    Ok(axes)
}

fn reduced_shape(shape: &Shape, axes: &[usize], keep_dims: bool) -> Shape {
    let mut dims = Vec::with_capacity(shape.rank());
    for (axis, &dim) in shape.dims().iter().enumerate() {
        if axes.contains(&axis) {
            if keep_dims {
                dims.push(1);
            }
        } else {
            dims.push(dim);
        }
    }
    Shape::new(dims)
}

/// Reductions read their axes from `dimensions` and keep-dims from `b_args[0]`.
pub(crate) fn reduce(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let spec = &input.inputs[0];
    let axes = reduction_axes(&spec.shape, input.dimensions)?;
    Ok(vec![TensorSpec::new(
        spec.dtype,
        reduced_shape(&spec.shape, &axes, input.args.flag(0)),
    )])
}

/// Backward helpers shaped like their first input: `(forward_value, grad) -> like forward_value`.
pub(crate) fn like_first_with_grad(input: &InferInput<'_>) -> InferResult {
    arity(input, 2)?;
    let (like, grad) = (&input.inputs[0], &input.inputs[1]);
    Ok(vec![TensorSpec::new(grad.dtype, like.shape.clone())])
}

/// Elementwise backward helpers: both inputs share a shape.
pub(crate) fn elementwise_bp(input: &InferInput<'_>) -> InferResult {
    arity(input, 2)?;
    let (value, grad) = (&input.inputs[0], &input.inputs[1]);
    if !same_shape(&value.shape, &grad.shape) {
        return Err(format!(
            "gradient shape {} does not match {}",
            grad.shape, value.shape
        ));
    }
    Ok(vec![TensorSpec::new(grad.dtype, value.shape.clone())])
}

/// `reduce_to_like(grad, like)` sums `grad` down to `like`'s shape.
pub(crate) fn reduce_to_like(input: &InferInput<'_>) -> InferResult {
    arity(input, 2)?;
    let (grad, like) = (&input.inputs[0], &input.inputs[1]);
    let broadcast = like.shape.broadcast(&grad.shape);
    let widens = like.shape.rank() > grad.shape.rank()
        || (like.shape.is_fully_known()
            && grad.shape.is_fully_known()
            && broadcast.as_ref() != Some(&grad.shape));
    if broadcast.is_none() || widens {
        return Err(format!(
            "{} is not a broadcast of {}",
            grad.shape, like.shape
        ));
    }
    Ok(vec![TensorSpec::new(grad.dtype, like.shape.clone())])
}

/// `i_args[0]` is the softmax axis, defaulting to the last one.
pub(crate) fn softmax(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let spec = &input.inputs[0];
    let axis = input.args.i(0).unwrap_or(-1);
    if spec.shape.normalize_axis(axis).is_none() {
        return Err(format!("axis {axis} out of range for {}", spec.shape));
    }
    unary_floating(input)
}

/// `i_args = [axis, parts, sizes...]`; without explicit sizes the axis splits evenly.
pub(crate) fn split(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let spec = &input.inputs[0];
    let axis = input.args.i(0).unwrap_or(0);
    let parts = input.args.i(1).unwrap_or(2);
    if parts < 1 {
        return Err(format!("split count must be positive, got {parts}"));
    }
    let axis = spec
        .shape
        .normalize_axis(axis)
        .ok_or_else(|| format!("axis {axis} out of range for {}", spec.shape))?;
    let extent = spec.shape.dims()[axis];
    let explicit = input.args.i_args.get(2..).unwrap_or(&[]);
    let sizes = split_sizes(extent, parts as usize, explicit)?;
    Ok(sizes
        .into_iter()
        .map(|size| {
            let mut dims = spec.shape.dims().to_vec();
            dims[axis] = size;
            TensorSpec::new(spec.dtype, Shape::new(dims))
        })
        .collect())
}

/// Upper bound on the number of outputs a single split may declare.
pub const MAX_SPLIT_PARTS: usize = 1 << 12;

/// Per-part extents of a split; `extent` may be unknown (`-1`).
pub fn split_sizes(extent: i64, parts: usize, explicit: &[i64]) -> Result<Vec<i64>, String> {
    if parts == 0 || parts > MAX_SPLIT_PARTS {
        return Err(format!(
            "split count {parts} is outside 1..={MAX_SPLIT_PARTS}"
        ));
    }
    if !explicit.is_empty() {
        if explicit.len() != parts || explicit.iter().any(|&s| s < 0) {
            return Err(format!("split sizes {explicit:?} do not describe {parts} parts"));
        }
        let total: i64 = explicit.iter().sum();
        if extent >= 0 && total != extent {
            return Err(format!("split sizes {explicit:?} do not sum to {extent}"));
        }
        return Ok(explicit.to_vec());
    }
    if extent < 0 {
        return Ok(vec![UNKNOWN_DIM; parts]);
    }
    if extent % parts as i64 != 0 {
        return Err(format!("extent {extent} does not split into {parts} parts"));
    }
    Ok(vec![extent / parts as i64; parts])
}

/// `i_args[0]` is the concatenation axis.
pub(crate) fn concat(input: &InferInput<'_>) -> InferResult {
    let first = input
        .inputs
        .first()
        .ok_or_else(|| "concat requires at least one input".to_string())?;
    let axis = input.args.i(0).unwrap_or(0);
    let axis = first
        .shape
        .normalize_axis(axis)
        .ok_or_else(|| format!("axis {axis} out of range for {}", first.shape))?;
    let mut dims = first.shape.dims().to_vec();
    for other in &input.inputs[1..] {
        if other.dtype != first.dtype || other.shape.rank() != first.shape.rank() {
            return Err(format!("cannot concat {} with {}", first, other));
        }
        for (i, (&a, &b)) in first.shape.dims().iter().zip(other.shape.dims()).enumerate() {
            if i != axis && a >= 0 && b >= 0 && a != b {
                return Err(format!("cannot concat {} with {}", first, other));
            }
        }
        let extent = other.shape.dims()[axis];
        dims[axis] = if dims[axis] < 0 || extent < 0 {
            UNKNOWN_DIM
        } else {
            dims[axis] + extent
        };
    }
    Ok(vec![TensorSpec::new(first.dtype, Shape::new(dims))])
}

/// `i_args[0]` is the reduced axis (default last); the output is `Int64`.
pub(crate) fn argmax(input: &InferInput<'_>) -> InferResult {
    arity(input, 1)?;
    let spec = &input.inputs[0];
    let axis = input.args.i(0).unwrap_or(-1);
    let axis = normalize_axis(axis, spec.shape.rank())
        .ok_or_else(|| format!("axis {axis} out of range for {}", spec.shape))?;
    Ok(vec![TensorSpec::new(
        DType::Int64,
        reduced_shape(&spec.shape, &[axis], false),
    )])
}

pub(crate) fn add_n(input: &InferInput<'_>) -> InferResult {
    let first = input
        .inputs
        .first()
        .ok_or_else(|| "add_n requires at least one input".to_string())?;
    let mut shape = first.shape.clone();
    for other in &input.inputs[1..] {
        if other.dtype != first.dtype {
            return Err(format!("dtype mismatch {} vs {}", first.dtype, other.dtype));
        }
        shape = shape
            .broadcast(&other.shape)
            .ok_or_else(|| format!("shapes {} and {} do not broadcast", shape, other.shape))?;
    }
    Ok(vec![TensorSpec::new(first.dtype, shape)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dims: &[i64]) -> TensorSpec {
        TensorSpec::new(DType::Float, Shape::new(dims.to_vec()))
    }

    fn run(f: InferFn, inputs: &[TensorSpec], args: OpArgs, dimensions: &[i64]) -> InferResult {
        f(&InferInput {
            inputs,
            args: &args,
            dimensions,
        })
    }

    #[test]
    fn matmul_honours_transpose_flags() {
        let out = run(matmul, &[spec(&[3, 2]), spec(&[3, 4])], OpArgs::new().with_b(true), &[])
            .expect("infer");
        assert_eq!(out[0].shape, Shape::new([2, 4]));
        let err = run(matmul, &[spec(&[2, 3]), spec(&[2, 4])], OpArgs::new(), &[]).unwrap_err();
        assert!(err.contains("contracting"), "{err}");
    }

    #[test]
    fn reduce_keeps_or_drops_axes() {
        let kept = run(reduce, &[spec(&[2, 3, 4])], OpArgs::new().with_b(true), &[1]).unwrap();
        assert_eq!(kept[0].shape, Shape::new([2, 1, 4]));
        let all = run(reduce, &[spec(&[2, 3])], OpArgs::new(), &[]).unwrap();
        assert_eq!(all[0].shape, Shape::scalar());
    }

    #[test]
    fn reduce_to_like_rejects_a_wider_target() {
        let ok = run(reduce_to_like, &[spec(&[4, 3]), spec(&[1, 3])], OpArgs::new(), &[]).unwrap();
        assert_eq!(ok[0].shape, Shape::new([1, 3]));
        let err = run(reduce_to_like, &[spec(&[3]), spec(&[4, 3])], OpArgs::new(), &[]).unwrap_err();
        assert!(err.contains("not a broadcast"), "{err}");
        assert!(run(reduce_to_like, &[spec(&[1, 3]), spec(&[4, 3])], OpArgs::new(), &[]).is_err());
        // unknown extents stay permissive
        assert!(run(reduce_to_like, &[spec(&[-1, 3]), spec(&[4, 3])], OpArgs::new(), &[]).is_ok());
    }

    #[test]
    fn split_count_is_bounded() {
        assert!(split_sizes(-1, 0, &[]).is_err());
        assert!(split_sizes(-1, MAX_SPLIT_PARTS + 1, &[]).is_err());
        assert_eq!(split_sizes(-1, 3, &[]).unwrap(), vec![UNKNOWN_DIM; 3]);
        let huge = OpArgs::new().with_i(0).with_i(i64::MAX);
        assert!(run(split, &[spec(&[-1, 2])], huge, &[]).is_err());
    }

    #[test]
    fn split_divides_axis() {
        let out = run(split, &[spec(&[4, 6])], OpArgs::new().with_i(1).with_i(3), &[]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|s| s.shape == Shape::new([4, 2])));
        assert!(run(split, &[spec(&[4, 5])], OpArgs::new().with_i(1).with_i(2), &[]).is_err());
        let uneven = run(
            split,
            &[spec(&[4, 5])],
            OpArgs::new().with_i(1).with_i(2).with_i(2).with_i(3),
            &[],
        )
        .unwrap();
        assert_eq!(uneven[1].shape, Shape::new([4, 3]));
    }

    #[test]
    fn batch_dimension_propagates() {
        let out = run(
            matmul,
            &[spec(&[-1, 3]), spec(&[3, 4])],
            OpArgs::new(),
            &[],
        )
        .unwrap();
        assert_eq!(out[0].shape, Shape::new([-1, 4]));
        let cat = run(concat, &[spec(&[-1, 2]), spec(&[3, 2])], OpArgs::new(), &[]).unwrap();
        assert_eq!(cat[0].shape, Shape::new([-1, 2]));
    }
}
