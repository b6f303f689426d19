use std::sync::Arc;

use flowgraph::backend::{BackendError, BackendResult, KernelBackend};
use flowgraph::graph::Operation;
use flowgraph::ops::{reduction_axes, split_sizes, OpKind};
use flowgraph::tensor::{compute_strides, normalize_axis, Shape, Tensor, TensorData};

/// Hook consulted before the built-in kernels; returning `Some` short-circuits execution.
pub trait CpuKernelInterceptor: Send + Sync {
    fn try_execute(
        &self,
        op: &Operation,
        inputs: &[&Tensor],
        outputs: &mut [Tensor],
    ) -> Option<BackendResult<()>>;
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(
        &self,
        _op: &Operation,
        _inputs: &[&Tensor],
        _outputs: &mut [Tensor],
    ) -> Option<BackendResult<()>> {
        None
    }
}

#[derive(Clone)]
pub struct GenericCpuBackend<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuBackend<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }
}

impl GenericCpuBackend<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuBackend<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuBackend = GenericCpuBackend<NoopInterceptor>;

impl<I: CpuKernelInterceptor> KernelBackend for GenericCpuBackend<I> {
    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn execute(
        &self,
        op: &Operation,
        inputs: &[&Tensor],
        outputs: &mut [Tensor],
    ) -> BackendResult<()> {
        if let Some(result) = self.interceptor.try_execute(op, inputs, outputs) {
            log::trace!("{} ({}) handled by interceptor", op.name(), op.kind());
            return result;
        }
        execute_operation(op, inputs, outputs)
    }
}

fn execute_operation(op: &Operation, inputs: &[&Tensor], outputs: &mut [Tensor]) -> BackendResult<()> {
    let kind = op.kind();
    if kind == OpKind::Split {
        return op_split(op, inputs, outputs);
    }
    let count = outputs.len();
    let output = match outputs {
        [only] => only,
        _ => {
            return Err(BackendError::execution(format!(
                "{kind} expects one output buffer, got {count}"
            )))
        }
    };
    let args = op.args();
    match kind {
        OpKind::Identity | OpKind::StopGradient | OpKind::Cast => {
            map_unary(kind, inputs, output, |x| x)
        }
        OpKind::Neg => map_unary(kind, inputs, output, |x| -x),
        OpKind::Exp => map_unary(kind, inputs, output, f64::exp),
        OpKind::Log => map_unary(kind, inputs, output, f64::ln),
        OpKind::Tanh => map_unary(kind, inputs, output, f64::tanh),
        OpKind::Sigmoid => map_unary(kind, inputs, output, |x| 1.0 / (1.0 + (-x).exp())),
        OpKind::Relu => map_unary(kind, inputs, output, |x| x.max(0.0)),
        OpKind::Square => map_unary(kind, inputs, output, |x| x * x),
        OpKind::Sqrt => map_unary(kind, inputs, output, f64::sqrt),
        OpKind::OnesLike => map_unary(kind, inputs, output, |_| 1.0),
        OpKind::ZerosLike => map_unary(kind, inputs, output, |_| 0.0),
        OpKind::ScalarAdd | OpKind::ScalarMul | OpKind::ScalarPow => {
            let s = args
                .t(0)
                .ok_or_else(|| BackendError::execution(format!("{kind} missing t_args[0]")))?;
            match kind {
                OpKind::ScalarAdd => map_unary(kind, inputs, output, |x| x + s),
                OpKind::ScalarMul => map_unary(kind, inputs, output, |x| x * s),
                _ => map_unary(kind, inputs, output, |x| x.powf(s)),
            }
        }
        OpKind::Add => broadcast_binary(kind, inputs, output, |a, b| a + b),
        OpKind::Sub => broadcast_binary(kind, inputs, output, |a, b| a - b),
        OpKind::Mul => broadcast_binary(kind, inputs, output, |a, b| a * b),
        OpKind::Div => broadcast_binary(kind, inputs, output, |a, b| a / b),
        OpKind::TanhBp => broadcast_binary(kind, inputs, output, |y, g| g * (1.0 - y * y)),
        OpKind::SigmoidBp => broadcast_binary(kind, inputs, output, |y, g| g * y * (1.0 - y)),
        OpKind::ReluBp => {
            broadcast_binary(kind, inputs, output, |x, g| if x > 0.0 { g } else { 0.0 })
        }
        OpKind::AddN => op_add_n(inputs, output),
        OpKind::MatMul => op_matmul(inputs, output, args.flag(0), args.flag(1)),
        OpKind::ReduceSum => op_reduce(op, inputs, output, false),
        OpKind::ReduceMean => op_reduce(op, inputs, output, true),
        OpKind::ReduceSumBp => op_reduce_bp(op, inputs, output, false),
        OpKind::ReduceMeanBp => op_reduce_bp(op, inputs, output, true),
        OpKind::ReduceToLike => op_reduce_to_like(inputs, output),
        OpKind::Softmax => op_softmax(inputs, output, args.i(0).unwrap_or(-1)),
        OpKind::SoftmaxBp => op_softmax_bp(inputs, output, args.i(0).unwrap_or(-1)),
        OpKind::Concat => op_concat(inputs, output, args.i(0).unwrap_or(0)),
        OpKind::ArgMax => op_argmax(inputs, output, args.i(0).unwrap_or(-1)),
        OpKind::Split => op_split(op, inputs, std::slice::from_mut(output)),
    }
}

/// Writes `values` into `out`, converting to its dtype.
fn store(out: &mut Tensor, values: &[f64]) -> BackendResult<()> {
    if out.len() != values.len() {
        return Err(BackendError::execution(format!(
            "kernel produced {} values for an output of {} elements",
            values.len(),
            out.len()
        )));
    }
    match out.data_mut() {
        TensorData::F32(v) => v.iter_mut().zip(values).for_each(|(s, &x)| *s = x as f32),
        TensorData::F64(v) => v.copy_from_slice(values),
        TensorData::I32(v) => v.iter_mut().zip(values).for_each(|(s, &x)| *s = x as i32),
        TensorData::I64(v) => v.iter_mut().zip(values).for_each(|(s, &x)| *s = x as i64),
        TensorData::Bool(v) => v.iter_mut().zip(values).for_each(|(s, &x)| *s = x != 0.0),
    }
    Ok(())
}

fn expect_inputs<'a>(kind: OpKind, inputs: &[&'a Tensor], count: usize) -> BackendResult<Vec<&'a Tensor>> {
    if inputs.len() != count {
        return Err(BackendError::execution(format!(
            "{kind} expects {count} input(s), got {}",
            inputs.len()
        )));
    }
    Ok(inputs.to_vec())
}

fn map_unary(
    kind: OpKind,
    inputs: &[&Tensor],
    output: &mut Tensor,
    f: impl Fn(f64) -> f64,
) -> BackendResult<()> {
    let input = expect_inputs(kind, inputs, 1)?[0];
    let values: Vec<f64> = input.to_f64_vec().into_iter().map(f).collect();
    store(output, &values)
}

/// Flat index into a tensor of `dims` broadcast (right-aligned) to the output coordinate.
fn broadcast_offset(coord: &[usize], dims: &[usize], strides: &[usize]) -> usize {
    let shift = coord.len() - dims.len();
    dims.iter()
        .zip(strides)
        .enumerate()
        .map(|(axis, (&dim, &stride))| if dim == 1 { 0 } else { coord[axis + shift] * stride })
        .sum()
}

fn check_broadcast(input: &[usize], output: &[usize]) -> BackendResult<()> {
    let compatible = input.len() <= output.len()
        && input
            .iter()
            .rev()
            .zip(output.iter().rev())
            .all(|(&i, &o)| i == o || i == 1);
    if !compatible {
        return Err(BackendError::execution(format!(
            "dims {input:?} do not broadcast to {output:?}"
        )));
    }
    Ok(())
}

fn broadcast_binary(
    kind: OpKind,
    inputs: &[&Tensor],
    output: &mut Tensor,
    f: impl Fn(f64, f64) -> f64,
) -> BackendResult<()> {
    let operands = expect_inputs(kind, inputs, 2)?;
    let (lhs, rhs) = (operands[0], operands[1]);
    let out_dims = output.dims().to_vec();
    check_broadcast(lhs.dims(), &out_dims)?;
    check_broadcast(rhs.dims(), &out_dims)?;
    let (a, b) = (lhs.to_f64_vec(), rhs.to_f64_vec());
    let values: Vec<f64> = if lhs.dims() == out_dims.as_slice() && rhs.dims() == out_dims.as_slice() {
        a.iter().zip(&b).map(|(&x, &y)| f(x, y)).collect()
    } else {
        let (a_strides, b_strides) = (compute_strides(lhs.dims()), compute_strides(rhs.dims()));
        MultiIndex::new(&out_dims)
            .map(|coord| {
                let x = a[broadcast_offset(&coord, lhs.dims(), &a_strides)];
                let y = b[broadcast_offset(&coord, rhs.dims(), &b_strides)];
                f(x, y)
            })
            .collect()
    };
    store(output, &values)
}

fn op_add_n(inputs: &[&Tensor], output: &mut Tensor) -> BackendResult<()> {
    if inputs.is_empty() {
        return Err(BackendError::execution("add_n expects at least one input"));
    }
    let out_dims = output.dims().to_vec();
    let mut acc = vec![0.0f64; output.len()];
    for input in inputs {
        check_broadcast(input.dims(), &out_dims)?;
        let values = input.to_f64_vec();
        let strides = compute_strides(input.dims());
        for (slot, coord) in acc.iter_mut().zip(MultiIndex::new(&out_dims)) {
            *slot += values[broadcast_offset(&coord, input.dims(), &strides)];
        }
    }
    store(output, &acc)
}

fn op_matmul(
    inputs: &[&Tensor],
    output: &mut Tensor,
    transpose_a: bool,
    transpose_b: bool,
) -> BackendResult<()> {
    let operands = expect_inputs(OpKind::MatMul, inputs, 2)?;
    let (lhs, rhs) = (operands[0], operands[1]);
    if lhs.rank() != 2 || rhs.rank() != 2 {
        return Err(BackendError::unimplemented("matmul", "only rank-2 operands are supported"));
    }
    let (l, r) = (lhs.dims(), rhs.dims());
    let (m, k) = if transpose_a { (l[1], l[0]) } else { (l[0], l[1]) };
    let (k_rhs, n) = if transpose_b { (r[1], r[0]) } else { (r[0], r[1]) };
    if k != k_rhs || output.dims() != [m, n] {
        return Err(BackendError::execution(format!(
            "matmul dims {l:?} x {r:?} do not produce {:?}",
            output.dims()
        )));
    }
    let (a, b) = (lhs.to_f64_vec(), rhs.to_f64_vec());
    let a_at = |i: usize, p: usize| if transpose_a { a[p * m + i] } else { a[i * k + p] };
    let b_at = |p: usize, j: usize| if transpose_b { b[j * k + p] } else { b[p * n + j] };
    let mut values = vec![0.0f64; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += a_at(i, p) * b_at(p, j);
            }
            values[i * n + j] = sum;
        }
    }
    store(output, &values)
}

/// Maps every input element to its slot in the reduced layout, which is the same whether or
/// not the reduced axes are kept as size-1 dims.
fn reduced_layout(dims: &[usize], axes: &[usize]) -> (Vec<usize>, usize) {
    let kept: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(axis, &d)| if axes.contains(&axis) { 1 } else { d })
        .collect();
    let kept_strides = compute_strides(&kept);
    let slots = MultiIndex::new(dims)
        .map(|coord| {
            coord
                .iter()
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(axis, &c)| c * kept_strides[axis])
                .sum()
        })
        .collect();
    let count = axes.iter().map(|&a| dims[a]).product();
    (slots, count)
}

fn axes_of(op: &Operation, dims: &[usize]) -> BackendResult<Vec<usize>> {
    reduction_axes(&Shape::from_dims(dims), op.dimensions()).map_err(BackendError::execution)
}

fn op_reduce(op: &Operation, inputs: &[&Tensor], output: &mut Tensor, mean: bool) -> BackendResult<()> {
    let input = expect_inputs(op.kind(), inputs, 1)?[0];
    let axes = axes_of(op, input.dims())?;
    let (slots, count) = reduced_layout(input.dims(), &axes);
    let mut acc = vec![0.0f64; output.len()];
    for (value, slot) in input.to_f64_vec().into_iter().zip(slots) {
        acc[slot] += value;
    }
    if mean && count > 0 {
        acc.iter_mut().for_each(|v| *v /= count as f64);
    }
    store(output, &acc)
}

/// Broadcasts the reduced gradient back over the reduced axes of the forward input.
fn op_reduce_bp(op: &Operation, inputs: &[&Tensor], output: &mut Tensor, mean: bool) -> BackendResult<()> {
    let operands = expect_inputs(op.kind(), inputs, 2)?;
    let (forward, grad) = (operands[0], operands[1]);
    let axes = axes_of(op, forward.dims())?;
    let (slots, count) = reduced_layout(forward.dims(), &axes);
    let g = grad.to_f64_vec();
    let scale = if mean && count > 0 { 1.0 / count as f64 } else { 1.0 };
    let values: Vec<f64> = slots
        .into_iter()
        .map(|slot| g.get(slot).copied().map(|v| v * scale))
        .collect::<Option<_>>()
        .ok_or_else(|| BackendError::execution("reduction gradient is smaller than expected"))?;
    store(output, &values)
}

fn op_reduce_to_like(inputs: &[&Tensor], output: &mut Tensor) -> BackendResult<()> {
    let operands = expect_inputs(OpKind::ReduceToLike, inputs, 2)?;
    let grad = operands[0];
    let like_dims = output.dims().to_vec();
    check_broadcast(&like_dims, grad.dims())?;
    let strides = compute_strides(&like_dims);
    let mut acc = vec![0.0f64; output.len()];
    for (value, coord) in grad.to_f64_vec().into_iter().zip(MultiIndex::new(grad.dims())) {
        acc[broadcast_offset(&coord, &like_dims, &strides)] += value;
    }
    store(output, &acc)
}

/// `(outer, extent, inner)` around `axis` of `dims`.
fn axis_layout(dims: &[usize], axis: i64) -> BackendResult<(usize, usize, usize, usize)> {
    let axis = normalize_axis(axis, dims.len())
        .ok_or_else(|| BackendError::execution(format!("axis {axis} out of range for {dims:?}")))?;
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    Ok((axis, outer, dims[axis], inner))
}

fn op_softmax(inputs: &[&Tensor], output: &mut Tensor, axis: i64) -> BackendResult<()> {
    let input = expect_inputs(OpKind::Softmax, inputs, 1)?[0];
    let (_, outer, extent, inner) = axis_layout(input.dims(), axis)?;
    let mut values = input.to_f64_vec();
    for o in 0..outer {
        for i in 0..inner {
            let at = |a: usize| (o * extent + a) * inner + i;
            let max = (0..extent).map(|a| values[at(a)]).fold(f64::NEG_INFINITY, f64::max);
            let mut total = 0.0;
            for a in 0..extent {
                let e = (values[at(a)] - max).exp();
                values[at(a)] = e;
                total += e;
            }
            for a in 0..extent {
                values[at(a)] /= total;
            }
        }
    }
    store(output, &values)
}

/// `dx = y * (g - sum(g * y))` along the softmax axis.
fn op_softmax_bp(inputs: &[&Tensor], output: &mut Tensor, axis: i64) -> BackendResult<()> {
    let operands = expect_inputs(OpKind::SoftmaxBp, inputs, 2)?;
    let (y, g) = (operands[0].to_f64_vec(), operands[1].to_f64_vec());
    let (_, outer, extent, inner) = axis_layout(operands[0].dims(), axis)?;
    let mut values = vec![0.0f64; y.len()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |a: usize| (o * extent + a) * inner + i;
            let dot: f64 = (0..extent).map(|a| g[at(a)] * y[at(a)]).sum();
            for a in 0..extent {
                values[at(a)] = y[at(a)] * (g[at(a)] - dot);
            }
        }
    }
    store(output, &values)
}

fn op_split(op: &Operation, inputs: &[&Tensor], outputs: &mut [Tensor]) -> BackendResult<()> {
    let input = expect_inputs(OpKind::Split, inputs, 1)?[0];
    let args = op.args();
    let (_, outer, extent, inner) = axis_layout(input.dims(), args.i(0).unwrap_or(0))?;
    let parts = args.i(1).unwrap_or(2).max(1) as usize;
    let explicit = args.i_args.get(2..).unwrap_or(&[]);
    let sizes = split_sizes(extent as i64, parts, explicit).map_err(BackendError::execution)?;
    if sizes.len() != outputs.len() {
        return Err(BackendError::execution(format!(
            "split into {} parts but {} output buffers",
            sizes.len(),
            outputs.len()
        )));
    }
    let values = input.to_f64_vec();
    let mut offset = 0usize;
    for (output, size) in outputs.iter_mut().zip(sizes) {
        let size = size as usize;
        let mut part = Vec::with_capacity(outer * size * inner);
        for o in 0..outer {
            let start = (o * extent + offset) * inner;
            part.extend_from_slice(&values[start..start + size * inner]);
        }
        store(output, &part)?;
        offset += size;
    }
    Ok(())
}

fn op_concat(inputs: &[&Tensor], output: &mut Tensor, axis: i64) -> BackendResult<()> {
    if inputs.is_empty() {
        return Err(BackendError::execution("concat expects at least one input"));
    }
    let (_, outer, _, inner) = axis_layout(output.dims(), axis)?;
    let pieces: Vec<(Vec<f64>, usize)> = inputs
        .iter()
        .map(|t| {
            axis_layout(t.dims(), axis).map(|(_, _, extent, _)| (t.to_f64_vec(), extent))
        })
        .collect::<BackendResult<_>>()?;
    let mut values = Vec::with_capacity(output.len());
    for o in 0..outer {
        for (piece, extent) in &pieces {
            let start = o * extent * inner;
            values.extend_from_slice(&piece[start..start + extent * inner]);
        }
    }
    store(output, &values)
}

fn op_argmax(inputs: &[&Tensor], output: &mut Tensor, axis: i64) -> BackendResult<()> {
    let input = expect_inputs(OpKind::ArgMax, inputs, 1)?[0];
    let (_, outer, extent, inner) = axis_layout(input.dims(), axis)?;
    let values = input.to_f64_vec();
    let mut indices = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let mut best = 0usize;
            for a in 1..extent {
                if values[(o * extent + a) * inner + i] > values[(o * extent + best) * inner + i] {
                    best = a;
                }
            }
            indices.push(best as f64);
        }
    }
    store(output, &indices)
}

/// Row-major walk over every coordinate of `shape`.
struct MultiIndex {
    shape: Vec<usize>,
    current: Vec<usize>,
    first: bool,
}

impl MultiIndex {
    fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            current: vec![0; shape.len()],
            first: !shape.contains(&0),
        }
    }
}

impl Iterator for MultiIndex {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;
            return Some(self.current.clone());
        }
        for i in (0..self.current.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.shape[i] {
                return Some(self.current.clone());
            }
            self.current[i] = 0;
        }
        None
    }
}
