//! Reverse-mode rules, one per differentiable [`OpKind`](crate::ops::OpKind).
//!
//! A rule receives the forward operation and the accumulated gradient of each of its outputs
//! (`None` where no gradient flows) and returns one entry per forward input. Rules only ever
//! append operations; they never touch the forward part of the graph.

use crate::graph::{OpDef, Operation, VarId};
use crate::ops::{OpArgs, OpKind};

use super::{AutodiffError, GradContext};

pub type GradientRule = fn(
    &mut GradContext<'_>,
    &Operation,
    &[Option<VarId>],
) -> Result<Vec<Option<VarId>>, AutodiffError>;

type RuleResult = Result<Vec<Option<VarId>>, AutodiffError>;

fn upstream(op: &Operation, grads: &[Option<VarId>]) -> Result<VarId, AutodiffError> {
    grads
        .first()
        .copied()
        .flatten()
        .ok_or_else(|| AutodiffError::Unsupported {
            op: op.name().to_string(),
            reason: "rule invoked without an upstream gradient".to_string(),
        })
}

fn input(op: &Operation, index: usize) -> Result<VarId, AutodiffError> {
    op.inputs()
        .get(index)
        .copied()
        .ok_or_else(|| AutodiffError::Unsupported {
            op: op.name().to_string(),
            reason: format!("missing input {index}"),
        })
}

fn output(op: &Operation) -> Result<VarId, AutodiffError> {
    op.outputs()
        .first()
        .copied()
        .ok_or_else(|| AutodiffError::Unsupported {
            op: op.name().to_string(),
            reason: "operation has no outputs".to_string(),
        })
}

fn scalar_operand(op: &Operation) -> Result<f64, AutodiffError> {
    op.args().t(0).ok_or_else(|| AutodiffError::Unsupported {
        op: op.name().to_string(),
        reason: "scalar operand missing from t_args".to_string(),
    })
}

pub fn identity(_: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    Ok(vec![Some(upstream(op, grads)?)])
}

pub fn neg(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.neg(g)?)])
}

pub fn exp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.mul(g, output(op)?)?)])
}

pub fn log(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.div(g, input(op, 0)?)?)])
}

pub fn tanh(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.apply(OpKind::TanhBp, &[output(op)?, g])?)])
}

pub fn sigmoid(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.apply(OpKind::SigmoidBp, &[output(op)?, g])?)])
}

pub fn relu(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    Ok(vec![Some(ctx.apply(OpKind::ReluBp, &[input(op, 0)?, g])?)])
}

pub fn square(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let gx = ctx.mul(g, input(op, 0)?)?;
    Ok(vec![Some(ctx.scalar_mul(gx, 2.0)?)])
}

pub fn sqrt(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let twice = ctx.scalar_mul(output(op)?, 2.0)?;
    Ok(vec![Some(ctx.div(g, twice)?)])
}

/// Gradients flow back through casts between floating types only.
pub fn cast(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let source = ctx.spec(input(op, 0)?)?.dtype;
    if !source.is_floating() {
        return Ok(vec![None]);
    }
    Ok(vec![Some(ctx.cast(g, source)?)])
}

pub fn add(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let (x, y) = (input(op, 0)?, input(op, 1)?);
    Ok(vec![Some(ctx.sum_to(g, x)?), Some(ctx.sum_to(g, y)?)])
}

pub fn sub(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let (x, y) = (input(op, 0)?, input(op, 1)?);
    let dx = ctx.sum_to(g, x)?;
    let negated = ctx.neg(g)?;
    Ok(vec![Some(dx), Some(ctx.sum_to(negated, y)?)])
}

pub fn mul(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let (x, y) = (input(op, 0)?, input(op, 1)?);
    let gy = ctx.mul(g, y)?;
    let dx = ctx.sum_to(gy, x)?;
    let gx = ctx.mul(g, x)?;
    Ok(vec![Some(dx), Some(ctx.sum_to(gx, y)?)])
}

/// `d(x / y) = g / y` and `-g * (x / y) / y`.
pub fn div(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let (x, y) = (input(op, 0)?, input(op, 1)?);
    let quotient = ctx.div(g, y)?;
    let dx = ctx.sum_to(quotient, x)?;
    let scaled = ctx.mul(g, output(op)?)?;
    let scaled = ctx.div(scaled, y)?;
    let scaled = ctx.neg(scaled)?;
    Ok(vec![Some(dx), Some(ctx.sum_to(scaled, y)?)])
}

pub fn scalar_add(_: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    Ok(vec![Some(upstream(op, grads)?)])
}

pub fn scalar_mul(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let s = scalar_operand(op)?;
    Ok(vec![Some(ctx.scalar_mul(g, s)?)])
}

pub fn scalar_pow(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let s = scalar_operand(op)?;
    let lowered = ctx.scalar_pow(input(op, 0)?, s - 1.0)?;
    let slope = ctx.scalar_mul(lowered, s)?;
    Ok(vec![Some(ctx.mul(g, slope)?)])
}

/// Both operands' gradients, for every combination of transpose flags.
pub fn matmul(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let (a, b) = (input(op, 0)?, input(op, 1)?);
    let (da, db) = match (op.args().flag(0), op.args().flag(1)) {
        (false, false) => (ctx.matmul_t(g, b, false, true)?, ctx.matmul_t(a, g, true, false)?),
        (true, false) => (ctx.matmul_t(b, g, false, true)?, ctx.matmul(a, g)?),
        (false, true) => (ctx.matmul(g, b)?, ctx.matmul_t(g, a, true, false)?),
        (true, true) => (ctx.matmul_t(b, g, true, true)?, ctx.matmul_t(g, a, true, true)?),
    };
    Ok(vec![Some(da), Some(db)])
}

fn reduction_backward(
    ctx: &mut GradContext<'_>,
    op: &Operation,
    grads: &[Option<VarId>],
    kind: OpKind,
) -> RuleResult {
    let g = upstream(op, grads)?;
    let def = OpDef::new(kind)
        .inputs([input(op, 0)?, g])
        .dimensions(op.dimensions().to_vec())
        .args(OpArgs::new().with_b(op.args().flag(0)));
    let outputs = ctx.emit(def)?;
    Ok(vec![outputs.first().copied()])
}

pub fn reduce_sum(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    reduction_backward(ctx, op, grads, OpKind::ReduceSumBp)
}

pub fn reduce_mean(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    reduction_backward(ctx, op, grads, OpKind::ReduceMeanBp)
}

pub fn softmax(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let axis = op.args().i(0).unwrap_or(-1);
    let dx = ctx.apply_with(OpKind::SoftmaxBp, &[output(op)?, g], OpArgs::new().with_i(axis))?;
    Ok(vec![Some(dx)])
}

/// Missing part gradients are filled with zeros before concatenation.
pub fn split(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let axis = op.args().i(0).unwrap_or(0);
    let mut parts = Vec::with_capacity(op.outputs().len());
    for (slot, out) in op.outputs().iter().enumerate() {
        match grads.get(slot).copied().flatten() {
            Some(g) => parts.push(g),
            None => parts.push(ctx.zeros_like(*out)?),
        }
    }
    Ok(vec![Some(ctx.concat(&parts, axis)?)])
}

pub fn concat(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let axis = op.args().i(0).unwrap_or(0);
    let mut sizes = Vec::with_capacity(op.inputs().len());
    for &x in op.inputs() {
        let shape = ctx.spec(x)?.shape;
        let extent = shape
            .normalize_axis(axis)
            .map(|a| shape.dims()[a])
            .unwrap_or(-1);
        if extent < 0 {
            return Err(AutodiffError::Unsupported {
                op: op.name().to_string(),
                reason: format!("concat input extent along axis {axis} is not static"),
            });
        }
        sizes.push(extent);
    }
    let pieces = ctx.split_sizes(g, axis, &sizes)?;
    Ok(pieces.into_iter().map(Some).collect())
}

/// Ops whose outputs do not depend differentiably on their inputs.
pub fn constant_output(_: &mut GradContext<'_>, op: &Operation, _: &[Option<VarId>]) -> RuleResult {
    Ok(vec![None; op.inputs().len()])
}

pub fn add_n(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    op.inputs()
        .iter()
        .map(|&x| ctx.sum_to(g, x).map(Some))
        .collect()
}

/// The backward of a reduction back to `like` is a broadcast up to `grad`'s shape.
pub fn reduce_to_like(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let zeros = ctx.zeros_like(input(op, 0)?)?;
    Ok(vec![Some(ctx.add(zeros, g)?), None])
}

pub fn reduce_sum_bp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let dg = ctx.reduce_sum(g, op.dimensions(), op.args().flag(0))?;
    Ok(vec![None, Some(dg)])
}

pub fn reduce_mean_bp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let g = upstream(op, grads)?;
    let dg = ctx.reduce_mean(g, op.dimensions(), op.args().flag(0))?;
    Ok(vec![None, Some(dg)])
}

/// `tanh_bp(y, g) = g * (1 - y^2)`.
pub fn tanh_bp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let gr = upstream(op, grads)?;
    let (y, g) = (input(op, 0)?, input(op, 1)?);
    let dy = ctx.mul(gr, g)?;
    let dy = ctx.mul(dy, y)?;
    let dy = ctx.scalar_mul(dy, -2.0)?;
    let dg = ctx.apply(OpKind::TanhBp, &[y, gr])?;
    Ok(vec![Some(dy), Some(dg)])
}

/// `sigmoid_bp(y, g) = g * y * (1 - y)`.
pub fn sigmoid_bp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let gr = upstream(op, grads)?;
    let (y, g) = (input(op, 0)?, input(op, 1)?);
    let slope = ctx.scalar_mul(y, -2.0)?;
    let slope = ctx.scalar_add(slope, 1.0)?;
    let dy = ctx.mul(gr, g)?;
    let dy = ctx.mul(dy, slope)?;
    let dg = ctx.apply(OpKind::SigmoidBp, &[y, gr])?;
    Ok(vec![Some(dy), Some(dg)])
}

pub fn relu_bp(ctx: &mut GradContext<'_>, op: &Operation, grads: &[Option<VarId>]) -> RuleResult {
    let gr = upstream(op, grads)?;
    let x = input(op, 0)?;
    Ok(vec![None, Some(ctx.apply(OpKind::ReluBp, &[x, gr])?)])
}
