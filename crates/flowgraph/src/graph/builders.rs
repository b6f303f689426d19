//! Shorthand constructors for common operations. Each adds one auto-named op.

use crate::ops::{OpArgs, OpKind};
use crate::tensor::DType;

use super::{Graph, GraphError, OpDef, VarId};

impl Graph {
    fn single(&mut self, def: OpDef) -> Result<VarId, GraphError> {
        let kind = def.kind;
        let outputs = self.emit(def)?;
        match outputs.as_slice() {
            [only] => Ok(*only),
            _ => Err(GraphError::InvalidOperation {
                op: kind.name().to_string(),
                kind,
                reason: format!("expected a single output, got {}", outputs.len()),
            }),
        }
    }

    /// Adds a single-output op of `kind` over `inputs`.
    pub fn apply(&mut self, kind: OpKind, inputs: &[VarId]) -> Result<VarId, GraphError> {
        self.single(OpDef::new(kind).inputs(inputs.iter().copied()))
    }

    pub fn apply_with(
        &mut self,
        kind: OpKind,
        inputs: &[VarId],
        args: OpArgs,
    ) -> Result<VarId, GraphError> {
        self.single(OpDef::new(kind).inputs(inputs.iter().copied()).args(args))
    }

    pub fn identity(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Identity, &[x])
    }

    pub fn neg(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Neg, &[x])
    }

    pub fn exp(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Exp, &[x])
    }

    pub fn log(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Log, &[x])
    }

    pub fn tanh(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Tanh, &[x])
    }

    pub fn sigmoid(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Sigmoid, &[x])
    }

    pub fn relu(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Relu, &[x])
    }

    pub fn square(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Square, &[x])
    }

    pub fn sqrt(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Sqrt, &[x])
    }

    pub fn cast(&mut self, x: VarId, dtype: DType) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::Cast, &[x], OpArgs::new().with_d(dtype))
    }

    pub fn add(&mut self, a: VarId, b: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Add, &[a, b])
    }

    pub fn sub(&mut self, a: VarId, b: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: VarId, b: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Mul, &[a, b])
    }

    pub fn div(&mut self, a: VarId, b: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::Div, &[a, b])
    }

    pub fn scalar_add(&mut self, x: VarId, value: f64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::ScalarAdd, &[x], OpArgs::new().with_t(value))
    }

    pub fn scalar_mul(&mut self, x: VarId, value: f64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::ScalarMul, &[x], OpArgs::new().with_t(value))
    }

    pub fn scalar_pow(&mut self, x: VarId, exponent: f64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::ScalarPow, &[x], OpArgs::new().with_t(exponent))
    }

    pub fn matmul(&mut self, a: VarId, b: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::MatMul, &[a, b])
    }

    /// `op(a) @ op(b)` where `op` transposes when the matching flag is set.
    pub fn matmul_t(
        &mut self,
        a: VarId,
        b: VarId,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<VarId, GraphError> {
        self.apply_with(
            OpKind::MatMul,
            &[a, b],
            OpArgs::new().with_b(transpose_a).with_b(transpose_b),
        )
    }

    /// Sums over `axes` (all axes when empty).
    pub fn reduce_sum(
        &mut self,
        x: VarId,
        axes: &[i64],
        keep_dims: bool,
    ) -> Result<VarId, GraphError> {
        self.single(
            OpDef::new(OpKind::ReduceSum)
                .input(x)
                .dimensions(axes.to_vec())
                .args(OpArgs::new().with_b(keep_dims)),
        )
    }

    pub fn reduce_mean(
        &mut self,
        x: VarId,
        axes: &[i64],
        keep_dims: bool,
    ) -> Result<VarId, GraphError> {
        self.single(
            OpDef::new(OpKind::ReduceMean)
                .input(x)
                .dimensions(axes.to_vec())
                .args(OpArgs::new().with_b(keep_dims)),
        )
    }

    pub fn softmax(&mut self, x: VarId, axis: i64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::Softmax, &[x], OpArgs::new().with_i(axis))
    }

    /// Splits `x` evenly along `axis` into `parts` outputs.
    pub fn split(&mut self, x: VarId, axis: i64, parts: usize) -> Result<Vec<VarId>, GraphError> {
        self.emit(
            OpDef::new(OpKind::Split)
                .input(x)
                .args(OpArgs::new().with_i(axis).with_i(parts as i64)),
        )
    }

    pub fn concat(&mut self, inputs: &[VarId], axis: i64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::Concat, inputs, OpArgs::new().with_i(axis))
    }

    pub fn argmax(&mut self, x: VarId, axis: i64) -> Result<VarId, GraphError> {
        self.apply_with(OpKind::ArgMax, &[x], OpArgs::new().with_i(axis))
    }

    pub fn ones_like(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::OnesLike, &[x])
    }

    pub fn zeros_like(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::ZerosLike, &[x])
    }

    pub fn stop_gradient(&mut self, x: VarId) -> Result<VarId, GraphError> {
        self.apply(OpKind::StopGradient, &[x])
    }

    pub fn add_n(&mut self, inputs: &[VarId]) -> Result<VarId, GraphError> {
        self.apply(OpKind::AddN, inputs)
    }
}
