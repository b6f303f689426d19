//! The op dispatch table: one descriptor per [`OpKind`] carrying its name, serialized family,
//! output inference and gradient rule.
//!
//! A registry is built once and then shared read-only. `OpRegistry::global()` hands out a lazily
//! built process-wide instance; tests that want to alter gradient rules build their own through
//! [`OpRegistry::builder`] and pass it explicitly to graphs, the autodiff builder and the codec.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::autodiff::rules::{self, GradientRule};

use super::infer::{self, InferFn, InferInput, InferResult};
use super::kind::{OpKind, OpType};

/// Static facts the engine knows about one op kind.
#[derive(Clone, Copy)]
pub struct OpDescriptor {
    pub kind: OpKind,
    pub infer: InferFn,
    pub gradient: Option<GradientRule>,
}

impl OpDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }
}

impl fmt::Debug for OpDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDescriptor")
            .field("kind", &self.kind)
            .field("op_type", &self.op_type())
            .field("has_gradient", &self.gradient.is_some())
            .finish()
    }
}

fn standard_descriptor(kind: OpKind) -> OpDescriptor {
    let (infer, gradient): (InferFn, Option<GradientRule>) = match kind {
        OpKind::Identity => (infer::unary_same, Some(rules::identity)),
        OpKind::Neg => (infer::unary_same, Some(rules::neg)),
        OpKind::Exp => (infer::unary_floating, Some(rules::exp)),
        OpKind::Log => (infer::unary_floating, Some(rules::log)),
        OpKind::Tanh => (infer::unary_floating, Some(rules::tanh)),
        OpKind::Sigmoid => (infer::unary_floating, Some(rules::sigmoid)),
        OpKind::Relu => (infer::unary_same, Some(rules::relu)),
        OpKind::Square => (infer::unary_same, Some(rules::square)),
        OpKind::Sqrt => (infer::unary_floating, Some(rules::sqrt)),
        OpKind::Cast => (infer::cast, Some(rules::cast)),
        OpKind::Add => (infer::binary_broadcast, Some(rules::add)),
        OpKind::Sub => (infer::binary_broadcast, Some(rules::sub)),
        OpKind::Mul => (infer::binary_broadcast, Some(rules::mul)),
        OpKind::Div => (infer::binary_broadcast, Some(rules::div)),
        OpKind::ScalarAdd => (infer::scalar, Some(rules::scalar_add)),
        OpKind::ScalarMul => (infer::scalar, Some(rules::scalar_mul)),
        OpKind::ScalarPow => (infer::scalar, Some(rules::scalar_pow)),
        OpKind::MatMul => (infer::matmul, Some(rules::matmul)),
        OpKind::ReduceSum => (infer::reduce, Some(rules::reduce_sum)),
        OpKind::ReduceMean => (infer::reduce, Some(rules::reduce_mean)),
        OpKind::Softmax => (infer::softmax, Some(rules::softmax)),
        OpKind::Split => (infer::split, Some(rules::split)),
        OpKind::Concat => (infer::concat, Some(rules::concat)),
        OpKind::ArgMax => (infer::argmax, None),
        OpKind::OnesLike | OpKind::ZerosLike => (infer::unary_same, Some(rules::constant_output)),
        OpKind::StopGradient => (infer::unary_same, Some(rules::constant_output)),
        OpKind::AddN => (infer::add_n, Some(rules::add_n)),
        OpKind::ReduceToLike => (infer::reduce_to_like, Some(rules::reduce_to_like)),
        OpKind::ReduceSumBp => (infer::like_first_with_grad, Some(rules::reduce_sum_bp)),
        OpKind::ReduceMeanBp => (infer::like_first_with_grad, Some(rules::reduce_mean_bp)),
        OpKind::SoftmaxBp => (infer::elementwise_bp, None),
        OpKind::TanhBp => (infer::elementwise_bp, Some(rules::tanh_bp)),
        OpKind::SigmoidBp => (infer::elementwise_bp, Some(rules::sigmoid_bp)),
        OpKind::ReluBp => (infer::elementwise_bp, Some(rules::relu_bp)),
    };
    OpDescriptor {
        kind,
        infer,
        gradient,
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<OpRegistry>> = Lazy::new(|| Arc::new(OpRegistry::standard()));

/// Constructed-once table mapping every [`OpKind`] to its [`OpDescriptor`].
pub struct OpRegistry {
    table: Vec<OpDescriptor>,
}

impl OpRegistry {
    /// Builds a fresh registry with the standard inference and gradient rules.
    pub fn standard() -> Self {
        OpRegistry {
            table: OpKind::ALL.iter().map(|&kind| standard_descriptor(kind)).collect(),
        }
    }

    /// Process-wide registry, built on first use and immutable afterwards.
    pub fn global() -> Arc<OpRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn builder() -> OpRegistryBuilder {
        OpRegistryBuilder {
            registry: OpRegistry::standard(),
        }
    }

    pub fn descriptor(&self, kind: OpKind) -> &OpDescriptor {
        &self.table[kind.ordinal()]
    }

    pub fn gradient_rule(&self, kind: OpKind) -> Option<GradientRule> {
        self.descriptor(kind).gradient
    }

    /// Resolves a serialized op name back to its kind.
    pub fn by_name(&self, name: &str) -> Option<OpKind> {
        self.table
            .iter()
            .find(|descriptor| descriptor.name() == name)
            .map(|descriptor| descriptor.kind)
    }

    pub fn infer(&self, kind: OpKind, input: &InferInput<'_>) -> InferResult {
        (self.descriptor(kind).infer)(input)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OpDescriptor> {
        self.table.iter()
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("kinds", &self.table.len())
            .finish()
    }
}

/// Adjusts gradient rules before freezing a registry.
pub struct OpRegistryBuilder {
    registry: OpRegistry,
}

impl OpRegistryBuilder {
    pub fn without_gradient(mut self, kind: OpKind) -> Self {
        self.registry.table[kind.ordinal()].gradient = None;
        self
    }

    pub fn with_gradient(mut self, kind: OpKind, rule: GradientRule) -> Self {
        self.registry.table[kind.ordinal()].gradient = Some(rule);
        self
    }

    pub fn build(self) -> Arc<OpRegistry> {
        Arc::new(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_kind_in_order() {
        let registry = OpRegistry::standard();
        for kind in OpKind::ALL {
            assert_eq!(registry.descriptor(kind).kind, kind);
            assert_eq!(registry.by_name(kind.name()), Some(kind));
        }
        assert_eq!(registry.by_name("conv2d"), None);
    }

    #[test]
    fn builder_can_drop_a_rule_without_touching_global() {
        let custom = OpRegistry::builder().without_gradient(OpKind::Mul).build();
        assert!(custom.gradient_rule(OpKind::Mul).is_none());
        assert!(OpRegistry::global().gradient_rule(OpKind::Mul).is_some());
        assert!(custom.gradient_rule(OpKind::ArgMax).is_none());
    }
}
