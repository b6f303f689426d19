use std::ops::{Deref, DerefMut};

use crate::graph::{Graph, OpDef, VarId};
use crate::ops::{OpArgs, OpKind};
use crate::tensor::TensorSpec;

use super::AutodiffError;

/// Handle through which gradient rules append backward operations.
///
/// Derefs to the graph under construction, so rules use the ordinary builder methods
/// (`ctx.mul(g, x)?`) and read forward specs through [`GradContext::spec`].
pub struct GradContext<'g> {
    graph: &'g mut Graph,
}

impl<'g> GradContext<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        GradContext { graph }
    }

    /// Spec of a forward or backward variable.
    pub fn spec(&self, var: VarId) -> Result<TensorSpec, AutodiffError> {
        self.graph
            .var(var)
            .map(|v| v.spec().clone())
            .ok_or_else(|| AutodiffError::UnknownVariable {
                name: var.to_string(),
            })
    }

    /// Reduces a broadcast gradient `grad` back to the shape of `like`.
    ///
    /// Emits nothing when both shapes are statically known and equal.
    pub fn sum_to(&mut self, grad: VarId, like: VarId) -> Result<VarId, AutodiffError> {
        let grad_spec = self.spec(grad)?;
        let like_spec = self.spec(like)?;
        if grad_spec.shape == like_spec.shape && like_spec.shape.is_fully_known() {
            return Ok(grad);
        }
        Ok(self.graph.apply(OpKind::ReduceToLike, &[grad, like])?)
    }

    /// Splits `x` along `axis` into pieces of the given extents.
    pub fn split_sizes(
        &mut self,
        x: VarId,
        axis: i64,
        sizes: &[i64],
    ) -> Result<Vec<VarId>, AutodiffError> {
        let mut args = OpArgs::new().with_i(axis).with_i(sizes.len() as i64);
        for &size in sizes {
            args = args.with_i(size);
        }
        Ok(self.graph.emit(OpDef::new(OpKind::Split).input(x).args(args))?)
    }
}

impl Deref for GradContext<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        self.graph
    }
}

impl DerefMut for GradContext<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        self.graph
    }
}
