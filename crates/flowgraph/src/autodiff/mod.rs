//! Reverse-mode differentiation from graph to graph.
//!
//! [`AutodiffBuilder::build`] clones the forward graph and appends backward operations to it,
//! so the result can be executed, encoded and differentiated again like any other graph.

mod context;
pub mod rules;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{Graph, GraphError, OpDef, OpId, VarId, VariableKind};
use crate::ops::{OpKind, OpRegistry};
use crate::tensor::DType;

pub use context::GradContext;
pub use rules::GradientRule;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutodiffError {
    #[error("no gradient rule for operation `{op}` of type {kind}")]
    NoGradientRule { op: String, kind: OpKind },
    #[error("unknown variable `{name}`")]
    UnknownVariable { name: String },
    #[error("`{name}` has dtype {dtype} and cannot be differentiated")]
    NotDifferentiable { name: String, dtype: DType },
    #[error("no loss variables given and the graph declares none")]
    MissingLoss,
    #[error("cannot differentiate `{op}`: {reason}")]
    Unsupported { op: String, reason: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// One gradient flowing into a variable: `(consumer, input slot, gradient)`.
/// Seeds have no consumer and sort first.
type Contribution = (Option<OpId>, usize, VarId);

/// Builds gradient graphs with a given registry's rules.
#[derive(Clone)]
pub struct AutodiffBuilder {
    registry: Arc<OpRegistry>,
    external: BTreeSet<String>,
}

impl AutodiffBuilder {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        AutodiffBuilder {
            registry,
            external: BTreeSet::new(),
        }
    }

    /// Seeds `loss` from a new placeholder `<loss>-grad` instead of ones, for composing the
    /// backward pass into a larger graph.
    pub fn with_external_gradient(mut self, loss: impl Into<String>) -> Self {
        self.external.insert(loss.into());
        self
    }

    /// Differentiates `losses` (or the graph's declared losses when empty) with respect to
    /// `wrt`.
    pub fn build(&self, graph: &Graph, losses: &[&str], wrt: &[&str]) -> Result<Graph, AutodiffError> {
        let loss_ids = self.resolve_losses(graph, losses)?;
        let wrt_ids = resolve_wrt(graph, wrt)?;
        let wrt_set: HashSet<VarId> = wrt_ids.iter().copied().collect();

        // Differentiate only what lies between a wrt variable and a loss, and stop at ops that
        // themselves produce a wrt variable.
        let forward = graph.descendants_of(&wrt_ids);
        let backward = graph.ancestors_of(&loss_ids);
        let relevant: HashSet<OpId> = forward
            .intersection(&backward)
            .copied()
            .filter(|id| {
                graph
                    .op(*id)
                    .is_some_and(|op| !op.outputs().iter().any(|v| wrt_set.contains(v)))
            })
            .collect();
        let order = graph.order_subset(&relevant)?;

        let on_path = |var: VarId| -> bool {
            let Some(variable) = graph.var(var) else { return false };
            if variable.kind() == VariableKind::Constant || !variable.spec().dtype.is_floating() {
                return false;
            }
            wrt_set.contains(&var)
                || variable
                    .producer()
                    .is_some_and(|(op, _)| relevant.contains(&op))
        };

        let mut out = graph.clone();
        let mut pending: BTreeMap<VarId, Vec<Contribution>> = BTreeMap::new();
        let mut resolved: HashMap<VarId, Option<VarId>> = HashMap::new();

        for &loss in &loss_ids {
            if !on_path(loss) {
                log::debug!("loss `{}` does not depend on any wrt variable", graph.var_name(loss));
                continue;
            }
            let seed = self.seed(&mut out, graph, loss)?;
            pending.entry(loss).or_default().push((None, 0, seed));
        }

        for &op_id in order.iter().rev() {
            let Some(op) = graph.op(op_id) else { continue };
            let mut upstream = Vec::with_capacity(op.outputs().len());
            for &var in op.outputs() {
                upstream.push(accumulate(&mut out, &mut pending, &mut resolved, var)?);
            }
            if upstream.iter().all(Option::is_none) {
                continue;
            }
            let rule = self
                .registry
                .gradient_rule(op.kind())
                .ok_or_else(|| AutodiffError::NoGradientRule {
                    op: op.name().to_string(),
                    kind: op.kind(),
                })?;
            let input_grads = {
                let mut ctx = GradContext::new(&mut out);
                rule(&mut ctx, op, &upstream)?
            };
            if input_grads.len() != op.inputs().len() {
                return Err(AutodiffError::Unsupported {
                    op: op.name().to_string(),
                    reason: format!(
                        "rule returned {} gradients for {} inputs",
                        input_grads.len(),
                        op.inputs().len()
                    ),
                });
            }
            for (slot, (&x, grad)) in op.inputs().iter().zip(input_grads).enumerate() {
                if let Some(grad) = grad {
                    if on_path(x) {
                        pending.entry(x).or_default().push((Some(op_id), slot, grad));
                    }
                }
            }
        }

        for &var in &wrt_ids {
            let name = graph.var_name(var).to_string();
            let Some(grad) = accumulate(&mut out, &mut pending, &mut resolved, var)? else {
                log::debug!("`{name}` does not influence the loss; no gradient produced");
                continue;
            };
            let grad_name = out.unique_name(&format!("{name}-grad"));
            let linked = out.emit(OpDef::new(OpKind::Identity).name(grad_name).input(grad))?;
            if let Some(&linked) = linked.first() {
                out.set_gradient(var, linked);
            }
        }

        log::debug!(
            "gradient graph: {} forward ops differentiated, {} ops total",
            order.len(),
            out.num_operations()
        );
        Ok(out)
    }

    fn resolve_losses(&self, graph: &Graph, losses: &[&str]) -> Result<Vec<VarId>, AutodiffError> {
        if losses.is_empty() {
            if graph.loss_variables().is_empty() {
                return Err(AutodiffError::MissingLoss);
            }
            return Ok(graph.loss_variables().to_vec());
        }
        losses
            .iter()
            .map(|name| {
                graph.var_id(name).ok_or_else(|| AutodiffError::UnknownVariable {
                    name: name.to_string(),
                })
            })
            .collect()
    }

    fn seed(&self, out: &mut Graph, graph: &Graph, loss: VarId) -> Result<VarId, AutodiffError> {
        let name = graph.var_name(loss);
        if self.external.contains(name) {
            let spec = graph
                .var(loss)
                .map(|v| v.spec().clone())
                .ok_or_else(|| AutodiffError::UnknownVariable {
                    name: name.to_string(),
                })?;
            let placeholder = out.unique_name(&format!("{name}-grad"));
            return Ok(out.add_placeholder(&placeholder, spec.dtype, spec.shape)?);
        }
        Ok(out.ones_like(loss)?)
    }
}

impl Default for AutodiffBuilder {
    fn default() -> Self {
        Self::new(OpRegistry::global())
    }
}

/// Differentiates with the process-wide registry.
pub fn build_gradient_graph(graph: &Graph, losses: &[&str], wrt: &[&str]) -> Result<Graph, AutodiffError> {
    AutodiffBuilder::default().build(graph, losses, wrt)
}

fn resolve_wrt(graph: &Graph, wrt: &[&str]) -> Result<Vec<VarId>, AutodiffError> {
    let mut ids = Vec::with_capacity(wrt.len());
    for name in wrt {
        let variable = graph
            .variable(name)
            .ok_or_else(|| AutodiffError::UnknownVariable {
                name: name.to_string(),
            })?;
        if !variable.spec().dtype.is_floating() {
            return Err(AutodiffError::NotDifferentiable {
                name: name.to_string(),
                dtype: variable.spec().dtype,
            });
        }
        if variable.kind() == VariableKind::Constant {
            log::debug!("`{name}` is a constant; no gradient produced");
            continue;
        }
        if !ids.contains(&variable.id()) {
            ids.push(variable.id());
        }
    }
    Ok(ids)
}

/// Sums every contribution to `var` in consumer-creation order, once.
fn accumulate(
    out: &mut Graph,
    pending: &mut BTreeMap<VarId, Vec<Contribution>>,
    resolved: &mut HashMap<VarId, Option<VarId>>,
    var: VarId,
) -> Result<Option<VarId>, AutodiffError> {
    if let Some(done) = resolved.get(&var) {
        return Ok(*done);
    }
    let mut parts = pending.remove(&var).unwrap_or_default();
    parts.sort_by_key(|(consumer, slot, _)| (*consumer, *slot));
    let grads: Vec<VarId> = parts.into_iter().map(|(_, _, grad)| grad).collect();
    let total = match grads.as_slice() {
        [] => None,
        [single] => Some(*single),
        _ => Some(out.add_n(&grads)?),
    };
    resolved.insert(var, total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn count(graph: &Graph, kind: OpKind) -> usize {
        graph.operations().filter(|op| op.kind() == kind).count()
    }

    #[test]
    fn shared_input_is_accumulated_once_in_consumer_order() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2, 2]).unwrap();
        let a = graph.exp(x).unwrap();
        let b = graph.tanh(x).unwrap();
        let y = graph.add(a, b).unwrap();
        let loss = graph.reduce_sum(y, &[], false).unwrap();
        let loss_name = graph.var_name(loss).to_string();

        let grads = build_gradient_graph(&graph, &[&loss_name], &["x"]).unwrap();
        assert_eq!(count(&grads, OpKind::AddN), 1);
        let add_n = grads
            .operations()
            .find(|op| op.kind() == OpKind::AddN)
            .unwrap();
        // The exp branch was created first, so its contribution comes first.
        let first = grads.var(add_n.inputs()[0]).unwrap();
        let producer = grads.op(first.producer().unwrap().0).unwrap();
        assert_eq!(producer.kind(), OpKind::Mul);
        assert!(grads.gradient_of("x").is_some());
        assert_eq!(grads.gradient_of("x").unwrap().name(), "x-grad");
    }

    #[test]
    fn missing_rule_names_the_operation() {
        let registry = OpRegistry::builder().without_gradient(OpKind::Tanh).build();
        let mut graph = Graph::with_registry(Arc::clone(&registry));
        let x = graph.add_placeholder("x", DType::Float, [3]).unwrap();
        let t = graph.tanh(x).unwrap();
        let name = graph.var_name(t).to_string();
        let err = AutodiffBuilder::new(registry)
            .build(&graph, &[&name], &["x"])
            .expect_err("tanh has no rule");
        assert_eq!(
            err,
            AutodiffError::NoGradientRule {
                op: "tanh".into(),
                kind: OpKind::Tanh
            }
        );
    }

    #[test]
    fn constants_and_unrelated_variables_get_no_gradient() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2]).unwrap();
        let c = graph.add_constant("c", Tensor::filled(&[2], 2.0f32)).unwrap();
        graph.add_placeholder("unused", DType::Float, [2]).unwrap();
        let y = graph.mul(x, c).unwrap();
        let name = graph.var_name(y).to_string();
        let grads = build_gradient_graph(&graph, &[&name], &["x", "c", "unused"]).unwrap();
        assert!(grads.gradient_of("x").is_some());
        assert!(grads.gradient_of("c").is_none());
        assert!(grads.gradient_of("unused").is_none());
    }

    #[test]
    fn integer_wrt_is_rejected() {
        let mut graph = Graph::new();
        let i = graph.add_placeholder("i", DType::Int64, [2]).unwrap();
        graph.identity(i).unwrap();
        let err = build_gradient_graph(&graph, &["identity"], &["i"]).expect_err("int wrt");
        assert!(matches!(err, AutodiffError::NotDifferentiable { .. }));
    }

    #[test]
    fn external_gradient_becomes_a_placeholder() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [4]).unwrap();
        graph.sigmoid(x).unwrap();
        let grads = AutodiffBuilder::default()
            .with_external_gradient("sigmoid")
            .build(&graph, &["sigmoid"], &["x"])
            .unwrap();
        let seed = grads.variable("sigmoid-grad").unwrap();
        assert_eq!(seed.kind(), VariableKind::Placeholder);
        assert_eq!(count(&grads, OpKind::OnesLike), 0);
    }

    #[test]
    fn forward_graph_is_left_untouched() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2]).unwrap();
        graph.square(x).unwrap();
        let before = graph.num_operations();
        let grads = build_gradient_graph(&graph, &["square"], &["x"]).unwrap();
        assert_eq!(graph.num_operations(), before);
        assert!(grads.num_operations() > before);
        assert_ne!(grads.uid(), graph.uid());
    }
}
