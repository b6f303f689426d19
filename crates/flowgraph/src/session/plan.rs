//! Pruned execution plans.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::graph::{Graph, OpId, VarId, VariableKind};
use crate::hashing::fingerprint_names;

use super::SessionError;

/// Cache key for a plan: graph identity, structural version and the requested outputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(super) struct PlanKey {
    pub(super) graph_uid: u64,
    pub(super) version: u64,
    pub(super) outputs_hash: u64,
}

impl PlanKey {
    pub(super) fn new(graph: &Graph, outputs: &[&str]) -> Self {
        PlanKey {
            graph_uid: graph.uid(),
            version: graph.version(),
            outputs_hash: fingerprint_names(outputs),
        }
    }
}

/// The minimal ordered subgraph that produces a set of requested outputs.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub(crate) requested: Vec<String>,
    pub(crate) outputs: Vec<VarId>,
    pub(crate) output_set: HashSet<VarId>,
    pub(crate) order: Vec<OpId>,
    /// Placeholders that must be fed.
    pub(crate) placeholders: BTreeSet<VarId>,
    /// Constants and variables read by the plan.
    pub(crate) bound: BTreeSet<VarId>,
    /// Number of plan operations reading each variable.
    pub(crate) uses: HashMap<VarId, usize>,
}

impl ExecutionPlan {
    /// Prunes `graph` to the operations backward-reachable from `outputs`.
    pub fn build(graph: &Graph, outputs: &[&str]) -> Result<Self, SessionError> {
        let mut ids = Vec::with_capacity(outputs.len());
        for name in outputs {
            let variable = graph
                .variable(name)
                .ok_or_else(|| SessionError::UnresolvedOutput {
                    name: name.to_string(),
                })?;
            if variable.kind() == VariableKind::Array && variable.producer().is_none() {
                return Err(SessionError::UnresolvedOutput {
                    name: name.to_string(),
                });
            }
            ids.push(variable.id());
        }

        let live = graph.ancestors_of(&ids);
        let order = graph.order_subset(&live)?;

        let mut placeholders = BTreeSet::new();
        let mut bound = BTreeSet::new();
        let mut uses: HashMap<VarId, usize> = HashMap::new();
        let mut classify = |var: VarId| -> Result<(), SessionError> {
            let variable = graph.var(var).ok_or_else(|| SessionError::UnresolvedOutput {
                name: var.to_string(),
            })?;
            match variable.kind() {
                VariableKind::Placeholder => {
                    placeholders.insert(var);
                }
                VariableKind::Constant | VariableKind::Variable => {
                    bound.insert(var);
                }
                VariableKind::Array if variable.producer().is_none() => {
                    return Err(SessionError::UnresolvedOutput {
                        name: variable.name().to_string(),
                    });
                }
                VariableKind::Array => {}
            }
            Ok(())
        };

        for &var in &ids {
            classify(var)?;
        }
        for op_id in &order {
            let Some(op) = graph.op(*op_id) else { continue };
            let mut seen = HashSet::new();
            for &input in op.inputs() {
                classify(input)?;
                if seen.insert(input) {
                    *uses.entry(input).or_default() += 1;
                }
            }
            for &var in op.var_control_deps() {
                classify(var)?;
            }
        }

        log::debug!(
            "planned {} of {} operations for outputs {:?}",
            order.len(),
            graph.num_operations(),
            outputs
        );

        Ok(ExecutionPlan {
            requested: outputs.iter().map(|s| s.to_string()).collect(),
            output_set: ids.iter().copied().collect(),
            outputs: ids,
            order,
            placeholders,
            bound,
            uses,
        })
    }

    /// Operations that will run, in execution order.
    pub fn order(&self) -> &[OpId] {
        &self.order
    }

    pub fn placeholders(&self) -> impl Iterator<Item = VarId> + '_ {
        self.placeholders.iter().copied()
    }

    pub(super) fn matches(&self, outputs: &[&str]) -> bool {
        self.requested.len() == outputs.len()
            && self.requested.iter().zip(outputs).all(|(a, b)| a == b)
    }
}
