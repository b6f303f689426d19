//! Ordering and reachability queries over the operation graph.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use super::{Graph, GraphError, OpId, VarId};

impl Graph {
    /// Operations `op` must wait for: producers of its inputs and variable control deps, plus
    /// its explicit control deps. Sorted and deduplicated.
    pub fn dependencies(&self, op: OpId) -> Vec<OpId> {
        let Some(op) = self.operations.get(&op) else {
            return Vec::new();
        };
        let mut deps = BTreeSet::new();
        for var in op.inputs.iter().chain(&op.var_control_deps) {
            if let Some((producer, _)) = self.variables.get(var).and_then(|v| v.producer) {
                deps.insert(producer);
            }
        }
        deps.extend(op.control_deps.iter().copied());
        deps.into_iter().collect()
    }

    /// Every operation in dependency order. Among ready operations the lowest creation id runs
    /// first, so the order is reproducible.
    pub fn topological_order(&self) -> Result<Vec<OpId>, GraphError> {
        let all: HashSet<OpId> = self.operations.keys().copied().collect();
        self.order_subset(&all)
    }

    /// Orders `subset` using only dependency edges that stay inside it.
    pub(crate) fn order_subset(&self, subset: &HashSet<OpId>) -> Result<Vec<OpId>, GraphError> {
        let mut pending: HashMap<OpId, usize> = HashMap::with_capacity(subset.len());
        let mut dependents: HashMap<OpId, Vec<OpId>> = HashMap::new();
        for &op in subset {
            let deps: Vec<OpId> = self
                .dependencies(op)
                .into_iter()
                .filter(|dep| subset.contains(dep))
                .collect();
            pending.insert(op, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(op);
            }
        }

        let mut ready: BinaryHeap<Reverse<OpId>> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&op, _)| Reverse(op))
            .collect();
        let mut order = Vec::with_capacity(subset.len());
        while let Some(Reverse(op)) = ready.pop() {
            order.push(op);
            for next in dependents.get(&op).into_iter().flatten() {
                if let Some(count) = pending.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(*next));
                    }
                }
            }
        }

        if order.len() != subset.len() {
            let stuck = pending
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(&op, _)| op)
                .min()
                .map(|op| self.op_name(op).to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle { op: stuck });
        }
        Ok(order)
    }

    /// Operations needed to compute `targets`, found by walking producers backwards.
    pub fn ancestors_of(&self, targets: &[VarId]) -> HashSet<OpId> {
        let mut worklist: Vec<OpId> = targets
            .iter()
            .filter_map(|v| self.variables.get(v).and_then(|v| v.producer))
            .map(|(op, _)| op)
            .collect();
        let mut live = HashSet::new();
        while let Some(op) = worklist.pop() {
            if !live.insert(op) {
                continue;
            }
            worklist.extend(self.dependencies(op));
        }
        live
    }

    /// Operations reachable downstream from any of `sources` through data edges.
    pub fn descendants_of(&self, sources: &[VarId]) -> HashSet<OpId> {
        let mut worklist: Vec<OpId> = sources
            .iter()
            .filter_map(|v| self.variables.get(v))
            .flat_map(|v| v.consumers.iter().copied())
            .collect();
        let mut seen = HashSet::new();
        while let Some(op) = worklist.pop() {
            if !seen.insert(op) {
                continue;
            }
            if let Some(op) = self.operations.get(&op) {
                for out in &op.outputs {
                    if let Some(v) = self.variables.get(out) {
                        worklist.extend(v.consumers.iter().copied());
                    }
                }
            }
        }
        seen
    }

    /// Whether `to` transitively depends on `from`.
    pub(crate) fn reaches(&self, from: OpId, to: OpId) -> bool {
        let mut worklist = vec![to];
        let mut seen = HashSet::new();
        while let Some(op) = worklist.pop() {
            if op == from {
                return true;
            }
            if seen.insert(op) {
                worklist.extend(self.dependencies(op));
            }
        }
        false
    }

    /// Checks that `order` places every operation after all of its dependencies.
    pub fn is_valid_order(&self, order: &[OpId]) -> bool {
        let position: HashMap<OpId, usize> =
            order.iter().enumerate().map(|(i, op)| (*op, i)).collect();
        order.iter().enumerate().all(|(i, op)| {
            self.dependencies(*op)
                .iter()
                .all(|dep| position.get(dep).is_some_and(|&p| p < i))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{Graph, OpDef};
    use crate::ops::OpKind;
    use crate::tensor::DType;

    #[test]
    fn ties_break_on_creation_id() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2]).unwrap();
        let late = graph.add_placeholder("y", DType::Float, [2]).unwrap();
        let a = graph.add_operation(OpDef::new(OpKind::Neg).input(late)).unwrap();
        let b = graph.add_operation(OpDef::new(OpKind::Exp).input(x)).unwrap();
        let a_out = graph.op(a).unwrap().outputs()[0];
        let b_out = graph.op(b).unwrap().outputs()[0];
        let c = graph
            .add_operation(OpDef::new(OpKind::Add).inputs([b_out, a_out]))
            .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec![a, b, c]);
        assert!(graph.is_valid_order(&order));
        assert!(!graph.is_valid_order(&[c, a, b]));
    }

    #[test]
    fn control_deps_constrain_order() {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2]).unwrap();
        let first = graph.add_operation(OpDef::new(OpKind::Neg).input(x)).unwrap();
        let second = graph
            .add_operation(OpDef::new(OpKind::Exp).input(x).control_dep(first))
            .unwrap();
        graph.add_control_dependency(first, second).unwrap_err();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec![first, second]);
        assert_eq!(graph.dependencies(second), vec![first]);
    }
}
