use std::collections::HashMap;

use flowgraph::codec;
use flowgraph::{DType, Graph, OpId, VarId};
use proptest::prelude::*;
use proptest::sample::Index;

#[derive(Debug, Clone)]
struct Step {
    op: u8,
    lhs: Index,
    rhs: Index,
    control: Option<Index>,
}

fn step() -> impl Strategy<Value = Step> {
    (0u8..8, any::<Index>(), any::<Index>(), proptest::option::of(any::<Index>())).prop_map(
        |(op, lhs, rhs, control)| Step {
            op,
            lhs,
            rhs,
            control,
        },
    )
}

/// Builds a random DAG of square `[2, 2]` values so every op accepts every operand.
fn build(steps: &[Step]) -> Graph {
    let mut graph = Graph::new();
    let mut values: Vec<VarId> = vec![
        graph.add_placeholder("a", DType::Double, [2, 2]).expect("a"),
        graph.add_placeholder("b", DType::Double, [2, 2]).expect("b"),
    ];
    let mut ops: Vec<OpId> = Vec::new();
    for step in steps {
        let lhs = values[step.lhs.index(values.len())];
        let rhs = values[step.rhs.index(values.len())];
        let produced = match step.op {
            0 => vec![graph.add(lhs, rhs).expect("add")],
            1 => vec![graph.mul(lhs, rhs).expect("mul")],
            2 => vec![graph.sub(lhs, rhs).expect("sub")],
            3 => vec![graph.matmul(lhs, rhs).expect("matmul")],
            4 => vec![graph.tanh(lhs).expect("tanh")],
            5 => vec![graph.softmax(lhs, -1).expect("softmax")],
            6 => graph.split(lhs, 0, 2).expect("split"),
            _ => vec![graph.add_n(&[lhs, rhs, lhs]).expect("add_n")],
        };
        let op = graph
            .var(produced[0])
            .and_then(|v| v.producer())
            .map(|(op, _)| op)
            .expect("producer");
        // Only ever point control deps backwards in creation order, which cannot close a cycle.
        if let (Some(control), false) = (&step.control, ops.is_empty()) {
            let dep = ops[control.index(ops.len())];
            graph.add_control_dependency(op, dep).expect("control dep");
        }
        ops.push(op);
        // Split halves are [1, 2]; keep only square values as future operands.
        if step.op != 6 {
            values.extend(produced);
        }
    }
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn topological_order_respects_data_and_control_edges(steps in prop::collection::vec(step(), 1..24)) {
        let graph = build(&steps);
        let order = graph.topological_order().expect("acyclic");
        prop_assert_eq!(order.len(), graph.num_operations());

        let position: HashMap<OpId, usize> =
            order.iter().enumerate().map(|(i, op)| (*op, i)).collect();
        for op in graph.operations() {
            let at = position[&op.id()];
            for input in op.inputs() {
                if let Some((producer, _)) = graph.var(*input).and_then(|v| v.producer()) {
                    prop_assert!(position[&producer] < at, "{} runs before its input", op.name());
                }
            }
            for dep in op.control_deps() {
                prop_assert!(position[dep] < at, "{} runs before its control dep", op.name());
            }
        }
    }

    #[test]
    fn codec_round_trip_is_idempotent(steps in prop::collection::vec(step(), 1..24)) {
        let graph = build(&steps);
        let bytes = codec::encode(&graph);
        let once = codec::decode(&bytes).expect("decode");
        prop_assert!(graph.structurally_eq(&once));
        let again = codec::encode(&once);
        prop_assert_eq!(&again, &bytes);
        let twice = codec::decode(&again).expect("decode again");
        prop_assert!(once.structurally_eq(&twice));
    }
}
