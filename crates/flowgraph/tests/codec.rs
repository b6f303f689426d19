use std::collections::HashMap;
use std::sync::Arc;

use flowgraph::codec::{self, CodecError};
use flowgraph::ops::PropertyKind;
use flowgraph::{
    ByteOrder, DType, Graph, GraphCodec, OpDef, OpKind, OpType, PropertyValue, Session, Tensor,
    VariableKind,
};
use flowgraph_backend_ref_cpu::CpuBackend;

fn assert_round_trips(graph: &Graph) {
    let bytes = codec::encode(graph);
    let once = codec::decode(&bytes).expect("first decode");
    assert!(graph.structurally_eq(&once), "first round trip changed the graph");
    let again = codec::decode(&codec::encode(&once)).expect("second decode");
    assert!(once.structurally_eq(&again), "second round trip changed the graph");
    assert_eq!(codec::encode(&again), bytes);
}

fn dense_softmax() -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [-1, 3]).expect("x");
    let w = graph
        .add_trainable("w", Tensor::from_f32(&[3, 2], vec![0.5, -1.0, 0.25, 2.0, 1.0, 0.0]).expect("w"))
        .expect("w");
    let b = graph
        .add_constant("b", Tensor::from_f32(&[1, 2], vec![0.1, 0.2]).expect("b"))
        .expect("b");
    let xw = graph.matmul(x, w).expect("matmul");
    let logits = graph.add(xw, b).expect("add");
    let probs = graph.softmax(logits, -1).expect("softmax");
    let loss = graph.var_name(probs).to_string();
    graph.set_loss_variables(&[loss]).expect("loss");
    graph
}

#[test]
fn dense_softmax_chain_round_trips_and_still_runs() {
    let graph = dense_softmax();
    assert_round_trips(&graph);

    let decoded = codec::decode(&codec::encode(&graph)).expect("decode");
    let feeds: HashMap<String, Tensor> =
        [("x".to_string(), Tensor::from_f32(&[2, 3], vec![1.0, 0.0, -1.0, 0.5, 0.5, 0.5]).expect("x"))]
            .into_iter()
            .collect();
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let expected = session.run_single(&graph, feeds.clone(), "softmax").expect("original");
    let actual = session.run_single(&decoded, feeds, "softmax").expect("decoded");
    assert_eq!(expected, actual);
}

#[test]
fn multi_output_op_with_properties_round_trips() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [4, 6]).expect("x");
    let parts = graph
        .emit(
            OpDef::new(OpKind::Split)
                .name("halves")
                .input(x)
                .args(flowgraph::OpArgs::new().with_i(1).with_i(2))
                .property("padding", PropertyValue::String("same".into()))
                .property("strides", PropertyValue::LongArray(vec![1, 2]))
                .property("weights", PropertyValue::DoubleArray(vec![0.5, 1.5]))
                .property("mask", PropertyValue::BoolArray(vec![true, false]))
                .property("tags", PropertyValue::StringArray(vec!["a".into(), "b".into()]))
                .property("source", PropertyValue::TensorRef("x".into()))
                .property("count", PropertyValue::Int(-3))
                .property("seed", PropertyValue::Long(1 << 40))
                .property("scale", PropertyValue::Double(0.125))
                .property("training", PropertyValue::Bool(true)),
        )
        .expect("split");
    assert_eq!(parts.len(), 2);
    assert_eq!(graph.var_name(parts[0]), "halves:0");
    assert_eq!(graph.var_name(parts[1]), "halves:1");
    graph.concat(&[parts[1], parts[0]], 1).expect("concat");
    assert_round_trips(&graph);

    let decoded = codec::decode(&codec::encode(&graph)).expect("decode");
    let op = decoded.operation("halves").expect("halves");
    assert_eq!(op.outputs().len(), 2);
    assert_eq!(op.properties().len(), 10);
    assert_eq!(
        op.properties().get("source"),
        Some(&PropertyValue::TensorRef("x".into()))
    );
}

#[test]
fn control_dependencies_round_trip() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [2]).expect("x");
    let counter = graph
        .add_trainable("counter", Tensor::filled(&[2], 0.0f32))
        .expect("counter");
    let first = graph.exp(x).expect("exp");
    let first_op = graph.op_id("exp").expect("exp op");
    let tick = graph
        .add_operation(
            OpDef::new(OpKind::ScalarAdd)
                .name("tick")
                .input(counter)
                .args(flowgraph::OpArgs::new().with_t(1.0))
                .control_dep(first_op)
                .var_control_dep(x),
        )
        .expect("tick");
    let last = graph.neg(first).expect("neg");
    let last_op = graph.var(last).and_then(|v| v.producer()).expect("neg producer").0;
    graph.add_control_dependency(last_op, tick).expect("control dep");
    assert_round_trips(&graph);

    let decoded = codec::decode(&codec::encode(&graph)).expect("decode");
    let tick = decoded.operation("tick").expect("tick");
    assert_eq!(tick.control_deps().len(), 1);
    assert_eq!(tick.var_control_deps().len(), 1);
    assert_eq!(tick.control_dep_for().len(), 1);
    let order = decoded.topological_order().expect("order");
    let position = |name: &str| {
        let id = decoded.op_id(name).expect("op");
        order.iter().position(|op| *op == id).expect("ordered")
    };
    assert!(position("exp") < position("tick"));
    assert!(position("tick") < position("neg"));
}

#[test]
fn gradient_graphs_round_trip_with_their_links() {
    let graph = dense_softmax();
    let grads = flowgraph::build_gradient_graph(&graph, &[], &["w"]).expect("gradients");
    assert_round_trips(&grads);
    let decoded = codec::decode(&codec::encode(&grads)).expect("decode");
    let link = decoded.gradient_of("w").expect("gradient link");
    assert_eq!(link.name(), "w-grad");
}

#[test]
fn enum_codes_are_bijective() {
    for kind in OpType::ALL {
        assert_eq!(OpType::from_code(kind.code()), Some(kind));
    }
    for dtype in DType::ALL {
        assert_eq!(DType::from_code(dtype.code()), Some(dtype));
    }
    for kind in VariableKind::ALL {
        assert_eq!(VariableKind::from_code(kind.code()), Some(kind));
    }
    for order in ByteOrder::ALL {
        assert_eq!(ByteOrder::from_code(order.code()), Some(order));
    }
    for kind in PropertyKind::ALL {
        assert_eq!(PropertyKind::from_code(kind.code()), Some(kind));
    }
    for kind in OpKind::ALL {
        assert_eq!(OpKind::from_name(kind.name()), Some(kind));
    }

    let codes = |codes: Vec<u8>| {
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len(), "duplicate codes in {codes:?}");
    };
    codes(OpType::ALL.iter().map(|k| k.code()).collect());
    codes(DType::ALL.iter().map(|d| d.code()).collect());
    codes(VariableKind::ALL.iter().map(|k| k.code()).collect());

    assert_eq!(OpType::from_code(u8::MAX), None);
    assert_eq!(DType::from_code(u8::MAX), None);
    assert_eq!(VariableKind::from_code(u8::MAX), None);
    assert_eq!(ByteOrder::from_code(u8::MAX), None);
    assert_eq!(PropertyKind::from_code(u8::MAX), None);
}

#[test]
fn unknown_op_name_is_rejected() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [2]).expect("x");
    graph.tanh(x).expect("tanh");
    let mut bytes = codec::encode(&graph);
    // The op name is interned as a string; rewrite it in place to an unknown name of equal length.
    let at = bytes
        .windows(4)
        .position(|w| w == b"tanh")
        .expect("op name in string table");
    bytes[at..at + 4].copy_from_slice(b"tant");
    match codec::decode(&bytes) {
        Err(CodecError::UnknownOp { name }) => assert_eq!(name, "tant"),
        other => panic!("expected UnknownOp, got {other:?}"),
    }
}

#[test]
fn save_and_load_through_the_filesystem() {
    let graph = dense_softmax();
    let path = std::env::temp_dir().join(format!("flowgraph-codec-{}.fg", std::process::id()));
    let codec = GraphCodec::default();
    codec.save(&graph, &path).expect("save");
    let loaded = codec.load(&path);
    let _ = std::fs::remove_file(&path);
    assert!(graph.structurally_eq(&loaded.expect("load")));

    let missing = codec.load(path.with_extension("missing"));
    assert!(matches!(missing, Err(CodecError::Io(_))));
}

/// Offset of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("pattern present")
}

fn single_constant() -> Vec<u8> {
    let mut graph = Graph::new();
    graph.add_constant("c", Tensor::filled(&[2], 1.0f32)).expect("c");
    codec::encode(&graph)
}

#[test]
fn oversized_value_dims_fail_to_decode() {
    let mut bytes = single_constant();
    // value rank, the one extent, payload byte count
    let mut pattern = 1u32.to_le_bytes().to_vec();
    pattern.extend_from_slice(&2u64.to_le_bytes());
    pattern.extend_from_slice(&8u64.to_le_bytes());
    let at = find(&bytes, &pattern) + 4;
    bytes[at..at + 8].copy_from_slice(&(1u64 << 62).to_le_bytes());
    match codec::decode(&bytes) {
        Err(CodecError::InvalidValue { name, .. }) => assert_eq!(name, "c"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn value_contradicting_declared_shape_fails_to_decode() {
    let mut bytes = single_constant();
    // declared rank and extent come before the bound value's
    let mut pattern = 1u32.to_le_bytes().to_vec();
    pattern.extend_from_slice(&2i64.to_le_bytes());
    let at = find(&bytes, &pattern) + 4;
    bytes[at..at + 8].copy_from_slice(&3i64.to_le_bytes());
    assert!(matches!(
        codec::decode(&bytes),
        Err(CodecError::InvalidReference { .. })
    ));
}
