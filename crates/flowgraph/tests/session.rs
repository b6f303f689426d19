use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flowgraph::backend::BackendResult;
use flowgraph::memory::MemoryPolicy;
use flowgraph::{DType, Graph, Operation, Session, SessionConfig, SessionError, SessionPool, Tensor};
use flowgraph_backend_ref_cpu::{CpuBackend, CpuKernelInterceptor, GenericCpuBackend};

fn feeds(entries: Vec<(&str, Tensor)>) -> HashMap<String, Tensor> {
    entries
        .into_iter()
        .map(|(name, tensor)| (name.to_string(), tensor))
        .collect()
}

fn linear_layer() -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [2, 3]).expect("x");
    let w = graph.add_placeholder("w", DType::Float, [3, 4]).expect("w");
    let bias = graph.add_placeholder("bias", DType::Float, [1, 4]).expect("bias");
    let xw = graph.matmul(x, w).expect("matmul");
    let out = graph.add(xw, bias).expect("add");
    assert_eq!(graph.var_name(out), "add");
    graph
}

fn linear_feeds() -> HashMap<String, Tensor> {
    feeds(vec![
        ("x", Tensor::filled(&[2, 3], 1.0f32)),
        ("w", Tensor::filled(&[3, 4], 1.0f32)),
        ("bias", Tensor::filled(&[1, 4], 0.0f32)),
    ])
}

#[test]
fn linear_layer_forward_fills_with_three() {
    let graph = linear_layer();
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let out = session
        .run_single(&graph, linear_feeds(), "add")
        .expect("run linear layer");
    assert_eq!(out.dims(), &[2, 4]);
    assert_eq!(out.as_slice::<f32>().expect("f32"), &[3.0f32; 8]);
}

#[test]
fn unknown_output_is_reported_by_name() {
    let graph = linear_layer();
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let err = session
        .run(&graph, linear_feeds(), &["add", "logits"])
        .expect_err("logits does not exist");
    match err {
        SessionError::UnresolvedOutput { name } => assert_eq!(name, "logits"),
        other => panic!("expected UnresolvedOutput, got {other:?}"),
    }
}

#[test]
fn feeds_are_validated_before_execution() {
    let graph = linear_layer();
    let mut session = Session::new(Arc::new(CpuBackend::new()));

    let mut missing = linear_feeds();
    missing.remove("w");
    let err = session.run(&graph, missing, &["add"]).expect_err("w is missing");
    assert!(matches!(err, SessionError::MissingFeed { ref name } if name == "w"), "{err:?}");

    let mut wrong_shape = linear_feeds();
    wrong_shape.insert("x".into(), Tensor::filled(&[3, 2], 1.0f32));
    let err = session.run(&graph, wrong_shape, &["add"]).expect_err("x has the wrong shape");
    match err {
        SessionError::FeedShapeMismatch { name, actual, .. } => {
            assert_eq!(name, "x");
            assert_eq!(actual, vec![3, 2]);
        }
        other => panic!("expected FeedShapeMismatch, got {other:?}"),
    }

    let mut wrong_dtype = linear_feeds();
    wrong_dtype.insert("bias".into(), Tensor::filled(&[1, 4], 0.0f64));
    let err = session.run(&graph, wrong_dtype, &["add"]).expect_err("bias is f64");
    assert!(matches!(err, SessionError::FeedDTypeMismatch { .. }), "{err:?}");

    let mut not_placeholder = linear_feeds();
    not_placeholder.insert("matmul".into(), Tensor::filled(&[2, 4], 0.0f32));
    let err = session
        .run(&graph, not_placeholder, &["add"])
        .expect_err("matmul is computed");
    assert!(matches!(err, SessionError::NotAPlaceholder { ref name } if name == "matmul"));

    assert_eq!(session.memory_stats().allocations, 0);
}

#[derive(Default)]
struct CountingInterceptor {
    executed: Mutex<Vec<String>>,
}

impl CountingInterceptor {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.executed.lock().expect("lock"))
    }
}

impl CpuKernelInterceptor for CountingInterceptor {
    fn try_execute(
        &self,
        op: &Operation,
        _inputs: &[&Tensor],
        _outputs: &mut [Tensor],
    ) -> Option<BackendResult<()>> {
        self.executed
            .lock()
            .expect("lock")
            .push(op.name().to_string());
        None
    }
}

#[test]
fn only_ancestors_of_requested_outputs_execute() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [4]).expect("x");
    let a = graph.exp(x).expect("exp");
    graph.neg(a).expect("neg");
    graph.tanh(x).expect("tanh");
    let z = graph.add_placeholder("z", DType::Float, [4]).expect("z");
    graph.square(z).expect("square");

    let counter = Arc::new(CountingInterceptor::default());
    let backend = Arc::new(GenericCpuBackend::with_arc(Arc::clone(&counter)));
    let mut session = Session::new(backend);

    // `z` is not needed for `neg`, so it does not have to be fed.
    let out = session
        .run_single(&graph, feeds(vec![("x", Tensor::filled(&[4], 0.0f32))]), "neg")
        .expect("run neg");
    assert_eq!(out.as_slice::<f32>().expect("f32"), &[-1.0f32; 4]);
    assert_eq!(counter.take(), vec!["exp".to_string(), "neg".to_string()]);

    let out = session
        .run(
            &graph,
            feeds(vec![
                ("x", Tensor::filled(&[4], 0.0f32)),
                ("z", Tensor::filled(&[4], 3.0f32)),
            ]),
            &["square", "tanh"],
        )
        .expect("run square and tanh");
    assert_eq!(out["square"].as_slice::<f32>().expect("f32"), &[9.0f32; 4]);
    assert_eq!(out["tanh"].as_slice::<f32>().expect("f32"), &[0.0f32; 4]);
    let mut executed = counter.take();
    executed.sort();
    assert_eq!(executed, vec!["square".to_string(), "tanh".to_string()]);
}

#[test]
fn placeholders_and_bound_values_can_be_requested_directly() {
    let mut graph = Graph::new();
    graph.add_placeholder("x", DType::Float, [2]).expect("x");
    let value = Tensor::from_f32(&[2], vec![1.5, 2.5]).expect("value");
    graph.add_constant("c", value.clone()).expect("c");
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let out = session
        .run(
            &graph,
            feeds(vec![("x", Tensor::filled(&[2], 7.0f32))]),
            &["x", "c"],
        )
        .expect("run");
    assert_eq!(out["x"], Tensor::filled(&[2], 7.0f32));
    assert_eq!(out["c"], value);
}

fn chain() -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [4]).expect("x");
    let a = graph.exp(x).expect("exp");
    let b = graph.neg(a).expect("neg");
    graph.tanh(b).expect("tanh");
    graph
}

#[test]
fn intermediates_are_released_after_their_last_use() {
    let graph = chain();
    let config = SessionConfig::default().with_memory_policy(MemoryPolicy::Arena);
    let mut session = Session::with_config(Arc::new(CpuBackend::new()), config);
    session
        .run_single(&graph, feeds(vec![("x", Tensor::filled(&[4], 1.0f32))]), "tanh")
        .expect("run chain");

    let stats = session.memory_stats();
    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.releases, 2);
    assert_eq!(stats.working_live_bytes, 0);
    // exp and neg outputs are both live while neg runs.
    assert_eq!(stats.peak_working_bytes, 32);
    assert_eq!(stats.output_bytes, 16);
}

#[test]
fn caching_manager_recycles_buffers_across_runs() {
    let graph = chain();
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let input = || feeds(vec![("x", Tensor::from_f32(&[4], vec![0.0, 0.5, 1.0, 2.0]).expect("x"))]);

    let first = session.run_single(&graph, input(), "tanh").expect("first run");
    assert_eq!(session.memory_stats().cache_hits, 0);
    let second = session.run_single(&graph, input(), "tanh").expect("second run");
    let stats = session.memory_stats();
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(first, second);

    session.clear();
    assert_eq!(session.memory_stats().cached_bytes, 0);
}

#[test]
fn plans_follow_graph_mutations() {
    let mut graph = chain();
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let before = session.plan(&graph, &["tanh"]).expect("plan");
    assert_eq!(before.order().len(), 3);
    let again = session.plan(&graph, &["tanh"]).expect("cached plan");
    assert!(Arc::ptr_eq(&before, &again));

    let tanh = graph.var_id("tanh").expect("tanh");
    graph.square(tanh).expect("square");
    let after = session.plan(&graph, &["tanh"]).expect("replanned");
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.order().len(), 3);

    let out = session
        .run_single(&graph, feeds(vec![("x", Tensor::filled(&[4], 0.0f32))]), "square")
        .expect("run square");
    let expected = (-1.0f64).tanh().powi(2) as f32;
    for value in out.as_slice::<f32>().expect("f32") {
        assert!((value - expected).abs() < 1e-6);
    }
}

#[test]
fn uninitialized_variables_fail_the_run() {
    let mut graph = Graph::new();
    let w = graph
        .add_variable(
            "w",
            flowgraph::VariableKind::Variable,
            flowgraph::TensorSpec::new(DType::Float, [2]),
            None,
        )
        .expect("w");
    graph.neg(w).expect("neg");
    let mut session = Session::new(Arc::new(CpuBackend::new()));
    let err = session
        .run_single(&graph, HashMap::new(), "neg")
        .expect_err("w has no value");
    assert!(matches!(err, SessionError::UninitializedVariable { ref name } if name == "w"));
}

#[test]
fn pooled_sessions_run_concurrently_and_return_to_the_pool() {
    let graph = linear_layer();
    let pool = SessionPool::new(Arc::new(CpuBackend::new()), SessionConfig::default());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut session = pool.acquire();
                let out = session
                    .run_single(&graph, linear_feeds(), "add")
                    .expect("pooled run");
                assert_eq!(out.as_slice::<f32>().expect("f32"), &[3.0f32; 8]);
            });
        }
    });
    let idle = pool.idle_count();
    assert!((1..=4).contains(&idle), "idle sessions: {idle}");

    {
        let _first = pool.acquire();
        assert_eq!(pool.idle_count(), idle - 1);
    }
    assert_eq!(pool.idle_count(), idle);
}
