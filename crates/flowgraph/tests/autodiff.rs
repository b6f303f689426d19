use std::collections::HashMap;
use std::sync::Arc;

use flowgraph::validation::{check_gradients, GradCheckConfig};
use flowgraph::{build_gradient_graph, AutodiffBuilder, DType, Graph, Session, Tensor, VarId};
use flowgraph_backend_ref_cpu::CpuBackend;

fn session() -> Session<CpuBackend> {
    Session::new(Arc::new(CpuBackend::new()))
}

fn feeds(entries: Vec<(&str, Tensor)>) -> HashMap<String, Tensor> {
    entries
        .into_iter()
        .map(|(name, tensor)| (name.to_string(), tensor))
        .collect()
}

fn gradient_name(graph: &Graph, wrt: &str) -> String {
    graph
        .gradient_of(wrt)
        .unwrap_or_else(|| panic!("`{wrt}` has no gradient"))
        .name()
        .to_string()
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tol, "{actual:?} vs {expected:?}");
    }
}

#[test]
fn identity_chain_gradient_is_ones() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Float, [2, 3]).expect("x");
    let loss = graph.identity(x).expect("identity");
    let loss_name = graph.var_name(loss).to_string();

    let grads = build_gradient_graph(&graph, &[&loss_name], &["x"]).expect("gradients");
    let grad = gradient_name(&grads, "x");
    assert_eq!(grad, "x-grad");

    let x_value = Tensor::from_f32(&[2, 3], vec![0.5, -1.0, 2.0, 3.0, 0.0, 7.0]).expect("x");
    let out = session()
        .run_single(&grads, feeds(vec![("x", x_value)]), &grad)
        .expect("run gradient graph");
    assert_eq!(out, Tensor::filled(&[2, 3], 1.0f32));
}

#[test]
fn gradients_match_variable_shapes() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [4, 3]).expect("x");
    let w = graph
        .add_trainable("w", Tensor::from_f64(&[3, 2], vec![0.1, -0.2, 0.3, 0.4, -0.5, 0.6]).expect("w"))
        .expect("w");
    let b = graph
        .add_trainable("b", Tensor::from_f64(&[2], vec![0.01, -0.02]).expect("b"))
        .expect("b");
    let xw = graph.matmul(x, w).expect("matmul");
    let logits = graph.add(xw, b).expect("add");
    let probs = graph.softmax(logits, -1).expect("softmax");
    let loss = graph.reduce_mean(probs, &[0], false).expect("reduce_mean");
    let loss_name = graph.var_name(loss).to_string();

    let grads = build_gradient_graph(&graph, &[&loss_name], &["x", "w", "b"]).expect("gradients");
    let mut names = Vec::new();
    for wrt in ["x", "w", "b"] {
        let forward = graph.variable(wrt).expect("forward variable");
        let gradient = grads.gradient_of(wrt).expect("gradient variable");
        assert_eq!(gradient.spec(), forward.spec(), "gradient of {wrt}");
        names.push(gradient.name().to_string());
    }

    let x_value = Tensor::from_f64(&[4, 3], (0..12).map(|v| v as f64 * 0.1).collect()).expect("x");
    let requested: Vec<&str> = names.iter().map(String::as_str).collect();
    let out = session()
        .run(&grads, feeds(vec![("x", x_value)]), &requested)
        .expect("run gradient graph");
    assert_eq!(out[names[0].as_str()].dims(), &[4, 3]);
    assert_eq!(out[names[1].as_str()].dims(), &[3, 2]);
    assert_eq!(out[names[2].as_str()].dims(), &[2]);
    // softmax rows sum to one, so the mean over rows does not depend on the bias.
    assert_close(&out[names[2].as_str()].to_f64_vec(), &[0.0, 0.0], 1e-10);
}

fn sibling_graph(exp_first: bool) -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [3]).expect("x");
    let (a, b) = if exp_first {
        let a = graph.exp(x).expect("exp");
        let b = graph.square(x).expect("square");
        (a, b)
    } else {
        let b = graph.square(x).expect("square");
        let a = graph.exp(x).expect("exp");
        (a, b)
    };
    graph.add(a, b).expect("add");
    graph
}

#[test]
fn accumulation_does_not_depend_on_consumer_order() {
    let x_value = Tensor::from_f64(&[3], vec![-1.0, 0.25, 2.0]).expect("x");
    let mut results = Vec::new();
    for exp_first in [true, false] {
        let graph = sibling_graph(exp_first);
        let grads = build_gradient_graph(&graph, &["add"], &["x"]).expect("gradients");
        let grad = gradient_name(&grads, "x");
        let out = session()
            .run_single(&grads, feeds(vec![("x", x_value.clone())]), &grad)
            .expect("run");
        results.push(out.to_f64_vec());
    }
    let expected: Vec<f64> = [-1.0f64, 0.25, 2.0].iter().map(|x| x.exp() + 2.0 * x).collect();
    assert_close(&results[0], &expected, 1e-12);
    assert_close(&results[1], &expected, 1e-12);
}

#[test]
fn reused_input_accumulates_every_use() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [2]).expect("x");
    let xx = graph.mul(x, x).expect("mul");
    let y = graph.add(xx, x).expect("add");
    let loss = graph.reduce_sum(y, &[], false).expect("reduce_sum");
    let loss_name = graph.var_name(loss).to_string();
    graph.set_loss_variables(&[loss_name.as_str()]).expect("loss");

    let grads = build_gradient_graph(&graph, &[], &["x"]).expect("gradients");
    let grad = gradient_name(&grads, "x");
    let out = session()
        .run_single(
            &grads,
            feeds(vec![("x", Tensor::from_f64(&[2], vec![1.5, -3.0]).expect("x"))]),
            &grad,
        )
        .expect("run");
    assert_close(&out.to_f64_vec(), &[4.0, -5.0], 1e-12);
}

#[test]
fn gradient_of_gradient_is_second_derivative() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [3]).expect("x");
    let cube = graph.scalar_pow(x, 3.0).expect("scalar_pow");
    let cube_name = graph.var_name(cube).to_string();

    let first = build_gradient_graph(&graph, &[&cube_name], &["x"]).expect("first order");
    let first_grad = gradient_name(&first, "x");
    let second = build_gradient_graph(&first, &[&first_grad], &["x"]).expect("second order");
    let second_grad = gradient_name(&second, "x");
    assert_ne!(first_grad, second_grad);

    let x_value = Tensor::from_f64(&[3], vec![-2.0, 0.5, 3.0]).expect("x");
    let out = session()
        .run(
            &second,
            feeds(vec![("x", x_value)]),
            &[first_grad.as_str(), second_grad.as_str()],
        )
        .expect("run");
    assert_close(&out[first_grad.as_str()].to_f64_vec(), &[12.0, 0.75, 27.0], 1e-9);
    assert_close(&out[second_grad.as_str()].to_f64_vec(), &[-12.0, 3.0, 18.0], 1e-9);
}

#[test]
fn external_gradient_seeds_the_loss() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [2]).expect("x");
    let y = graph.scalar_mul(x, 3.0).expect("scalar_mul");
    let y_name = graph.var_name(y).to_string();

    let grads = AutodiffBuilder::default()
        .with_external_gradient(y_name.clone())
        .build(&graph, &[&y_name], &["x"])
        .expect("gradients");
    let seed = format!("{y_name}-grad");
    assert!(grads.variable(&seed).is_some());

    let grad = gradient_name(&grads, "x");
    let out = session()
        .run_single(
            &grads,
            feeds(vec![(seed.as_str(), Tensor::from_f64(&[2], vec![1.0, -2.0]).expect("seed"))]),
            &grad,
        )
        .expect("run");
    assert_close(&out.to_f64_vec(), &[3.0, -6.0], 1e-12);
}

#[test]
fn split_and_concat_route_gradients_to_the_right_slices() {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [2, 4]).expect("x");
    let parts = graph.split(x, 1, 2).expect("split");
    let left = graph.scalar_mul(parts[0], 2.0).expect("left");
    let right = graph.scalar_mul(parts[1], -1.0).expect("right");
    let joined = graph.concat(&[left, right], 1).expect("concat");
    let loss = graph.reduce_sum(joined, &[], false).expect("loss");
    let loss_name = graph.var_name(loss).to_string();

    let grads = build_gradient_graph(&graph, &[&loss_name], &["x"]).expect("gradients");
    let grad = gradient_name(&grads, "x");
    let out = session()
        .run_single(&grads, feeds(vec![("x", Tensor::filled(&[2, 4], 1.0f64))]), &grad)
        .expect("run");
    assert_close(
        &out.to_f64_vec(),
        &[2.0, 2.0, -1.0, -1.0, 2.0, 2.0, -1.0, -1.0],
        1e-12,
    );
}

fn mlp() -> (Graph, HashMap<String, Tensor>, String) {
    let mut graph = Graph::new();
    let x = graph.add_placeholder("x", DType::Double, [3, 4]).expect("x");
    let w1 = graph
        .add_trainable(
            "w1",
            Tensor::from_f64(&[4, 5], (0..20).map(|v| ((v * 7) % 11) as f64 / 10.0 - 0.5).collect())
                .expect("w1"),
        )
        .expect("w1");
    let b1 = graph
        .add_trainable("b1", Tensor::from_f64(&[5], vec![0.1, -0.1, 0.2, 0.0, 0.05]).expect("b1"))
        .expect("b1");
    let w2 = graph
        .add_trainable(
            "w2",
            Tensor::from_f64(&[5, 2], (0..10).map(|v| ((v * 3) % 7) as f64 / 7.0 - 0.4).collect())
                .expect("w2"),
        )
        .expect("w2");
    let h = graph.matmul(x, w1).expect("matmul");
    let h = graph.add(h, b1).expect("add");
    let h = graph.tanh(h).expect("tanh");
    let s = graph.sigmoid(h).expect("sigmoid");
    let mixed = graph.mul(h, s).expect("mul");
    let logits = graph.matmul(mixed, w2).expect("logits");
    let probs = graph.softmax(logits, -1).expect("softmax");
    let logp = graph.log(probs).expect("log");
    let loss = graph.reduce_mean(logp, &[], false).expect("loss");
    let loss_name = graph.var_name(loss).to_string();

    let x_value = Tensor::from_f64(&[3, 4], (0..12).map(|v| (v as f64 - 6.0) / 5.0).collect())
        .expect("x");
    (graph, feeds(vec![("x", x_value)]), loss_name)
}

#[test]
fn analytic_gradients_agree_with_finite_differences() {
    let (graph, feeds, loss) = mlp();
    let mut session = session();
    let report = check_gradients(
        &mut session,
        &graph,
        &feeds,
        &loss,
        &["x", "w1", "b1", "w2"],
        &GradCheckConfig::default(),
    )
    .expect("gradient check");
    assert_eq!(report.checked, 12 + 20 + 5 + 10);
    assert!(report.passed(), "failures: {:?}", report.failures);
}

#[test]
fn gradient_check_flags_a_wrong_rule() {
    use flowgraph::autodiff::{AutodiffError, GradContext};
    use flowgraph::ops::OpRegistry;
    use flowgraph::{OpKind, Operation};

    // Claims d/dx exp(x) = 2 * g.
    fn wrong_exp(
        ctx: &mut GradContext<'_>,
        _op: &Operation,
        grads: &[Option<VarId>],
    ) -> Result<Vec<Option<VarId>>, AutodiffError> {
        let g = grads[0].expect("upstream gradient");
        Ok(vec![Some(ctx.scalar_mul(g, 2.0)?)])
    }

    let registry = OpRegistry::builder()
        .with_gradient(OpKind::Exp, wrong_exp)
        .build();
    let mut graph = Graph::with_registry(Arc::clone(&registry));
    let x = graph.add_placeholder("x", DType::Double, [2]).expect("x");
    let y = graph.exp(x).expect("exp");
    graph.reduce_sum(y, &[], false).expect("loss");

    let grads = AutodiffBuilder::new(registry)
        .build(&graph, &["reduce_sum"], &["x"])
        .expect("gradients");
    let grad = gradient_name(&grads, "x");
    let out = session()
        .run_single(&grads, feeds(vec![("x", Tensor::filled(&[2], 0.0f64))]), &grad)
        .expect("run");
    assert_close(&out.to_f64_vec(), &[2.0, 2.0], 1e-12);

    let mut session = session();
    let report = check_gradients(
        &mut session,
        &graph,
        &feeds(vec![("x", Tensor::filled(&[2], 0.0f64))]),
        "reduce_sum",
        &["x"],
        &GradCheckConfig::default(),
    )
    .expect("gradient check runs");
    assert_eq!(report.failures.len(), 2);
    assert!((report.failures[0].numeric - 1.0).abs() < 1e-6);
}
