//! Finite-difference verification of analytic gradients.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::autodiff::AutodiffBuilder;
use crate::backend::KernelBackend;
use crate::graph::{Graph, VariableKind};
use crate::session::Session;
use crate::tensor::Tensor;

/// Tolerances for [`check_gradients`].
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckConfig {
    /// Half-width of the central difference.
    pub epsilon: f64,
    /// Largest accepted `|analytic - numeric| / max(|analytic|, |numeric|)`.
    pub max_rel_error: f64,
    /// Absolute differences below this always pass.
    pub min_abs_error: f64,
    /// Caps the number of elements probed per variable.
    pub max_elements: Option<usize>,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_rel_error: 1e-5,
            min_abs_error: 1e-8,
            max_elements: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckFailure {
    pub variable: String,
    pub index: usize,
    pub analytic: f64,
    pub numeric: f64,
    pub rel_error: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradCheckReport {
    pub checked: usize,
    pub failures: Vec<GradCheckFailure>,
}

impl GradCheckReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compares the gradients of `sum(loss)` with respect to `wrt` against central differences.
///
/// `wrt` may name placeholders (perturbed through `feeds`) or trainable variables (perturbed
/// through a scratch copy of the graph).
pub fn check_gradients<B: KernelBackend>(
    session: &mut Session<B>,
    graph: &Graph,
    feeds: &HashMap<String, Tensor>,
    loss: &str,
    wrt: &[&str],
    config: &GradCheckConfig,
) -> Result<GradCheckReport> {
    let grads = AutodiffBuilder::new(Arc::clone(graph.registry()))
        .build(graph, &[loss], wrt)
        .with_context(|| format!("building gradients of `{loss}`"))?;

    let mut names = Vec::with_capacity(wrt.len());
    for name in wrt {
        let gradient = grads
            .gradient_of(name)
            .ok_or_else(|| anyhow!("`{name}` has no gradient with respect to `{loss}`"))?;
        names.push(gradient.name().to_string());
    }
    let requested: Vec<&str> = names.iter().map(String::as_str).collect();
    let analytic = session
        .run(&grads, feeds.clone(), &requested)
        .context("running the gradient graph")?;

    let mut report = GradCheckReport::default();
    for (name, grad_name) in wrt.iter().zip(&names) {
        let variable = graph
            .variable(name)
            .ok_or_else(|| anyhow!("unknown variable `{name}`"))?;
        let base = match variable.kind() {
            VariableKind::Placeholder => feeds
                .get(*name)
                .cloned()
                .ok_or_else(|| anyhow!("placeholder `{name}` is not fed"))?,
            VariableKind::Variable => variable
                .value()
                .cloned()
                .ok_or_else(|| anyhow!("variable `{name}` has no value"))?,
            other => bail!("cannot perturb `{name}` of kind {}", other.name()),
        };
        let gradient = analytic
            .get(grad_name)
            .ok_or_else(|| anyhow!("gradient `{grad_name}` missing from run results"))?;
        ensure!(
            gradient.dims() == base.dims(),
            "gradient of `{name}` has dims {:?}, expected {:?}",
            gradient.dims(),
            base.dims()
        );

        let limit = config.max_elements.unwrap_or(usize::MAX).min(base.len());
        for index in 0..limit {
            let original = base.get_f64(index).unwrap_or(0.0);
            let mut probe = |delta: f64| -> Result<f64> {
                let mut value = base.clone();
                value.set_f64(index, original + delta);
                objective(session, graph, feeds, loss, name, variable.kind(), value)
            };
            let plus = probe(config.epsilon)?;
            let minus = probe(-config.epsilon)?;
            let numeric = (plus - minus) / (2.0 * config.epsilon);
            let analytic = gradient.get_f64(index).unwrap_or(0.0);

            report.checked += 1;
            let abs_error = (analytic - numeric).abs();
            if abs_error < config.min_abs_error {
                continue;
            }
            let rel_error = abs_error / analytic.abs().max(numeric.abs());
            if rel_error > config.max_rel_error {
                log::debug!(
                    "gradient mismatch for {name}[{index}]: analytic {analytic}, numeric {numeric}"
                );
                report.failures.push(GradCheckFailure {
                    variable: name.to_string(),
                    index,
                    analytic,
                    numeric,
                    rel_error,
                });
            }
        }
    }
    Ok(report)
}

/// `sum(loss)` with `name` bound to `value`.
fn objective<B: KernelBackend>(
    session: &mut Session<B>,
    graph: &Graph,
    feeds: &HashMap<String, Tensor>,
    loss: &str,
    name: &str,
    kind: VariableKind,
    value: Tensor,
) -> Result<f64> {
    let mut feeds = feeds.clone();
    let result = if kind == VariableKind::Placeholder {
        feeds.insert(name.to_string(), value);
        session.run_single(graph, feeds, loss)?
    } else {
        let mut scratch = graph.clone();
        scratch.assign(name, value)?;
        session.run_single(&scratch, feeds, loss)?
    };
    Ok(result.to_f64_vec().iter().sum())
}
