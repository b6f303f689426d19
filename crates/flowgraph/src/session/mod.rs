//! Execution sessions: pruned, reference-counted evaluation of a graph.
//!
//! A [`Session`] serves one caller at a time. For concurrent inference hand each worker its own
//! session through a [`SessionPool`]; the graph itself is only borrowed immutably while a run is
//! in progress, so it cannot change underneath any session.

mod config;
mod plan;
mod pool;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use smallvec::SmallVec;
use thiserror::Error;

use crate::backend::{BackendError, KernelBackend};
use crate::graph::{Graph, GraphError, Operation, VarId, VariableKind};
use crate::memory::{MemoryManager, MemoryStats, Region, Scope};
use crate::ops::InferInput;
use crate::tensor::{DType, Shape, Tensor, TensorError, TensorSpec};

pub use config::SessionConfig;
pub use plan::ExecutionPlan;
pub use pool::{PooledSession, SessionPool};

use plan::PlanKey;

/// Failures of a single run. The graph is untouched and can be run again once fixed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no operation produces `{name}` and it is not a placeholder, constant or variable")]
    UnresolvedOutput { name: String },
    #[error("placeholder `{name}` is required but was not fed")]
    MissingFeed { name: String },
    #[error("`{name}` is not a placeholder and cannot be fed")]
    NotAPlaceholder { name: String },
    #[error("feed for `{name}` has dims {actual:?}, expected {expected}")]
    FeedShapeMismatch {
        name: String,
        expected: Shape,
        actual: Vec<usize>,
    },
    #[error("feed for `{name}` has dtype {actual}, expected {expected}")]
    FeedDTypeMismatch {
        name: String,
        expected: DType,
        actual: DType,
    },
    #[error("variable `{name}` has no value bound")]
    UninitializedVariable { name: String },
    #[error("operation `{op}` cannot run: {reason}")]
    InvalidOperation { op: String, reason: String },
    #[error("could not allocate output of `{op}`")]
    Allocation {
        op: String,
        #[source]
        source: TensorError,
    },
    #[error("kernel for `{op}` failed")]
    Kernel {
        op: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Runs graphs against one kernel backend and one memory manager.
pub struct Session<B: KernelBackend> {
    backend: Arc<B>,
    memory: Box<dyn MemoryManager>,
    plans: Option<LruCache<PlanKey, Arc<ExecutionPlan>>>,
    config: SessionConfig,
}

impl<B: KernelBackend> Session<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: SessionConfig) -> Self {
        let memory = config.memory.build();
        Self::with_memory_manager(backend, config, memory)
    }

    /// Uses a caller-provided memory manager instead of the one described by `config`.
    pub fn with_memory_manager(
        backend: Arc<B>,
        config: SessionConfig,
        memory: Box<dyn MemoryManager>,
    ) -> Self {
        let plans = NonZeroUsize::new(config.plan_cache_capacity).map(LruCache::new);
        Session {
            backend,
            memory,
            plans,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Drops cached plans and cached buffers.
    pub fn clear(&mut self) {
        if let Some(plans) = &mut self.plans {
            plans.clear();
        }
        self.memory.clear();
    }

    /// Returns the (possibly cached) plan for `outputs`.
    pub fn plan(
        &mut self,
        graph: &Graph,
        outputs: &[&str],
    ) -> Result<Arc<ExecutionPlan>, SessionError> {
        let key = PlanKey::new(graph, outputs);
        if let Some(plans) = &mut self.plans {
            if let Some(plan) = plans.get(&key) {
                if plan.matches(outputs) {
                    log::trace!("plan cache hit for {outputs:?}");
                    return Ok(Arc::clone(plan));
                }
            }
        }
        let plan = Arc::new(ExecutionPlan::build(graph, outputs)?);
        if let Some(plans) = &mut self.plans {
            plans.put(key, Arc::clone(&plan));
        }
        Ok(plan)
    }

    /// Computes `outputs` from `feeds`.
    ///
    /// Only operations backward-reachable from `outputs` run. Intermediate buffers are returned
    /// to the memory manager as soon as their last consumer in the plan has executed; the
    /// returned tensors belong to the caller.
    pub fn run(
        &mut self,
        graph: &Graph,
        mut feeds: HashMap<String, Tensor>,
        outputs: &[&str],
    ) -> Result<HashMap<String, Tensor>, SessionError> {
        let plan = self.plan(graph, outputs)?;
        validate_feeds(graph, &plan, &feeds)?;

        let registry = Arc::clone(graph.registry());
        let backend = &self.backend;
        let mut scope = Scope::enter(self.memory.as_mut());
        for var in plan.placeholders() {
            let Some(variable) = graph.var(var) else { continue };
            if let Some(tensor) = feeds.remove(variable.name()) {
                scope.insert_external(var, tensor);
            }
        }
        let mut uses = plan.uses.clone();

        for op_id in plan.order() {
            let Some(op) = graph.op(*op_id) else { continue };
            log::trace!("executing {} ({})", op.name(), op.kind());

            let input_specs: SmallVec<[TensorSpec; 4]> = op
                .inputs()
                .iter()
                .map(|var| lookup(graph, &scope, *var).map(|t| t.spec()))
                .collect::<Result<_, _>>()?;
            let output_specs = registry
                .infer(
                    op.kind(),
                    &InferInput {
                        inputs: &input_specs,
                        args: op.args(),
                        dimensions: op.dimensions(),
                    },
                )
                .map_err(|reason| SessionError::InvalidOperation {
                    op: op.name().to_string(),
                    reason,
                })?;

            let mut results: SmallVec<[Tensor; 2]> = SmallVec::with_capacity(output_specs.len());
            for (spec, out) in output_specs.iter().zip(op.outputs()) {
                let allocated = match spec.shape.concrete() {
                    Some(dims) => scope
                        .allocate(region_for(&plan, *out), spec.dtype, &dims)
                        .map_err(|source| SessionError::Allocation {
                            op: op.name().to_string(),
                            source,
                        }),
                    None => Err(SessionError::InvalidOperation {
                        op: op.name().to_string(),
                        reason: format!("output shape {} is not concrete", spec.shape),
                    }),
                };
                match allocated {
                    Ok(tensor) => results.push(tensor),
                    Err(err) => {
                        discard_all(&mut scope, &plan, op, results);
                        return Err(err);
                    }
                }
            }

            let status = {
                let inputs: SmallVec<[&Tensor; 4]> = op
                    .inputs()
                    .iter()
                    .map(|var| lookup(graph, &scope, *var))
                    .collect::<Result<_, _>>()?;
                backend.execute(op, &inputs, &mut results)
            };
            if let Err(source) = status {
                discard_all(&mut scope, &plan, op, results);
                return Err(SessionError::Kernel {
                    op: op.name().to_string(),
                    source,
                });
            }

            for (out, tensor) in op.outputs().iter().zip(results) {
                scope.insert(*out, tensor, region_for(&plan, *out));
                if !plan.output_set.contains(out) && !uses.contains_key(out) {
                    scope.release(*out);
                }
            }
            let mut seen: SmallVec<[VarId; 4]> = SmallVec::new();
            for input in op.inputs() {
                if seen.contains(input) {
                    continue;
                }
                seen.push(*input);
                if let Some(count) = uses.get_mut(input) {
                    *count -= 1;
                    if *count == 0 && !plan.output_set.contains(input) {
                        scope.release(*input);
                    }
                }
            }
        }

        let mut results = HashMap::with_capacity(plan.outputs.len());
        for (name, var) in plan.requested.iter().zip(&plan.outputs) {
            if results.contains_key(name) {
                continue;
            }
            let tensor = match scope.detach(*var) {
                Some(tensor) => tensor,
                None => lookup(graph, &scope, *var)?.clone(),
            };
            results.insert(name.clone(), tensor);
        }
        Ok(results)
    }

    /// Runs the graph for a single output.
    pub fn run_single(
        &mut self,
        graph: &Graph,
        feeds: HashMap<String, Tensor>,
        output: &str,
    ) -> Result<Tensor, SessionError> {
        let mut results = self.run(graph, feeds, &[output])?;
        results
            .remove(output)
            .ok_or_else(|| SessionError::UnresolvedOutput {
                name: output.to_string(),
            })
    }
}

fn region_for(plan: &ExecutionPlan, var: VarId) -> Region {
    if plan.output_set.contains(&var) {
        Region::Output
    } else {
        Region::Working
    }
}

fn discard_all(
    scope: &mut Scope<'_>,
    plan: &ExecutionPlan,
    op: &Operation,
    results: SmallVec<[Tensor; 2]>,
) {
    for (out, tensor) in op.outputs().iter().zip(results) {
        scope.discard(tensor, region_for(plan, *out));
    }
}

/// Value of `var` during a run: computed or fed values first, then bound graph values.
fn lookup<'a>(graph: &'a Graph, scope: &'a Scope<'_>, var: VarId) -> Result<&'a Tensor, SessionError> {
    if let Some(tensor) = scope.get(var) {
        return Ok(tensor);
    }
    let variable = graph.var(var).ok_or_else(|| SessionError::UnresolvedOutput {
        name: var.to_string(),
    })?;
    match variable.kind() {
        VariableKind::Constant | VariableKind::Variable => {
            variable
                .value()
                .ok_or_else(|| SessionError::UninitializedVariable {
                    name: variable.name().to_string(),
                })
        }
        VariableKind::Placeholder => Err(SessionError::MissingFeed {
            name: variable.name().to_string(),
        }),
        VariableKind::Array => Err(SessionError::UnresolvedOutput {
            name: variable.name().to_string(),
        }),
    }
}

fn validate_feeds(
    graph: &Graph,
    plan: &ExecutionPlan,
    feeds: &HashMap<String, Tensor>,
) -> Result<(), SessionError> {
    let mut names: Vec<&String> = feeds.keys().collect();
    names.sort();
    for name in names {
        let variable = graph
            .variable(name)
            .filter(|v| v.kind() == VariableKind::Placeholder)
            .ok_or_else(|| SessionError::NotAPlaceholder { name: name.clone() })?;
        let tensor = &feeds[name];
        let spec = variable.spec();
        if tensor.dtype() != spec.dtype {
            return Err(SessionError::FeedDTypeMismatch {
                name: name.clone(),
                expected: spec.dtype,
                actual: tensor.dtype(),
            });
        }
        if !spec.shape.accepts(tensor.dims()) {
            return Err(SessionError::FeedShapeMismatch {
                name: name.clone(),
                expected: spec.shape.clone(),
                actual: tensor.dims().to_vec(),
            });
        }
    }
    for var in plan.placeholders() {
        let name = graph.var_name(var);
        if !feeds.contains_key(name) {
            return Err(SessionError::MissingFeed {
                name: name.to_string(),
            });
        }
    }
    for var in &plan.bound {
        if let Some(variable) = graph.var(*var) {
            if variable.value().is_none() {
                return Err(SessionError::UninitializedVariable {
                    name: variable.name().to_string(),
                });
            }
        }
    }
    Ok(())
}
