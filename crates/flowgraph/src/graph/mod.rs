//! The mutable dataflow graph: variable and operation registries plus name lookup.
//!
//! Every mutation validates against the current state first and only then applies its changes,
//! so a failed call leaves the graph exactly as it was.

mod builders;
mod display;
mod node;
mod structure;
mod topology;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::ops::{InferInput, OpArgs, OpKind, OpRegistry};
use crate::tensor::{DType, Shape, Tensor, TensorSpec};

pub use node::{OpDef, OpId, Operation, VarId, Variable, VariableKind};
pub use structure::{GraphStructure, OperationEntry, TensorEntry, VariableEntry};

static GRAPH_UID: AtomicU64 = AtomicU64::new(1);

fn next_uid() -> u64 {
    GRAPH_UID.fetch_add(1, Ordering::Relaxed)
}

/// Build-time failures. The graph is unchanged whenever one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("name `{name}` is already defined")]
    DuplicateName { name: String },
    #[error(
        "operation `{op}` reads `{input}`, which is neither produced upstream nor a placeholder, constant or variable"
    )]
    UnresolvedInput { op: String, input: String },
    #[error("removing `{target}` would leave `{consumer}` reading dangling variable `{variable}`")]
    DanglingReference {
        target: String,
        consumer: String,
        variable: String,
    },
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("invalid operation `{op}` ({kind}): {reason}")]
    InvalidOperation {
        op: String,
        kind: OpKind,
        reason: String,
    },
    #[error("variable `{name}` is produced by `{op}`; remove the operation instead")]
    ProducedVariable { name: String, op: String },
    #[error("cannot bind a value to `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("graph contains a cycle through `{op}`")]
    Cycle { op: String },
}

/// Dataflow graph of typed variables and the operations producing them.
pub struct Graph {
    registry: Arc<OpRegistry>,
    uid: u64,
    version: u64,
    next_id: u32,
    pub(crate) variables: BTreeMap<VarId, Variable>,
    pub(crate) operations: BTreeMap<OpId, Operation>,
    var_names: HashMap<String, VarId>,
    op_names: HashMap<String, OpId>,
    loss_variables: Vec<VarId>,
}

impl Graph {
    /// Creates an empty graph bound to the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(OpRegistry::global())
    }

    pub fn with_registry(registry: Arc<OpRegistry>) -> Self {
        Graph {
            registry,
            uid: next_uid(),
            version: 0,
            next_id: 0,
            variables: BTreeMap::new(),
            operations: BTreeMap::new(),
            var_names: HashMap::new(),
            op_names: HashMap::new(),
            loss_variables: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<OpRegistry> {
        &self.registry
    }

    /// Process-unique identity of this graph instance. Clones receive a fresh uid.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Bumped on every structural mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ---- lookup ----------------------------------------------------------------------------

    pub fn var(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(&id)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.var_names.get(name).and_then(|id| self.variables.get(id))
    }

    pub fn var_id(&self, name: &str) -> Option<VarId> {
        self.var_names.get(name).copied()
    }

    pub fn op(&self, id: OpId) -> Option<&Operation> {
        self.operations.get(&id)
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.op_names.get(name).and_then(|id| self.operations.get(id))
    }

    pub fn op_id(&self, name: &str) -> Option<OpId> {
        self.op_names.get(name).copied()
    }

    /// Variables in creation order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Operations in creation order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn var_name(&self, id: VarId) -> &str {
        self.variables.get(&id).map_or("<removed>", |v| v.name.as_str())
    }

    pub fn op_name(&self, id: OpId) -> &str {
        self.operations.get(&id).map_or("<removed>", |op| op.name.as_str())
    }

    /// Producer `(op, slot)` of each input of `op`; sources report `None`.
    pub fn paired_inputs(&self, op: &Operation) -> Vec<Option<(OpId, usize)>> {
        op.inputs
            .iter()
            .map(|id| self.variables.get(id).and_then(|v| v.producer))
            .collect()
    }

    /// Gradient variable linked to `name` by the autodiff builder.
    pub fn gradient_of(&self, name: &str) -> Option<&Variable> {
        self.variable(name)
            .and_then(|v| v.gradient)
            .and_then(|id| self.variables.get(&id))
    }

    pub fn loss_variables(&self) -> &[VarId] {
        &self.loss_variables
    }

    /// Returns `base` if unused, otherwise the first free `base_N`.
    pub fn unique_name(&self, base: &str) -> String {
        self.unique_name_with(base, 1)
    }

    fn unique_name_with(&self, base: &str, outputs: usize) -> String {
        let free = |candidate: &str| {
            !self.op_names.contains_key(candidate)
                && output_names(candidate, outputs)
                    .iter()
                    .all(|name| !self.var_names.contains_key(name))
        };
        if free(base) {
            return base.to_string();
        }
        let mut counter = 1usize;
        loop {
            let candidate = format!("{base}_{counter}");
            if free(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    // ---- variables -------------------------------------------------------------------------

    pub fn add_placeholder(
        &mut self,
        name: &str,
        dtype: DType,
        shape: impl Into<Shape>,
    ) -> Result<VarId, GraphError> {
        self.add_variable(name, VariableKind::Placeholder, TensorSpec::new(dtype, shape), None)
    }

    /// Adds a CONSTANT whose spec is taken from `value`.
    pub fn add_constant(&mut self, name: &str, value: Tensor) -> Result<VarId, GraphError> {
        let spec = value.spec();
        self.add_variable(name, VariableKind::Constant, spec, Some(value))
    }

    /// Adds a VARIABLE (trainable state) whose spec is taken from `value`.
    pub fn add_trainable(&mut self, name: &str, value: Tensor) -> Result<VarId, GraphError> {
        let spec = value.spec();
        self.add_variable(name, VariableKind::Variable, spec, Some(value))
    }

    /// Declares an ARRAY variable ahead of the operation that will produce it.
    pub fn add_array(
        &mut self,
        name: &str,
        dtype: DType,
        shape: impl Into<Shape>,
    ) -> Result<VarId, GraphError> {
        self.add_variable(name, VariableKind::Array, TensorSpec::new(dtype, shape), None)
    }

    /// Registers a variable of any kind.
    ///
    /// Values are only accepted for CONSTANT and VARIABLE kinds and must match `spec`.
    pub fn add_variable(
        &mut self,
        name: &str,
        kind: VariableKind,
        spec: TensorSpec,
        value: Option<Tensor>,
    ) -> Result<VarId, GraphError> {
        if self.var_names.contains_key(name) {
            return Err(GraphError::DuplicateName {
                name: name.to_string(),
            });
        }
        if let Some(value) = &value {
            check_value(name, kind, &spec, value)?;
        }
        let id = VarId(self.alloc_id());
        self.insert_variable(Variable {
            id,
            name: name.to_string(),
            kind,
            spec,
            value,
            producer: None,
            consumers: Vec::new(),
            gradient: None,
        });
        self.bump();
        Ok(id)
    }

    fn insert_variable(&mut self, variable: Variable) {
        self.var_names.insert(variable.name.clone(), variable.id);
        self.variables.insert(variable.id, variable);
    }

    /// Rebinds the value of a CONSTANT or VARIABLE.
    pub fn assign(&mut self, name: &str, value: Tensor) -> Result<(), GraphError> {
        let variable = self
            .variable(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
        check_value(name, variable.kind, &variable.spec, &value)?;
        let id = variable.id;
        if let Some(variable) = self.variables.get_mut(&id) {
            variable.value = Some(value);
        }
        Ok(())
    }

    /// Removes a variable that no operation produces.
    ///
    /// Consumers fail the removal with [`GraphError::DanglingReference`] unless `force` is set,
    /// in which case the variable is detached from every consumer's input lists.
    pub fn remove_variable(&mut self, name: &str, force: bool) -> Result<(), GraphError> {
        let variable = self
            .variable(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
        if let Some((op, _)) = variable.producer {
            return Err(GraphError::ProducedVariable {
                name: name.to_string(),
                op: self.op_name(op).to_string(),
            });
        }
        let id = variable.id;
        let dependents = self.dependents_of_vars(&[id]);
        if !force {
            if let Some(&consumer) = dependents.first() {
                return Err(GraphError::DanglingReference {
                    target: name.to_string(),
                    consumer: self.op_name(consumer).to_string(),
                    variable: name.to_string(),
                });
            }
        }
        for op in dependents {
            if let Some(op) = self.operations.get_mut(&op) {
                op.inputs.retain(|v| *v != id);
                op.var_control_deps.retain(|v| *v != id);
            }
        }
        self.drop_variable(id);
        self.bump();
        Ok(())
    }

    fn drop_variable(&mut self, id: VarId) {
        if let Some(variable) = self.variables.remove(&id) {
            self.var_names.remove(&variable.name);
        }
        self.loss_variables.retain(|v| *v != id);
        for variable in self.variables.values_mut() {
            if variable.gradient == Some(id) {
                variable.gradient = None;
            }
        }
    }

    // ---- operations ------------------------------------------------------------------------

    /// Adds an operation and returns its id. See [`OpDef`] for naming rules.
    pub fn add_operation(&mut self, def: OpDef) -> Result<OpId, GraphError> {
        let registry = Arc::clone(&self.registry);
        let kind = def.kind;

        let provisional = def.name.clone().unwrap_or_else(|| kind.name().to_string());
        for &input in &def.inputs {
            match self.variables.get(&input) {
                Some(v) if v.is_resolvable() => {}
                Some(v) => {
                    return Err(GraphError::UnresolvedInput {
                        op: provisional,
                        input: v.name.clone(),
                    })
                }
                None => {
                    return Err(GraphError::UnresolvedInput {
                        op: provisional,
                        input: input.to_string(),
                    })
                }
            }
        }
        for &var in &def.var_control_deps {
            match self.variables.get(&var) {
                Some(v) if v.is_resolvable() => {}
                _ => {
                    return Err(GraphError::UnresolvedInput {
                        op: provisional,
                        input: self.var_name(var).to_string(),
                    })
                }
            }
        }
        for dep in &def.control_deps {
            if !self.operations.contains_key(dep) {
                return Err(GraphError::UnknownOperation(dep.to_string()));
            }
        }

        let input_specs: Vec<TensorSpec> = def
            .inputs
            .iter()
            .filter_map(|id| self.variables.get(id).map(|v| v.spec.clone()))
            .collect();
        let output_specs = registry
            .infer(
                kind,
                &InferInput {
                    inputs: &input_specs,
                    args: &def.args,
                    dimensions: &def.dimensions,
                },
            )
            .map_err(|reason| GraphError::InvalidOperation {
                op: provisional.clone(),
                kind,
                reason,
            })?;

        let name = match &def.name {
            Some(name) => {
                if self.op_names.contains_key(name) {
                    return Err(GraphError::DuplicateName { name: name.clone() });
                }
                name.clone()
            }
            None => self.unique_name_with(kind.name(), output_specs.len()),
        };
        let names = if def.output_names.is_empty() {
            output_names(&name, output_specs.len())
        } else if def.output_names.len() == output_specs.len() {
            def.output_names.clone()
        } else {
            return Err(GraphError::InvalidOperation {
                op: name,
                kind,
                reason: format!(
                    "{} output names given for {} outputs",
                    def.output_names.len(),
                    output_specs.len()
                ),
            });
        };

        // Resolve each output to either a fresh variable or an adopted placeholder ARRAY.
        let mut adopted: Vec<Option<VarId>> = Vec::with_capacity(names.len());
        let mut seen = HashSet::new();
        for (out_name, spec) in names.iter().zip(&output_specs) {
            if !seen.insert(out_name.as_str()) {
                return Err(GraphError::DuplicateName {
                    name: out_name.clone(),
                });
            }
            match self.variable(out_name) {
                None => adopted.push(None),
                Some(v)
                    if v.kind == VariableKind::Array
                        && v.producer.is_none()
                        && v.spec.dtype == spec.dtype
                        && shapes_compatible(&v.spec.shape, &spec.shape) =>
                {
                    adopted.push(Some(v.id))
                }
                Some(_) => {
                    return Err(GraphError::DuplicateName {
                        name: out_name.clone(),
                    })
                }
            }
        }

        let op_id = OpId(self.alloc_id());
        let mut outputs = Vec::with_capacity(names.len());
        for (slot, ((out_name, spec), existing)) in
            names.into_iter().zip(output_specs).zip(adopted).enumerate()
        {
            match existing {
                Some(id) => {
                    if let Some(v) = self.variables.get_mut(&id) {
                        v.producer = Some((op_id, slot));
                    }
                    outputs.push(id);
                }
                None => {
                    let id = VarId(self.alloc_id());
                    self.insert_variable(Variable {
                        id,
                        name: out_name,
                        kind: VariableKind::Array,
                        spec,
                        value: None,
                        producer: Some((op_id, slot)),
                        consumers: Vec::new(),
                        gradient: None,
                    });
                    outputs.push(id);
                }
            }
        }

        for &input in &def.inputs {
            if let Some(v) = self.variables.get_mut(&input) {
                if !v.consumers.contains(&op_id) {
                    v.consumers.push(op_id);
                }
            }
        }
        let control_deps = dedup_in_order(def.control_deps);
        let var_control_deps = dedup_in_order(def.var_control_deps);
        for dep in &control_deps {
            if let Some(dep) = self.operations.get_mut(dep) {
                if !dep.control_dep_for.contains(&op_id) {
                    dep.control_dep_for.push(op_id);
                }
            }
        }

        self.op_names.insert(name.clone(), op_id);
        self.operations.insert(
            op_id,
            Operation {
                id: op_id,
                name,
                kind,
                inputs: def.inputs,
                outputs,
                args: def.args,
                dimensions: def.dimensions,
                properties: def.properties,
                control_deps,
                control_dep_for: Vec::new(),
                var_control_deps,
            },
        );
        self.bump();
        Ok(op_id)
    }

    /// Adds an operation and returns its output variables.
    pub fn emit(&mut self, def: OpDef) -> Result<Vec<VarId>, GraphError> {
        let id = self.add_operation(def)?;
        Ok(self
            .operations
            .get(&id)
            .map(|op| op.outputs.clone())
            .unwrap_or_default())
    }

    /// Adds a control dependency after the fact: `op` will run after `dep`.
    pub fn add_control_dependency(&mut self, op: OpId, dep: OpId) -> Result<(), GraphError> {
        if !self.operations.contains_key(&dep) {
            return Err(GraphError::UnknownOperation(dep.to_string()));
        }
        if !self.operations.contains_key(&op) {
            return Err(GraphError::UnknownOperation(op.to_string()));
        }
        if op == dep || self.reaches(op, dep) {
            return Err(GraphError::Cycle {
                op: self.op_name(op).to_string(),
            });
        }
        if let Some(target) = self.operations.get_mut(&op) {
            if !target.control_deps.contains(&dep) {
                target.control_deps.push(dep);
            }
        }
        if let Some(source) = self.operations.get_mut(&dep) {
            if !source.control_dep_for.contains(&op) {
                source.control_dep_for.push(op);
            }
        }
        self.bump();
        Ok(())
    }

    /// Replaces an operation's positional arguments.
    ///
    /// The new arguments must infer the same output specs, so downstream consumers stay valid.
    pub fn patch_args(&mut self, id: OpId, args: OpArgs) -> Result<(), GraphError> {
        let op = self
            .operations
            .get(&id)
            .ok_or_else(|| GraphError::UnknownOperation(id.to_string()))?;
        let input_specs: Vec<TensorSpec> = op
            .inputs
            .iter()
            .filter_map(|v| self.variables.get(v).map(|v| v.spec.clone()))
            .collect();
        let specs = self
            .registry
            .infer(
                op.kind,
                &InferInput {
                    inputs: &input_specs,
                    args: &args,
                    dimensions: &op.dimensions,
                },
            )
            .map_err(|reason| GraphError::InvalidOperation {
                op: op.name.clone(),
                kind: op.kind,
                reason,
            })?;
        let current: Vec<&TensorSpec> = op
            .outputs
            .iter()
            .filter_map(|v| self.variables.get(v).map(|v| &v.spec))
            .collect();
        if specs.len() != current.len() || specs.iter().zip(&current).any(|(a, b)| a != *b) {
            return Err(GraphError::InvalidOperation {
                op: op.name.clone(),
                kind: op.kind,
                reason: "patched arguments change the output specs".to_string(),
            });
        }
        if let Some(op) = self.operations.get_mut(&id) {
            op.args = args;
        }
        self.bump();
        Ok(())
    }

    /// Removes an operation.
    ///
    /// Its output variables stay in the graph as unproduced ARRAY variables, so a replacement
    /// operation can adopt them by name. When downstream operations read those outputs the
    /// removal fails with [`GraphError::DanglingReference`] unless `force` is set, in which case
    /// the outputs are detached from every downstream input list.
    pub fn remove_operation(&mut self, id: OpId, force: bool) -> Result<(), GraphError> {
        let op = self
            .operations
            .get(&id)
            .ok_or_else(|| GraphError::UnknownOperation(id.to_string()))?;
        let outputs = op.outputs.clone();
        let dependents = self.dependents_of_vars(&outputs);
        if !force {
            if let Some(&consumer) = dependents.first() {
                let consumer_op = &self.operations[&consumer];
                let variable = outputs
                    .iter()
                    .find(|v| {
                        consumer_op.inputs.contains(v) || consumer_op.var_control_deps.contains(v)
                    })
                    .map(|v| self.var_name(*v).to_string())
                    .unwrap_or_default();
                return Err(GraphError::DanglingReference {
                    target: op.name.clone(),
                    consumer: consumer_op.name.clone(),
                    variable,
                });
            }
        }

        let Some(op) = self.operations.remove(&id) else {
            return Ok(());
        };
        self.op_names.remove(&op.name);
        for consumer in dependents {
            if let Some(consumer) = self.operations.get_mut(&consumer) {
                consumer.inputs.retain(|v| !outputs.contains(v));
                consumer.var_control_deps.retain(|v| !outputs.contains(v));
            }
        }
        for out in &outputs {
            if let Some(v) = self.variables.get_mut(out) {
                v.producer = None;
                v.consumers.clear();
            }
        }
        for input in &op.inputs {
            if let Some(v) = self.variables.get_mut(input) {
                v.consumers.retain(|c| *c != id);
            }
        }
        for dep in &op.control_deps {
            if let Some(dep) = self.operations.get_mut(dep) {
                dep.control_dep_for.retain(|c| *c != id);
            }
        }
        for dependent in &op.control_dep_for {
            if let Some(dependent) = self.operations.get_mut(dependent) {
                dependent.control_deps.retain(|c| *c != id);
            }
        }
        self.bump();
        Ok(())
    }

    /// Operations reading any of `vars` as data input or variable control dependency, by id.
    fn dependents_of_vars(&self, vars: &[VarId]) -> Vec<OpId> {
        self.operations
            .values()
            .filter(|op| {
                op.inputs.iter().any(|v| vars.contains(v))
                    || op.var_control_deps.iter().any(|v| vars.contains(v))
            })
            .map(|op| op.id)
            .collect()
    }

    // ---- loss designation ------------------------------------------------------------------

    pub fn set_loss_variables<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), GraphError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = self
                .var_id(name.as_ref())
                .ok_or_else(|| GraphError::UnknownVariable(name.as_ref().to_string()))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.loss_variables = ids;
        self.bump();
        Ok(())
    }

    pub fn add_loss_variable(&mut self, name: &str) -> Result<(), GraphError> {
        let id = self
            .var_id(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
        if !self.loss_variables.contains(&id) {
            self.loss_variables.push(id);
            self.bump();
        }
        Ok(())
    }

    pub(crate) fn set_gradient(&mut self, var: VarId, gradient: VarId) {
        if let Some(v) = self.variables.get_mut(&var) {
            v.gradient = Some(gradient);
        }
    }

    /// Reassembles a graph from decoded parts. The caller has validated every reference.
    pub(crate) fn from_parts(
        registry: Arc<OpRegistry>,
        variables: Vec<Variable>,
        operations: Vec<Operation>,
        loss_variables: Vec<VarId>,
    ) -> Result<Graph, GraphError> {
        let mut graph = Graph::with_registry(registry);
        let mut max_id = 0u32;
        for variable in variables {
            if graph.var_names.contains_key(&variable.name) {
                return Err(GraphError::DuplicateName {
                    name: variable.name,
                });
            }
            max_id = max_id.max(variable.id.0 + 1);
            graph.insert_variable(variable);
        }
        for op in operations {
            if graph.op_names.contains_key(&op.name) {
                return Err(GraphError::DuplicateName { name: op.name });
            }
            max_id = max_id.max(op.id.0 + 1);
            graph.op_names.insert(op.name.clone(), op.id);
            graph.operations.insert(op.id, op);
        }
        // Consumer lists are derived state; rebuild them instead of trusting the payload.
        let uses: Vec<(VarId, OpId)> = graph
            .operations
            .values()
            .flat_map(|op| op.inputs.iter().map(move |v| (*v, op.id)))
            .collect();
        for variable in graph.variables.values_mut() {
            variable.consumers.clear();
        }
        for (var, op) in uses {
            if let Some(v) = graph.variables.get_mut(&var) {
                if !v.consumers.contains(&op) {
                    v.consumers.push(op);
                }
            }
        }
        graph.loss_variables = loss_variables;
        graph.next_id = max_id;
        graph.topological_order()?;
        Ok(graph)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Graph {
    fn clone(&self) -> Self {
        Graph {
            registry: Arc::clone(&self.registry),
            uid: next_uid(),
            version: self.version,
            next_id: self.next_id,
            variables: self.variables.clone(),
            operations: self.operations.clone(),
            var_names: self.var_names.clone(),
            op_names: self.op_names.clone(),
            loss_variables: self.loss_variables.clone(),
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("uid", &self.uid)
            .field("version", &self.version)
            .field("variables", &self.variables.len())
            .field("operations", &self.operations.len())
            .finish()
    }
}

fn output_names(base: &str, count: usize) -> Vec<String> {
    if count == 1 {
        vec![base.to_string()]
    } else {
        (0..count).map(|i| format!("{base}:{i}")).collect()
    }
}

fn shapes_compatible(a: &Shape, b: &Shape) -> bool {
    a.rank() == b.rank()
        && a
            .dims()
            .iter()
            .zip(b.dims())
            .all(|(&x, &y)| x < 0 || y < 0 || x == y)
}

/// Drops repeated entries, keeping the first occurrence of each.
fn dedup_in_order<T: Copy + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}

fn check_value(
    name: &str,
    kind: VariableKind,
    spec: &TensorSpec,
    value: &Tensor,
) -> Result<(), GraphError> {
    if !kind.holds_value() {
        return Err(GraphError::InvalidValue {
            name: name.to_string(),
            reason: format!("{} variables do not hold values", kind.name()),
        });
    }
    if value.dtype() != spec.dtype || !spec.shape.accepts(value.dims()) {
        return Err(GraphError::InvalidValue {
            name: name.to_string(),
            reason: format!("value {} does not match declared {spec}", value.spec()),
        });
    }
    Ok(())
}
