//! Variable and operation records owned by a [`super::Graph`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ops::{OpArgs, OpKind, Properties};
use crate::tensor::{Tensor, TensorSpec};

/// Creation id of a variable. Ids are graph-scoped and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Creation id of an operation. Shares the graph's id counter with [`VarId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Role of a variable in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Trainable state; keeps its bound value across runs until reassigned.
    Variable,
    /// Fixed value; never differentiated.
    Constant,
    /// Computed by an operation during a run.
    Array,
    /// Supplied by the caller through the feed map.
    Placeholder,
}

impl VariableKind {
    pub const ALL: [VariableKind; 4] = [
        VariableKind::Variable,
        VariableKind::Constant,
        VariableKind::Array,
        VariableKind::Placeholder,
    ];

    pub fn code(self) -> u8 {
        match self {
            VariableKind::Variable => 0,
            VariableKind::Constant => 1,
            VariableKind::Array => 2,
            VariableKind::Placeholder => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(VariableKind::Variable),
            1 => Some(VariableKind::Constant),
            2 => Some(VariableKind::Array),
            3 => Some(VariableKind::Placeholder),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VariableKind::Variable => "variable",
            VariableKind::Constant => "constant",
            VariableKind::Array => "array",
            VariableKind::Placeholder => "placeholder",
        }
    }

    /// Whether the variable carries a value bound at build time.
    pub fn holds_value(self) -> bool {
        matches!(self, VariableKind::Variable | VariableKind::Constant)
    }
}

/// A named, typed graph node.
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) id: VarId,
    pub(crate) name: String,
    pub(crate) kind: VariableKind,
    pub(crate) spec: TensorSpec,
    pub(crate) value: Option<Tensor>,
    pub(crate) producer: Option<(OpId, usize)>,
    pub(crate) consumers: Vec<OpId>,
    pub(crate) gradient: Option<VarId>,
}

impl Variable {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    /// Bound value of a constant or variable.
    pub fn value(&self) -> Option<&Tensor> {
        self.value.as_ref()
    }

    /// Producing operation and output slot, for ARRAY variables.
    pub fn producer(&self) -> Option<(OpId, usize)> {
        self.producer
    }

    /// Operations reading this variable as a data input, in creation order.
    pub fn consumers(&self) -> &[OpId] {
        &self.consumers
    }

    /// Gradient variable linked by the autodiff builder.
    pub fn gradient(&self) -> Option<VarId> {
        self.gradient
    }

    /// True when a run can obtain a value for this variable without executing anything else.
    pub(crate) fn is_source(&self) -> bool {
        self.kind != VariableKind::Array
    }

    /// True when the variable is resolvable as an operation input.
    pub(crate) fn is_resolvable(&self) -> bool {
        self.is_source() || self.producer.is_some()
    }
}

/// A computation node.
#[derive(Debug, Clone)]
pub struct Operation {
    pub(crate) id: OpId,
    pub(crate) name: String,
    pub(crate) kind: OpKind,
    pub(crate) inputs: Vec<VarId>,
    pub(crate) outputs: Vec<VarId>,
    pub(crate) args: OpArgs,
    pub(crate) dimensions: Vec<i64>,
    pub(crate) properties: Properties,
    pub(crate) control_deps: Vec<OpId>,
    pub(crate) control_dep_for: Vec<OpId>,
    pub(crate) var_control_deps: Vec<VarId>,
}

impl Operation {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn args(&self) -> &OpArgs {
        &self.args
    }

    /// Axis list used by reductions.
    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Operations that must complete before this one.
    pub fn control_deps(&self) -> &[OpId] {
        &self.control_deps
    }

    /// Operations that list this one as a control dependency.
    pub fn control_dep_for(&self) -> &[OpId] {
        &self.control_dep_for
    }

    /// Variables that must be available before this op runs, without being read.
    pub fn var_control_deps(&self) -> &[VarId] {
        &self.var_control_deps
    }
}

/// Declarative description of an operation to add.
///
/// Output specs are inferred from the inputs. Output names default to the op name for one
/// output and `name:i` for several; an explicit name that matches an existing ARRAY variable
/// with no producer adopts that variable.
#[derive(Debug, Clone)]
pub struct OpDef {
    pub(crate) kind: OpKind,
    pub(crate) name: Option<String>,
    pub(crate) inputs: Vec<VarId>,
    pub(crate) output_names: Vec<String>,
    pub(crate) args: OpArgs,
    pub(crate) dimensions: Vec<i64>,
    pub(crate) properties: Properties,
    pub(crate) control_deps: Vec<OpId>,
    pub(crate) var_control_deps: Vec<VarId>,
}

impl OpDef {
    pub fn new(kind: OpKind) -> Self {
        OpDef {
            kind,
            name: None,
            inputs: Vec::new(),
            output_names: Vec::new(),
            args: OpArgs::default(),
            dimensions: Vec::new(),
            properties: Properties::new(),
            control_deps: Vec::new(),
            var_control_deps: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn input(mut self, var: VarId) -> Self {
        self.inputs.push(var);
        self
    }

    pub fn inputs(mut self, vars: impl IntoIterator<Item = VarId>) -> Self {
        self.inputs.extend(vars);
        self
    }

    pub fn outputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.output_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn args(mut self, args: OpArgs) -> Self {
        self.args = args;
        self
    }

    pub fn dimensions(mut self, dims: impl Into<Vec<i64>>) -> Self {
        self.dimensions = dims.into();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: crate::ops::PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn control_dep(mut self, op: OpId) -> Self {
        self.control_deps.push(op);
        self
    }

    pub fn var_control_dep(mut self, var: VarId) -> Self {
        self.var_control_deps.push(var);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_kind_codes_round_trip() {
        for kind in VariableKind::ALL {
            assert_eq!(VariableKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(VariableKind::from_code(4), None);
    }
}
