//! Id-independent snapshot of a graph, used for structural equality and JSON dumps.

use serde::Serialize;

use crate::ops::{OpArgs, OpKind, OpType, Properties};
use crate::tensor::{ByteOrder, TensorSpec};

use super::{Graph, VariableKind};

/// Bound tensor payload, compared byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorEntry {
    pub dims: Vec<usize>,
    pub order: ByteOrder,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub name: String,
    pub kind: VariableKind,
    pub spec: TensorSpec,
    /// Producing op name and output slot.
    pub producer: Option<(String, usize)>,
    pub gradient: Option<String>,
    pub value: Option<TensorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationEntry {
    pub name: String,
    pub kind: OpKind,
    pub op_type: OpType,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub args: OpArgs,
    pub dimensions: Vec<i64>,
    pub properties: Properties,
    pub control_deps: Vec<String>,
    pub control_dep_for: Vec<String>,
    pub var_control_deps: Vec<String>,
}

/// Graph structure keyed by names rather than creation ids.
///
/// Two graphs are structurally equal when their snapshots compare equal: same variables with
/// the same kinds, specs and values, and the same operations with the same inputs, outputs,
/// arguments, properties and control dependencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStructure {
    pub variables: Vec<VariableEntry>,
    pub operations: Vec<OperationEntry>,
    pub loss_variables: Vec<String>,
}

impl GraphStructure {
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Graph {
    pub fn structure(&self) -> GraphStructure {
        let var_names = |ids: &[super::VarId]| -> Vec<String> {
            ids.iter().map(|id| self.var_name(*id).to_string()).collect()
        };
        let op_names = |ids: &[super::OpId], sort: bool| -> Vec<String> {
            let mut names: Vec<String> = ids.iter().map(|id| self.op_name(*id).to_string()).collect();
            if sort {
                names.sort();
            }
            names
        };

        let mut variables: Vec<VariableEntry> = self
            .variables()
            .map(|v| VariableEntry {
                name: v.name.clone(),
                kind: v.kind,
                spec: v.spec.clone(),
                producer: v
                    .producer
                    .map(|(op, slot)| (self.op_name(op).to_string(), slot)),
                gradient: v.gradient.map(|g| self.var_name(g).to_string()),
                value: v.value.as_ref().map(|t| TensorEntry {
                    dims: t.dims().to_vec(),
                    order: t.byte_order(),
                    bytes: t.to_bytes(),
                }),
            })
            .collect();
        variables.sort_by(|a, b| a.name.cmp(&b.name));

        let mut operations: Vec<OperationEntry> = self
            .operations()
            .map(|op| OperationEntry {
                name: op.name.clone(),
                kind: op.kind,
                op_type: op.kind.op_type(),
                inputs: var_names(&op.inputs),
                outputs: var_names(&op.outputs),
                args: op.args.clone(),
                dimensions: op.dimensions.clone(),
                properties: op.properties.clone(),
                control_deps: op_names(&op.control_deps, true),
                control_dep_for: op_names(&op.control_dep_for, true),
                var_control_deps: var_names(&op.var_control_deps),
            })
            .collect();
        operations.sort_by(|a, b| a.name.cmp(&b.name));

        GraphStructure {
            variables,
            operations,
            loss_variables: var_names(&self.loss_variables),
        }
    }

    /// Structural equality; creation ids are ignored.
    pub fn structurally_eq(&self, other: &Graph) -> bool {
        self.structure() == other.structure()
    }
}
