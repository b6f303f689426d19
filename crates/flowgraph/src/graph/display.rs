//! Human-readable text form of a graph.

use std::fmt;

use super::{Graph, VariableKind};

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graph {{ // {} variables, {} operations",
            self.num_variables(),
            self.num_operations()
        )?;
        for v in self.variables() {
            if v.kind == VariableKind::Array && v.producer.is_some() {
                continue;
            }
            write!(f, "  {} %{}: {}", v.kind.name(), v.name, v.spec)?;
            if let Some(value) = &v.value {
                write!(f, " = <{} elements>", value.len())?;
            }
            writeln!(f)?;
        }
        let order = self.topological_order().unwrap_or_default();
        for id in order {
            let Some(op) = self.op(id) else { continue };
            let outputs: Vec<String> = op
                .outputs
                .iter()
                .map(|o| {
                    let spec = self.var(*o).map(|v| v.spec.to_string()).unwrap_or_default();
                    format!("%{}: {}", self.var_name(*o), spec)
                })
                .collect();
            let inputs: Vec<String> = op
                .inputs
                .iter()
                .map(|i| format!("%{}", self.var_name(*i)))
                .collect();
            write!(
                f,
                "  {} = {}[{}]({})",
                outputs.join(", "),
                op.kind,
                op.name,
                inputs.join(", ")
            )?;
            if !op.args.is_empty() {
                write!(f, " args={:?}", op.args)?;
            }
            if !op.dimensions.is_empty() {
                write!(f, " dims={:?}", op.dimensions)?;
            }
            for (key, value) in &op.properties {
                write!(f, " {key}={value}")?;
            }
            if !op.control_deps.is_empty() {
                let deps: Vec<&str> = op.control_deps.iter().map(|d| self.op_name(*d)).collect();
                write!(f, " after=[{}]", deps.join(", "))?;
            }
            writeln!(f)?;
        }
        if !self.loss_variables.is_empty() {
            let losses: Vec<String> = self
                .loss_variables
                .iter()
                .map(|l| format!("%{}", self.var_name(*l)))
                .collect();
            writeln!(f, "  loss {}", losses.join(", "))?;
        }
        f.write_str("}")
    }
}
