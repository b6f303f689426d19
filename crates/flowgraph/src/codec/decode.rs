use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::graph::{Graph, GraphError, OpId, Operation, VarId, Variable, VariableKind};
use crate::ops::{InferInput, OpArgs, OpRegistry, OpType, Properties, PropertyKind, PropertyValue};
use crate::tensor::{ByteOrder, DType, Shape, Tensor, TensorError, TensorSpec};

use super::wire::Reader;
use super::{CodecError, FORMAT_VERSION, ROOT_BLOCK_LEN, SCHEMA_ID};

fn invalid(detail: impl Into<String>) -> CodecError {
    CodecError::InvalidReference {
        detail: detail.into(),
    }
}

/// Converts a wire `u64` extent or byte count; values beyond `usize` are rejected.
fn wire_len(value: u64, name: &str) -> Result<usize, CodecError> {
    usize::try_from(value).map_err(|_| CodecError::InvalidValue {
        name: name.to_string(),
        source: TensorError::Overflow {
            dims: vec![usize::MAX],
        },
    })
}

fn dtype(code: u8) -> Result<DType, CodecError> {
    DType::from_code(code).ok_or(CodecError::UnknownEnumCode {
        category: "dtype",
        code,
    })
}

struct Strings(Vec<String>);

impl Strings {
    fn get(&self, index: u32) -> Result<&str, CodecError> {
        self.0
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| invalid(format!("string index {index} out of range")))
    }

    fn owned(&self, index: u32) -> Result<String, CodecError> {
        self.get(index).map(str::to_string)
    }
}

pub(super) fn decode_graph(registry: Arc<OpRegistry>, bytes: &[u8]) -> Result<Graph, CodecError> {
    let mut r = Reader::new(bytes);

    let schema = r.u32()?;
    if schema != SCHEMA_ID {
        return Err(CodecError::SchemaMismatch {
            found: schema,
            expected: SCHEMA_ID,
        });
    }
    let block_length = r.u32()?;
    let version = r.u32()?;
    if version > FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            max: FORMAT_VERSION,
        });
    }
    if block_length < ROOT_BLOCK_LEN {
        return Err(invalid(format!("root block of {block_length} bytes is too short")));
    }
    let mut root = r.block(block_length as usize)?;
    let string_count = root.u32()? as usize;
    let variable_count = root.u32()? as usize;
    let node_count = root.u32()? as usize;
    let loss_count = root.u32()? as usize;

    let mut strings = Vec::with_capacity(string_count.min(r.remaining() / 4));
    for index in 0..string_count {
        let len = r.count(1)?;
        let raw = r.bytes(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidString { index })?;
        strings.push(s.to_string());
    }
    let strings = Strings(strings);

    let mut variables = Vec::with_capacity(variable_count.min(r.remaining() / 4));
    for _ in 0..variable_count {
        let mut record = r.record()?;
        variables.push(read_variable(&mut record, &strings)?);
    }
    let mut operations = Vec::with_capacity(node_count.min(r.remaining() / 4));
    for _ in 0..node_count {
        let mut record = r.record()?;
        operations.push(read_operation(&mut record, &strings, &registry)?);
    }
    let mut losses = Vec::with_capacity(loss_count.min(r.remaining() / 4));
    for _ in 0..loss_count {
        losses.push(VarId(r.u32()?));
    }

    let operations = validate(&registry, &variables, operations, &losses)?;

    Graph::from_parts(registry, variables, operations, losses).map_err(|err| match err {
        GraphError::Cycle { op } => CodecError::Cyclic { op },
        other => invalid(other.to_string()),
    })
}

fn read_variable(r: &mut Reader<'_>, strings: &Strings) -> Result<Variable, CodecError> {
    let id = VarId(r.u32()?);
    let name = strings.owned(r.u32()?)?;
    let kind_code = r.u8()?;
    let kind = VariableKind::from_code(kind_code).ok_or(CodecError::UnknownEnumCode {
        category: "variable kind",
        code: kind_code,
    })?;
    let dtype = dtype(r.u8()?)?;
    let rank = r.count(8)?;
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(r.i64()?);
    }
    let producer_op = r.i32()?;
    let producer_slot = r.u32()?;
    let producer = (producer_op >= 0).then(|| (OpId(producer_op as u32), producer_slot as usize));
    let gradient = r.i32()?;
    let gradient = (gradient >= 0).then(|| VarId(gradient as u32));

    let value = if r.bool()? {
        let order_code = r.u8()?;
        let order = ByteOrder::from_code(order_code).ok_or(CodecError::UnknownEnumCode {
            category: "byte order",
            code: order_code,
        })?;
        let rank = r.count(8)?;
        let mut value_dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            value_dims.push(wire_len(r.u64()?, &name)?);
        }
        let nbytes = wire_len(r.u64()?, &name)?;
        let payload = r.bytes(nbytes)?;
        let tensor = Tensor::from_bytes(dtype, &value_dims, order, payload).map_err(|source| {
            CodecError::InvalidValue {
                name: name.clone(),
                source,
            }
        })?;
        Some(tensor)
    } else {
        None
    };

    Ok(Variable {
        id,
        name,
        kind,
        spec: TensorSpec::new(dtype, Shape::new(dims)),
        value,
        producer,
        consumers: Vec::new(),
        gradient,
    })
}

/// A node as read from the wire, before cross-record validation.
struct RawOperation {
    op: Operation,
    op_type: OpType,
    paired: Vec<Option<(OpId, usize)>>,
    output_dtypes: Vec<DType>,
}

fn read_ids(r: &mut Reader<'_>) -> Result<Vec<u32>, CodecError> {
    let count = r.count(4)?;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(r.u32()?);
    }
    Ok(ids)
}

fn read_operation(
    r: &mut Reader<'_>,
    strings: &Strings,
    registry: &OpRegistry,
) -> Result<RawOperation, CodecError> {
    let id = OpId(r.u32()?);
    let name = strings.owned(r.u32()?)?;
    let type_code = r.u8()?;
    let op_type = OpType::from_code(type_code).ok_or(CodecError::UnknownEnumCode {
        category: "op type",
        code: type_code,
    })?;
    let op_name = strings.get(r.u32()?)?;
    let kind = registry.by_name(op_name).ok_or_else(|| CodecError::UnknownOp {
        name: op_name.to_string(),
    })?;

    let inputs: Vec<VarId> = read_ids(r)?.into_iter().map(VarId).collect();
    let pair_count = r.count(8)?;
    let mut paired = Vec::with_capacity(pair_count);
    for _ in 0..pair_count {
        let producer = r.i32()?;
        let slot = r.u32()?;
        paired.push((producer >= 0).then(|| (OpId(producer as u32), slot as usize)));
    }
    let outputs: Vec<VarId> = read_ids(r)?.into_iter().map(VarId).collect();

    let mut args = OpArgs::new();
    for _ in 0..r.count(8)? {
        args.t_args.push(r.f64()?);
    }
    for _ in 0..r.count(8)? {
        args.i_args.push(r.i64()?);
    }
    for _ in 0..r.count(1)? {
        args.b_args.push(r.bool()?);
    }
    for _ in 0..r.count(4)? {
        args.s_args.push(strings.owned(r.u32()?)?);
    }
    for _ in 0..r.count(1)? {
        args.d_args.push(dtype(r.u8()?)?);
    }
    let mut dimensions = Vec::new();
    for _ in 0..r.count(8)? {
        dimensions.push(r.i64()?);
    }

    let mut properties = Properties::new();
    for _ in 0..r.count(5)? {
        let key = strings.owned(r.u32()?)?;
        let value = read_property(r, strings)?;
        properties.insert(key, value);
    }

    let control_deps = read_ids(r)?.into_iter().map(OpId).collect();
    let var_control_deps = read_ids(r)?.into_iter().map(VarId).collect();
    let control_dep_for = read_ids(r)?.into_iter().map(OpId).collect();

    let mut output_dtypes = Vec::new();
    for _ in 0..r.count(1)? {
        output_dtypes.push(dtype(r.u8()?)?);
    }

    Ok(RawOperation {
        op: Operation {
            id,
            name,
            kind,
            inputs,
            outputs,
            args,
            dimensions,
            properties,
            control_deps,
            control_dep_for,
            var_control_deps,
        },
        op_type,
        paired,
        output_dtypes,
    })
}

fn read_property(r: &mut Reader<'_>, strings: &Strings) -> Result<PropertyValue, CodecError> {
    let code = r.u8()?;
    let kind = PropertyKind::from_code(code).ok_or(CodecError::UnknownEnumCode {
        category: "property kind",
        code,
    })?;
    Ok(match kind {
        PropertyKind::Int => PropertyValue::Int(r.i32()?),
        PropertyKind::Long => PropertyValue::Long(r.i64()?),
        PropertyKind::Double => PropertyValue::Double(r.f64()?),
        PropertyKind::Bool => PropertyValue::Bool(r.bool()?),
        PropertyKind::String => PropertyValue::String(strings.owned(r.u32()?)?),
        PropertyKind::TensorRef => PropertyValue::TensorRef(strings.owned(r.u32()?)?),
        PropertyKind::LongArray => {
            let mut values = Vec::new();
            for _ in 0..r.count(8)? {
                values.push(r.i64()?);
            }
            PropertyValue::LongArray(values)
        }
        PropertyKind::DoubleArray => {
            let mut values = Vec::new();
            for _ in 0..r.count(8)? {
                values.push(r.f64()?);
            }
            PropertyValue::DoubleArray(values)
        }
        PropertyKind::BoolArray => {
            let mut values = Vec::new();
            for _ in 0..r.count(1)? {
                values.push(r.bool()?);
            }
            PropertyValue::BoolArray(values)
        }
        PropertyKind::StringArray => {
            let mut values = Vec::new();
            for _ in 0..r.count(4)? {
                values.push(strings.owned(r.u32()?)?);
            }
            PropertyValue::StringArray(values)
        }
    })
}

/// Cross-checks every id reference before any graph is assembled.
fn validate(
    registry: &OpRegistry,
    variables: &[Variable],
    raw: Vec<RawOperation>,
    losses: &[VarId],
) -> Result<Vec<Operation>, CodecError> {
    let vars: HashMap<VarId, &Variable> = variables.iter().map(|v| (v.id, v)).collect();
    if vars.len() != variables.len() {
        return Err(invalid("duplicate variable id"));
    }
    let mut op_ids = HashSet::new();
    for node in &raw {
        if !op_ids.insert(node.op.id) || vars.contains_key(&VarId(node.op.id.0)) {
            return Err(invalid(format!("duplicate id {} for `{}`", node.op.id.0, node.op.name)));
        }
    }
    let outputs_of: HashMap<OpId, &[VarId]> =
        raw.iter().map(|node| (node.op.id, node.op.outputs.as_slice())).collect();

    for node in &raw {
        let op = &node.op;
        let expected = op.kind.op_type();
        if node.op_type != expected {
            return Err(CodecError::OpTypeMismatch {
                op: op.name.clone(),
                kind: op.kind,
                expected,
                found: node.op_type,
            });
        }
        if let Some(var) = op
            .inputs
            .iter()
            .chain(&op.outputs)
            .chain(&op.var_control_deps)
            .find(|v| !vars.contains_key(*v))
        {
            return Err(invalid(format!("`{}` references unknown variable {var}", op.name)));
        }
        if let Some(dep) = op
            .control_deps
            .iter()
            .chain(&op.control_dep_for)
            .find(|d| !op_ids.contains(*d))
        {
            return Err(invalid(format!("`{}` references unknown operation {dep}", op.name)));
        }
        if node.paired.len() != op.inputs.len()
            || op
                .inputs
                .iter()
                .zip(&node.paired)
                .any(|(var, pair)| vars.get(var).map(|v| v.producer) != Some(*pair))
        {
            return Err(invalid(format!("paired inputs of `{}` disagree with producers", op.name)));
        }
        for (slot, out) in op.outputs.iter().enumerate() {
            let variable = vars[out];
            if variable.producer != Some((op.id, slot)) {
                return Err(invalid(format!(
                    "`{}` is listed as output {slot} of `{}` but records another producer",
                    variable.name, op.name
                )));
            }
            if node.output_dtypes.get(slot) != Some(&variable.spec.dtype) {
                return Err(invalid(format!(
                    "output dtype of `{}` disagrees with `{}`",
                    op.name, variable.name
                )));
            }
        }
        let input_specs: Vec<TensorSpec> = op.inputs.iter().map(|v| vars[v].spec.clone()).collect();
        registry
            .infer(
                op.kind,
                &InferInput {
                    inputs: &input_specs,
                    args: &op.args,
                    dimensions: &op.dimensions,
                },
            )
            .map_err(|reason| invalid(format!("`{}` is malformed: {reason}", op.name)))?;
    }

    for variable in variables {
        if let Some((op, slot)) = variable.producer {
            let listed = outputs_of.get(&op).and_then(|outs| outs.get(slot));
            if listed != Some(&variable.id) {
                return Err(invalid(format!(
                    "`{}` claims producer {op} slot {slot}",
                    variable.name
                )));
            }
        }
        if let Some(gradient) = variable.gradient {
            if !vars.contains_key(&gradient) {
                return Err(invalid(format!("gradient link of `{}` is dangling", variable.name)));
            }
        }
        if let Some(value) = &variable.value {
            if !variable.kind.holds_value() {
                return Err(invalid(format!("`{}` cannot hold a value", variable.name)));
            }
            if value.dtype() != variable.spec.dtype || !variable.spec.shape.accepts(value.dims()) {
                return Err(invalid(format!(
                    "value {} of `{}` does not match declared {}",
                    value.spec(),
                    variable.name,
                    variable.spec
                )));
            }
        }
    }
    if let Some(loss) = losses.iter().find(|l| !vars.contains_key(*l)) {
        return Err(invalid(format!("unknown loss variable {loss}")));
    }

    Ok(raw.into_iter().map(|node| node.op).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn tiny() -> Vec<u8> {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [2]).unwrap();
        graph.neg(x).unwrap();
        encode(&graph)
    }

    /// Offset of the first variable record's kind byte.
    fn first_variable_kind_offset(bytes: &[u8]) -> usize {
        let string_count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let mut offset = 12 + ROOT_BLOCK_LEN as usize;
        for _ in 0..string_count {
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4 + len;
        }
        // record length, id, name index
        offset + 4 + 4 + 4
    }

    #[test]
    fn unknown_variable_kind_fails_instead_of_defaulting() {
        let mut bytes = tiny();
        let at = first_variable_kind_offset(&bytes);
        bytes[at] = 0xEE;
        match decode(&bytes) {
            Err(CodecError::UnknownEnumCode { category, code }) => {
                assert_eq!(category, "variable kind");
                assert_eq!(code, 0xEE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_dtype_fails_instead_of_defaulting() {
        let mut bytes = tiny();
        let at = first_variable_kind_offset(&bytes) + 1;
        bytes[at] = 0xEE;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::UnknownEnumCode { category: "dtype", code: 0xEE })
        ));
    }
}
