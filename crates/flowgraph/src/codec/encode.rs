use std::collections::HashMap;

use crate::graph::{Graph, Operation, Variable};
use crate::ops::PropertyValue;

use super::wire::Writer;
use super::{FORMAT_VERSION, ROOT_BLOCK_LEN, SCHEMA_ID};

/// Interned strings in first-use order.
#[derive(Default)]
struct StringTable {
    index: HashMap<String, u32>,
    strings: Vec<String>,
}

impl StringTable {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.index.get(value) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), index);
        index
    }

    fn lookup(&self, value: &str) -> u32 {
        self.index.get(value).copied().unwrap_or(u32::MAX)
    }
}

fn collect_strings(graph: &Graph) -> StringTable {
    let mut table = StringTable::default();
    for variable in graph.variables() {
        table.intern(variable.name());
    }
    for op in graph.operations() {
        table.intern(op.name());
        table.intern(op.kind().name());
        for s in &op.args().s_args {
            table.intern(s);
        }
        for (key, value) in op.properties() {
            table.intern(key);
            match value {
                PropertyValue::String(s) | PropertyValue::TensorRef(s) => {
                    table.intern(s);
                }
                PropertyValue::StringArray(values) => {
                    for s in values {
                        table.intern(s);
                    }
                }
                _ => {}
            }
        }
    }
    table
}

/// Encodes `graph`, appending `trailer` to the root block and to every record.
///
/// Production callers pass an empty trailer; tests use it to emulate fields added by a newer
/// writer.
pub(super) fn encode_graph(graph: &Graph, trailer: &[u8]) -> Vec<u8> {
    let strings = collect_strings(graph);
    let mut w = Writer::default();

    w.u32(SCHEMA_ID);
    w.u32(ROOT_BLOCK_LEN + trailer.len() as u32);
    w.u32(FORMAT_VERSION);
    w.count(strings.strings.len());
    w.count(graph.num_variables());
    w.count(graph.num_operations());
    w.count(graph.loss_variables().len());
    w.bytes(trailer);

    for s in &strings.strings {
        w.count(s.len());
        w.bytes(s.as_bytes());
    }
    for variable in graph.variables() {
        w.record(|w| {
            write_variable(w, &strings, variable);
            w.bytes(trailer);
        });
    }
    for op in graph.operations() {
        w.record(|w| {
            write_operation(w, &strings, graph, op);
            w.bytes(trailer);
        });
    }
    for loss in graph.loss_variables() {
        w.u32(loss.0);
    }
    w.into_bytes()
}

fn write_variable(w: &mut Writer, strings: &StringTable, variable: &Variable) {
    w.u32(variable.id().0);
    w.u32(strings.lookup(variable.name()));
    w.u8(variable.kind().code());
    w.u8(variable.spec().dtype.code());
    let dims = variable.spec().shape.dims();
    w.count(dims.len());
    for &d in dims {
        w.i64(d);
    }
    match variable.producer() {
        Some((op, slot)) => {
            w.i32(op.0 as i32);
            w.u32(slot as u32);
        }
        None => {
            w.i32(-1);
            w.u32(0);
        }
    }
    w.i32(variable.gradient().map_or(-1, |g| g.0 as i32));
    match variable.value() {
        Some(value) => {
            w.bool(true);
            w.u8(value.byte_order().code());
            w.count(value.dims().len());
            for &d in value.dims() {
                w.u64(d as u64);
            }
            let payload = value.to_bytes();
            w.u64(payload.len() as u64);
            w.bytes(&payload);
        }
        None => w.bool(false),
    }
}

fn write_operation(w: &mut Writer, strings: &StringTable, graph: &Graph, op: &Operation) {
    w.u32(op.id().0);
    w.u32(strings.lookup(op.name()));
    w.u8(op.kind().op_type().code());
    w.u32(strings.lookup(op.kind().name()));

    w.count(op.inputs().len());
    for input in op.inputs() {
        w.u32(input.0);
    }
    let paired = graph.paired_inputs(op);
    w.count(paired.len());
    for pair in paired {
        match pair {
            Some((producer, slot)) => {
                w.i32(producer.0 as i32);
                w.u32(slot as u32);
            }
            None => {
                w.i32(-1);
                w.u32(0);
            }
        }
    }
    w.count(op.outputs().len());
    for output in op.outputs() {
        w.u32(output.0);
    }

    let args = op.args();
    w.count(args.t_args.len());
    for &t in &args.t_args {
        w.f64(t);
    }
    w.count(args.i_args.len());
    for &i in &args.i_args {
        w.i64(i);
    }
    w.count(args.b_args.len());
    for &b in &args.b_args {
        w.bool(b);
    }
    w.count(args.s_args.len());
    for s in &args.s_args {
        w.u32(strings.lookup(s));
    }
    w.count(args.d_args.len());
    for d in &args.d_args {
        w.u8(d.code());
    }
    w.count(op.dimensions().len());
    for &d in op.dimensions() {
        w.i64(d);
    }

    w.count(op.properties().len());
    for (key, value) in op.properties() {
        w.u32(strings.lookup(key));
        w.u8(value.kind().code());
        write_property(w, strings, value);
    }

    w.count(op.control_deps().len());
    for dep in op.control_deps() {
        w.u32(dep.0);
    }
    w.count(op.var_control_deps().len());
    for var in op.var_control_deps() {
        w.u32(var.0);
    }
    w.count(op.control_dep_for().len());
    for dependent in op.control_dep_for() {
        w.u32(dependent.0);
    }

    w.count(op.outputs().len());
    for output in op.outputs() {
        let code = graph.var(*output).map_or(0, |v| v.spec().dtype.code());
        w.u8(code);
    }
}

fn write_property(w: &mut Writer, strings: &StringTable, value: &PropertyValue) {
    match value {
        PropertyValue::Int(v) => w.i32(*v),
        PropertyValue::Long(v) => w.i64(*v),
        PropertyValue::Double(v) => w.f64(*v),
        PropertyValue::Bool(v) => w.bool(*v),
        PropertyValue::String(s) | PropertyValue::TensorRef(s) => w.u32(strings.lookup(s)),
        PropertyValue::LongArray(values) => {
            w.count(values.len());
            for &v in values {
                w.i64(v);
            }
        }
        PropertyValue::DoubleArray(values) => {
            w.count(values.len());
            for &v in values {
                w.f64(v);
            }
        }
        PropertyValue::BoolArray(values) => {
            w.count(values.len());
            for &v in values {
                w.bool(v);
            }
        }
        PropertyValue::StringArray(values) => {
            w.count(values.len());
            for s in values {
                w.u32(strings.lookup(s));
            }
        }
    }
}
