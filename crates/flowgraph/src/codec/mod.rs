//! Versioned binary format for graphs.
//!
//! ```text
//! header   schema_id:u32  block_length:u32  version:u32
//! root     string_count:u32  variable_count:u32  node_count:u32  loss_count:u32  [..block_length]
//! strings  (len:u32 utf8)*
//! vars     (record_len:u32 variable_record)*
//! nodes    (record_len:u32 node_record)*
//! losses   var_id:u32*
//! ```
//!
//! Everything is little-endian. Readers skip record bytes past the fields they understand, so
//! writers may append fields without bumping the version. Unknown enum codes are errors.

mod decode;
mod encode;
mod wire;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::Graph;
use crate::ops::{OpKind, OpRegistry, OpType};
use crate::tensor::TensorError;

/// `FGRF` read as a little-endian `u32`.
pub const SCHEMA_ID: u32 = 0x4647_5246;
pub const FORMAT_VERSION: u32 = 1;
const ROOT_BLOCK_LEN: u32 = 16;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("schema id {found:#010x} does not match {expected:#010x}")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("format version {found} is newer than the supported version {max}")]
    UnsupportedVersion { found: u32, max: u32 },
    #[error("truncated input at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("unknown {category} code {code}")]
    UnknownEnumCode { category: &'static str, code: u8 },
    #[error("unknown operation `{name}`")]
    UnknownOp { name: String },
    #[error("operation `{op}` is recorded as {found:?} but {kind} belongs to {expected:?}")]
    OpTypeMismatch {
        op: String,
        kind: OpKind,
        expected: OpType,
        found: OpType,
    },
    #[error("string {index} is not valid UTF-8")]
    InvalidString { index: usize },
    #[error("invalid reference: {detail}")]
    InvalidReference { detail: String },
    #[error("value of `{name}` cannot be decoded")]
    InvalidValue {
        name: String,
        #[source]
        source: TensorError,
    },
    #[error("decoded graph contains a cycle through `{op}`")]
    Cyclic { op: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encodes and decodes graphs against one op registry.
#[derive(Clone)]
pub struct GraphCodec {
    registry: Arc<OpRegistry>,
}

impl GraphCodec {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        GraphCodec { registry }
    }

    /// Serializes `graph`. Output is a pure function of the graph's contents.
    pub fn encode(&self, graph: &Graph) -> Vec<u8> {
        encode::encode_graph(graph, &[])
    }

    /// Rebuilds a graph; nothing is returned unless every record and reference is valid.
    pub fn decode(&self, bytes: &[u8]) -> Result<Graph, CodecError> {
        decode::decode_graph(Arc::clone(&self.registry), bytes)
    }

    pub fn save(&self, graph: &Graph, path: impl AsRef<Path>) -> Result<(), CodecError> {
        std::fs::write(path, self.encode(graph))?;
        Ok(())
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Graph, CodecError> {
        let bytes = std::fs::read(path)?;
        self.decode(&bytes)
    }
}

impl Default for GraphCodec {
    fn default() -> Self {
        Self::new(OpRegistry::global())
    }
}

pub fn encode(graph: &Graph) -> Vec<u8> {
    GraphCodec::default().encode(graph)
}

pub fn decode(bytes: &[u8]) -> Result<Graph, CodecError> {
    GraphCodec::default().decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpDef;
    use crate::ops::{OpArgs, PropertyValue};
    use crate::tensor::{DType, Tensor};

    fn sample() -> Graph {
        let mut graph = Graph::new();
        let x = graph.add_placeholder("x", DType::Float, [-1, 3]).unwrap();
        let w = graph
            .add_trainable("w", Tensor::from_f32(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())
            .unwrap();
        let y = graph.matmul(x, w).unwrap();
        graph
            .add_operation(
                OpDef::new(OpKind::Softmax)
                    .name("probs")
                    .input(y)
                    .args(OpArgs::new().with_i(-1))
                    .property("note", PropertyValue::String("head".into())),
            )
            .unwrap();
        graph.set_loss_variables(&["probs"]).unwrap();
        graph
    }

    #[test]
    fn header_carries_schema_and_version() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[0..4], &SCHEMA_ID.to_le_bytes());
        assert_eq!(&bytes[4..8], &ROOT_BLOCK_LEN.to_le_bytes());
        assert_eq!(&bytes[8..12], &FORMAT_VERSION.to_le_bytes());
    }

    #[test]
    fn encoding_is_deterministic() {
        let graph = sample();
        assert_eq!(encode(&graph), encode(&graph));
        assert_eq!(encode(&graph), encode(&graph.clone()));
    }

    #[test]
    fn trailing_record_fields_are_skipped() {
        let graph = sample();
        let bytes = encode::encode_graph(&graph, &[0xAB, 0xCD, 0xEF]);
        let decoded = decode(&bytes).unwrap();
        assert!(graph.structurally_eq(&decoded));
    }

    #[test]
    fn wrong_schema_is_rejected() {
        let mut bytes = encode(&sample());
        bytes[0] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(CodecError::SchemaMismatch { .. })));
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut bytes = encode(&sample());
        bytes[8..12].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        match decode(&bytes) {
            Err(CodecError::UnsupportedVersion { found, max }) => {
                assert_eq!((found, max), (FORMAT_VERSION + 1, FORMAT_VERSION));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn every_truncation_fails_cleanly() {
        let bytes = encode(&sample());
        for cut in 0..bytes.len() {
            assert!(decode(&bytes[..cut]).is_err(), "prefix of {cut} bytes decoded");
        }
    }
}
