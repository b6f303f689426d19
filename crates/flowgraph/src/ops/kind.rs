//! Closed enumerations of operation kinds and their serialized op-type families.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operation family recorded in the binary format next to each node's op name.
///
/// Families group ops by execution contract (elementwise transform, reduction, custom
/// multi-output, ...). The byte codes are fixed and form a closed bijection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    TransformFloat,
    TransformSame,
    TransformBool,
    TransformStrict,
    TransformAny,
    ReduceFloat,
    ReduceSame,
    ReduceLong,
    ReduceBool,
    IndexReduce,
    Scalar,
    ScalarBool,
    Broadcast,
    BroadcastBool,
    Pairwise,
    PairwiseBool,
    Reduce3,
    SummaryStats,
    Random,
    Custom,
    Logic,
}

impl OpType {
    pub const ALL: [OpType; 21] = [
        OpType::TransformFloat,
        OpType::TransformSame,
        OpType::TransformBool,
        OpType::TransformStrict,
        OpType::TransformAny,
        OpType::ReduceFloat,
        OpType::ReduceSame,
        OpType::ReduceLong,
        OpType::ReduceBool,
        OpType::IndexReduce,
        OpType::Scalar,
        OpType::ScalarBool,
        OpType::Broadcast,
        OpType::BroadcastBool,
        OpType::Pairwise,
        OpType::PairwiseBool,
        OpType::Reduce3,
        OpType::SummaryStats,
        OpType::Random,
        OpType::Custom,
        OpType::Logic,
    ];

    pub fn code(self) -> u8 {
        match self {
            OpType::TransformFloat => 0,
            OpType::TransformSame => 1,
            OpType::TransformBool => 2,
            OpType::TransformStrict => 3,
            OpType::TransformAny => 4,
            OpType::ReduceFloat => 5,
            OpType::ReduceSame => 6,
            OpType::ReduceLong => 7,
            OpType::ReduceBool => 8,
            OpType::IndexReduce => 9,
            OpType::Scalar => 10,
            OpType::ScalarBool => 11,
            OpType::Broadcast => 12,
            OpType::BroadcastBool => 13,
            OpType::Pairwise => 14,
            OpType::PairwiseBool => 15,
            OpType::Reduce3 => 16,
            OpType::SummaryStats => 17,
            OpType::Random => 20,
            OpType::Custom => 21,
            OpType::Logic => 119,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        OpType::ALL.into_iter().find(|ty| ty.code() == code)
    }
}

/// Every operation the engine can place in a graph.
///
/// The enum is closed on purpose: the registry, the codec and every kernel backend match on it
/// exhaustively, so a new kind cannot be added without wiring all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Identity,
    Neg,
    Exp,
    Log,
    Tanh,
    Sigmoid,
    Relu,
    Square,
    Sqrt,
    Cast,
    Add,
    Sub,
    Mul,
    Div,
    ScalarAdd,
    ScalarMul,
    ScalarPow,
    MatMul,
    ReduceSum,
    ReduceMean,
    Softmax,
    Split,
    Concat,
    ArgMax,
    OnesLike,
    ZerosLike,
    StopGradient,
    AddN,
    ReduceToLike,
    ReduceSumBp,
    ReduceMeanBp,
    SoftmaxBp,
    TanhBp,
    SigmoidBp,
    ReluBp,
}

impl OpKind {
    pub const ALL: [OpKind; 35] = [
        OpKind::Identity,
        OpKind::Neg,
        OpKind::Exp,
        OpKind::Log,
        OpKind::Tanh,
        OpKind::Sigmoid,
        OpKind::Relu,
        OpKind::Square,
        OpKind::Sqrt,
        OpKind::Cast,
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::ScalarAdd,
        OpKind::ScalarMul,
        OpKind::ScalarPow,
        OpKind::MatMul,
        OpKind::ReduceSum,
        OpKind::ReduceMean,
        OpKind::Softmax,
        OpKind::Split,
        OpKind::Concat,
        OpKind::ArgMax,
        OpKind::OnesLike,
        OpKind::ZerosLike,
        OpKind::StopGradient,
        OpKind::AddN,
        OpKind::ReduceToLike,
        OpKind::ReduceSumBp,
        OpKind::ReduceMeanBp,
        OpKind::SoftmaxBp,
        OpKind::TanhBp,
        OpKind::SigmoidBp,
        OpKind::ReluBp,
    ];

    /// Position of this kind in [`OpKind::ALL`]; indexes the registry table.
    pub(crate) fn ordinal(self) -> usize {
        self as usize
    }

    /// Stable op name used as the default node name and in the binary format.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Identity => "identity",
            OpKind::Neg => "neg",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Tanh => "tanh",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Relu => "relu",
            OpKind::Square => "square",
            OpKind::Sqrt => "sqrt",
            OpKind::Cast => "cast",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::ScalarAdd => "scalar_add",
            OpKind::ScalarMul => "scalar_mul",
            OpKind::ScalarPow => "scalar_pow",
            OpKind::MatMul => "matmul",
            OpKind::ReduceSum => "reduce_sum",
            OpKind::ReduceMean => "reduce_mean",
            OpKind::Softmax => "softmax",
            OpKind::Split => "split",
            OpKind::Concat => "concat",
            OpKind::ArgMax => "argmax",
            OpKind::OnesLike => "ones_like",
            OpKind::ZerosLike => "zeros_like",
            OpKind::StopGradient => "stop_gradient",
            OpKind::AddN => "add_n",
            OpKind::ReduceToLike => "reduce_to_like",
            OpKind::ReduceSumBp => "reduce_sum_bp",
            OpKind::ReduceMeanBp => "reduce_mean_bp",
            OpKind::SoftmaxBp => "softmax_bp",
            OpKind::TanhBp => "tanh_bp",
            OpKind::SigmoidBp => "sigmoid_bp",
            OpKind::ReluBp => "relu_bp",
        }
    }

    /// Family this kind is serialized under.
    pub fn op_type(self) -> OpType {
        match self {
            OpKind::Identity | OpKind::Neg | OpKind::Relu | OpKind::Square => OpType::TransformSame,
            OpKind::Exp | OpKind::Log | OpKind::Sqrt => OpType::TransformFloat,
            OpKind::Tanh | OpKind::Sigmoid => OpType::TransformStrict,
            OpKind::Cast | OpKind::StopGradient => OpType::TransformAny,
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => OpType::Broadcast,
            OpKind::ScalarAdd | OpKind::ScalarMul | OpKind::ScalarPow => OpType::Scalar,
            OpKind::ReduceSum => OpType::ReduceSame,
            OpKind::ReduceMean => OpType::ReduceFloat,
            OpKind::ArgMax => OpType::IndexReduce,
            OpKind::AddN => OpType::Pairwise,
            OpKind::MatMul
            | OpKind::Softmax
            | OpKind::Split
            | OpKind::Concat
            | OpKind::OnesLike
            | OpKind::ZerosLike
            | OpKind::ReduceToLike
            | OpKind::ReduceSumBp
            | OpKind::ReduceMeanBp
            | OpKind::SoftmaxBp
            | OpKind::TanhBp
            | OpKind::SigmoidBp
            | OpKind::ReluBp => OpType::Custom,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OpKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_declaration_order() {
        for (index, kind) in OpKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal(), index, "{kind}");
            assert_eq!(OpKind::from_name(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn op_type_codes_are_a_bijection() {
        for ty in OpType::ALL {
            assert_eq!(OpType::from_code(ty.code()), Some(ty));
        }
        let mut codes: Vec<u8> = OpType::ALL.iter().map(|t| t.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), OpType::ALL.len());
        assert_eq!(OpType::from_code(18), None);
        assert_eq!(OpType::from_code(255), None);
    }
}
