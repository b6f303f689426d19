//! Enumerates the element types a graph variable can declare.

use serde::{Deserialize, Serialize};

/// Logical element type shared by variables, tensors and the binary codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    /// Boolean stored one byte per element.
    Bool,
    /// IEEE-754 half precision.
    Half,
    /// bfloat16 as used by many accelerators.
    BFloat16,
    /// 32-bit IEEE-754 float.
    Float,
    /// 64-bit IEEE-754 float.
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Variable-length UTF-8 strings. Declarable but not executable by the reference kernels.
    Utf8,
}

impl DType {
    /// Every dtype in code order. Used by bijection checks and the text renderer.
    pub const ALL: [DType; 14] = [
        DType::Bool,
        DType::Half,
        DType::Float,
        DType::Double,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::BFloat16,
        DType::Utf8,
    ];

    /// Returns the number of bytes required per scalar element, or `None` for variable-width types.
    pub fn size_in_bytes(self) -> Option<usize> {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => Some(1),
            DType::Half | DType::BFloat16 | DType::Int16 | DType::UInt16 => Some(2),
            DType::Float | DType::Int32 | DType::UInt32 => Some(4),
            DType::Double | DType::Int64 | DType::UInt64 => Some(8),
            DType::Utf8 => None,
        }
    }

    /// True for element types autodiff may differentiate.
    pub fn is_floating(self) -> bool {
        matches!(
            self,
            DType::Half | DType::BFloat16 | DType::Float | DType::Double
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt8
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    /// Stable byte code used by the binary graph format.
    pub fn code(self) -> u8 {
        match self {
            DType::Bool => 1,
            DType::Half => 3,
            DType::Float => 5,
            DType::Double => 6,
            DType::Int8 => 7,
            DType::Int16 => 8,
            DType::Int32 => 9,
            DType::Int64 => 10,
            DType::UInt8 => 11,
            DType::UInt16 => 12,
            DType::UInt32 => 13,
            DType::UInt64 => 14,
            DType::BFloat16 => 17,
            DType::Utf8 => 50,
        }
    }

    /// Reconstructs a dtype from its byte code. Unknown codes yield `None`; callers must not
    /// substitute a default.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DType::Bool),
            3 => Some(DType::Half),
            5 => Some(DType::Float),
            6 => Some(DType::Double),
            7 => Some(DType::Int8),
            8 => Some(DType::Int16),
            9 => Some(DType::Int32),
            10 => Some(DType::Int64),
            11 => Some(DType::UInt8),
            12 => Some(DType::UInt16),
            13 => Some(DType::UInt32),
            14 => Some(DType::UInt64),
            17 => Some(DType::BFloat16),
            50 => Some(DType::Utf8),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Half => "f16",
            DType::BFloat16 => "bf16",
            DType::Float => "f32",
            DType::Double => "f64",
            DType::Int8 => "i8",
            DType::Int16 => "i16",
            DType::Int32 => "i32",
            DType::Int64 => "i64",
            DType::UInt8 => "u8",
            DType::UInt16 => "u16",
            DType::UInt32 => "u32",
            DType::UInt64 => "u64",
            DType::Utf8 => "utf8",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte order of a tensor's serialized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub const ALL: [ByteOrder; 2] = [ByteOrder::LittleEndian, ByteOrder::BigEndian];

    pub fn code(self) -> u8 {
        match self {
            ByteOrder::LittleEndian => 0,
            ByteOrder::BigEndian => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ByteOrder::LittleEndian),
            1 => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_codes_are_a_bijection() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_code(dtype.code()), Some(dtype));
        }
        let mut codes: Vec<u8> = DType::ALL.iter().map(|d| d.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), DType::ALL.len());
    }

    #[test]
    fn unknown_codes_do_not_default() {
        for code in [0u8, 2, 4, 15, 16, 18, 49, 51, 255] {
            assert_eq!(DType::from_code(code), None, "code {code}");
        }
        assert_eq!(ByteOrder::from_code(2), None);
    }
}
