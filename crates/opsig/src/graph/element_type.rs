use std::fmt;

use serde::{Deserialize, Serialize};

/// Tensor element types, numbered like the model format's tensor data-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ElementType {
    Undefined = 0,
    Float = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Double = 11,
    Uint32 = 12,
    Uint64 = 13,
    Complex64 = 14,
    Complex128 = 15,
    Bfloat16 = 16,
    Float8E4M3Fn = 17,
    Float8E4M3Fnuz = 18,
    Float8E5M2 = 19,
    Float8E5M2Fnuz = 20,
    Uint4 = 21,
    Int4 = 22,
}

impl ElementType {
    /// Reconstructs an element type from its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        use ElementType::*;
        let ty = match code {
            0 => Undefined,
            1 => Float,
            2 => Uint8,
            3 => Int8,
            4 => Uint16,
            5 => Int16,
            6 => Int32,
            7 => Int64,
            8 => String,
            9 => Bool,
            10 => Float16,
            11 => Double,
            12 => Uint32,
            13 => Uint64,
            14 => Complex64,
            15 => Complex128,
            16 => Bfloat16,
            17 => Float8E4M3Fn,
            18 => Float8E4M3Fnuz,
            19 => Float8E5M2,
            20 => Float8E5M2Fnuz,
            21 => Uint4,
            22 => Int4,
            _ => return None,
        };
        Some(ty)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::Float
                | ElementType::Float16
                | ElementType::Double
                | ElementType::Bfloat16
                | ElementType::Float8E4M3Fn
                | ElementType::Float8E4M3Fnuz
                | ElementType::Float8E5M2
                | ElementType::Float8E5M2Fnuz
        )
    }

    /// 8-bit integer types used by quantized operators.
    pub fn is_quantized_8bit(self) -> bool {
        matches!(self, ElementType::Uint8 | ElementType::Int8)
    }

    /// Size of one element in bytes, `None` for variable-width or sub-byte types.
    pub fn size_in_bytes(self) -> Option<usize> {
        use ElementType::*;
        match self {
            Bool | Uint8 | Int8 | Float8E4M3Fn | Float8E4M3Fnuz | Float8E5M2 | Float8E5M2Fnuz => {
                Some(1)
            }
            Uint16 | Int16 | Float16 | Bfloat16 => Some(2),
            Float | Int32 | Uint32 => Some(4),
            Double | Int64 | Uint64 | Complex64 => Some(8),
            Complex128 => Some(16),
            Undefined | String | Uint4 | Int4 => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
