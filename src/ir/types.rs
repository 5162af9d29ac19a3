//! Value types shared by the IR and the machine layers.
//!
//! Types here are machine-oriented: they carry a bit width and a register
//! class, nothing more. `Ptr` and `I64` are both 64-bit; `Token` is the
//! zero-width chain type used to order side effects in the SelectionDAG and
//! never reaches a register.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    Token,
}

impl DataType {
    /// Width of the type in bits. `Token` has no runtime representation.
    pub fn bit_width(&self) -> u32 {
        match self {
            DataType::I1 => 1,
            DataType::I8 => 8,
            DataType::I32 | DataType::F32 => 32,
            DataType::I64 | DataType::F64 | DataType::Ptr => 64,
            DataType::Token => 0,
        }
    }

    /// Size in bytes as stored in memory. Sub-word integers occupy a word.
    pub fn size_bytes(&self) -> u32 {
        match self {
            DataType::I1 | DataType::I8 | DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 | DataType::Ptr => 8,
            DataType::Token => 0,
        }
    }

    /// Alignment requirement in bytes.
    pub fn alignment(&self) -> u32 {
        self.size_bytes().max(1)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::I1 | DataType::I8 | DataType::I32 | DataType::I64 | DataType::Ptr
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::I1 => "i1",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Ptr => "ptr",
            DataType::Token => "token",
        };
        write!(f, "{}", s)
    }
}
