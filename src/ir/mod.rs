//! Input IR data model.
//!
//! This is the contract with the middle end: an SSA-form module of
//! functions over basic blocks, with virtual-register operands, explicit
//! terminators, and (possibly) phi nodes. The backend only reads it.

pub mod function;
pub mod instruction;
pub mod module;
pub mod types;

/// Basic-block identifier, unique within a function.
pub type BlockId = u32;

pub use function::{Block, Function, FunctionBuilder};
pub use instruction::{ArithOp, FloatCond, Inst, IntCond, Operand};
pub use module::{GlobalInit, GlobalVar, Module};
pub use types::DataType;
