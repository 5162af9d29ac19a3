//! talus — a compiler backend lowering a mid-level SSA IR to assembly.
//!
//! The crate takes an in-memory [`ir::Module`] (integers, floats, arrays,
//! functions, control flow in SSA form) and produces textual assembly for
//! RISC-V 64 (rv64imafdc) or AArch64 (ARMv8-A). Per target the pipeline
//! runs:
//!
//! 1. SelectionDAG construction per basic block ([`dag`]);
//! 2. instruction selection into machine IR with virtual registers and
//!    frame-index pseudo-operands;
//! 3. frame lowering for local stack objects;
//! 4. phi elimination (edge-split parallel copies);
//! 5. pseudo-move lowering;
//! 6. linear-scan register allocation with spill/reload insertion
//!    ([`passes::regalloc`]);
//! 7. stack lowering: callee-saved saves, prologue/epilogue, final frame
//!    offsets;
//! 8. assembly emission.
//!
//! Target-independent passes see machine instructions only through
//! [`target::InstrAdapter`]; RV64 and AArch64 each provide one adapter,
//! one register-file description, a selector, the lowering passes and an
//! emitter.

pub mod aarch64;
pub mod dag;
pub mod error;
pub mod ir;
pub mod mir;
pub mod passes;
pub mod rv64;
pub mod target;

pub use error::{BackendError, Result};

use std::io::Write;

/// Compile an IR module to assembly for the named target.
///
/// Accepted target names: `"riscv64"`, `"riscv"`, `"rv64"`, `"aarch64"`,
/// `"armv8"`.
pub fn compile_ir_to_target_assembly<W: Write>(
    module: &ir::Module,
    target: &str,
    out: &mut W,
) -> Result<()> {
    match target::resolve_target(target) {
        Some(target::TargetKind::Rv64) => rv64::compile_module(module, out),
        Some(target::TargetKind::AArch64) => aarch64::compile_module(module, out),
        None => Err(BackendError::UnknownTarget(target.to_string())),
    }
}
