//! AArch64 (ARMv8-A, AAPCS64) target.

pub mod adapter;
pub mod defs;
pub mod emit;
pub mod frame;
pub mod isel;
pub mod lower;
pub mod stack;

pub use adapter::{A64Adapter, A64RegInfo};
pub use defs::{A64Cond, A64Inst, A64Op};

use crate::error::Result;
use crate::ir;
use crate::mir::MModule;
use crate::passes::{phi_elim, regalloc};
use log::debug;
use std::io::Write;

/// Run the full AArch64 pipeline and emit assembly.
pub fn compile_module<W: Write>(module: &ir::Module, out: &mut W) -> Result<()> {
    let mmodule = lower_module(module)?;
    emit::emit_module(&mmodule, out)
}

/// All pipeline stages up to (and excluding) emission.
pub fn lower_module(module: &ir::Module) -> Result<MModule<A64Inst>> {
    let adapter = A64Adapter;
    let reg_info = A64RegInfo;

    let mut mmodule = isel::select_module(module)?;
    for func in &mut mmodule.functions {
        frame::run(func);
        phi_elim::run(func, &adapter);
        lower::run(func);
        regalloc::run(func, &adapter, &reg_info)?;
        stack::run(func)?;
        debug!(
            "aarch64 pipeline({}): frame size {}",
            func.name, func.stack_size
        );
    }
    Ok(mmodule)
}
