//! RISC-V 64 (rv64imafdc, lp64d) target.

pub mod adapter;
pub mod defs;
pub mod emit;
pub mod frame;
pub mod isel;
pub mod lower;
pub mod stack;

pub use adapter::{Rv64Adapter, Rv64RegInfo};
pub use defs::{Rv64Inst, Rv64Op};

use crate::error::Result;
use crate::ir;
use crate::mir::MModule;
use crate::passes::{phi_elim, regalloc};
use log::debug;
use std::io::Write;

/// Run the full RV64 pipeline: isel, frame lowering, phi elimination,
/// pseudo-move lowering, register allocation, stack lowering, emission.
pub fn compile_module<W: Write>(module: &ir::Module, out: &mut W) -> Result<()> {
    let mmodule = lower_module(module)?;
    emit::emit_module(&mmodule, out)
}

/// All pipeline stages up to (and excluding) emission; exposed so tests
/// can inspect the final machine IR.
pub fn lower_module(module: &ir::Module) -> Result<MModule<Rv64Inst>> {
    let adapter = Rv64Adapter;
    let reg_info = Rv64RegInfo;

    let mut mmodule = isel::select_module(module)?;
    for func in &mut mmodule.functions {
        frame::run(func);
        phi_elim::run(func, &adapter);
        lower::run(func);
        regalloc::run(func, &adapter, &reg_info)?;
        stack::run(func)?;
        debug!("rv64 pipeline({}): frame size {}", func.name, func.stack_size);
    }
    Ok(mmodule)
}
