//! AArch64 frame lowering (pre-RA).
//!
//! Resolves frame-index operands of local objects in `add`-of-sp address
//! computations and in `ldr`/`str` offsets. Spill slots and incoming
//! arguments wait for stack lowering. Offsets out of immediate range go
//! through a fresh virtual register.

use super::defs::{arith_imm_fits, ldst_fits, A64Inst, A64Op};
use crate::ir::DataType;
use crate::mir::{MFunction, MirInst, MoveOperand};

pub fn run(func: &mut MFunction<A64Inst>) {
    func.frame.calculate_offsets();

    let MFunction { blocks, frame, vregs, .. } = func;
    for block in blocks.values_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            let Some(t) = block.insts[i].as_target() else {
                i += 1;
                continue;
            };
            let Some(fi) = t.fi else {
                i += 1;
                continue;
            };
            let Some(base_off) = frame.object_offset(fi) else {
                i += 1;
                continue;
            };
            let total = base_off as i64 + t.imm;
            let t = t.clone();

            match t.op {
                A64Op::AddI if arith_imm_fits(total) => {
                    let inst = block.insts[i].as_target_mut().unwrap();
                    inst.imm = total;
                    inst.fi = None;
                    i += 1;
                }
                A64Op::AddI => {
                    let off = vregs.alloc(DataType::I64);
                    block.insts[i] = MirInst::Move {
                        dst: off,
                        src: MoveOperand::ImmI32(total as i32),
                    };
                    block.insts.insert(
                        i + 1,
                        MirInst::Target(A64Inst::rrr(A64Op::Add, t.rd, t.rs1, off, false)),
                    );
                    i += 2;
                }
                A64Op::Ldr if ldst_fits(total, t.rd.ty.size_bytes()) => {
                    let inst = block.insts[i].as_target_mut().unwrap();
                    inst.imm = total;
                    inst.fi = None;
                    i += 1;
                }
                A64Op::Str if ldst_fits(total, t.rs1.ty.size_bytes()) => {
                    let inst = block.insts[i].as_target_mut().unwrap();
                    inst.imm = total;
                    inst.fi = None;
                    i += 1;
                }
                _ => {
                    // Out-of-range loads and stores keep their index;
                    // stack lowering expands them through x16.
                    i += 1;
                }
            }
        }
    }
}
