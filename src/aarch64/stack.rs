//! AArch64 stack lowering (post-RA).
//!
//! Computes the callee-saved set (x19..x28, d8..d15, plus `lr` when the
//! function calls), finalizes the 16-aligned frame size, resolves the
//! remaining frame indices (spill slots, incoming arguments), lowers
//! FiLoad/FiStore to `ldr`/`str`, and inserts prologue and epilogues.
//! `x16` (IP0) is the reserved scratch for out-of-range offsets.

use super::adapter::{A64Adapter, A64RegInfo};
use super::defs::{arith_imm_fits, ldst_fits, pr, A64Inst, A64Op};
use super::lower::{imm_insts, splice};
use crate::error::{BackendError, Result};
use crate::ir::DataType;
use crate::mir::{MBlock, MFunction, MirInst, Register};
use crate::target::{InstrAdapter, TargetRegInfo};
use log::debug;
use rustc_hash::FxHashSet;

pub fn run(func: &mut MFunction<A64Inst>) -> Result<()> {
    let adapter = A64Adapter;
    let reg_info = A64RegInfo;

    let local_size = func.frame.calculate_offsets();

    let mut written: FxHashSet<u32> = FxHashSet::default();
    let mut has_call = func.has_call;
    for block in func.blocks.values() {
        for inst in &block.insts {
            for d in adapter.enum_defs(inst) {
                if !d.is_virtual {
                    written.insert(d.id);
                }
            }
            if adapter.is_call(inst) {
                has_call = true;
            }
        }
    }

    let mut saved: Vec<Register> = Vec::new();
    for &r in reg_info.callee_saved_int() {
        if written.contains(&r) {
            saved.push(Register::phys(r, DataType::I64));
        }
    }
    for &r in reg_info.callee_saved_float() {
        if written.contains(&r) {
            saved.push(Register::phys(r, DataType::F64));
        }
    }
    if has_call {
        saved.push(pr::lr());
    }

    let stack_size = (local_size + 8 * saved.len() as u32 + 15) & !15;
    func.stack_size = stack_size;
    debug!(
        "aarch64 stack({}): locals {} + {} saved regs -> frame {}",
        func.name,
        local_size,
        saved.len(),
        stack_size
    );

    let frame = func.frame.clone();
    for block in func.blocks.values_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            match &block.insts[i] {
                MirInst::FiLoad { dst, frame_index } => {
                    let off = frame
                        .spill_slot_offset(*frame_index)
                        .ok_or_else(|| missing_slot(*frame_index))?;
                    let dst = *dst;
                    i = replace_with_load(block, i, dst, off as i64);
                }
                MirInst::FiStore { src, frame_index } => {
                    let off = frame
                        .spill_slot_offset(*frame_index)
                        .ok_or_else(|| missing_slot(*frame_index))?;
                    let src = *src;
                    i = replace_with_store(block, i, src, off as i64);
                }
                MirInst::Target(t) if t.fi.is_some() => {
                    let fi = t.fi.unwrap();
                    let off = if fi < 0 {
                        frame
                            .incoming_arg_offset(fi)
                            .map(|o| o + stack_size)
                            .ok_or_else(|| missing_slot(fi))?
                    } else {
                        frame
                            .object_offset(fi)
                            .or_else(|| frame.spill_slot_offset(fi))
                            .ok_or_else(|| missing_slot(fi))?
                    };
                    let total = off as i64 + t.imm;
                    let t = t.clone();

                    match t.op {
                        A64Op::AddI if arith_imm_fits(total) => {
                            let inst = block.insts[i].as_target_mut().unwrap();
                            inst.imm = total;
                            inst.fi = None;
                            i += 1;
                        }
                        A64Op::AddI => {
                            let mut seq = imm_insts(pr::x16(), total as u64, false);
                            seq.push(MirInst::Target(A64Inst::rrr(
                                A64Op::Add,
                                t.rd,
                                t.rs1,
                                pr::x16(),
                                false,
                            )));
                            i = splice(block, i, seq);
                        }
                        A64Op::Ldr => {
                            let dst = t.rd;
                            i = replace_with_load(block, i, dst, total);
                        }
                        A64Op::Str => {
                            let src = t.rs1;
                            i = replace_with_store(block, i, src, total);
                        }
                        _ => {
                            let inst = block.insts[i].as_target_mut().unwrap();
                            inst.imm = total;
                            inst.fi = None;
                            i += 1;
                        }
                    }
                }
                _ => i += 1,
            }
        }
    }

    if stack_size == 0 && saved.is_empty() {
        return Ok(());
    }

    // Prologue.
    let entry_id = func
        .entry_block_id()
        .ok_or_else(|| BackendError::Internal("function without entry block".into()))?;
    let entry = func.blocks.get_mut(&entry_id).unwrap();
    let mut at = insert_sp_adjust(entry, 0, A64Op::SubI, stack_size);
    for (k, reg) in saved.iter().enumerate() {
        let off = (local_size + 8 * k as u32) as i64;
        entry
            .insts
            .insert(at, MirInst::Target(A64Inst::str(*reg, pr::sp(), off)));
        at += 1;
    }

    // Epilogues.
    for block in func.blocks.values_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            if !adapter.is_return(&block.insts[i]) {
                i += 1;
                continue;
            }
            let mut at = i;
            for (k, reg) in saved.iter().enumerate() {
                let off = (local_size + 8 * k as u32) as i64;
                block
                    .insts
                    .insert(at, MirInst::Target(A64Inst::ldr(*reg, pr::sp(), off)));
                at += 1;
            }
            at = insert_sp_adjust(block, at, A64Op::AddI, stack_size);
            i = at + 1;
        }
    }

    Ok(())
}

fn missing_slot(fi: i32) -> BackendError {
    BackendError::Internal(format!("unresolved frame index {}", fi))
}

fn replace_with_load(block: &mut MBlock<A64Inst>, pos: usize, dst: Register, off: i64) -> usize {
    if ldst_fits(off, dst.ty.size_bytes()) {
        block.insts[pos] = MirInst::Target(A64Inst::ldr(dst, pr::sp(), off));
        return pos + 1;
    }
    let mut seq = imm_insts(pr::x16(), off as u64, false);
    seq.push(MirInst::Target(A64Inst::rrr(
        A64Op::Add,
        pr::x16(),
        pr::sp(),
        pr::x16(),
        false,
    )));
    seq.push(MirInst::Target(A64Inst::ldr(dst, pr::x16(), 0)));
    splice(block, pos, seq)
}

fn replace_with_store(block: &mut MBlock<A64Inst>, pos: usize, src: Register, off: i64) -> usize {
    if ldst_fits(off, src.ty.size_bytes()) {
        block.insts[pos] = MirInst::Target(A64Inst::str(src, pr::sp(), off));
        return pos + 1;
    }
    let mut seq = imm_insts(pr::x16(), off as u64, false);
    seq.push(MirInst::Target(A64Inst::rrr(
        A64Op::Add,
        pr::x16(),
        pr::sp(),
        pr::x16(),
        false,
    )));
    seq.push(MirInst::Target(A64Inst::str(src, pr::x16(), 0)));
    splice(block, pos, seq)
}

/// Insert `sp <- sp op size` at `pos`; returns the index after it.
fn insert_sp_adjust(block: &mut MBlock<A64Inst>, pos: usize, op: A64Op, size: u32) -> usize {
    if size == 0 {
        return pos;
    }
    if arith_imm_fits(size as i64) {
        block.insts.insert(
            pos,
            MirInst::Target(A64Inst::ri(op, pr::sp(), pr::sp(), size as i64, false)),
        );
        return pos + 1;
    }
    // movz/movk x16, size; add/sub sp, sp, x16
    let mut seq = imm_insts(pr::x16(), size as u64, false);
    let reg_op = if op == A64Op::SubI { A64Op::Sub } else { A64Op::Add };
    seq.push(MirInst::Target(A64Inst::rrr(
        reg_op,
        pr::sp(),
        pr::sp(),
        pr::x16(),
        false,
    )));
    let n = seq.len();
    for (k, inst) in seq.into_iter().enumerate() {
        block.insts.insert(pos + k, inst);
    }
    pos + n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_function_untouched() {
        let mut func: MFunction<A64Inst> = MFunction::new("f");
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(A64Inst::rrr(
            A64Op::Add,
            pr::x(0),
            pr::x(0),
            pr::x(1),
            true,
        )));
        block.push(MirInst::Target(A64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        assert_eq!(func.stack_size, 0);
        assert_eq!(func.block(0).unwrap().len(), 2);
    }

    #[test]
    fn test_callee_saved_and_lr_spilled_around_call() {
        let mut func: MFunction<A64Inst> = MFunction::new("f");
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(A64Inst::rrr(
            A64Op::Add,
            pr::x(19),
            pr::x(0),
            pr::x(1),
            false,
        )));
        block.push(MirInst::Target(A64Inst::bl("g", 0, 0)));
        block.push(MirInst::Target(A64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        assert_eq!(func.stack_size % 16, 0);
        assert!(func.stack_size >= 16, "x19 and lr both need slots");

        let insts = &func.block(0).unwrap().insts;
        let first = insts[0].as_target().unwrap();
        assert_eq!(first.op, A64Op::SubI);
        assert_eq!(first.rd.id, pr::SP);

        let saves: Vec<u32> = insts
            .iter()
            .filter_map(|i| i.as_target())
            .take_while(|t| t.op != A64Op::Add)
            .filter(|t| t.op == A64Op::Str)
            .map(|t| t.rs1.id)
            .collect();
        assert_eq!(saves, vec![19, pr::LR]);

        // Epilogue restores in the same slots before ret.
        let n = insts.len();
        assert_eq!(insts[n - 1].as_target().unwrap().op, A64Op::Ret);
        assert_eq!(insts[n - 2].as_target().unwrap().op, A64Op::AddI);
    }

    #[test]
    fn test_spill_pseudos_lowered() {
        let mut func: MFunction<A64Inst> = MFunction::new("f");
        let fi = func.frame.create_spill_slot(8, 8);
        let mut block = MBlock::new(0);
        block.push(MirInst::FiStore {
            src: pr::x(9),
            frame_index: fi,
        });
        block.push(MirInst::FiLoad {
            dst: pr::x(9),
            frame_index: fi,
        });
        block.push(MirInst::Target(A64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        let insts = &func.block(0).unwrap().insts;
        let str_inst = insts
            .iter()
            .filter_map(|i| i.as_target())
            .find(|t| t.op == A64Op::Str)
            .unwrap();
        assert_eq!(str_inst.rs2.id, pr::SP);
        let ldr_inst = insts
            .iter()
            .filter_map(|i| i.as_target())
            .find(|t| t.op == A64Op::Ldr)
            .unwrap();
        assert_eq!(ldr_inst.rs1.id, pr::SP);
        assert_eq!(ldr_inst.imm, str_inst.imm);
    }
}
