//! RV64 stack lowering (post-RA).
//!
//! Finalizes the frame: decides the callee-saved set, computes the total
//! frame size, resolves every remaining frame-index operand (spill slots
//! and incoming arguments), lowers the allocator's FiLoad/FiStore pseudos
//! to real memory instructions, and wraps the body in prologue/epilogue.
//! Out-of-range offsets use `t0`, which is reserved for this purpose.

use super::adapter::Rv64Adapter;
use super::defs::{imm12, pr, Rv64Inst, Rv64Op};
use super::isel::{load_op, store_op};
use crate::error::{BackendError, Result};
use crate::ir::DataType;
use crate::mir::{MBlock, MFunction, MirInst, Register};
use crate::target::{InstrAdapter, TargetRegInfo};
use log::debug;
use rustc_hash::FxHashSet;

pub fn run(func: &mut MFunction<Rv64Inst>) -> Result<()> {
    let adapter = Rv64Adapter;
    let reg_info = super::adapter::Rv64RegInfo;

    let local_size = func.frame.calculate_offsets();

    // Callee-saved registers actually written, in the reg-info order.
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
        saved.push(pr::ra());
    }

    let stack_size = (local_size + 8 * saved.len() as u32 + 15) & !15;
    func.stack_size = stack_size;
    debug!(
        "rv64 stack({}): locals {} + {} saved regs -> frame {}",
        func.name,
        local_size,
        saved.len(),
        stack_size
    );

    // Resolve frame indices and spill pseudos.
    let frame = func.frame.clone();
    for block in func.blocks.values_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            match &block.insts[i] {
                MirInst::FiLoad { dst, frame_index } => {
                    let off = frame
                        .spill_slot_offset(*frame_index)
                        .ok_or_else(|| missing_slot(*frame_index))?;
                    let (dst, fi_op) = (*dst, load_op(dst.ty));
                    i = replace_with_load(block, i, fi_op, dst, pr::sp(), off as i64);
                }
                MirInst::FiStore { src, frame_index } => {
                    let off = frame
                        .spill_slot_offset(*frame_index)
                        .ok_or_else(|| missing_slot(*frame_index))?;
                    let (src, fi_op) = (*src, store_op(src.ty));
                    i = replace_with_store(block, i, fi_op, src, pr::sp(), off as i64);
                }
                MirInst::Target(t) if t.fi.is_some() => {
                    let fi = t.fi.unwrap();
                    let off = if fi < 0 {
                        // Incoming argument: it lives above this frame.
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

                    if imm12(total) {
                        let inst = block.insts[i].as_target_mut().unwrap();
                        inst.imm = total;
                        inst.fi = None;
                        i += 1;
                    } else if matches!(t.op, Rv64Op::Addi | Rv64Op::Addiw) {
                        // li t0, off; add rd, base, t0
                        let add_op = if t.op == Rv64Op::Addiw {
                            Rv64Op::Addw
                        } else {
                            Rv64Op::Add
                        };
                        block.insts[i] = MirInst::Target(Rv64Inst::li(pr::t0(), total));
                        block.insts.insert(
                            i + 1,
                            MirInst::Target(Rv64Inst::r(add_op, t.rd, t.rs1, pr::t0())),
                        );
                        i += 2;
                    } else if t.op.is_load() {
                        i = replace_with_load(block, i, t.op, t.rd, t.rs1, total);
                    } else if t.op.is_store() {
                        i = replace_with_store(block, i, t.op, t.rs1, t.rs2, total);
                    } else {
                        let inst = block.insts[i].as_target_mut().unwrap();
                        inst.imm = total;
                        inst.fi = None;
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }
    }

    if stack_size == 0 && saved.is_empty() {
        return Ok(());
    }

    // Prologue: move sp, then save callee-saved registers above locals.
    let entry_id = func
        .entry_block_id()
        .ok_or_else(|| BackendError::Internal("function without entry block".into()))?;
    let entry = func.blocks.get_mut(&entry_id).unwrap();
    let mut at = insert_sp_adjust(entry, 0, -(stack_size as i64));
    for (k, reg) in saved.iter().enumerate() {
        let off = (local_size + 8 * k as u32) as i64;
        let op = if reg.ty.is_float() {
            Rv64Op::Fsd
        } else {
            Rv64Op::Sd
        };
        at = insert_store(entry, at, op, *reg, off);
    }

    // Epilogue before every return.
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
                let op = if reg.ty.is_float() {
                    Rv64Op::Fld
                } else {
                    Rv64Op::Ld
                };
                at = insert_load(block, at, op, *reg, off);
            }
            at = insert_sp_adjust(block, at, stack_size as i64);
            i = at + 1;
        }
    }

    Ok(())
}

fn missing_slot(fi: i32) -> BackendError {
    BackendError::Internal(format!("unresolved frame index {}", fi))
}

/// Replace the instruction at `pos` with a load of `base + off`, expanding
/// through `t0` when the offset does not fit. Returns the index after the
/// rewritten sequence.
fn replace_with_load(
    block: &mut MBlock<Rv64Inst>,
    pos: usize,
    op: Rv64Op,
    dst: Register,
    base: Register,
    off: i64,
) -> usize {
    if imm12(off) {
        block.insts[pos] = MirInst::Target(Rv64Inst::i(op, dst, base, off));
        return pos + 1;
    }
    block.insts[pos] = MirInst::Target(Rv64Inst::li(pr::t0(), off));
    block.insts.insert(
        pos + 1,
        MirInst::Target(Rv64Inst::r(Rv64Op::Add, pr::t0(), base, pr::t0())),
    );
    block
        .insts
        .insert(pos + 2, MirInst::Target(Rv64Inst::i(op, dst, pr::t0(), 0)));
    pos + 3
}

fn replace_with_store(
    block: &mut MBlock<Rv64Inst>,
    pos: usize,
    op: Rv64Op,
    src: Register,
    base: Register,
    off: i64,
) -> usize {
    if imm12(off) {
        block.insts[pos] = MirInst::Target(Rv64Inst::s(op, src, base, off));
        return pos + 1;
    }
    block.insts[pos] = MirInst::Target(Rv64Inst::li(pr::t0(), off));
    block.insts.insert(
        pos + 1,
        MirInst::Target(Rv64Inst::r(Rv64Op::Add, pr::t0(), base, pr::t0())),
    );
    block
        .insts
        .insert(pos + 2, MirInst::Target(Rv64Inst::s(op, src, pr::t0(), 0)));
    pos + 3
}

/// Insert `sp <- sp + delta` at `pos`; returns the index after it.
fn insert_sp_adjust(block: &mut MBlock<Rv64Inst>, pos: usize, delta: i64) -> usize {
    if delta == 0 {
        return pos;
    }
    if imm12(delta) {
        block.insts.insert(
            pos,
            MirInst::Target(Rv64Inst::i(Rv64Op::Addi, pr::sp(), pr::sp(), delta)),
        );
        return pos + 1;
    }
    block
        .insts
        .insert(pos, MirInst::Target(Rv64Inst::li(pr::t0(), delta)));
    block.insts.insert(
        pos + 1,
        MirInst::Target(Rv64Inst::r(Rv64Op::Add, pr::sp(), pr::sp(), pr::t0())),
    );
    pos + 2
}

fn insert_store(
    block: &mut MBlock<Rv64Inst>,
    pos: usize,
    op: Rv64Op,
    reg: Register,
    off: i64,
) -> usize {
    if imm12(off) {
        block
            .insts
            .insert(pos, MirInst::Target(Rv64Inst::s(op, reg, pr::sp(), off)));
        return pos + 1;
    }
    block
        .insts
        .insert(pos, MirInst::Target(Rv64Inst::li(pr::t0(), off)));
    block.insts.insert(
        pos + 1,
        MirInst::Target(Rv64Inst::r(Rv64Op::Add, pr::t0(), pr::sp(), pr::t0())),
    );
    block
        .insts
        .insert(pos + 2, MirInst::Target(Rv64Inst::s(op, reg, pr::t0(), 0)));
    pos + 3
}

fn insert_load(
    block: &mut MBlock<Rv64Inst>,
    pos: usize,
    op: Rv64Op,
    reg: Register,
    off: i64,
) -> usize {
    if imm12(off) {
        block
            .insts
            .insert(pos, MirInst::Target(Rv64Inst::i(op, reg, pr::sp(), off)));
        return pos + 1;
    }
    block
        .insts
        .insert(pos, MirInst::Target(Rv64Inst::li(pr::t0(), off)));
    block.insts.insert(
        pos + 1,
        MirInst::Target(Rv64Inst::r(Rv64Op::Add, pr::t0(), pr::sp(), pr::t0())),
    );
    block
        .insts
        .insert(pos + 2, MirInst::Target(Rv64Inst::i(op, reg, pr::t0(), 0)));
    pos + 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_function_gets_no_prologue() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::r(
            Rv64Op::Addw,
            pr::x(10),
            pr::x(10),
            pr::x(11),
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        assert_eq!(func.stack_size, 0);
        let insts = &func.block(0).unwrap().insts;
        assert_eq!(insts.len(), 2, "no prologue or epilogue inserted");
    }

    #[test]
    fn test_callee_saved_written_is_spilled() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        let mut block = MBlock::new(0);
        // Writes s1 (x9), a callee-saved register.
        block.push(MirInst::Target(Rv64Inst::r(
            Rv64Op::Add,
            pr::x(9),
            pr::x(10),
            pr::x(11),
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        assert_eq!(func.stack_size % 16, 0);
        assert!(func.stack_size >= 8);
        let insts = &func.block(0).unwrap().insts;
        // addi sp; sd s1; add; ld s1; addi sp; ret
        let first = insts[0].as_target().unwrap();
        assert_eq!(first.op, Rv64Op::Addi);
        assert_eq!(first.rd.id, pr::SP);
        assert_eq!(first.imm, -(func.stack_size as i64));
        let save = insts[1].as_target().unwrap();
        assert_eq!(save.op, Rv64Op::Sd);
        assert_eq!(save.rs1.id, 9);

        // Epilogue restores and unwinds before the ret.
        let n = insts.len();
        let ret = insts[n - 1].as_target().unwrap();
        assert_eq!(ret.op, Rv64Op::Jalr);
        let unwind = insts[n - 2].as_target().unwrap();
        assert_eq!(unwind.op, Rv64Op::Addi);
        assert_eq!(unwind.imm, func.stack_size as i64);
    }

    #[test]
    fn test_spill_slot_lowered_to_sp_relative_load() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        let fi = func.frame.create_spill_slot(8, 8);
        let mut block = MBlock::new(0);
        block.push(MirInst::FiLoad {
            dst: pr::x(6),
            frame_index: fi,
        });
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        let insts = &func.block(0).unwrap().insts;
        // Prologue adjust, then the lowered load.
        let load = insts[1].as_target().unwrap();
        assert_eq!(load.op, Rv64Op::Ld);
        assert_eq!(load.rs1.id, pr::SP);
        assert_eq!(load.imm, 0);
    }

    #[test]
    fn test_large_offset_expands_through_t0() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        func.frame.add_object(0, 4096, 4);
        func.frame.add_object(1, 4, 4);
        let mut block = MBlock::new(0);
        // A load left with an unresolved frame index to the far object.
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Lw,
            pr::x(6),
            pr::sp(),
            1,
            4, // +4 bytes into the object: resolves to 4100 > 2047
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        let insts = &func.block(0).unwrap().insts;
        // [0] prologue sp adjust (frame is large but fits imm12? 4112 > 2047,
        // so the adjust itself is li+add), then li t0; add t0, sp, t0; lw.
        let texts: Vec<Rv64Op> = insts
            .iter()
            .filter_map(|i| i.as_target().map(|t| t.op))
            .collect();
        assert!(texts.contains(&Rv64Op::Li));
        let lw_pos = texts.iter().position(|op| *op == Rv64Op::Lw).unwrap();
        let lw = insts[lw_pos].as_target().unwrap();
        assert_eq!(lw.rs1.id, pr::T0);
        assert_eq!(lw.imm, 0);
        assert_eq!(lw.fi, None);
    }

    #[test]
    fn test_incoming_arg_resolved_against_frame_size() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        func.frame.add_incoming_arg(-1, 0);
        func.frame.add_object(0, 16, 8);
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Ld,
            pr::x(6),
            pr::sp(),
            -1,
            0,
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func).unwrap();

        let insts = &func.block(0).unwrap().insts;
        let ld = insts
            .iter()
            .filter_map(|i| i.as_target())
            .find(|t| t.op == Rv64Op::Ld)
            .unwrap();
        assert_eq!(ld.imm, func.stack_size as i64, "arg sits above the frame");
        assert_eq!(ld.fi, None);
    }
}
