//! RV64 frame lowering (pre-RA).
//!
//! Lays out local objects and substitutes their frame-index operands with
//! real sp-relative offsets. Spill slots do not exist yet (the allocator
//! creates them later) and incoming-argument indices need the final frame
//! size, so both are left for stack lowering. Address arithmetic whose
//! offset misses the 12-bit immediate is expanded through a fresh virtual
//! register; loads and stores with out-of-range offsets keep their frame
//! index and are expanded post-RA through the reserved scratch.

use super::defs::{imm12, Rv64Inst, Rv64Op};
use crate::ir::DataType;
use crate::mir::{MFunction, MirInst, MoveOperand};

pub fn run(func: &mut MFunction<Rv64Inst>) {
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
                // Spill slots and incoming arguments resolve after RA.
                i += 1;
                continue;
            };
            let total = base_off as i64 + t.imm;

            if imm12(total) {
                let t = block.insts[i].as_target_mut().unwrap();
                t.imm = total;
                t.fi = None;
                i += 1;
                continue;
            }

            let t = block.insts[i].as_target().unwrap().clone();
            match t.op {
                Rv64Op::Addi | Rv64Op::Addiw => {
                    // addi rd, base, big  =>  li off, big; add rd, base, off
                    let off = vregs.alloc(DataType::I64);
                    let add_op = if t.op == Rv64Op::Addiw {
                        Rv64Op::Addw
                    } else {
                        Rv64Op::Add
                    };
                    block.insts[i] = MirInst::Move {
                        dst: off,
                        src: MoveOperand::ImmI32(total as i32),
                    };
                    block
                        .insts
                        .insert(i + 1, MirInst::Target(Rv64Inst::r(add_op, t.rd, t.rs1, off)));
                    i += 2;
                }
                _ => {
                    // Loads and stores keep the index; stack lowering owns
                    // the scratch register for the expansion.
                    i += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::defs::pr;
    use crate::mir::{MBlock, Register};

    #[test]
    fn test_small_offset_substituted() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        func.frame.add_object(0, 4, 4);
        let v0 = Register::vreg(0, DataType::I64);
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Addi,
            v0,
            pr::sp(),
            0,
            0,
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func);

        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.fi, None);
        assert_eq!(t.imm, 0);
        assert_eq!(t.op, Rv64Op::Addi);
    }

    #[test]
    fn test_large_offset_address_arith_expanded() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        // Push the second object past the 12-bit immediate range.
        func.frame.add_object(0, 4096, 4);
        func.frame.add_object(1, 4, 4);
        let v0 = Register::vreg(0, DataType::I64);
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Addi,
            v0,
            pr::sp(),
            1,
            0,
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func);

        let insts = &func.block(0).unwrap().insts;
        assert!(matches!(
            &insts[0],
            MirInst::Move { src: MoveOperand::ImmI32(4096), .. }
        ));
        let add = insts[1].as_target().unwrap();
        assert_eq!(add.op, Rv64Op::Add);
        assert_eq!(add.rs1.id, pr::SP);
        assert_eq!(add.rd, v0);
    }

    #[test]
    fn test_large_offset_load_deferred() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        func.frame.add_object(0, 4096, 4);
        func.frame.add_object(1, 4, 4);
        let v0 = Register::vreg(0, DataType::I32);
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Lw,
            v0,
            pr::sp(),
            1,
            0,
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func);

        let lw = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(lw.fi, Some(1), "load keeps its index for stack lowering");
    }

    #[test]
    fn test_incoming_index_left_for_stack_lowering() {
        let mut func: MFunction<Rv64Inst> = MFunction::new("f");
        func.frame.add_incoming_arg(-1, 0);
        let v0 = Register::vreg(0, DataType::I64);
        let mut block = MBlock::new(0);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Ld,
            v0,
            pr::sp(),
            -1,
            0,
        )));
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);

        run(&mut func);

        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.fi, Some(-1), "incoming arg untouched before RA");
    }
}
