//! RV64 pseudo-move lowering.
//!
//! Replaces the target-independent `Move` pseudo with real instructions:
//! register copies become `addi`/`addiw`/`fmv.s`, integer immediates
//! become `li`, float immediates go through an integer temporary and
//! `fmv.w.x`, and symbols become `la`. Runs after phi elimination (which
//! produces moves) and before register allocation.

use super::defs::{Rv64Inst, Rv64Op};
use crate::ir::DataType;
use crate::mir::{MFunction, MirInst, MoveOperand};

pub fn run(func: &mut MFunction<Rv64Inst>) {
    let MFunction { blocks, vregs, .. } = func;
    for block in blocks.values_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            let MirInst::Move { dst, src } = &block.insts[i] else {
                i += 1;
                continue;
            };
            let dst = *dst;
            let src = src.clone();

            match src {
                MoveOperand::Reg(src_reg) => {
                    if src_reg == dst {
                        block.insts.remove(i);
                        continue;
                    }
                    let inst = if dst.ty.is_float() {
                        Rv64Inst::r2(Rv64Op::FmvS, dst, src_reg)
                    } else if dst.ty == DataType::I32 {
                        Rv64Inst::i(Rv64Op::Addiw, dst, src_reg, 0)
                    } else {
                        Rv64Inst::i(Rv64Op::Addi, dst, src_reg, 0)
                    };
                    block.insts[i] = MirInst::Target(inst);
                    i += 1;
                }
                MoveOperand::ImmI32(imm) => {
                    if dst.ty.is_float() {
                        let tmp = vregs.alloc(DataType::I32);
                        block.insts[i] = MirInst::Target(Rv64Inst::li(tmp, imm as i64));
                        block
                            .insts
                            .insert(i + 1, MirInst::Target(Rv64Inst::r2(Rv64Op::FmvWX, dst, tmp)));
                        i += 2;
                    } else {
                        block.insts[i] = MirInst::Target(Rv64Inst::li(dst, imm as i64));
                        i += 1;
                    }
                }
                MoveOperand::ImmF32(v) => {
                    let tmp = vregs.alloc(DataType::I32);
                    block.insts[i] =
                        MirInst::Target(Rv64Inst::li(tmp, v.to_bits() as i32 as i64));
                    block
                        .insts
                        .insert(i + 1, MirInst::Target(Rv64Inst::r2(Rv64Op::FmvWX, dst, tmp)));
                    i += 2;
                }
                MoveOperand::Symbol(sym) => {
                    block.insts[i] = MirInst::Target(Rv64Inst::la(dst, sym));
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

    fn one_move(dst: Register, src: MoveOperand) -> MFunction<Rv64Inst> {
        let mut func = MFunction::new("f");
        let mut block = MBlock::new(0);
        block.push(MirInst::Move { dst, src });
        block.push(MirInst::Target(Rv64Inst::ret()));
        func.add_block(block);
        func
    }

    #[test]
    fn test_int_reg_move() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::Reg(pr::x(pr::A0)));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, Rv64Op::Addiw);
        assert_eq!(t.imm, 0);
    }

    #[test]
    fn test_float_reg_move() {
        let dst = Register::vreg(0, DataType::F32);
        let mut func = one_move(dst, MoveOperand::Reg(pr::f(pr::FA0)));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, Rv64Op::FmvS);
    }

    #[test]
    fn test_self_move_removed() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::Reg(dst));
        run(&mut func);
        assert_eq!(func.block(0).unwrap().len(), 1, "only the ret remains");
    }

    #[test]
    fn test_int_immediate_becomes_li() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::ImmI32(42));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, Rv64Op::Li);
        assert_eq!(t.imm, 42);
    }

    #[test]
    fn test_float_immediate_bit_pattern() {
        let dst = Register::vreg(0, DataType::F32);
        let mut func = one_move(dst, MoveOperand::ImmF32(1.0));
        run(&mut func);
        let insts = &func.block(0).unwrap().insts;
        let li = insts[0].as_target().unwrap();
        assert_eq!(li.op, Rv64Op::Li);
        assert_eq!(li.imm, 1.0f32.to_bits() as i64);
        let fmv = insts[1].as_target().unwrap();
        assert_eq!(fmv.op, Rv64Op::FmvWX);
    }
}
