//! AArch64 pseudo-move lowering.
//!
//! Register copies become `mov`/`fmov`; integer immediates are built from
//! 16-bit segments with `movz`/`movk` (zero goes through the zero
//! register); float immediates assemble their bit pattern in an integer
//! temporary and bit-move it with `fmov`; symbols become the address
//! pseudo expanded at emission to `adrp` + `:lo12:` add.

use super::defs::{pr, A64Inst, A64Op};
use crate::ir::DataType;
use crate::mir::{MBlock, MFunction, MirInst, MoveOperand, Register};

pub fn run(func: &mut MFunction<A64Inst>) {
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
                    let inst = if dst.ty.is_float() && src_reg.ty.is_float() {
                        A64Inst::rr(A64Op::Fmov, dst, src_reg, false)
                    } else if dst.ty.is_float() || src_reg.ty.is_float() {
                        // Bit move between the register files.
                        A64Inst::rr(A64Op::Fmov, dst, src_reg, true)
                    } else {
                        A64Inst::rr(A64Op::Mov, dst, src_reg, dst.ty == DataType::I32)
                    };
                    block.insts[i] = MirInst::Target(inst);
                    i += 1;
                }
                MoveOperand::ImmI32(imm) => {
                    if dst.ty.is_float() {
                        let tmp = vregs.alloc(DataType::I32);
                        let mut seq = imm_insts(tmp, imm as u32 as u64, true);
                        seq.push(MirInst::Target(A64Inst::rr(A64Op::Fmov, dst, tmp, true)));
                        i = splice(block, i, seq);
                    } else {
                        let wide = dst.ty != DataType::I32;
                        let bits = if wide {
                            imm as i64 as u64
                        } else {
                            imm as u32 as u64
                        };
                        let seq = imm_insts(dst, bits, !wide);
                        i = splice(block, i, seq);
                    }
                }
                MoveOperand::ImmF32(v) => {
                    let tmp = vregs.alloc(DataType::I32);
                    let mut seq = imm_insts(tmp, v.to_bits() as u64, true);
                    seq.push(MirInst::Target(A64Inst::rr(A64Op::Fmov, dst, tmp, true)));
                    i = splice(block, i, seq);
                }
                MoveOperand::Symbol(sym) => {
                    block.insts[i] = MirInst::Target(A64Inst::la(dst, sym));
                    i += 1;
                }
            }
        }
    }
}

/// `movz`/`movk` sequence loading `bits` into `dst`; zero is a move from
/// the zero register.
pub(super) fn imm_insts(dst: Register, bits: u64, is32: bool) -> Vec<MirInst<A64Inst>> {
    if bits == 0 {
        return vec![MirInst::Target(A64Inst::rr(A64Op::Mov, dst, pr::zr(), is32))];
    }
    let segments = if is32 { 2 } else { 4 };
    let mut out = Vec::new();
    for k in 0..segments {
        let piece = ((bits >> (16 * k)) & 0xffff) as u16;
        if piece == 0 {
            continue;
        }
        let inst = if out.is_empty() {
            A64Inst::movz(dst, piece, 16 * k as u8, is32)
        } else {
            A64Inst::movk(dst, piece, 16 * k as u8, is32)
        };
        out.push(MirInst::Target(inst));
    }
    out
}

/// Replace the instruction at `pos` with `seq`; returns the index after
/// the spliced run.
pub(super) fn splice(
    block: &mut MBlock<A64Inst>,
    pos: usize,
    seq: Vec<MirInst<A64Inst>>,
) -> usize {
    let n = seq.len();
    let mut iter = seq.into_iter();
    block.insts[pos] = iter.next().expect("splice with empty sequence");
    for (k, inst) in iter.enumerate() {
        block.insts.insert(pos + 1 + k, inst);
    }
    pos + n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_move(dst: Register, src: MoveOperand) -> MFunction<A64Inst> {
        let mut func = MFunction::new("f");
        let mut block = MBlock::new(0);
        block.push(MirInst::Move { dst, src });
        block.push(MirInst::Target(A64Inst::ret()));
        func.add_block(block);
        func
    }

    fn ops(func: &MFunction<A64Inst>) -> Vec<A64Op> {
        func.block(0)
            .unwrap()
            .insts
            .iter()
            .filter_map(|i| i.as_target().map(|t| t.op))
            .collect()
    }

    #[test]
    fn test_small_imm_single_movz() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::ImmI32(42));
        run(&mut func);
        assert_eq!(ops(&func), vec![A64Op::Movz, A64Op::Ret]);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.imm, 42);
        assert_eq!(t.shift, 0);
    }

    #[test]
    fn test_wide_imm_movz_movk() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::ImmI32(0x1234_5678));
        run(&mut func);
        assert_eq!(ops(&func), vec![A64Op::Movz, A64Op::Movk, A64Op::Ret]);
        let movk = func.block(0).unwrap().insts[1].as_target().unwrap();
        assert_eq!(movk.imm, 0x1234);
        assert_eq!(movk.shift, 16);
    }

    #[test]
    fn test_zero_uses_zero_register() {
        let dst = Register::vreg(0, DataType::I32);
        let mut func = one_move(dst, MoveOperand::ImmI32(0));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, A64Op::Mov);
        assert_eq!(t.rs1.id, pr::ZR);
    }

    #[test]
    fn test_float_imm_goes_through_int_temp() {
        let dst = Register::vreg(0, DataType::F32);
        let mut func = one_move(dst, MoveOperand::ImmF32(1.0));
        run(&mut func);
        let v = ops(&func);
        assert_eq!(*v.last().unwrap(), A64Op::Ret);
        assert!(v.contains(&A64Op::Fmov));
        // 1.0f32 = 0x3f800000: low half zero, so movz loads the high half.
        let movz = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(movz.op, A64Op::Movz);
        assert_eq!(movz.imm, 0x3f80);
        assert_eq!(movz.shift, 16);
    }

    #[test]
    fn test_reg_moves() {
        let dst = Register::vreg(0, DataType::I64);
        let mut func = one_move(dst, MoveOperand::Reg(pr::x(0)));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, A64Op::Mov);
        assert!(!t.is32);

        let fdst = Register::vreg(1, DataType::F32);
        let mut func = one_move(fdst, MoveOperand::Reg(pr::v(pr::V0, DataType::F32)));
        run(&mut func);
        let t = func.block(0).unwrap().insts[0].as_target().unwrap();
        assert_eq!(t.op, A64Op::Fmov);
    }
}
