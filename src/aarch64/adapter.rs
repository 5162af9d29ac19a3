//! AArch64 implementation of the target adapter and register info.

use super::defs::{pr, A64Inst, A64Op};
use crate::ir::{BlockId, DataType};
use crate::mir::{MirInst, Register};
use crate::target::{
    pseudo_defs, pseudo_phys_regs, pseudo_replace_def, pseudo_replace_use, pseudo_uses,
    InstrAdapter, TargetRegInfo,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct A64Adapter;

fn arg_regs(inst: &A64Inst) -> Vec<Register> {
    let mut out = Vec::new();
    for i in 0..inst.call_int_args.min(8) as u32 {
        out.push(pr::x(pr::X0 + i));
    }
    for i in 0..inst.call_float_args.min(8) as u32 {
        out.push(pr::v(pr::V0 + i, DataType::F64));
    }
    out
}

/// Explicit register reads of one target instruction.
fn target_uses(t: &A64Inst) -> Vec<Register> {
    use A64Op::*;
    match t.op {
        Bl => arg_regs(t),
        Mov | Fmov | Sxtw | Uxtw | Scvtf | Fcvtzs | AddI | SubI | Ldr => vec![t.rs1],
        // movk keeps the other 16-bit lanes of its destination.
        Movk => vec![t.rd],
        Add | Sub | Mul | Sdiv | And | Orr | Eor | Lsl | Lsr | Asr | Fadd | Fsub | Fmul
        | Fdiv | Cmp | Fcmp | Str => vec![t.rs1, t.rs2],
        Msub => vec![t.rs1, t.rs2, t.rs3],
        CmpI => vec![t.rs1],
        Movz | Cset | La | B | BCond | Ret => vec![],
    }
}

fn target_defs(t: &A64Inst) -> Vec<Register> {
    use A64Op::*;
    match t.op {
        Bl => vec![],
        Mov | Fmov | Sxtw | Uxtw | Scvtf | Fcvtzs | Movz | Movk | Add | Sub | Mul | Sdiv
        | And | Orr | Eor | Lsl | Lsr | Asr | Fadd | Fsub | Fmul | Fdiv | Msub | AddI | SubI
        | Cset | Ldr | La => vec![t.rd],
        Cmp | CmpI | Fcmp | Str | B | BCond | Ret => vec![],
    }
}

impl InstrAdapter for A64Adapter {
    type Inst = A64Inst;

    fn is_call(&self, inst: &MirInst<A64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == A64Op::Bl)
    }

    fn is_return(&self, inst: &MirInst<A64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == A64Op::Ret)
    }

    fn is_uncond_branch(&self, inst: &MirInst<A64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == A64Op::B)
    }

    fn is_cond_branch(&self, inst: &MirInst<A64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == A64Op::BCond)
    }

    fn branch_target(&self, inst: &MirInst<A64Inst>) -> Option<BlockId> {
        let t = inst.as_target()?;
        match t.op {
            A64Op::B | A64Op::BCond => t.target,
            _ => None,
        }
    }

    fn enum_uses(&self, inst: &MirInst<A64Inst>) -> Vec<Register> {
        match pseudo_uses(inst) {
            Some(uses) => uses,
            None => target_uses(inst.as_target().unwrap()),
        }
    }

    fn enum_defs(&self, inst: &MirInst<A64Inst>) -> Vec<Register> {
        match pseudo_defs(inst) {
            Some(defs) => defs,
            None => target_defs(inst.as_target().unwrap()),
        }
    }

    fn enum_phys_regs(&self, inst: &MirInst<A64Inst>) -> Vec<Register> {
        if let Some(regs) = pseudo_phys_regs(inst) {
            return regs;
        }
        let t = inst.as_target().unwrap();
        if t.op == A64Op::Bl {
            return arg_regs(t);
        }
        let mut out: Vec<Register> = Vec::new();
        for r in target_uses(t).into_iter().chain(target_defs(t)) {
            if !r.is_virtual && !out.contains(&r) {
                out.push(r);
            }
        }
        out
    }

    fn replace_use(&self, inst: &mut MirInst<A64Inst>, from: Register, to: Register) {
        if pseudo_replace_use(inst, from, to) {
            return;
        }
        let t = inst.as_target_mut().unwrap();
        if t.op == A64Op::Movk {
            // movk's read is its destination operand.
            if t.rd == from {
                t.rd = to;
            }
            return;
        }
        if t.rs1 == from {
            t.rs1 = to;
        }
        if t.rs2 == from {
            t.rs2 = to;
        }
        if t.rs3 == from {
            t.rs3 = to;
        }
    }

    fn replace_def(&self, inst: &mut MirInst<A64Inst>, from: Register, to: Register) {
        if pseudo_replace_def(inst, from, to) {
            return;
        }
        let t = inst.as_target_mut().unwrap();
        if t.rd == from {
            t.rd = to;
        }
    }

    fn make_uncond_branch(&self, target: BlockId) -> MirInst<A64Inst> {
        MirInst::Target(A64Inst::b(target))
    }

    fn retarget_branch(&self, inst: &mut MirInst<A64Inst>, old: BlockId, new: BlockId) {
        if let Some(t) = inst.as_target_mut() {
            if matches!(t.op, A64Op::B | A64Op::BCond) && t.target == Some(old) {
                t.target = Some(new);
            }
        }
    }
}

/// AArch64 register-file description (AAPCS64).
#[derive(Debug, Default, Clone, Copy)]
pub struct A64RegInfo;

const INT_REGS: [u32; 31] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30,
];
const FLOAT_REGS: [u32; 32] = [
    40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62,
    63, 64, 65, 66, 67, 68, 69, 70, 71,
];
const INT_ARGS: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const FLOAT_ARGS: [u32; 8] = [40, 41, 42, 43, 44, 45, 46, 47];
const CALLEE_SAVED_INT: [u32; 10] = [19, 20, 21, 22, 23, 24, 25, 26, 27, 28];
// d8..d15
const CALLEE_SAVED_FLOAT: [u32; 8] = [48, 49, 50, 51, 52, 53, 54, 55];
// x16/x17 (IPx, x16 is the lowering scratch), x18 (platform), fp, lr,
// plus the argument registers (last-resort scratch only).
const RESERVED: [u32; 21] = [
    16, 17, 18, 29, 30, 0, 1, 2, 3, 4, 5, 6, 7, 40, 41, 42, 43, 44, 45, 46, 47,
];

impl TargetRegInfo for A64RegInfo {
    fn sp(&self) -> u32 {
        pr::SP
    }

    fn ra(&self) -> u32 {
        pr::LR
    }

    fn zero(&self) -> u32 {
        pr::ZR
    }

    fn int_arg_regs(&self) -> &'static [u32] {
        &INT_ARGS
    }

    fn float_arg_regs(&self) -> &'static [u32] {
        &FLOAT_ARGS
    }

    fn callee_saved_int(&self) -> &'static [u32] {
        &CALLEE_SAVED_INT
    }

    fn callee_saved_float(&self) -> &'static [u32] {
        &CALLEE_SAVED_FLOAT
    }

    fn reserved(&self) -> &'static [u32] {
        &RESERVED
    }

    fn int_regs(&self) -> &'static [u32] {
        &INT_REGS
    }

    fn float_regs(&self) -> &'static [u32] {
        &FLOAT_REGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let adapter = A64Adapter;
        assert!(adapter.is_call(&MirInst::Target(A64Inst::bl("f", 1, 0))));
        assert!(adapter.is_return(&MirInst::Target(A64Inst::ret())));
        assert!(adapter.is_uncond_branch(&MirInst::Target(A64Inst::b(2))));
        assert!(adapter.is_cond_branch(&MirInst::Target(A64Inst::b_cond(A64Cond::Ne, 2))));
    }

    use super::super::defs::A64Cond;

    #[test]
    fn test_movk_reads_its_destination() {
        let adapter = A64Adapter;
        let rd = Register::vreg(3, DataType::I64);
        let movk = MirInst::Target(A64Inst::movk(rd, 0xbeef, 16, false));
        assert_eq!(adapter.enum_uses(&movk), vec![rd]);
        assert_eq!(adapter.enum_defs(&movk), vec![rd]);
    }

    #[test]
    fn test_msub_uses_three_registers() {
        let adapter = A64Adapter;
        let d = Register::vreg(0, DataType::I32);
        let q = Register::vreg(1, DataType::I32);
        let b = Register::vreg(2, DataType::I32);
        let a = Register::vreg(3, DataType::I32);
        let msub = MirInst::Target(A64Inst::msub(d, q, b, a, true));
        assert_eq!(adapter.enum_uses(&msub), vec![q, b, a]);
        assert_eq!(adapter.enum_defs(&msub), vec![d]);
    }

    #[test]
    fn test_call_arg_regs() {
        let adapter = A64Adapter;
        let bl = MirInst::Target(A64Inst::bl("f", 1, 2));
        let uses = adapter.enum_uses(&bl);
        assert_eq!(uses.len(), 3);
        assert_eq!(uses[0].id, 0);
        assert_eq!(uses[1].id, pr::V0);
        assert_eq!(uses[2].id, pr::V0 + 1);
    }

    #[test]
    fn test_reserved() {
        let ri = A64RegInfo;
        assert!(ri.reserved().contains(&pr::X16));
        assert!(ri.reserved().contains(&pr::LR));
        assert!(!ri.reserved().contains(&pr::X19));
    }
}
