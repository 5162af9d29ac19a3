//! RV64 implementation of the target adapter and register info.

use super::defs::{pr, OpKind, Rv64Inst, Rv64Op};
use crate::ir::BlockId;
use crate::mir::{MirInst, Register};
use crate::target::{
    pseudo_defs, pseudo_phys_regs, pseudo_replace_def, pseudo_replace_use, pseudo_uses,
    InstrAdapter, TargetRegInfo,
};

/// Stateless adapter for RV64 machine instructions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rv64Adapter;

fn arg_regs(inst: &Rv64Inst) -> Vec<Register> {
    let mut out = Vec::new();
    for i in 0..inst.call_int_args.min(8) as u32 {
        out.push(pr::x(pr::A0 + i));
    }
    for i in 0..inst.call_float_args.min(8) as u32 {
        out.push(pr::f(pr::FA0 + i));
    }
    out
}

impl InstrAdapter for Rv64Adapter {
    type Inst = Rv64Inst;

    fn is_call(&self, inst: &MirInst<Rv64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == Rv64Op::Call)
    }

    fn is_return(&self, inst: &MirInst<Rv64Inst>) -> bool {
        match inst.as_target() {
            Some(t) => {
                t.op == Rv64Op::Jalr && t.rd.id == pr::ZERO && t.rs1.id == pr::RA && t.imm == 0
            }
            None => false,
        }
    }

    fn is_uncond_branch(&self, inst: &MirInst<Rv64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op == Rv64Op::Jal)
    }

    fn is_cond_branch(&self, inst: &MirInst<Rv64Inst>) -> bool {
        matches!(inst.as_target(), Some(t) if t.op.kind() == OpKind::B)
    }

    fn branch_target(&self, inst: &MirInst<Rv64Inst>) -> Option<BlockId> {
        let t = inst.as_target()?;
        match t.op.kind() {
            OpKind::B | OpKind::J => t.target,
            _ => None,
        }
    }

    fn enum_uses(&self, inst: &MirInst<Rv64Inst>) -> Vec<Register> {
        if let Some(uses) = pseudo_uses(inst) {
            return uses;
        }
        let t = inst.as_target().unwrap();
        if t.op == Rv64Op::Call {
            return arg_regs(t);
        }
        match t.op.kind() {
            OpKind::R | OpKind::S | OpKind::B => vec![t.rs1, t.rs2],
            OpKind::I | OpKind::R2 => vec![t.rs1],
            OpKind::U | OpKind::J | OpKind::Call => vec![],
        }
    }

    fn enum_defs(&self, inst: &MirInst<Rv64Inst>) -> Vec<Register> {
        if let Some(defs) = pseudo_defs(inst) {
            return defs;
        }
        let t = inst.as_target().unwrap();
        if t.op == Rv64Op::Call {
            // The return-value copy is an explicit move after the call.
            return vec![];
        }
        match t.op.kind() {
            OpKind::R | OpKind::I | OpKind::U | OpKind::J | OpKind::R2 => vec![t.rd],
            OpKind::S | OpKind::B | OpKind::Call => vec![],
        }
    }

    fn enum_phys_regs(&self, inst: &MirInst<Rv64Inst>) -> Vec<Register> {
        if let Some(regs) = pseudo_phys_regs(inst) {
            return regs;
        }
        let t = inst.as_target().unwrap();
        if t.op == Rv64Op::Call {
            return arg_regs(t);
        }
        let mut out = Vec::new();
        let mut add = |r: Register| {
            if !r.is_virtual {
                out.push(r);
            }
        };
        match t.op.kind() {
            OpKind::R => {
                add(t.rd);
                add(t.rs1);
                add(t.rs2);
            }
            OpKind::I | OpKind::R2 => {
                add(t.rd);
                add(t.rs1);
            }
            OpKind::S | OpKind::B => {
                add(t.rs1);
                add(t.rs2);
            }
            OpKind::U | OpKind::J => add(t.rd),
            OpKind::Call => {}
        }
        out
    }

    fn replace_use(&self, inst: &mut MirInst<Rv64Inst>, from: Register, to: Register) {
        if pseudo_replace_use(inst, from, to) {
            return;
        }
        let t = inst.as_target_mut().unwrap();
        if t.rs1 == from {
            t.rs1 = to;
        }
        if t.rs2 == from {
            t.rs2 = to;
        }
    }

    fn replace_def(&self, inst: &mut MirInst<Rv64Inst>, from: Register, to: Register) {
        if pseudo_replace_def(inst, from, to) {
            return;
        }
        let t = inst.as_target_mut().unwrap();
        if t.rd == from {
            t.rd = to;
        }
    }

    fn make_uncond_branch(&self, target: BlockId) -> MirInst<Rv64Inst> {
        MirInst::Target(Rv64Inst::j(target))
    }

    fn retarget_branch(&self, inst: &mut MirInst<Rv64Inst>, old: BlockId, new: BlockId) {
        if let Some(t) = inst.as_target_mut() {
            if matches!(t.op.kind(), OpKind::B | OpKind::J) && t.target == Some(old) {
                t.target = Some(new);
            }
        }
    }
}

/// RV64 register-file description (lp64d).
#[derive(Debug, Default, Clone, Copy)]
pub struct Rv64RegInfo;

const INT_REGS: [u32; 32] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31,
];
const FLOAT_REGS: [u32; 32] = [
    32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54,
    55, 56, 57, 58, 59, 60, 61, 62, 63,
];
const INT_ARGS: [u32; 8] = [10, 11, 12, 13, 14, 15, 16, 17];
const FLOAT_ARGS: [u32; 8] = [42, 43, 44, 45, 46, 47, 48, 49];
const CALLEE_SAVED_INT: [u32; 12] = [8, 9, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27];
const CALLEE_SAVED_FLOAT: [u32; 12] = [40, 41, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59];
// x0/ra/sp/gp/tp, t0 (the lowering scratch), and the argument registers,
// which only serve as last-resort scratch.
const RESERVED: [u32; 22] = [
    0, 1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 15, 16, 17, 42, 43, 44, 45, 46, 47, 48, 49,
];

impl TargetRegInfo for Rv64RegInfo {
    fn sp(&self) -> u32 {
        pr::SP
    }

    fn ra(&self) -> u32 {
        pr::RA
    }

    fn zero(&self) -> u32 {
        pr::ZERO
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
    use crate::ir::DataType;

    #[test]
    fn test_branch_classification_is_exclusive() {
        let adapter = Rv64Adapter;
        let insts: Vec<MirInst<Rv64Inst>> = vec![
            MirInst::Target(Rv64Inst::call("f", 2, 0)),
            MirInst::Target(Rv64Inst::ret()),
            MirInst::Target(Rv64Inst::j(3)),
            MirInst::Target(Rv64Inst::b(
                Rv64Op::Bne,
                pr::x(10),
                pr::zero(),
                4,
            )),
        ];
        for inst in &insts {
            let classes = [
                adapter.is_call(inst),
                adapter.is_return(inst),
                adapter.is_uncond_branch(inst),
                adapter.is_cond_branch(inst),
            ];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1);
        }
    }

    #[test]
    fn test_call_uses_arg_regs() {
        let adapter = Rv64Adapter;
        let call = MirInst::Target(Rv64Inst::call("f", 2, 1));
        let uses = adapter.enum_uses(&call);
        assert_eq!(uses.len(), 3);
        assert_eq!(uses[0].id, pr::A0);
        assert_eq!(uses[1].id, pr::A0 + 1);
        assert_eq!(uses[2].id, pr::FA0);
        assert!(adapter.enum_defs(&call).is_empty());
    }

    #[test]
    fn test_branch_target_extraction() {
        let adapter = Rv64Adapter;
        let j = MirInst::Target(Rv64Inst::j(7));
        assert_eq!(adapter.branch_target(&j), Some(7));

        let add = MirInst::Target(Rv64Inst::r(
            Rv64Op::Add,
            pr::x(10),
            pr::x(11),
            pr::x(12),
        ));
        assert_eq!(adapter.branch_target(&add), None);
    }

    #[test]
    fn test_replace_use_and_def() {
        let adapter = Rv64Adapter;
        let v0 = Register::vreg(0, DataType::I32);
        let v1 = Register::vreg(1, DataType::I32);
        let a0 = pr::x(pr::A0);
        let mut inst = MirInst::Target(Rv64Inst::r(Rv64Op::Add, v1, v0, v0));

        adapter.replace_use(&mut inst, v0, a0);
        let t = inst.as_target().unwrap();
        assert_eq!(t.rs1, a0);
        assert_eq!(t.rs2, a0);
        assert_eq!(t.rd, v1, "defs untouched by replace_use");

        adapter.replace_def(&mut inst, v1, a0);
        assert_eq!(inst.as_target().unwrap().rd, a0);
    }

    #[test]
    fn test_retarget_branch() {
        let adapter = Rv64Adapter;
        let mut j = MirInst::Target(Rv64Inst::j(3));
        adapter.retarget_branch(&mut j, 3, 9);
        assert_eq!(adapter.branch_target(&j), Some(9));

        // A branch to a different target is left alone.
        adapter.retarget_branch(&mut j, 3, 11);
        assert_eq!(adapter.branch_target(&j), Some(9));
    }

    #[test]
    fn test_reserved_regs_not_allocatable() {
        let ri = Rv64RegInfo;
        assert!(ri.reserved().contains(&pr::SP));
        assert!(ri.reserved().contains(&pr::T0));
        assert!(ri.reserved().contains(&pr::A0));
        // s-registers stay allocatable.
        assert!(!ri.reserved().contains(&8));
        assert!(ri.callee_saved_int().contains(&8));
    }
}
