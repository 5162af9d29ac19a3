//! Target abstraction: the interface target-independent passes see.
//!
//! [`InstrAdapter`] answers purely semantic questions about machine
//! instructions (what is a call, which registers are read) and performs
//! semantic rewrites (operand replacement, spill-code insertion) without
//! exposing ISA encoding. [`TargetRegInfo`] describes the register file.
//! Both are stateless unit structs, passed explicitly into each pass.

use crate::ir::BlockId;
use crate::mir::{MBlock, MirInst, MoveOperand, Register};

/// Semantic query and rewrite interface over [`MirInst`].
///
/// Every operation is total: an instruction shape the adapter does not
/// recognize yields `false` / `None` / an empty set rather than an error.
pub trait InstrAdapter {
    type Inst;

    fn is_call(&self, inst: &MirInst<Self::Inst>) -> bool;
    fn is_return(&self, inst: &MirInst<Self::Inst>) -> bool;
    fn is_uncond_branch(&self, inst: &MirInst<Self::Inst>) -> bool;
    fn is_cond_branch(&self, inst: &MirInst<Self::Inst>) -> bool;

    /// Target block of a branch-like instruction.
    fn branch_target(&self, inst: &MirInst<Self::Inst>) -> Option<BlockId>;

    /// Registers read by the instruction, including implicit uses such as
    /// the argument registers of a call (bounded by its recorded argument
    /// counts).
    fn enum_uses(&self, inst: &MirInst<Self::Inst>) -> Vec<Register>;

    /// Registers written by the instruction. Calls define nothing here;
    /// the return-value copy is a separate explicit move.
    fn enum_defs(&self, inst: &MirInst<Self::Inst>) -> Vec<Register>;

    /// Physical registers appearing anywhere in the instruction. The
    /// allocator uses this to keep scratch registers away from fixed ones.
    fn enum_phys_regs(&self, inst: &MirInst<Self::Inst>) -> Vec<Register>;

    /// Replace every use of `from` with `to`. No-op when `from` is absent.
    fn replace_use(&self, inst: &mut MirInst<Self::Inst>, from: Register, to: Register);

    /// Replace every def of `from` with `to`. No-op when `from` is absent.
    fn replace_def(&self, inst: &mut MirInst<Self::Inst>, from: Register, to: Register);

    /// A fresh unconditional branch to `target`, for edge splitting.
    fn make_uncond_branch(&self, target: BlockId) -> MirInst<Self::Inst>;

    /// Redirect a branch whose target is `old` to `new`.
    fn retarget_branch(&self, inst: &mut MirInst<Self::Inst>, old: BlockId, new: BlockId);

    /// Insert a reload of `frame_index` into `phys` before position `pos`.
    fn insert_reload_before(
        &self,
        block: &mut MBlock<Self::Inst>,
        pos: usize,
        phys: Register,
        frame_index: i32,
    ) {
        block.insts.insert(
            pos,
            MirInst::FiLoad {
                dst: phys,
                frame_index,
            },
        );
    }

    /// Insert a spill of `phys` to `frame_index` right after position `pos`.
    fn insert_spill_after(
        &self,
        block: &mut MBlock<Self::Inst>,
        pos: usize,
        phys: Register,
        frame_index: i32,
    ) {
        block.insts.insert(
            pos + 1,
            MirInst::FiStore {
                src: phys,
                frame_index,
            },
        );
    }
}

/// Register-file description used by allocation and stack lowering.
/// All slices hold physical register ids.
pub trait TargetRegInfo {
    fn sp(&self) -> u32;
    fn ra(&self) -> u32;
    fn zero(&self) -> u32;

    fn int_arg_regs(&self) -> &'static [u32];
    fn float_arg_regs(&self) -> &'static [u32];
    fn callee_saved_int(&self) -> &'static [u32];
    fn callee_saved_float(&self) -> &'static [u32];
    /// Registers the allocator must never hand out (includes the argument
    /// registers, which are only used as last-resort scratch).
    fn reserved(&self) -> &'static [u32];
    fn int_regs(&self) -> &'static [u32];
    fn float_regs(&self) -> &'static [u32];
}

/// Uses of the shared pseudo instructions; `None` for `Target`.
pub(crate) fn pseudo_uses<I>(inst: &MirInst<I>) -> Option<Vec<Register>> {
    match inst {
        MirInst::Move { src, .. } => Some(src.as_reg().copied().into_iter().collect()),
        MirInst::Phi { incomings, .. } => Some(
            incomings
                .iter()
                .filter_map(|(_, op)| op.as_reg().copied())
                .collect(),
        ),
        MirInst::FiStore { src, .. } => Some(vec![*src]),
        MirInst::FiLoad { .. } => Some(vec![]),
        MirInst::Target(_) => None,
    }
}

/// Defs of the shared pseudo instructions; `None` for `Target`.
pub(crate) fn pseudo_defs<I>(inst: &MirInst<I>) -> Option<Vec<Register>> {
    match inst {
        MirInst::Move { dst, .. } => Some(vec![*dst]),
        MirInst::Phi { dst, .. } => Some(vec![*dst]),
        MirInst::FiLoad { dst, .. } => Some(vec![*dst]),
        MirInst::FiStore { .. } => Some(vec![]),
        MirInst::Target(_) => None,
    }
}

/// Physical registers mentioned by the shared pseudo instructions.
pub(crate) fn pseudo_phys_regs<I>(inst: &MirInst<I>) -> Option<Vec<Register>> {
    let mut out = Vec::new();
    let mut add = |r: &Register| {
        if !r.is_virtual {
            out.push(*r);
        }
    };
    match inst {
        MirInst::Move { dst, src } => {
            add(dst);
            if let Some(r) = src.as_reg() {
                add(r);
            }
        }
        MirInst::Phi { dst, incomings } => {
            add(dst);
            for (_, op) in incomings {
                if let Some(r) = op.as_reg() {
                    add(r);
                }
            }
        }
        MirInst::FiLoad { dst, .. } => add(dst),
        MirInst::FiStore { src, .. } => add(src),
        MirInst::Target(_) => return None,
    }
    Some(out)
}

/// Use-replacement on the shared pseudo instructions; `false` for `Target`.
pub(crate) fn pseudo_replace_use<I>(inst: &mut MirInst<I>, from: Register, to: Register) -> bool {
    match inst {
        MirInst::Move { src, .. } => {
            if let MoveOperand::Reg(r) = src {
                if *r == from {
                    *src = MoveOperand::Reg(to);
                }
            }
            true
        }
        MirInst::Phi { incomings, .. } => {
            for (_, op) in incomings {
                if let MoveOperand::Reg(r) = op {
                    if *r == from {
                        *op = MoveOperand::Reg(to);
                    }
                }
            }
            true
        }
        MirInst::FiStore { src, .. } => {
            if *src == from {
                *src = to;
            }
            true
        }
        MirInst::FiLoad { .. } => true,
        MirInst::Target(_) => false,
    }
}

/// Def-replacement on the shared pseudo instructions; `false` for `Target`.
pub(crate) fn pseudo_replace_def<I>(inst: &mut MirInst<I>, from: Register, to: Register) -> bool {
    match inst {
        MirInst::Move { dst, .. } | MirInst::Phi { dst, .. } | MirInst::FiLoad { dst, .. } => {
            if *dst == from {
                *dst = to;
            }
            true
        }
        MirInst::FiStore { .. } => true,
        MirInst::Target(_) => false,
    }
}

/// Supported targets, dispatched by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Rv64,
    AArch64,
}

/// Resolve a user-facing target name.
pub fn resolve_target(name: &str) -> Option<TargetKind> {
    match name {
        "riscv64" | "riscv" | "rv64" => Some(TargetKind::Rv64),
        "aarch64" | "armv8" => Some(TargetKind::AArch64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataType;

    #[test]
    fn test_resolve_target_aliases() {
        assert_eq!(resolve_target("riscv64"), Some(TargetKind::Rv64));
        assert_eq!(resolve_target("rv64"), Some(TargetKind::Rv64));
        assert_eq!(resolve_target("riscv"), Some(TargetKind::Rv64));
        assert_eq!(resolve_target("aarch64"), Some(TargetKind::AArch64));
        assert_eq!(resolve_target("armv8"), Some(TargetKind::AArch64));
        assert_eq!(resolve_target("x86_64"), None);
    }

    #[test]
    fn test_pseudo_uses_defs() {
        let v0 = Register::vreg(0, DataType::I32);
        let v1 = Register::vreg(1, DataType::I32);
        let mv: MirInst<()> = MirInst::Move {
            dst: v1,
            src: MoveOperand::Reg(v0),
        };
        assert_eq!(pseudo_uses(&mv), Some(vec![v0]));
        assert_eq!(pseudo_defs(&mv), Some(vec![v1]));

        let imm: MirInst<()> = MirInst::Move {
            dst: v1,
            src: MoveOperand::ImmI32(3),
        };
        assert_eq!(pseudo_uses(&imm), Some(vec![]));
    }

    #[test]
    fn test_pseudo_replace() {
        let v0 = Register::vreg(0, DataType::I32);
        let p5 = Register::phys(5, DataType::I32);
        let mut mv: MirInst<()> = MirInst::Move {
            dst: v0,
            src: MoveOperand::Reg(v0),
        };
        assert!(pseudo_replace_use(&mut mv, v0, p5));
        assert!(pseudo_replace_def(&mut mv, v0, p5));
        match mv {
            MirInst::Move { dst, src } => {
                assert_eq!(dst, p5);
                assert_eq!(src, MoveOperand::Reg(p5));
            }
            _ => unreachable!(),
        }
    }
}
