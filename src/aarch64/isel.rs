//! AArch64 instruction selection over the per-block SelectionDAG.
//!
//! Mirrors the RV64 selector in structure. The AArch64-specific concerns
//! are operand width (`w` vs `x` views of one register file, tracked per
//! instruction), the missing remainder instruction (`mod` expands to
//! `sdiv` + `msub`), and compare/`cset` idioms for both integer and float
//! conditions.

use super::defs::{ldst_fits, pr, A64Cond, A64Inst, A64Op};
use crate::dag::{DagBuilder, Isd, SdNodeId, SelectionDag};
use crate::error::{BackendError, Result};
use crate::ir::instruction::{FloatCond, IntCond};
use crate::ir::{self, BlockId, DataType};
use crate::mir::{FrameInfo, MBlock, MFunction, MModule, MirInst, MoveOperand, Register, VregAllocator};
use log::debug;
use rustc_hash::FxHashMap;

pub fn select_module(module: &ir::Module) -> Result<MModule<A64Inst>> {
    let mut out = MModule::new();
    out.globals = module.globals.clone();
    for func in &module.functions {
        func.validate().map_err(BackendError::InvalidIr)?;
        out.functions.push(select_function(func)?);
    }
    Ok(out)
}

pub fn select_function(ir_func: &ir::Function) -> Result<MFunction<A64Inst>> {
    let mut isel = FunctionIsel::new(ir_func);
    isel.collect_allocas();
    isel.compute_outgoing_area();

    let mut func = MFunction::new(ir_func.name.clone());
    for (i, block) in ir_func.blocks.values().enumerate() {
        let mut mblock = MBlock::new(block.id);
        if i == 0 {
            isel.bind_params(&mut mblock);
        }
        isel.select_block(block, &mut mblock)?;
        func.add_block(mblock);
    }

    func.frame = isel.frame;
    func.vregs = isel.vregs;
    func.has_call = isel.has_call;
    debug!(
        "aarch64 isel({}): {} insts, {} vregs",
        func.name,
        func.instruction_count(),
        func.vregs.count()
    );
    Ok(func)
}

struct FunctionIsel<'a> {
    ir: &'a ir::Function,
    vregs: VregAllocator,
    vreg_map: FxHashMap<usize, Register>,
    node_vreg: FxHashMap<SdNodeId, Register>,
    alloca_fi: FxHashMap<usize, i32>,
    frame: FrameInfo,
    has_call: bool,
}

impl<'a> FunctionIsel<'a> {
    fn new(ir: &'a ir::Function) -> Self {
        Self {
            ir,
            vregs: VregAllocator::new(),
            vreg_map: FxHashMap::default(),
            node_vreg: FxHashMap::default(),
            alloca_fi: FxHashMap::default(),
            frame: FrameInfo::new(),
            has_call: false,
        }
    }

    fn collect_allocas(&mut self) {
        for block in self.ir.blocks.values() {
            for inst in &block.insts {
                if let ir::Inst::Alloca { res, ty, count } = inst {
                    let size = ty.size_bytes() * (*count).max(1);
                    self.frame.add_object(*res as i32, size, ty.alignment());
                    self.alloca_fi.insert(*res, *res as i32);
                }
            }
        }
    }

    fn compute_outgoing_area(&mut self) {
        for block in self.ir.blocks.values() {
            for inst in &block.insts {
                if let ir::Inst::Call { args, .. } = inst {
                    let ints = args.iter().filter(|(_, ty)| !ty.is_float()).count();
                    let floats = args.len() - ints;
                    let stack_args = ints.saturating_sub(8) + floats.saturating_sub(8);
                    self.frame.update_outgoing_args_size(8 * stack_args as u32);
                }
            }
        }
    }

    fn bind_params(&mut self, entry: &mut MBlock<A64Inst>) {
        let mut int_idx: u32 = 0;
        let mut float_idx: u32 = 0;
        let mut stack_idx: u32 = 0;
        for (reg_id, ty) in &self.ir.params {
            let vreg = self.get_or_create_vreg(*reg_id, *ty);
            let in_regs = if ty.is_float() {
                let ok = float_idx < 8;
                if ok {
                    entry.push(MirInst::Move {
                        dst: vreg,
                        src: MoveOperand::Reg(pr::v(pr::V0 + float_idx, *ty)),
                    });
                }
                float_idx += 1;
                ok
            } else {
                let ok = int_idx < 8;
                if ok {
                    entry.push(MirInst::Move {
                        dst: vreg,
                        src: MoveOperand::Reg(pr::x_ty(pr::X0 + int_idx, *ty)),
                    });
                }
                int_idx += 1;
                ok
            };

            if !in_regs {
                let fi = -(stack_idx as i32) - 1;
                self.frame.add_incoming_arg(fi, 8 * stack_idx);
                entry.push(MirInst::Target(A64Inst::ldr_fi(vreg, pr::sp(), fi, 0)));
                stack_idx += 1;
            }
        }
    }

    fn get_vreg(&mut self, ty: DataType) -> Register {
        self.vregs.alloc(ty)
    }

    fn get_or_create_vreg(&mut self, ir_reg: usize, ty: DataType) -> Register {
        if let Some(&v) = self.vreg_map.get(&ir_reg) {
            return v;
        }
        let v = self.vregs.alloc(ty);
        self.vreg_map.insert(ir_reg, v);
        v
    }

    fn select_block(&mut self, ir_block: &ir::Block, mblock: &mut MBlock<A64Inst>) -> Result<()> {
        let dag = DagBuilder::build_block(ir_block)?;
        let order = dag.schedule();
        self.node_vreg.clear();
        self.preallocate(&dag, &order);
        for id in order {
            self.select_node(&dag, id, mblock)?;
        }
        Ok(())
    }

    fn preallocate(&mut self, dag: &SelectionDag, order: &[SdNodeId]) {
        for &id in order {
            let node = dag.node(id);
            let Some(dt) = node.result_type(0) else { continue };
            if dt == DataType::Token {
                continue;
            }
            match node.opcode {
                Isd::Label
                | Isd::Symbol
                | Isd::ConstI32
                | Isd::ConstI64
                | Isd::ConstF32
                | Isd::FrameIndex => continue,
                Isd::Reg => {
                    let Some(ir_reg) = node.ir_reg else { continue };
                    if self.alloca_fi.contains_key(&ir_reg) {
                        continue;
                    }
                    let vreg = self.get_or_create_vreg(ir_reg, dt);
                    self.node_vreg.insert(id, vreg);
                }
                _ => {
                    let vreg = match node.ir_reg {
                        Some(ir_reg) => self.get_or_create_vreg(ir_reg, dt),
                        None => self.get_vreg(dt),
                    };
                    self.node_vreg.insert(id, vreg);
                }
            }
        }
    }

    fn get_operand_reg(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<Register> {
        if let Some(&v) = self.node_vreg.get(&id) {
            return Ok(v);
        }
        let node = dag.node(id);
        match node.opcode {
            Isd::Reg => {
                let ir_reg = node
                    .ir_reg
                    .ok_or_else(|| BackendError::Internal("reg node without IR id".into()))?;
                if let Some(&fi) = self.alloca_fi.get(&ir_reg) {
                    let addr = self.materialize_frame_addr(fi, block);
                    self.node_vreg.insert(id, addr);
                    return Ok(addr);
                }
                let dt = node.result_type(0).unwrap_or(DataType::I64);
                Ok(self.get_or_create_vreg(ir_reg, dt))
            }
            Isd::ConstI32 | Isd::ConstI64 => {
                let dt = if node.opcode == Isd::ConstI32 {
                    DataType::I32
                } else {
                    DataType::I64
                };
                let dst = self.get_vreg(dt);
                block.push(MirInst::Move {
                    dst,
                    src: MoveOperand::ImmI32(node.imm_i64().unwrap_or(0) as i32),
                });
                self.node_vreg.insert(id, dst);
                Ok(dst)
            }
            Isd::ConstF32 => {
                let dst = self.get_vreg(DataType::F32);
                block.push(MirInst::Move {
                    dst,
                    src: MoveOperand::ImmF32(node.imm_f32().unwrap_or(0.0)),
                });
                self.node_vreg.insert(id, dst);
                Ok(dst)
            }
            Isd::FrameIndex => {
                let fi = node
                    .frame_index()
                    .ok_or_else(|| BackendError::Internal("frame-index node without index".into()))?;
                let addr = self.materialize_frame_addr(fi, block);
                self.node_vreg.insert(id, addr);
                Ok(addr)
            }
            Isd::Symbol => {
                let sym = node
                    .symbol()
                    .ok_or_else(|| BackendError::Internal("symbol node without name".into()))?
                    .to_string();
                let addr = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(A64Inst::la(addr, sym)));
                self.node_vreg.insert(id, addr);
                Ok(addr)
            }
            _ => Err(BackendError::Internal(format!(
                "node {} not scheduled or not materializable",
                node.opcode
            ))),
        }
    }

    fn materialize_frame_addr(&mut self, fi: i32, block: &mut MBlock<A64Inst>) -> Register {
        let addr = self.get_vreg(DataType::I64);
        block.push(MirInst::Target(A64Inst::addi_fi(addr, pr::sp(), fi, 0)));
        addr
    }

    fn base_frame_index(&self, dag: &SelectionDag, id: SdNodeId) -> Option<i32> {
        let node = dag.node(id);
        match node.opcode {
            Isd::FrameIndex => node.frame_index(),
            Isd::Reg => node.ir_reg.and_then(|r| self.alloca_fi.get(&r).copied()),
            _ => None,
        }
    }

    fn select_address(&self, dag: &SelectionDag, id: SdNodeId) -> Option<(SdNodeId, i64)> {
        let node = dag.node(id);
        match node.opcode {
            Isd::FrameIndex | Isd::Symbol => Some((id, 0)),
            Isd::Reg if self.base_frame_index(dag, id).is_some() => Some((id, 0)),
            Isd::Add => {
                let lhs = node.operands[0].node;
                let rhs = node.operands[1].node;
                if let Some((base, off)) = self.select_address(dag, lhs) {
                    let r = dag.node(rhs);
                    if matches!(r.opcode, Isd::ConstI32 | Isd::ConstI64) {
                        return Some((base, off + r.imm_i64()?));
                    }
                    return None;
                }
                if let Some((base, off)) = self.select_address(dag, rhs) {
                    let l = dag.node(lhs);
                    if matches!(l.opcode, Isd::ConstI32 | Isd::ConstI64) {
                        return Some((base, off + l.imm_i64()?));
                    }
                    return None;
                }
                None
            }
            _ => None,
        }
    }

    /// Make sure a 64-bit integer operation sees a 64-bit value: a value
    /// produced as i32 is sign-extended into a fresh register first.
    fn coerce64(&mut self, reg: Register, block: &mut MBlock<A64Inst>) -> Register {
        if reg.ty == DataType::I32 {
            let wide = self.get_vreg(DataType::I64);
            block.push(MirInst::Target(A64Inst::rr(A64Op::Sxtw, wide, reg, false)));
            wide
        } else {
            reg
        }
    }

    fn select_node(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        match dag.node(id).opcode {
            Isd::EntryToken
            | Isd::TokenFactor
            | Isd::Label
            | Isd::Symbol
            | Isd::Reg
            | Isd::ConstI32
            | Isd::ConstI64
            | Isd::ConstF32
            | Isd::FrameIndex => Ok(()),
            Isd::Copy => self.select_copy(dag, id, block),
            Isd::Phi => self.select_phi(dag, id, block),
            Isd::Add
            | Isd::Sub
            | Isd::Mul
            | Isd::Div
            | Isd::Mod
            | Isd::And
            | Isd::Or
            | Isd::Xor
            | Isd::Shl
            | Isd::AShr
            | Isd::LShr
            | Isd::FAdd
            | Isd::FSub
            | Isd::FMul
            | Isd::FDiv => self.select_binary(dag, id, block),
            Isd::Load => self.select_load(dag, id, block),
            Isd::Store => self.select_store(dag, id, block),
            Isd::Icmp => self.select_icmp(dag, id, block),
            Isd::Fcmp => self.select_fcmp(dag, id, block),
            Isd::Br | Isd::BrCond => self.select_branch(dag, id, block),
            Isd::Call => self.select_call(dag, id, block),
            Isd::Ret => self.select_ret(dag, id, block),
            Isd::Zext | Isd::Sitofp | Isd::Fptosi => self.select_cast(dag, id, block),
        }
    }

    fn select_copy(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let src = dag.node(id).operands[0].node;
        let src = self.get_operand_reg(dag, src, block)?;
        let dst = self.node_vreg[&id];
        block.push(MirInst::Move {
            dst,
            src: MoveOperand::Reg(src),
        });
        Ok(())
    }

    fn select_binary(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let opcode = node.opcode;
        let dst = self.node_vreg[&id];
        let is_float = dst.ty.is_float();
        let is32 = dst.ty == DataType::I32;

        let mut lhs = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let mut rhs = self.get_operand_reg(dag, node.operands[1].node, block)?;
        if !is_float && !is32 {
            lhs = self.coerce64(lhs, block);
            rhs = self.coerce64(rhs, block);
        }

        let op = match opcode {
            Isd::Add => {
                if is_float {
                    A64Op::Fadd
                } else {
                    A64Op::Add
                }
            }
            Isd::Sub => {
                if is_float {
                    A64Op::Fsub
                } else {
                    A64Op::Sub
                }
            }
            Isd::Mul => {
                if is_float {
                    A64Op::Fmul
                } else {
                    A64Op::Mul
                }
            }
            Isd::Div => {
                if is_float {
                    A64Op::Fdiv
                } else {
                    A64Op::Sdiv
                }
            }
            Isd::FAdd => A64Op::Fadd,
            Isd::FSub => A64Op::Fsub,
            Isd::FMul => A64Op::Fmul,
            Isd::FDiv => A64Op::Fdiv,
            Isd::And => A64Op::And,
            Isd::Or => A64Op::Orr,
            Isd::Xor => A64Op::Eor,
            Isd::Shl => A64Op::Lsl,
            Isd::AShr => A64Op::Asr,
            Isd::LShr => A64Op::Lsr,
            Isd::Mod => {
                // No remainder instruction: a % b = a - (a / b) * b.
                let quot = self.get_vreg(dst.ty);
                block.push(MirInst::Target(A64Inst::rrr(
                    A64Op::Sdiv,
                    quot,
                    lhs,
                    rhs,
                    is32,
                )));
                block.push(MirInst::Target(A64Inst::msub(dst, quot, rhs, lhs, is32)));
                return Ok(());
            }
            _ => {
                return Err(BackendError::Internal(format!(
                    "unexpected binary opcode {}",
                    opcode
                )))
            }
        };

        block.push(MirInst::Target(A64Inst::rrr(op, dst, lhs, rhs, is32)));
        Ok(())
    }

    fn select_load(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let dst = self.node_vreg[&id];
        let addr_id = node.operands[1].node;

        if let Some((base, off)) = self.select_address(dag, addr_id) {
            if let Some(fi) = self.base_frame_index(dag, base) {
                block.push(MirInst::Target(A64Inst::ldr_fi(dst, pr::sp(), fi, off)));
                return Ok(());
            }
            let base_reg = self.get_operand_reg(dag, base, block)?;
            if ldst_fits(off, dst.ty.size_bytes()) {
                block.push(MirInst::Target(A64Inst::ldr(dst, base_reg, off)));
            } else {
                let addr = self.add_large_offset(base_reg, off, block);
                block.push(MirInst::Target(A64Inst::ldr(dst, addr, 0)));
            }
            return Ok(());
        }

        let addr = self.get_operand_reg(dag, addr_id, block)?;
        block.push(MirInst::Target(A64Inst::ldr(dst, addr, 0)));
        Ok(())
    }

    fn add_large_offset(
        &mut self,
        base: Register,
        off: i64,
        block: &mut MBlock<A64Inst>,
    ) -> Register {
        let off_reg = self.get_vreg(DataType::I64);
        block.push(MirInst::Move {
            dst: off_reg,
            src: MoveOperand::ImmI32(off as i32),
        });
        let addr = self.get_vreg(DataType::I64);
        block.push(MirInst::Target(A64Inst::rrr(
            A64Op::Add,
            addr,
            base,
            off_reg,
            false,
        )));
        addr
    }

    fn select_store(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let val = self.get_operand_reg(dag, node.operands[1].node, block)?;
        let addr_id = node.operands[2].node;

        if let Some((base, off)) = self.select_address(dag, addr_id) {
            if let Some(fi) = self.base_frame_index(dag, base) {
                block.push(MirInst::Target(A64Inst::str_fi(val, pr::sp(), fi, off)));
                return Ok(());
            }
            let base_reg = self.get_operand_reg(dag, base, block)?;
            if ldst_fits(off, val.ty.size_bytes()) {
                block.push(MirInst::Target(A64Inst::str(val, base_reg, off)));
            } else {
                let addr = self.add_large_offset(base_reg, off, block);
                block.push(MirInst::Target(A64Inst::str(val, addr, 0)));
            }
            return Ok(());
        }

        let addr = self.get_operand_reg(dag, addr_id, block)?;
        block.push(MirInst::Target(A64Inst::str(val, addr, 0)));
        Ok(())
    }

    fn select_icmp(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let cond = node
            .int_cond()
            .ok_or_else(|| BackendError::Internal("icmp without condition".into()))?;
        let dst = self.node_vreg[&id];
        let lhs = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let rhs = self.get_operand_reg(dag, node.operands[1].node, block)?;

        // A 32-bit compare reads the w views, so unsigned conditions need
        // no explicit zero-extension here.
        let is32 = lhs.ty == DataType::I32 && rhs.ty == DataType::I32;
        block.push(MirInst::Target(A64Inst::cmp(lhs, rhs, is32)));
        block.push(MirInst::Target(A64Inst::cset(dst, int_cond(cond))));
        Ok(())
    }

    fn select_fcmp(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let cond = node
            .float_cond()
            .ok_or_else(|| BackendError::Internal("fcmp without condition".into()))?;
        let dst = self.node_vreg[&id];
        let lhs = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let rhs = self.get_operand_reg(dag, node.operands[1].node, block)?;

        block.push(MirInst::Target(A64Inst::fcmp(lhs, rhs)));
        block.push(MirInst::Target(A64Inst::cset(dst, float_cond(cond))));
        Ok(())
    }

    fn select_branch(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        if node.opcode == Isd::Br {
            let target = dag.node(node.operands[0].node).block_label().ok_or_else(|| {
                BackendError::Internal("br without label operand".into())
            })?;
            block.push(MirInst::Target(A64Inst::b(target)));
            return Ok(());
        }

        let cond = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let t = dag.node(node.operands[1].node).block_label();
        let f = dag.node(node.operands[2].node).block_label();
        let (t, f) = match (t, f) {
            (Some(t), Some(f)) => (t, f),
            _ => return Err(BackendError::Internal("brcond without label operands".into())),
        };
        block.push(MirInst::Target(A64Inst::cmp_imm(
            cond,
            0,
            cond.ty == DataType::I32,
        )));
        block.push(MirInst::Target(A64Inst::b_cond(A64Cond::Ne, t)));
        block.push(MirInst::Target(A64Inst::b(f)));
        Ok(())
    }

    fn select_call(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let callee = dag
            .node(node.operands[1].node)
            .symbol()
            .ok_or_else(|| BackendError::InvalidIr("call without callee symbol".into()))?
            .to_string();

        let mut arg_ids: Vec<SdNodeId> = node.operands[2..].iter().map(|v| v.node).collect();
        let callee = match redirect_intrinsic(&callee) {
            Some(libc_name) => {
                arg_ids.truncate(3);
                libc_name.to_string()
            }
            None => callee,
        };

        let mut arg_regs = Vec::with_capacity(arg_ids.len());
        for arg in arg_ids {
            arg_regs.push(self.get_operand_reg(dag, arg, block)?);
        }

        let mut int_used: u32 = 0;
        let mut float_used: u32 = 0;
        let mut stack_args: Vec<Register> = Vec::new();
        let mut moves: Vec<(Register, Register)> = Vec::new();
        for reg in arg_regs {
            if reg.ty.is_float() {
                if float_used < 8 {
                    moves.push((pr::v(pr::V0 + float_used, reg.ty), reg));
                } else {
                    stack_args.push(reg);
                }
                float_used += 1;
            } else {
                if int_used < 8 {
                    moves.push((pr::x_ty(pr::X0 + int_used, reg.ty), reg));
                } else {
                    stack_args.push(reg);
                }
                int_used += 1;
            }
        }

        for (dst, src) in moves {
            block.push(MirInst::Move {
                dst,
                src: MoveOperand::Reg(src),
            });
        }
        for (i, reg) in stack_args.iter().enumerate() {
            block.push(MirInst::Target(A64Inst::str(*reg, pr::sp(), 8 * i as i64)));
        }
        self.frame
            .update_outgoing_args_size(8 * stack_args.len() as u32);

        block.push(MirInst::Target(A64Inst::bl(
            callee,
            int_used.min(8) as u8,
            float_used.min(8) as u8,
        )));
        self.has_call = true;

        if node.result_type(0).is_some_and(|t| t != DataType::Token) {
            let dst = self.node_vreg[&id];
            let src = if dst.ty.is_float() {
                pr::v(pr::V0, dst.ty)
            } else {
                pr::x_ty(pr::X0, dst.ty)
            };
            block.push(MirInst::Move {
                dst,
                src: MoveOperand::Reg(src),
            });
        }
        Ok(())
    }

    fn select_ret(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        if node.operands.len() > 1 {
            let val = self.get_operand_reg(dag, node.operands[1].node, block)?;
            let dst = if val.ty.is_float() {
                pr::v(pr::V0, val.ty)
            } else {
                pr::x_ty(pr::X0, val.ty)
            };
            block.push(MirInst::Move {
                dst,
                src: MoveOperand::Reg(val),
            });
        }
        block.push(MirInst::Target(A64Inst::ret()));
        Ok(())
    }

    fn select_cast(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let dst = self.node_vreg[&id];
        let src = self.get_operand_reg(dag, node.operands[0].node, block)?;
        match node.opcode {
            Isd::Zext => {
                if dst.ty == DataType::I64 && src.ty == DataType::I32 {
                    block.push(MirInst::Target(A64Inst::rr(A64Op::Uxtw, dst, src, false)));
                } else {
                    block.push(MirInst::Move {
                        dst,
                        src: MoveOperand::Reg(src),
                    });
                }
            }
            Isd::Sitofp => {
                block.push(MirInst::Target(A64Inst::rr(
                    A64Op::Scvtf,
                    dst,
                    src,
                    src.ty == DataType::I32,
                )));
            }
            Isd::Fptosi => {
                block.push(MirInst::Target(A64Inst::rr(
                    A64Op::Fcvtzs,
                    dst,
                    src,
                    dst.ty == DataType::I32,
                )));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn select_phi(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<A64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let dst = self.node_vreg[&id];
        let mut incomings = Vec::with_capacity(node.operands.len() / 2);
        for pair in node.operands.chunks(2) {
            let label = dag.node(pair[0].node).block_label().ok_or_else(|| {
                BackendError::Internal("phi operand without predecessor label".into())
            })?;
            let val_id = pair[1].node;
            let val = dag.node(val_id);
            let operand = match val.opcode {
                Isd::ConstI32 | Isd::ConstI64 => {
                    MoveOperand::ImmI32(val.imm_i64().unwrap_or(0) as i32)
                }
                Isd::ConstF32 => MoveOperand::ImmF32(val.imm_f32().unwrap_or(0.0)),
                Isd::Symbol => {
                    MoveOperand::Symbol(val.symbol().unwrap_or_default().to_string())
                }
                _ => {
                    if let Some(&v) = self.node_vreg.get(&val_id) {
                        MoveOperand::Reg(v)
                    } else if val.opcode == Isd::Reg {
                        let ir_reg = val.ir_reg.ok_or_else(|| {
                            BackendError::Internal("phi reg operand without IR id".into())
                        })?;
                        let dt = val.result_type(0).unwrap_or(DataType::I64);
                        MoveOperand::Reg(self.get_or_create_vreg(ir_reg, dt))
                    } else {
                        return Err(BackendError::Internal(
                            "phi operand is neither constant nor register".into(),
                        ));
                    }
                }
            };
            incomings.push((label as BlockId, operand));
        }
        block.push(MirInst::Phi { dst, incomings });
        Ok(())
    }
}

fn int_cond(cond: IntCond) -> A64Cond {
    match cond {
        IntCond::Eq => A64Cond::Eq,
        IntCond::Ne => A64Cond::Ne,
        IntCond::Slt => A64Cond::Lt,
        IntCond::Sle => A64Cond::Le,
        IntCond::Sgt => A64Cond::Gt,
        IntCond::Sge => A64Cond::Ge,
        IntCond::Ult => A64Cond::Lo,
        IntCond::Ule => A64Cond::Ls,
        IntCond::Ugt => A64Cond::Hi,
        IntCond::Uge => A64Cond::Hs,
    }
}

fn float_cond(cond: FloatCond) -> A64Cond {
    match cond {
        FloatCond::Eq => A64Cond::Eq,
        FloatCond::Ne => A64Cond::Ne,
        FloatCond::Lt => A64Cond::Mi,
        FloatCond::Le => A64Cond::Ls,
        FloatCond::Gt => A64Cond::Gt,
        FloatCond::Ge => A64Cond::Ge,
    }
}

fn redirect_intrinsic(name: &str) -> Option<&'static str> {
    if name.starts_with("llvm.memset.") {
        Some("memset")
    } else if name.starts_with("llvm.memcpy.") {
        Some("memcpy")
    } else if name.starts_with("llvm.memmove.") {
        Some("memmove")
    } else {
        None
    }
}
