//! RV64 instruction selection over the per-block SelectionDAG.
//!
//! Selection runs in three stages per block: schedule the DAG into a
//! topological order, pre-allocate virtual registers for every scheduled
//! node that produces a value, then walk the schedule emitting machine
//! instructions. Constants and addresses are materialized lazily at their
//! first use; loads and stores fold frame indices and small constant
//! offsets into their own operands through `select_address`.

use super::defs::{imm12, pr, Rv64Inst, Rv64Op};
use crate::dag::{DagBuilder, Isd, SdNodeId, SelectionDag};
use crate::error::{BackendError, Result};
use crate::ir::instruction::{FloatCond, IntCond};
use crate::ir::{self, BlockId, DataType};
use crate::mir::{FrameInfo, MBlock, MFunction, MModule, MirInst, MoveOperand, Register, VregAllocator};
use log::debug;
use rustc_hash::FxHashMap;

/// Lower a whole IR module to RV64 machine IR.
pub fn select_module(module: &ir::Module) -> Result<MModule<Rv64Inst>> {
    let mut out = MModule::new();
    out.globals = module.globals.clone();
    for func in &module.functions {
        func.validate().map_err(BackendError::InvalidIr)?;
        out.functions.push(select_function(func)?);
    }
    Ok(out)
}

/// Lower one IR function.
pub fn select_function(ir_func: &ir::Function) -> Result<MFunction<Rv64Inst>> {
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
        "rv64 isel({}): {} insts, {} vregs",
        func.name,
        func.instruction_count(),
        func.vregs.count()
    );
    Ok(func)
}

struct FunctionIsel<'a> {
    ir: &'a ir::Function,
    vregs: VregAllocator,
    /// IR register id -> vreg, shared across blocks so one SSA value is
    /// one vreg everywhere.
    vreg_map: FxHashMap<usize, Register>,
    /// Per-block map from scheduled node to its vreg; cleared per block.
    node_vreg: FxHashMap<SdNodeId, Register>,
    /// Alloca register id -> frame index.
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

    /// Bind incoming parameters at the top of the entry block: the first
    /// eight per class arrive in argument registers, the rest are loaded
    /// from the caller's outgoing area through negative frame indices.
    fn bind_params(&mut self, entry: &mut MBlock<Rv64Inst>) {
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
                        src: MoveOperand::Reg(pr::f(pr::FA0 + float_idx)),
                    });
                }
                float_idx += 1;
                ok
            } else {
                let ok = int_idx < 8;
                if ok {
                    entry.push(MirInst::Move {
                        dst: vreg,
                        src: MoveOperand::Reg(pr::x(pr::A0 + int_idx)),
                    });
                }
                int_idx += 1;
                ok
            };

            if !in_regs {
                let fi = -(stack_idx as i32) - 1;
                self.frame.add_incoming_arg(fi, 8 * stack_idx);
                let op = load_op(*ty);
                entry.push(MirInst::Target(Rv64Inst::i_fi(op, vreg, pr::sp(), fi, 0)));
                stack_idx += 1;
            }
        }
    }

    fn get_vreg(&mut self, ty: DataType) -> Register {
        self.vregs.alloc(ty)
    }

    fn get_or_create_vreg(&mut self, ir_reg: usize, ty: DataType) -> Register {
        if let Some(&v) = self.vreg_map.get(&ir_reg) {
            // A type mismatch here is a width disagreement between blocks;
            // RV64 registers are width-agnostic, keep the first binding.
            return v;
        }
        let v = self.vregs.alloc(ty);
        self.vreg_map.insert(ir_reg, v);
        v
    }

    fn select_block(&mut self, ir_block: &ir::Block, mblock: &mut MBlock<Rv64Inst>) -> Result<()> {
        let dag = DagBuilder::build_block(ir_block)?;
        let order = dag.schedule();
        self.node_vreg.clear();
        self.preallocate(&dag, &order);
        for id in order {
            self.select_node(&dag, id, mblock)?;
        }
        Ok(())
    }

    /// Pre-allocate a vreg for every scheduled node with a real result, so
    /// defs and cross-block users agree on the register before selection.
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

    /// Register holding a node's value, materializing constants and
    /// addresses on first use.
    fn get_operand_reg(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
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
                let imm = node.imm_i64().unwrap_or(0);
                block.push(MirInst::Move {
                    dst,
                    src: MoveOperand::ImmI32(imm as i32),
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
                block.push(MirInst::Target(Rv64Inst::la(addr, sym)));
                self.node_vreg.insert(id, addr);
                Ok(addr)
            }
            _ => Err(BackendError::Internal(format!(
                "node {} not scheduled or not materializable",
                node.opcode
            ))),
        }
    }

    /// `addi rd, sp, <fi>` with the offset resolved by frame lowering.
    fn materialize_frame_addr(&mut self, fi: i32, block: &mut MBlock<Rv64Inst>) -> Register {
        let addr = self.get_vreg(DataType::I64);
        block.push(MirInst::Target(Rv64Inst::i_fi(
            Rv64Op::Addi,
            addr,
            pr::sp(),
            fi,
            0,
        )));
        addr
    }

    /// Frame index behind an address base node, if it has one.
    fn base_frame_index(&self, dag: &SelectionDag, id: SdNodeId) -> Option<i32> {
        let node = dag.node(id);
        match node.opcode {
            Isd::FrameIndex => node.frame_index(),
            Isd::Reg => node.ir_reg.and_then(|r| self.alloca_fi.get(&r).copied()),
            _ => None,
        }
    }

    /// Fold `add`-of-constant chains into a `(base, offset)` pair.
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

    fn select_node(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
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
        block: &mut MBlock<Rv64Inst>,
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
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let opcode = node.opcode;
        let dst = self.node_vreg[&id];
        let lhs_id = node.operands[0].node;
        let rhs_id = node.operands[1].node;

        let is_float = node.result_type(0).is_some_and(|t| t.is_float());
        let is32 = dst.ty == DataType::I32;

        let lhs = self.get_operand_reg(dag, lhs_id, block)?;

        // A small i32-constant rhs folds into the immediate form.
        let rhs_node = dag.node(rhs_id);
        let rhs_imm = if rhs_node.opcode == Isd::ConstI32 {
            rhs_node.imm_i64()
        } else {
            None
        };

        let op = match opcode {
            Isd::Add => pick(is_float, Rv64Op::FaddS, is32, Rv64Op::Addw, Rv64Op::Add),
            Isd::Sub => pick(is_float, Rv64Op::FsubS, is32, Rv64Op::Subw, Rv64Op::Sub),
            Isd::Mul => pick(is_float, Rv64Op::FmulS, is32, Rv64Op::Mulw, Rv64Op::Mul),
            Isd::Div => pick(is_float, Rv64Op::FdivS, is32, Rv64Op::Divw, Rv64Op::Div),
            Isd::Mod => {
                if is32 {
                    Rv64Op::Remw
                } else {
                    Rv64Op::Rem
                }
            }
            Isd::FAdd => Rv64Op::FaddS,
            Isd::FSub => Rv64Op::FsubS,
            Isd::FMul => Rv64Op::FmulS,
            Isd::FDiv => Rv64Op::FdivS,
            Isd::And => Rv64Op::And,
            Isd::Or => Rv64Op::Or,
            Isd::Xor => Rv64Op::Xor,
            Isd::Shl => Rv64Op::Sll,
            Isd::AShr => Rv64Op::Sra,
            Isd::LShr => Rv64Op::Srl,
            _ => {
                return Err(BackendError::Internal(format!(
                    "unexpected binary opcode {}",
                    opcode
                )))
            }
        };

        if let Some(imm) = rhs_imm {
            let iop = match op {
                Rv64Op::Add => Some(Rv64Op::Addi),
                Rv64Op::Addw => Some(Rv64Op::Addiw),
                Rv64Op::And => Some(Rv64Op::Andi),
                Rv64Op::Or => Some(Rv64Op::Ori),
                Rv64Op::Xor => Some(Rv64Op::Xori),
                Rv64Op::Sll => Some(if is32 { Rv64Op::Slliw } else { Rv64Op::Slli }),
                Rv64Op::Sra => Some(if is32 { Rv64Op::Sraiw } else { Rv64Op::Srai }),
                Rv64Op::Srl => Some(if is32 { Rv64Op::Srliw } else { Rv64Op::Srli }),
                _ => None,
            };
            if let Some(iop) = iop {
                if imm12(imm) {
                    block.push(MirInst::Target(Rv64Inst::i(iop, dst, lhs, imm)));
                    return Ok(());
                }
            }
            let tmp = self.get_vreg(lhs.ty);
            block.push(MirInst::Move {
                dst: tmp,
                src: MoveOperand::ImmI32(imm as i32),
            });
            block.push(MirInst::Target(Rv64Inst::r(op, dst, lhs, tmp)));
            return Ok(());
        }

        let rhs = self.get_operand_reg(dag, rhs_id, block)?;
        block.push(MirInst::Target(Rv64Inst::r(op, dst, lhs, rhs)));
        Ok(())
    }

    fn select_load(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let dst = self.node_vreg[&id];
        let addr_id = node.operands[1].node;
        let op = load_op(dst.ty);

        if let Some((base, off)) = self.select_address(dag, addr_id) {
            if let Some(fi) = self.base_frame_index(dag, base) {
                block.push(MirInst::Target(Rv64Inst::i_fi(op, dst, pr::sp(), fi, off)));
                return Ok(());
            }
            let base_reg = self.get_operand_reg(dag, base, block)?;
            self.push_load(op, dst, base_reg, off, block);
            return Ok(());
        }

        let addr = self.get_operand_reg(dag, addr_id, block)?;
        block.push(MirInst::Target(Rv64Inst::i(op, dst, addr, 0)));
        Ok(())
    }

    fn push_load(
        &mut self,
        op: Rv64Op,
        dst: Register,
        base: Register,
        off: i64,
        block: &mut MBlock<Rv64Inst>,
    ) {
        if imm12(off) {
            block.push(MirInst::Target(Rv64Inst::i(op, dst, base, off)));
            return;
        }
        let off_reg = self.get_vreg(DataType::I64);
        block.push(MirInst::Move {
            dst: off_reg,
            src: MoveOperand::ImmI32(off as i32),
        });
        let addr = self.get_vreg(DataType::I64);
        block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Add, addr, base, off_reg)));
        block.push(MirInst::Target(Rv64Inst::i(op, dst, addr, 0)));
    }

    fn select_store(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let val_id = node.operands[1].node;
        let addr_id = node.operands[2].node;
        let val = self.get_operand_reg(dag, val_id, block)?;
        let op = store_op(val.ty);

        if let Some((base, off)) = self.select_address(dag, addr_id) {
            if let Some(fi) = self.base_frame_index(dag, base) {
                block.push(MirInst::Target(Rv64Inst::s_fi(op, val, pr::sp(), fi, off)));
                return Ok(());
            }
            let base_reg = self.get_operand_reg(dag, base, block)?;
            if imm12(off) {
                block.push(MirInst::Target(Rv64Inst::s(op, val, base_reg, off)));
            } else {
                let off_reg = self.get_vreg(DataType::I64);
                block.push(MirInst::Move {
                    dst: off_reg,
                    src: MoveOperand::ImmI32(off as i32),
                });
                let addr = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(Rv64Inst::r(
                    Rv64Op::Add,
                    addr,
                    base_reg,
                    off_reg,
                )));
                block.push(MirInst::Target(Rv64Inst::s(op, val, addr, 0)));
            }
            return Ok(());
        }

        let addr = self.get_operand_reg(dag, addr_id, block)?;
        block.push(MirInst::Target(Rv64Inst::s(op, val, addr, 0)));
        Ok(())
    }

    fn select_icmp(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let cond = node
            .int_cond()
            .ok_or_else(|| BackendError::Internal("icmp without condition".into()))?;
        let dst = self.node_vreg[&id];
        let mut lhs = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let mut rhs = self.get_operand_reg(dag, node.operands[1].node, block)?;

        // Unsigned comparison of 32-bit values needs zero-extended inputs.
        if cond.is_unsigned() {
            if lhs.ty == DataType::I32 {
                let wide = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(Rv64Inst::r2(Rv64Op::ZextW, wide, lhs)));
                lhs = wide;
            }
            if rhs.ty == DataType::I32 {
                let wide = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(Rv64Inst::r2(Rv64Op::ZextW, wide, rhs)));
                rhs = wide;
            }
        }

        match cond {
            IntCond::Eq => {
                let tmp = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Xor, tmp, lhs, rhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Sltiu, dst, tmp, 1)));
            }
            IntCond::Ne => {
                let tmp = self.get_vreg(DataType::I64);
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Xor, tmp, lhs, rhs)));
                block.push(MirInst::Target(Rv64Inst::r(
                    Rv64Op::Sltu,
                    dst,
                    pr::zero(),
                    tmp,
                )));
            }
            IntCond::Slt => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Slt, dst, lhs, rhs)));
            }
            IntCond::Sgt => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Slt, dst, rhs, lhs)));
            }
            IntCond::Sge => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Slt, dst, lhs, rhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Xori, dst, dst, 1)));
            }
            IntCond::Sle => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Slt, dst, rhs, lhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Xori, dst, dst, 1)));
            }
            IntCond::Ult => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Sltu, dst, lhs, rhs)));
            }
            IntCond::Ugt => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Sltu, dst, rhs, lhs)));
            }
            IntCond::Uge => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Sltu, dst, lhs, rhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Xori, dst, dst, 1)));
            }
            IntCond::Ule => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::Sltu, dst, rhs, lhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Xori, dst, dst, 1)));
            }
        }
        Ok(())
    }

    fn select_fcmp(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let cond = node
            .float_cond()
            .ok_or_else(|| BackendError::Internal("fcmp without condition".into()))?;
        let dst = self.node_vreg[&id];
        let lhs = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let rhs = self.get_operand_reg(dag, node.operands[1].node, block)?;

        match cond {
            FloatCond::Eq => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FeqS, dst, lhs, rhs)));
            }
            FloatCond::Ne => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FeqS, dst, lhs, rhs)));
                block.push(MirInst::Target(Rv64Inst::i(Rv64Op::Xori, dst, dst, 1)));
            }
            FloatCond::Lt => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FltS, dst, lhs, rhs)));
            }
            FloatCond::Le => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FleS, dst, lhs, rhs)));
            }
            FloatCond::Gt => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FltS, dst, rhs, lhs)));
            }
            FloatCond::Ge => {
                block.push(MirInst::Target(Rv64Inst::r(Rv64Op::FleS, dst, rhs, lhs)));
            }
        }
        Ok(())
    }

    fn select_branch(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        if node.opcode == Isd::Br {
            let target = dag.node(node.operands[0].node).block_label().ok_or_else(|| {
                BackendError::Internal("br without label operand".into())
            })?;
            block.push(MirInst::Target(Rv64Inst::j(target)));
            return Ok(());
        }

        let cond = self.get_operand_reg(dag, node.operands[0].node, block)?;
        let t = dag.node(node.operands[1].node).block_label();
        let f = dag.node(node.operands[2].node).block_label();
        let (t, f) = match (t, f) {
            (Some(t), Some(f)) => (t, f),
            _ => return Err(BackendError::Internal("brcond without label operands".into())),
        };
        block.push(MirInst::Target(Rv64Inst::b(Rv64Op::Bne, cond, pr::zero(), t)));
        block.push(MirInst::Target(Rv64Inst::j(f)));
        Ok(())
    }

    fn select_call(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
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
                // Memory intrinsics carry trailing alignment/volatile
                // arguments the C library does not take.
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
                    moves.push((pr::f(pr::FA0 + float_used), reg));
                } else {
                    stack_args.push(reg);
                }
                float_used += 1;
            } else {
                if int_used < 8 {
                    moves.push((pr::x(pr::A0 + int_used), reg));
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
            let op = store_op(reg.ty);
            block.push(MirInst::Target(Rv64Inst::s(
                op,
                *reg,
                pr::sp(),
                8 * i as i64,
            )));
        }
        self.frame
            .update_outgoing_args_size(8 * stack_args.len() as u32);

        block.push(MirInst::Target(Rv64Inst::call(
            callee,
            int_used.min(8) as u8,
            float_used.min(8) as u8,
        )));
        self.has_call = true;

        if node.result_type(0).is_some_and(|t| t != DataType::Token) {
            let dst = self.node_vreg[&id];
            let src = if dst.ty.is_float() {
                pr::f(pr::FA0)
            } else {
                pr::x(pr::A0)
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
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        if node.operands.len() > 1 {
            let val_id = node.operands[1].node;
            let val = self.get_operand_reg(dag, val_id, block)?;
            let dst = if val.ty.is_float() {
                pr::f(pr::FA0)
            } else {
                pr::x(pr::A0)
            };
            block.push(MirInst::Move {
                dst,
                src: MoveOperand::Reg(val),
            });
        }
        block.push(MirInst::Target(Rv64Inst::ret()));
        Ok(())
    }

    fn select_cast(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
    ) -> Result<()> {
        let node = dag.node(id);
        let dst = self.node_vreg[&id];
        let src = self.get_operand_reg(dag, node.operands[0].node, block)?;
        match node.opcode {
            Isd::Zext => {
                if dst.ty == DataType::I64 && src.ty == DataType::I32 {
                    block.push(MirInst::Target(Rv64Inst::r2(Rv64Op::ZextW, dst, src)));
                } else {
                    // i1 -> i32: compare results are already 0/1.
                    block.push(MirInst::Move {
                        dst,
                        src: MoveOperand::Reg(src),
                    });
                }
            }
            Isd::Sitofp => {
                block.push(MirInst::Target(Rv64Inst::r2(Rv64Op::FcvtSW, dst, src)));
            }
            Isd::Fptosi => {
                block.push(MirInst::Target(Rv64Inst::r2(Rv64Op::FcvtWS, dst, src)));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn select_phi(
        &mut self,
        dag: &SelectionDag,
        id: SdNodeId,
        block: &mut MBlock<Rv64Inst>,
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
            // Constants stay immediates here: materializing them now would
            // place the load in the wrong block. The copies land on the
            // incoming edges during phi elimination.
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

fn pick(is_float: bool, fop: Rv64Op, is32: bool, wop: Rv64Op, op: Rv64Op) -> Rv64Op {
    if is_float {
        fop
    } else if is32 {
        wop
    } else {
        op
    }
}

pub(super) fn load_op(ty: DataType) -> Rv64Op {
    match ty {
        DataType::F32 => Rv64Op::Flw,
        DataType::F64 => Rv64Op::Fld,
        DataType::I64 | DataType::Ptr => Rv64Op::Ld,
        _ => Rv64Op::Lw,
    }
}

pub(super) fn store_op(ty: DataType) -> Rv64Op {
    match ty {
        DataType::F32 => Rv64Op::Fsw,
        DataType::F64 => Rv64Op::Fsd,
        DataType::I64 | DataType::Ptr => Rv64Op::Sd,
        _ => Rv64Op::Sw,
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
