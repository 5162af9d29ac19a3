//! IR block → SelectionDAG construction.
//!
//! One DAG is built per basic block. A value map keeps repeated uses of an
//! SSA register on the same node; values defined in other blocks appear as
//! `Reg` placeholder nodes carrying the SSA register id. A chain value,
//! starting at `EntryToken`, is threaded through every side-effecting node
//! and encodes the only thing the scheduler must preserve about them:
//! their order.

use super::graph::SelectionDag;
use super::node::{Isd, SdValue};
use crate::error::{BackendError, Result};
use crate::ir::instruction::{ArithOp, Inst, Operand};
use crate::ir::{Block, DataType};
use rustc_hash::FxHashMap;

pub struct DagBuilder {
    value_map: FxHashMap<usize, SdValue>,
    chain: SdValue,
}

impl DagBuilder {
    /// Build the DAG for one basic block.
    pub fn build_block(block: &Block) -> Result<SelectionDag> {
        let mut dag = SelectionDag::new();
        let chain = dag.get_node(Isd::EntryToken, vec![DataType::Token], vec![]);
        let mut builder = DagBuilder {
            value_map: FxHashMap::default(),
            chain,
        };
        for inst in &block.insts {
            builder.visit(inst, &mut dag)?;
        }
        Ok(dag)
    }

    /// DAG value for an IR operand. `ty` is the type the using instruction
    /// expects; it matters only for registers not yet seen in this block.
    fn get_value(&mut self, op: &Operand, dag: &mut SelectionDag, ty: DataType) -> SdValue {
        match op {
            Operand::Reg(id) => {
                if let Some(&v) = self.value_map.get(id) {
                    return v;
                }
                let v = dag.get_reg_node(*id, ty);
                self.value_map.insert(*id, v);
                v
            }
            Operand::ImmI32(v) => dag.get_constant_i32(*v as i64),
            Operand::ImmF32(v) => dag.get_constant_f32(*v),
            Operand::Global(name) => dag.get_symbol_node(name),
        }
    }

    fn set_def(&mut self, res: usize, val: SdValue, dag: &mut SelectionDag) {
        self.value_map.insert(res, val);
        dag.set_ir_reg(val.node, res);
    }

    fn map_arith(op: ArithOp) -> Isd {
        match op {
            ArithOp::Add => Isd::Add,
            ArithOp::Sub => Isd::Sub,
            ArithOp::Mul => Isd::Mul,
            ArithOp::Div => Isd::Div,
            ArithOp::Mod => Isd::Mod,
            ArithOp::And => Isd::And,
            ArithOp::Or => Isd::Or,
            ArithOp::Xor => Isd::Xor,
            ArithOp::Shl => Isd::Shl,
            ArithOp::AShr => Isd::AShr,
            ArithOp::LShr => Isd::LShr,
            ArithOp::FAdd => Isd::FAdd,
            ArithOp::FSub => Isd::FSub,
            ArithOp::FMul => Isd::FMul,
            ArithOp::FDiv => Isd::FDiv,
        }
    }

    fn visit(&mut self, inst: &Inst, dag: &mut SelectionDag) -> Result<()> {
        match inst {
            Inst::Alloca { res, .. } => {
                // The frame slot is registered with FrameInfo during isel;
                // here the object is just a frame-index leaf.
                let v = dag.get_frame_index_node(*res as i32);
                dag.set_ir_reg(v.node, *res);
                self.value_map.insert(*res, v);
            }

            Inst::Load { res, ty, ptr } => {
                let ptr = self.get_value(ptr, dag, DataType::Ptr);
                // LOAD: (chain, addr) -> (value, chain)
                let node = dag.get_node(Isd::Load, vec![*ty, DataType::Token], vec![self.chain, ptr]);
                self.set_def(*res, SdValue::new(node.node, 0), dag);
                self.chain = SdValue::new(node.node, 1);
            }

            Inst::Store { ty, val, ptr } => {
                let val = self.get_value(val, dag, *ty);
                let ptr = self.get_value(ptr, dag, DataType::Ptr);
                let node = dag.get_node(
                    Isd::Store,
                    vec![DataType::Token],
                    vec![self.chain, val, ptr],
                );
                self.chain = node;
            }

            Inst::Binary { op, ty, res, lhs, rhs } => {
                let lhs = self.get_value(lhs, dag, *ty);
                let rhs = self.get_value(rhs, dag, *ty);
                let node = dag.get_node(Self::map_arith(*op), vec![*ty], vec![lhs, rhs]);
                self.set_def(*res, node, dag);
            }

            Inst::Icmp { cond, res, lhs, rhs } => {
                let lhs = self.get_value(lhs, dag, DataType::I32);
                let rhs = self.get_value(rhs, dag, DataType::I32);
                let node = dag.get_icmp(*cond, lhs, rhs);
                self.set_def(*res, node, dag);
            }

            Inst::Fcmp { cond, res, lhs, rhs } => {
                let lhs = self.get_value(lhs, dag, DataType::F32);
                let rhs = self.get_value(rhs, dag, DataType::F32);
                let node = dag.get_fcmp(*cond, lhs, rhs);
                self.set_def(*res, node, dag);
            }

            Inst::Gep {
                res,
                base,
                elem_ty,
                dims,
                indices,
            } => {
                let node = self.build_gep(dag, base, *elem_ty, dims, indices)?;
                self.set_def(*res, node, dag);
            }

            Inst::Zext { res, to, src, .. } => {
                let src = self.get_value(src, dag, DataType::I32);
                let node = dag.get_node(Isd::Zext, vec![*to], vec![src]);
                self.set_def(*res, node, dag);
            }

            Inst::Sitofp { res, to, src } => {
                let src = self.get_value(src, dag, DataType::I32);
                let node = dag.get_node(Isd::Sitofp, vec![*to], vec![src]);
                self.set_def(*res, node, dag);
            }

            Inst::Fptosi { res, to, src } => {
                let src = self.get_value(src, dag, DataType::F32);
                let node = dag.get_node(Isd::Fptosi, vec![*to], vec![src]);
                self.set_def(*res, node, dag);
            }

            Inst::Br { target } => {
                let label = dag.get_label_node(*target);
                dag.get_node(Isd::Br, vec![], vec![label]);
            }

            Inst::BrCond {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.get_value(cond, dag, DataType::I32);
                let t = dag.get_label_node(*if_true);
                let f = dag.get_label_node(*if_false);
                dag.get_node(Isd::BrCond, vec![], vec![cond, t, f]);
            }

            Inst::Call {
                res,
                ret_ty,
                callee,
                args,
            } => {
                let mut ops = vec![self.chain];
                ops.push(dag.get_symbol_node(callee));
                for (arg, ty) in args {
                    let v = self.get_value(arg, dag, *ty);
                    ops.push(v);
                }
                let mut results = Vec::new();
                if let Some(ty) = ret_ty {
                    results.push(*ty);
                }
                results.push(DataType::Token);
                let chain_index = (results.len() - 1) as u32;
                let node = dag.get_node(Isd::Call, results, ops);
                if let (Some(res), Some(_)) = (res, ret_ty) {
                    self.set_def(*res, SdValue::new(node.node, 0), dag);
                }
                self.chain = SdValue::new(node.node, chain_index);
            }

            Inst::Ret { ty, value } => {
                let mut ops = vec![self.chain];
                if let Some(value) = value {
                    let ty = ty.unwrap_or(DataType::I32);
                    ops.push(self.get_value(value, dag, ty));
                }
                dag.get_node(Isd::Ret, vec![], ops);
            }

            Inst::Phi { res, ty, incomings } => {
                let mut ops = Vec::with_capacity(incomings.len() * 2);
                for (pred, val) in incomings {
                    ops.push(dag.get_label_node(*pred));
                    ops.push(self.get_value(val, dag, *ty));
                }
                let node = dag.get_node(Isd::Phi, vec![*ty], ops);
                self.set_def(*res, node, dag);
            }
        }
        Ok(())
    }

    /// GEP becomes explicit address arithmetic: each index is widened to
    /// i64, scaled by its stride in bytes and added to the base. Constant
    /// indices fold into a single trailing constant so memory users can
    /// absorb the offset into their immediate field.
    fn build_gep(
        &mut self,
        dag: &mut SelectionDag,
        base: &Operand,
        elem_ty: DataType,
        dims: &[u32],
        indices: &[Operand],
    ) -> Result<SdValue> {
        if indices.len() > dims.len() + 1 {
            return Err(BackendError::InvalidIr(format!(
                "gep has {} indices for {} dims",
                indices.len(),
                dims.len()
            )));
        }

        let elem_size = elem_ty.size_bytes() as i64;
        let mut addr = self.get_value(base, dag, DataType::Ptr);
        let mut const_off: i64 = 0;

        for (j, idx) in indices.iter().enumerate() {
            let stride_elems: i64 = dims.iter().skip(j + 1).map(|d| *d as i64).product();
            let stride_bytes = stride_elems * elem_size;

            if let Operand::ImmI32(v) = idx {
                const_off += *v as i64 * stride_bytes;
                continue;
            }

            let idx = self.get_value(idx, dag, DataType::I32);
            let wide = dag.get_node(Isd::Zext, vec![DataType::I64], vec![idx]);
            let scaled = if stride_bytes == 1 {
                wide
            } else if stride_bytes.count_ones() == 1 {
                let shamt = dag.get_constant_i64(stride_bytes.trailing_zeros() as i64);
                dag.get_node(Isd::Shl, vec![DataType::I64], vec![wide, shamt])
            } else {
                let factor = dag.get_constant_i64(stride_bytes);
                dag.get_node(Isd::Mul, vec![DataType::I64], vec![wide, factor])
            };
            addr = dag.get_node(Isd::Add, vec![DataType::Ptr], vec![addr, scaled]);
        }

        if const_off != 0 {
            let off = dag.get_constant_i64(const_off);
            addr = dag.get_node(Isd::Add, vec![DataType::Ptr], vec![addr, off]);
        }
        Ok(addr)
    }
}
