//! Per-block SelectionDAG arena with structural node de-duplication.

use super::node::{Isd, Payload, PayloadKey, SdNode, SdNodeId, SdValue};
use crate::ir::instruction::{FloatCond, IntCond};
use crate::ir::DataType;
use rustc_hash::FxHashMap;

/// Interning key: two nodes with the same opcode, result types, operand
/// edges and payload are the same node.
#[derive(PartialEq, Eq, Hash)]
struct NodeKey {
    opcode: Isd,
    results: Vec<DataType>,
    operands: Vec<SdValue>,
    payload: PayloadKey,
}

/// A DAG of machine-neutral operations for a single basic block.
///
/// Nodes live in an arena and are referenced by index. Creation goes
/// through [`SelectionDag::node`], which interns structurally equal nodes,
/// so common subexpressions share one node by construction.
#[derive(Default)]
pub struct SelectionDag {
    nodes: Vec<SdNode>,
    interner: FxHashMap<NodeKey, SdNodeId>,
}

impl SelectionDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: SdNodeId) -> &SdNode {
        &self.nodes[id]
    }

    /// Iterate node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = SdNodeId> {
        0..self.nodes.len()
    }

    /// Create (or re-use) a node and return its first result.
    pub fn get_node(&mut self, opcode: Isd, results: Vec<DataType>, operands: Vec<SdValue>) -> SdValue {
        self.get_node_with(opcode, results, operands, Payload::None)
    }

    /// Create (or re-use) a node with a constant payload.
    pub fn get_node_with(
        &mut self,
        opcode: Isd,
        results: Vec<DataType>,
        operands: Vec<SdValue>,
        payload: Payload,
    ) -> SdValue {
        let key = NodeKey {
            opcode,
            results: results.clone(),
            operands: operands.clone(),
            payload: payload.key(),
        };
        if let Some(&id) = self.interner.get(&key) {
            return SdValue::new(id, 0);
        }
        let id = self.nodes.len();
        self.nodes.push(SdNode {
            opcode,
            results,
            operands,
            payload,
            ir_reg: None,
        });
        self.interner.insert(key, id);
        SdValue::new(id, 0)
    }

    /// Attach the defining SSA register to a node. Not part of structural
    /// identity; last writer wins, which matches one-def SSA input.
    pub fn set_ir_reg(&mut self, id: SdNodeId, reg: usize) {
        self.nodes[id].ir_reg = Some(reg);
    }

    pub fn get_constant_i32(&mut self, value: i64) -> SdValue {
        self.get_node_with(
            Isd::ConstI32,
            vec![DataType::I32],
            vec![],
            Payload::ImmI64(value),
        )
    }

    pub fn get_constant_i64(&mut self, value: i64) -> SdValue {
        self.get_node_with(
            Isd::ConstI64,
            vec![DataType::I64],
            vec![],
            Payload::ImmI64(value),
        )
    }

    pub fn get_constant_f32(&mut self, value: f32) -> SdValue {
        self.get_node_with(
            Isd::ConstF32,
            vec![DataType::F32],
            vec![],
            Payload::ImmF32(value),
        )
    }

    /// Placeholder for an SSA value defined in another block.
    pub fn get_reg_node(&mut self, reg: usize, ty: DataType) -> SdValue {
        let v = self.get_node(Isd::Reg, vec![ty], vec![]);
        self.set_ir_reg(v.node, reg);
        v
    }

    pub fn get_frame_index_node(&mut self, fi: i32) -> SdValue {
        self.get_node_with(
            Isd::FrameIndex,
            vec![DataType::I64],
            vec![],
            Payload::FrameIndex(fi),
        )
    }

    pub fn get_symbol_node(&mut self, name: &str) -> SdValue {
        self.get_node_with(
            Isd::Symbol,
            vec![DataType::Ptr],
            vec![],
            Payload::Symbol(name.to_string()),
        )
    }

    pub fn get_label_node(&mut self, block: u32) -> SdValue {
        self.get_node_with(Isd::Label, vec![], vec![], Payload::Block(block))
    }

    pub fn get_icmp(&mut self, cond: IntCond, lhs: SdValue, rhs: SdValue) -> SdValue {
        self.get_node_with(
            Isd::Icmp,
            vec![DataType::I32],
            vec![lhs, rhs],
            Payload::IntCond(cond),
        )
    }

    pub fn get_fcmp(&mut self, cond: FloatCond, lhs: SdValue, rhs: SdValue) -> SdValue {
        self.get_node_with(
            Isd::Fcmp,
            vec![DataType::I32],
            vec![lhs, rhs],
            Payload::FloatCond(cond),
        )
    }

    /// Check acyclicity. Operand edges always point at already-created
    /// nodes, so a simple index comparison suffices.
    pub fn is_acyclic(&self) -> bool {
        self.nodes
            .iter()
            .enumerate()
            .all(|(id, n)| n.operands.iter().all(|op| op.node < id))
    }

    /// Schedule: a topological order over all nodes, operands before
    /// users. Post-order DFS, visiting roots in creation order, so ties
    /// resolve to the builder's program order and chained side effects
    /// keep their sequence.
    pub fn schedule(&self) -> Vec<SdNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<(SdNodeId, usize)> = Vec::new();

        for root in self.node_ids() {
            if visited[root] {
                continue;
            }
            stack.push((root, 0));
            while let Some(&mut (id, ref mut next)) = stack.last_mut() {
                let ops = &self.nodes[id].operands;
                if *next < ops.len() {
                    let child = ops[*next].node;
                    *next += 1;
                    if !visited[child] {
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    if !visited[id] {
                        visited[id] = true;
                        order.push(id);
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cse_interning() {
        let mut dag = SelectionDag::new();
        let a = dag.get_constant_i32(7);
        let b = dag.get_constant_i32(7);
        assert_eq!(a, b);
        assert_eq!(dag.len(), 1);

        let c = dag.get_constant_i32(8);
        assert_ne!(a, c);
        assert_eq!(dag.len(), 2);
    }

    #[test]
    fn test_cse_covers_operands() {
        let mut dag = SelectionDag::new();
        let one = dag.get_constant_i32(1);
        let two = dag.get_constant_i32(2);
        let add1 = dag.get_node(Isd::Add, vec![DataType::I32], vec![one, two]);
        let add2 = dag.get_node(Isd::Add, vec![DataType::I32], vec![one, two]);
        let add3 = dag.get_node(Isd::Add, vec![DataType::I32], vec![two, one]);
        assert_eq!(add1, add2);
        assert_ne!(add1, add3, "operand order is part of identity");
    }

    #[test]
    fn test_cse_distinguishes_conditions() {
        let mut dag = SelectionDag::new();
        let one = dag.get_constant_i32(1);
        let two = dag.get_constant_i32(2);
        let lt = dag.get_icmp(IntCond::Slt, one, two);
        let gt = dag.get_icmp(IntCond::Sgt, one, two);
        assert_ne!(lt, gt);
    }

    #[test]
    fn test_ir_reg_not_part_of_identity() {
        let mut dag = SelectionDag::new();
        let a = dag.get_constant_i32(1);
        dag.set_ir_reg(a.node, 5);
        let b = dag.get_constant_i32(1);
        assert_eq!(a, b);
        assert_eq!(dag.node(b.node).ir_reg, Some(5));
    }

    #[test]
    fn test_acyclic_by_construction() {
        let mut dag = SelectionDag::new();
        let one = dag.get_constant_i32(1);
        let two = dag.get_constant_i32(2);
        dag.get_node(Isd::Add, vec![DataType::I32], vec![one, two]);
        assert!(dag.is_acyclic());
    }
}
