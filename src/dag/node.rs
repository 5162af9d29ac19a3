//! SelectionDAG node and value types.

use crate::ir::instruction::{FloatCond, IntCond};
use crate::ir::DataType;
use std::fmt;

/// Target-independent DAG opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isd {
    EntryToken,
    TokenFactor,
    ConstI32,
    ConstI64,
    ConstF32,
    FrameIndex,
    Symbol,
    Label,
    Reg,
    Copy,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    Icmp,
    Fcmp,
    Zext,
    Sitofp,
    Fptosi,
    Br,
    BrCond,
    Call,
    Ret,
    Phi,
}

impl fmt::Display for Isd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Index of a node inside its owning [`SelectionDag`](super::SelectionDag)
/// arena. Nodes have arena identity; structural equality is enforced by the
/// arena's interning map.
pub type SdNodeId = usize;

/// A specific result of a node: `(node, result index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdValue {
    pub node: SdNodeId,
    pub index: u32,
}

impl SdValue {
    pub fn new(node: SdNodeId, index: u32) -> Self {
        Self { node, index }
    }
}

/// Constant payloads a node may carry. These participate in structural
/// identity; the owning-IR-register link does not (it is attached after
/// interning).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    ImmI64(i64),
    ImmF32(f32),
    Symbol(String),
    FrameIndex(i32),
    /// Branch-target / phi-predecessor label.
    Block(u32),
    IntCond(IntCond),
    FloatCond(FloatCond),
}

impl Payload {
    /// Hashable projection. `f32` payloads hash through their bit pattern.
    pub(super) fn key(&self) -> PayloadKey {
        match self {
            Payload::None => PayloadKey::None,
            Payload::ImmI64(v) => PayloadKey::ImmI64(*v),
            Payload::ImmF32(v) => PayloadKey::ImmF32(v.to_bits()),
            Payload::Symbol(s) => PayloadKey::Symbol(s.clone()),
            Payload::FrameIndex(fi) => PayloadKey::FrameIndex(*fi),
            Payload::Block(id) => PayloadKey::Block(*id),
            Payload::IntCond(c) => PayloadKey::IntCond(*c),
            Payload::FloatCond(c) => PayloadKey::FloatCond(*c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum PayloadKey {
    None,
    ImmI64(i64),
    ImmF32(u32),
    Symbol(String),
    FrameIndex(i32),
    Block(u32),
    IntCond(IntCond),
    FloatCond(FloatCond),
}

/// A SelectionDAG node.
#[derive(Debug, Clone)]
pub struct SdNode {
    pub opcode: Isd,
    /// Result types; empty for pure side-effect roots, more than one for
    /// nodes that also produce a chain (e.g. `Load` is `(value, token)`).
    pub results: Vec<DataType>,
    /// Operand edges in order.
    pub operands: Vec<SdValue>,
    pub payload: Payload,
    /// SSA register this node's value originates from, when the DAG builder
    /// recorded one. Used by instruction selection to keep one vreg per SSA
    /// value across blocks.
    pub ir_reg: Option<usize>,
}

impl SdNode {
    pub fn result_type(&self, index: usize) -> Option<DataType> {
        self.results.get(index).copied()
    }

    pub fn imm_i64(&self) -> Option<i64> {
        match self.payload {
            Payload::ImmI64(v) => Some(v),
            _ => None,
        }
    }

    pub fn imm_f32(&self) -> Option<f32> {
        match self.payload {
            Payload::ImmF32(v) => Some(v),
            _ => None,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match &self.payload {
            Payload::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn frame_index(&self) -> Option<i32> {
        match self.payload {
            Payload::FrameIndex(fi) => Some(fi),
            _ => None,
        }
    }

    pub fn block_label(&self) -> Option<u32> {
        match self.payload {
            Payload::Block(id) => Some(id),
            _ => None,
        }
    }

    pub fn int_cond(&self) -> Option<IntCond> {
        match self.payload {
            Payload::IntCond(c) => Some(c),
            _ => None,
        }
    }

    pub fn float_cond(&self) -> Option<FloatCond> {
        match self.payload {
            Payload::FloatCond(c) => Some(c),
            _ => None,
        }
    }

    /// True for nodes that never produce code of their own: they are
    /// materialized by their users.
    pub fn is_leaf_like(&self) -> bool {
        matches!(
            self.opcode,
            Isd::Label
                | Isd::Symbol
                | Isd::ConstI32
                | Isd::ConstI64
                | Isd::ConstF32
                | Isd::FrameIndex
                | Isd::Reg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let node = SdNode {
            opcode: Isd::ConstI32,
            results: vec![DataType::I32],
            operands: vec![],
            payload: Payload::ImmI64(42),
            ir_reg: None,
        };
        assert_eq!(node.imm_i64(), Some(42));
        assert_eq!(node.symbol(), None);
        assert!(node.is_leaf_like());
    }

    #[test]
    fn test_payload_key_distinguishes_float_bits() {
        assert_ne!(
            Payload::ImmF32(0.0).key(),
            Payload::ImmF32(-0.0).key(),
            "float payloads are compared bit-exactly"
        );
    }
}
