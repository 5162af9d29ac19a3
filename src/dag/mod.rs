//! SelectionDAG: the per-block graph IR instruction selection runs on.
//!
//! Nodes are interned by structure (opcode, result types, operand edges,
//! payload), so the graph is CSE'd by construction. Side-effecting nodes
//! are linearly ordered by a zero-width token chain.

pub mod builder;
pub mod graph;
pub mod node;

pub use builder::DagBuilder;
pub use graph::SelectionDag;
pub use node::{Isd, Payload, SdNode, SdNodeId, SdValue};
