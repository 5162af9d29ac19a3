//! Phi elimination.
//!
//! Phi nodes are resolved at edge granularity: every incoming value
//! becomes a copy on the corresponding predecessor edge. Copies on one
//! edge form a parallel-copy set and are sequentialized together; cycles
//! are broken through a fresh temporary. Edges out of a multi-successor
//! predecessor are split through a new block so copies cannot leak onto
//! sibling paths. Running the pass twice is the same as running it once:
//! the second run finds no phis.

use crate::ir::BlockId;
use crate::mir::{MBlock, MFunction, MirInst, MoveOperand, Register, VregAllocator};
use crate::target::InstrAdapter;
use log::debug;
use std::collections::BTreeMap;

pub fn run<A: InstrAdapter>(func: &mut MFunction<A::Inst>, adapter: &A) {
    // Copies keyed per edge, in phi order.
    let mut edge_copies: BTreeMap<(BlockId, BlockId), Vec<(Register, MoveOperand)>> =
        BTreeMap::new();
    for (&bid, block) in &func.blocks {
        for inst in &block.insts {
            if let MirInst::Phi { dst, incomings } = inst {
                for (pred, src) in incomings {
                    if func.blocks.contains_key(pred) {
                        edge_copies
                            .entry((*pred, bid))
                            .or_default()
                            .push((*dst, src.clone()));
                    }
                }
            }
        }
    }

    if edge_copies.is_empty() {
        return;
    }

    let successor_counts: BTreeMap<BlockId, usize> = func
        .blocks
        .iter()
        .map(|(&bid, block)| (bid, successors(block, adapter).len()))
        .collect();

    let mut next_id = func.next_block_id();
    let mut new_blocks: Vec<MBlock<A::Inst>> = Vec::new();

    for ((pred, succ), copies) in edge_copies {
        let moves = sequentialize(copies, &mut func.vregs);
        if moves.is_empty() {
            continue;
        }

        let needs_split = successor_counts.get(&pred).copied().unwrap_or(0) > 1;
        let pred_block = match func.blocks.get_mut(&pred) {
            Some(b) => b,
            None => continue,
        };

        if !needs_split {
            // Place copies just before the branch to the successor,
            // falling back to the block end.
            let at = branch_position(pred_block, succ, adapter).unwrap_or(pred_block.len());
            for (k, mv) in moves.into_iter().enumerate() {
                pred_block.insts.insert(at + k, mv);
            }
            continue;
        }

        // Critical edge: the copies go into a fresh block on the edge.
        let Some(at) = branch_position(pred_block, succ, adapter) else {
            continue;
        };
        let new_id = next_id;
        next_id += 1;

        adapter.retarget_branch(&mut pred_block.insts[at], succ, new_id);

        let mut edge_block = MBlock::new(new_id);
        for mv in moves {
            edge_block.push(mv);
        }
        edge_block.push(adapter.make_uncond_branch(succ));
        debug!(
            "phi-elim: split critical edge b{} -> b{} through b{}",
            pred, succ, new_id
        );
        new_blocks.push(edge_block);
    }

    for block in new_blocks {
        func.add_block(block);
    }

    for block in func.blocks.values_mut() {
        block.insts.retain(|inst| !inst.is_phi());
    }
}

fn successors<A: InstrAdapter>(block: &MBlock<A::Inst>, adapter: &A) -> Vec<BlockId> {
    let mut out = Vec::new();
    for inst in &block.insts {
        if let Some(target) = adapter.branch_target(inst) {
            if !out.contains(&target) {
                out.push(target);
            }
        }
    }
    out
}

fn branch_position<A: InstrAdapter>(
    block: &MBlock<A::Inst>,
    target: BlockId,
    adapter: &A,
) -> Option<usize> {
    block
        .insts
        .iter()
        .position(|inst| adapter.branch_target(inst) == Some(target))
}

/// Order a parallel-copy set. A copy may be emitted once no pending copy
/// still reads its destination; a remaining all-cyclic set is broken by
/// detouring one source through a fresh temporary.
fn sequentialize<I>(
    copies: Vec<(Register, MoveOperand)>,
    vregs: &mut VregAllocator,
) -> Vec<MirInst<I>> {
    let mut pending: Vec<(Register, MoveOperand)> = copies
        .into_iter()
        .filter(|(dst, src)| src.as_reg() != Some(dst))
        .collect();

    let mut moves = Vec::new();
    while !pending.is_empty() {
        let ready = pending.iter().position(|(dst, _)| {
            !pending.iter().any(|(_, src)| src.as_reg() == Some(dst))
        });
        if let Some(i) = ready {
            let (dst, src) = pending.remove(i);
            moves.push(MirInst::Move { dst, src });
            continue;
        }

        // Only cycles remain: detour one source through a temporary. The
        // redirected copy stays pending; copies reading its destination
        // drain first.
        let (dst, src) = pending[0].clone();
        let tmp = vregs.alloc(dst.ty);
        moves.push(MirInst::Move { dst: tmp, src });
        pending[0] = (dst, MoveOperand::Reg(tmp));
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataType;

    #[test]
    fn test_sequentialize_independent() {
        let mut vregs = VregAllocator::new();
        let r1 = Register::vreg(10, DataType::I32);
        let r2 = Register::vreg(11, DataType::I32);
        let moves: Vec<MirInst<()>> = sequentialize(
            vec![
                (r1, MoveOperand::ImmI32(1)),
                (r2, MoveOperand::Reg(Register::vreg(12, DataType::I32))),
            ],
            &mut vregs,
        );
        assert_eq!(moves.len(), 2);
        assert_eq!(vregs.count(), 0, "no temporary needed");
    }

    #[test]
    fn test_sequentialize_swap_cycle() {
        let mut vregs = VregAllocator::new();
        let r1 = Register::vreg(10, DataType::I32);
        let r2 = Register::vreg(11, DataType::I32);
        let moves: Vec<MirInst<()>> = sequentialize(
            vec![
                (r1, MoveOperand::Reg(r2)),
                (r2, MoveOperand::Reg(r1)),
            ],
            &mut vregs,
        );
        // tmp <- one side, then the two rotated copies.
        assert_eq!(moves.len(), 3);
        assert_eq!(vregs.count(), 1);

        // The temporary captures a value before anything is overwritten,
        // and the copy out of the detoured register runs before the copy
        // into it.
        match (&moves[0], &moves[1], &moves[2]) {
            (
                MirInst::Move { dst: tmp, src: first },
                MirInst::Move { dst: mid, .. },
                MirInst::Move { src: last, .. },
            ) => {
                assert!(*tmp != r1 && *tmp != r2);
                assert!(first.as_reg().is_some());
                assert!(*mid == r1 || *mid == r2);
                assert_eq!(last.as_reg(), Some(tmp));
            }
            _ => panic!("expected three moves"),
        }
    }

    #[test]
    fn test_sequentialize_chain_ordering() {
        // r1 <- r2, r2 <- 7: the copy out of r2 must go first.
        let mut vregs = VregAllocator::new();
        let r1 = Register::vreg(10, DataType::I32);
        let r2 = Register::vreg(11, DataType::I32);
        let moves: Vec<MirInst<()>> = sequentialize(
            vec![
                (r2, MoveOperand::ImmI32(7)),
                (r1, MoveOperand::Reg(r2)),
            ],
            &mut vregs,
        );
        assert_eq!(moves.len(), 2);
        match &moves[0] {
            MirInst::Move { dst, .. } => assert_eq!(*dst, r1),
            _ => panic!("expected move"),
        }
    }

    #[test]
    fn test_self_copy_dropped() {
        let mut vregs = VregAllocator::new();
        let r1 = Register::vreg(10, DataType::I32);
        let moves: Vec<MirInst<()>> =
            sequentialize(vec![(r1, MoveOperand::Reg(r1))], &mut vregs);
        assert!(moves.is_empty());
    }
}
