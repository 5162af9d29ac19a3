//! Linear-scan register allocation.
//!
//! Runs once per machine function, handling the integer and float register
//! classes independently, and speaks to the instruction set only through
//! the target adapter. The flow is the classic one:
//!
//! 1. number instructions globally and note call positions;
//! 2. per-block USE/DEF, then IN/OUT liveness to a fixed point;
//! 3. build live intervals by walking each block backwards;
//! 4. scan intervals in start order, expiring, assigning, or spilling the
//!    interval with the furthest end;
//! 5. rewrite the code, replacing assigned vregs and inserting
//!    reload/spill pseudos around uses and defs of spilled vregs.
//!
//! Intervals overlapping a call position prefer callee-saved registers so
//! their values survive the call without extra shuffling.

use crate::error::{BackendError, Result};
use crate::ir::BlockId;
use crate::mir::{MFunction, RegClass, Register};
use crate::target::{InstrAdapter, TargetRegInfo};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: i32,
    end: i32,
}

#[derive(Debug, Clone)]
struct Interval {
    vreg: Register,
    segs: Vec<Segment>,
    crosses_call: bool,
}

impl Interval {
    fn new(vreg: Register) -> Self {
        Self {
            vreg,
            segs: Vec::new(),
            crosses_call: false,
        }
    }

    fn start(&self) -> i32 {
        self.segs.first().map_or(0, |s| s.start)
    }

    fn end(&self) -> i32 {
        self.segs.last().map_or(0, |s| s.end)
    }

    fn live_at(&self, pos: i32) -> bool {
        for seg in &self.segs {
            if pos < seg.start {
                break;
            }
            if pos >= seg.start && pos < seg.end {
                return true;
            }
        }
        false
    }

    fn merge(&mut self) {
        if self.segs.len() <= 1 {
            return;
        }
        self.segs
            .sort_by_key(|s| (s.start, s.end));
        let mut out: Vec<Segment> = Vec::with_capacity(self.segs.len());
        for seg in self.segs.drain(..) {
            match out.last_mut() {
                Some(last) if seg.start <= last.end => {
                    last.end = last.end.max(seg.end);
                }
                _ => out.push(seg),
            }
        }
        self.segs = out;
    }
}

/// Allocate registers for `func`, inserting spill code where needed.
pub fn run<A, R>(func: &mut MFunction<A::Inst>, adapter: &A, reg_info: &R) -> Result<()>
where
    A: InstrAdapter,
    R: TargetRegInfo,
{
    // ---- 1. numbering -----------------------------------------------------
    let mut block_range: FxHashMap<BlockId, (i32, i32)> = FxHashMap::default();
    let mut call_points: BTreeSet<i32> = BTreeSet::new();
    let mut pos = 0i32;
    for (&bid, block) in &func.blocks {
        let start = pos;
        for inst in &block.insts {
            if adapter.is_call(inst) {
                call_points.insert(pos);
            }
            pos += 1;
        }
        block_range.insert(bid, (start, pos));
    }

    // ---- 2. USE/DEF and liveness ------------------------------------------
    let mut use_sets: FxHashMap<BlockId, FxHashSet<Register>> = FxHashMap::default();
    let mut def_sets: FxHashMap<BlockId, FxHashSet<Register>> = FxHashMap::default();
    for (&bid, block) in &func.blocks {
        let mut uses = FxHashSet::default();
        let mut defs = FxHashSet::default();
        for inst in &block.insts {
            for u in adapter.enum_uses(inst) {
                if !defs.contains(&u) {
                    uses.insert(u);
                }
            }
            for d in adapter.enum_defs(inst) {
                defs.insert(d);
            }
        }
        use_sets.insert(bid, uses);
        def_sets.insert(bid, defs);
    }

    let mut succs: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for (&bid, block) in &func.blocks {
        let mut out = Vec::new();
        for inst in &block.insts {
            if let Some(t) = adapter.branch_target(inst) {
                if func.blocks.contains_key(&t) && !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        succs.insert(bid, out);
    }

    let mut live_in: FxHashMap<BlockId, FxHashSet<Register>> = FxHashMap::default();
    let mut live_out: FxHashMap<BlockId, FxHashSet<Register>> = FxHashMap::default();
    let block_ids: Vec<BlockId> = func.blocks.keys().copied().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &bid in &block_ids {
            let mut new_out: FxHashSet<Register> = FxHashSet::default();
            for s in &succs[&bid] {
                if let Some(in_s) = live_in.get(s) {
                    new_out.extend(in_s.iter().copied());
                }
            }
            let mut new_in = use_sets[&bid].clone();
            for r in &new_out {
                if !def_sets[&bid].contains(r) {
                    new_in.insert(*r);
                }
            }
            if live_out.get(&bid) != Some(&new_out) || live_in.get(&bid) != Some(&new_in) {
                live_out.insert(bid, new_out);
                live_in.insert(bid, new_in);
                changed = true;
            }
        }
    }

    // ---- 3. live intervals ------------------------------------------------
    let mut intervals: FxHashMap<Register, Interval> = FxHashMap::default();
    for (&bid, block) in &func.blocks {
        let (block_start, block_end) = block_range[&bid];
        let mut open: FxHashMap<Register, usize> = FxHashMap::default();

        for r in &live_out[&bid] {
            if !r.is_virtual {
                continue;
            }
            let interval = intervals.entry(*r).or_insert_with(|| Interval::new(*r));
            interval.segs.push(Segment {
                start: block_end,
                end: block_end,
            });
            open.insert(*r, interval.segs.len() - 1);
        }

        let mut p = block_end - 1;
        for inst in block.insts.iter().rev() {
            for d in adapter.enum_defs(inst) {
                if !d.is_virtual {
                    continue;
                }
                if let Some(idx) = open.remove(&d) {
                    intervals.get_mut(&d).unwrap().segs[idx].start = p;
                }
            }
            for u in adapter.enum_uses(inst) {
                if !u.is_virtual {
                    continue;
                }
                match open.get(&u) {
                    None => {
                        let interval = intervals.entry(u).or_insert_with(|| Interval::new(u));
                        interval.segs.push(Segment { start: p, end: p + 1 });
                        open.insert(u, interval.segs.len() - 1);
                    }
                    Some(&idx) => {
                        intervals.get_mut(&u).unwrap().segs[idx].start = p;
                    }
                }
            }
            p -= 1;
        }

        for (r, idx) in open {
            intervals.get_mut(&r).unwrap().segs[idx].start = block_start;
        }
    }

    for interval in intervals.values_mut() {
        interval.merge();
    }

    if !call_points.is_empty() {
        for interval in intervals.values_mut() {
            for seg in &interval.segs {
                if call_points.range(seg.start..seg.end).next().is_some() {
                    interval.crosses_call = true;
                    break;
                }
            }
        }
    }

    // ---- 4. scan ----------------------------------------------------------
    let alloc_int = minus_reserved(reg_info.int_regs(), reg_info.reserved());
    let alloc_float = minus_reserved(reg_info.float_regs(), reg_info.reserved());

    let mut assigned: FxHashMap<Register, u32> = FxHashMap::default();
    let mut spill_fi: FxHashMap<Register, i32> = FxHashMap::default();

    let mut int_work: Vec<Register> = Vec::new();
    let mut float_work: Vec<Register> = Vec::new();
    for (r, interval) in &intervals {
        if interval.segs.is_empty() {
            continue;
        }
        match r.class() {
            RegClass::Int => int_work.push(*r),
            RegClass::Float => float_work.push(*r),
        }
    }

    {
        let frame = &mut func.frame;
        scan_class(
            int_work,
            &alloc_int,
            reg_info.callee_saved_int(),
            &intervals,
            &mut assigned,
            &mut spill_fi,
            frame,
        );
        scan_class(
            float_work,
            &alloc_float,
            reg_info.callee_saved_float(),
            &intervals,
            &mut assigned,
            &mut spill_fi,
            frame,
        );
    }

    debug!(
        "regalloc({}): {} intervals, {} assigned, {} spilled",
        func.name,
        intervals.len(),
        assigned.len(),
        spill_fi.len()
    );

    // ---- 5. rewrite -------------------------------------------------------
    let mut phys_int: FxHashMap<u32, Vec<Register>> = FxHashMap::default();
    let mut phys_float: FxHashMap<u32, Vec<Register>> = FxHashMap::default();
    for (vreg, &phys) in &assigned {
        match vreg.class() {
            RegClass::Int => phys_int.entry(phys).or_default().push(*vreg),
            RegClass::Float => phys_float.entry(phys).or_default().push(*vreg),
        }
    }

    let is_phys_live = |phys: u32, pos: i32, class: RegClass| -> bool {
        let map = match class {
            RegClass::Int => &phys_int,
            RegClass::Float => &phys_float,
        };
        map.get(&phys).is_some_and(|vregs| {
            vregs
                .iter()
                .any(|v| intervals.get(v).is_some_and(|i| i.live_at(pos)))
        })
    };

    let MFunction { blocks, frame, name, .. } = func;
    for (&bid, block) in blocks.iter_mut() {
        let (block_start, _) = block_range[&bid];
        let orig_len = block.len();
        let mut i = 0usize; // current index in the (mutating) block
        for k in 0..orig_len {
            let pos = block_start + k as i32;

            let uses = adapter.enum_uses(&block.insts[i]);
            let defs = adapter.enum_defs(&block.insts[i]);

            let mut forbidden: FxHashSet<u32> = adapter
                .enum_phys_regs(&block.insts[i])
                .iter()
                .map(|r| r.id)
                .collect();
            for r in uses.iter().chain(defs.iter()) {
                if let Some(&phys) = assigned.get(r) {
                    forbidden.insert(phys);
                }
            }

            let mut scratch_map: FxHashMap<Register, Register> = FxHashMap::default();
            let mut reloaded: FxHashSet<Register> = FxHashSet::default();
            let mut spilled_def: FxHashSet<Register> = FxHashSet::default();
            let mut spills_inserted = 0usize;

            for u in &uses {
                if !u.is_virtual {
                    continue;
                }
                if let Some(&phys) = assigned.get(u) {
                    adapter.replace_use(&mut block.insts[i], *u, u.with_phys_id(phys));
                    continue;
                }

                let scratch = match scratch_map.get(u) {
                    Some(&s) => s,
                    None => {
                        let s = pick_scratch(
                            *u,
                            pos,
                            &mut forbidden,
                            &alloc_int,
                            &alloc_float,
                            reg_info,
                            &is_phys_live,
                        )
                        .ok_or_else(|| {
                            BackendError::ResourceExhaustion(format!(
                                "no scratch register for reload of {} in {} at position {}",
                                u, name, pos
                            ))
                        })?;
                        scratch_map.insert(*u, s);
                        s
                    }
                };
                if !reloaded.contains(u) {
                    let fi = ensure_spill_slot(*u, &mut spill_fi, frame);
                    adapter.insert_reload_before(block, i, scratch, fi);
                    i += 1;
                    reloaded.insert(*u);
                    trace!("regalloc: reload {} from fi{} at {}", u, fi, pos);
                }
                adapter.replace_use(&mut block.insts[i], *u, scratch);
            }

            for d in &defs {
                if !d.is_virtual {
                    continue;
                }
                if let Some(&phys) = assigned.get(d) {
                    adapter.replace_def(&mut block.insts[i], *d, d.with_phys_id(phys));
                    continue;
                }

                let scratch = match scratch_map.get(d) {
                    Some(&s) => s,
                    None => {
                        let s = pick_scratch(
                            *d,
                            pos,
                            &mut forbidden,
                            &alloc_int,
                            &alloc_float,
                            reg_info,
                            &is_phys_live,
                        )
                        .ok_or_else(|| {
                            BackendError::ResourceExhaustion(format!(
                                "no scratch register for spill of {} in {} at position {}",
                                d, name, pos
                            ))
                        })?;
                        scratch_map.insert(*d, s);
                        s
                    }
                };
                adapter.replace_def(&mut block.insts[i], *d, scratch);
                if !spilled_def.contains(d) {
                    let fi = ensure_spill_slot(*d, &mut spill_fi, frame);
                    adapter.insert_spill_after(block, i + spills_inserted, scratch, fi);
                    spills_inserted += 1;
                    spilled_def.insert(*d);
                    trace!("regalloc: spill {} to fi{} at {}", d, fi, pos);
                }
            }

            i += 1 + spills_inserted;
        }
    }

    Ok(())
}

fn minus_reserved(all: &[u32], reserved: &[u32]) -> Vec<u32> {
    all.iter()
        .copied()
        .filter(|r| !reserved.contains(r))
        .collect()
}

fn ensure_spill_slot(
    r: Register,
    spill_fi: &mut FxHashMap<Register, i32>,
    frame: &mut crate::mir::FrameInfo,
) -> i32 {
    *spill_fi.entry(r).or_insert_with(|| {
        let size = r.ty.size_bytes().max(4);
        frame.create_spill_slot(size, size)
    })
}

/// Process one register class: sort by interval start, keep an active set,
/// and either assign a free register or spill the interval that ends last.
#[allow(clippy::too_many_arguments)]
fn scan_class(
    mut work: Vec<Register>,
    allocatable: &[u32],
    callee_saved: &[u32],
    intervals: &FxHashMap<Register, Interval>,
    assigned: &mut FxHashMap<Register, u32>,
    spill_fi: &mut FxHashMap<Register, i32>,
    frame: &mut crate::mir::FrameInfo,
) {
    if work.is_empty() {
        return;
    }
    work.sort_by_key(|r| {
        let itv = &intervals[r];
        (itv.start(), itv.end(), r.id)
    });

    let callee_only: Vec<u32> = allocatable
        .iter()
        .copied()
        .filter(|r| callee_saved.contains(r))
        .collect();
    let caller_first: Vec<u32> = allocatable
        .iter()
        .copied()
        .filter(|r| !callee_saved.contains(r))
        .chain(callee_only.iter().copied())
        .collect();

    let mut active: Vec<Register> = Vec::new();

    for cur in work {
        let cur_itv = &intervals[&cur];
        let start = cur_itv.start();
        active.retain(|r| intervals[r].end() > start);

        // Intervals live across a call must sit in callee-saved registers;
        // everything else prefers caller-saved to keep the saved set small.
        let order: &[u32] = if cur_itv.crosses_call {
            &callee_only
        } else {
            &caller_first
        };

        let chosen = order.iter().copied().find(|&r| {
            !active
                .iter()
                .any(|a| assigned.get(a).copied() == Some(r))
        });

        if let Some(phys) = chosen {
            assigned.insert(cur, phys);
            active.push(cur);
            continue;
        }

        // Spill the interval with the furthest end among the candidates.
        let mut victim = cur;
        let mut victim_end = cur_itv.end();
        for a in &active {
            let Some(&phys) = assigned.get(a) else { continue };
            if cur_itv.crosses_call && !callee_saved.contains(&phys) {
                continue;
            }
            let end = intervals[a].end();
            if end > victim_end {
                victim_end = end;
                victim = *a;
            }
        }

        if victim != cur {
            let phys = assigned.remove(&victim).unwrap();
            ensure_spill_slot(victim, spill_fi, frame);
            assigned.insert(cur, phys);
            active.retain(|r| *r != victim);
            active.push(cur);
        } else {
            ensure_spill_slot(cur, spill_fi, frame);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn pick_scratch<F>(
    vreg: Register,
    pos: i32,
    forbidden: &mut FxHashSet<u32>,
    alloc_int: &[u32],
    alloc_float: &[u32],
    reg_info: &impl TargetRegInfo,
    is_phys_live: &F,
) -> Option<Register>
where
    F: Fn(u32, i32, RegClass) -> bool,
{
    let class = vreg.class();
    let primary: &[u32] = match class {
        RegClass::Int => alloc_int,
        RegClass::Float => alloc_float,
    };
    let fallback: &[u32] = match class {
        RegClass::Int => reg_info.int_arg_regs(),
        RegClass::Float => reg_info.float_arg_regs(),
    };

    for &r in primary.iter().chain(fallback.iter()) {
        if forbidden.contains(&r) {
            continue;
        }
        if is_phys_live(r, pos, class) {
            continue;
        }
        forbidden.insert(r);
        return Some(Register::phys(r, vreg.ty));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataType;

    fn seg(start: i32, end: i32) -> Segment {
        Segment { start, end }
    }

    #[test]
    fn test_interval_merge_overlapping() {
        let mut itv = Interval::new(Register::vreg(0, DataType::I32));
        itv.segs = vec![seg(5, 9), seg(0, 3), seg(2, 6)];
        itv.merge();
        assert_eq!(itv.segs, vec![seg(0, 9)]);
    }

    #[test]
    fn test_interval_merge_disjoint() {
        let mut itv = Interval::new(Register::vreg(0, DataType::I32));
        itv.segs = vec![seg(10, 12), seg(0, 3)];
        itv.merge();
        assert_eq!(itv.segs, vec![seg(0, 3), seg(10, 12)]);
        assert_eq!(itv.start(), 0);
        assert_eq!(itv.end(), 12);
    }

    #[test]
    fn test_interval_live_at() {
        let mut itv = Interval::new(Register::vreg(0, DataType::I32));
        itv.segs = vec![seg(0, 3), seg(10, 12)];
        assert!(itv.live_at(0));
        assert!(itv.live_at(2));
        assert!(!itv.live_at(3));
        assert!(!itv.live_at(5));
        assert!(itv.live_at(10));
        assert!(!itv.live_at(12));
    }

    #[test]
    fn test_scan_prefers_caller_saved_without_calls() {
        let v0 = Register::vreg(0, DataType::I32);
        let mut intervals = FxHashMap::default();
        let mut itv = Interval::new(v0);
        itv.segs = vec![seg(0, 5)];
        intervals.insert(v0, itv);

        let mut assigned = FxHashMap::default();
        let mut spill_fi = FxHashMap::default();
        let mut frame = crate::mir::FrameInfo::new();
        // Allocatable: {6 caller, 9 callee}.
        scan_class(
            vec![v0],
            &[6, 9],
            &[9],
            &intervals,
            &mut assigned,
            &mut spill_fi,
            &mut frame,
        );
        assert_eq!(assigned.get(&v0), Some(&6));
    }

    #[test]
    fn test_scan_requires_callee_saved_across_call() {
        let v0 = Register::vreg(0, DataType::I32);
        let mut intervals = FxHashMap::default();
        let mut itv = Interval::new(v0);
        itv.segs = vec![seg(0, 5)];
        itv.crosses_call = true;
        intervals.insert(v0, itv);

        let mut assigned = FxHashMap::default();
        let mut spill_fi = FxHashMap::default();
        let mut frame = crate::mir::FrameInfo::new();
        scan_class(
            vec![v0],
            &[6, 9],
            &[9],
            &intervals,
            &mut assigned,
            &mut spill_fi,
            &mut frame,
        );
        assert_eq!(assigned.get(&v0), Some(&9));
    }

    #[test]
    fn test_scan_spills_furthest_end() {
        // One register, two overlapping intervals; the longer one loses it.
        let v0 = Register::vreg(0, DataType::I32);
        let v1 = Register::vreg(1, DataType::I32);
        let mut intervals = FxHashMap::default();
        let mut i0 = Interval::new(v0);
        i0.segs = vec![seg(0, 100)];
        intervals.insert(v0, i0);
        let mut i1 = Interval::new(v1);
        i1.segs = vec![seg(1, 10)];
        intervals.insert(v1, i1);

        let mut assigned = FxHashMap::default();
        let mut spill_fi = FxHashMap::default();
        let mut frame = crate::mir::FrameInfo::new();
        scan_class(
            vec![v0, v1],
            &[6],
            &[],
            &intervals,
            &mut assigned,
            &mut spill_fi,
            &mut frame,
        );
        assert_eq!(assigned.get(&v1), Some(&6), "short interval keeps the reg");
        assert!(assigned.get(&v0).is_none());
        assert!(spill_fi.contains_key(&v0));
        assert_eq!(frame.spill_slot_count(), 1);
    }

    #[test]
    fn test_already_allocated_function_is_noop() {
        // No virtual registers => no intervals => nothing to do. Covered
        // end-to-end in the integration tests; here we just check interval
        // collection ignores physical registers.
        let p = Register::phys(10, DataType::I32);
        assert!(!p.is_virtual);
    }
}
