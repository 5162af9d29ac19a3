//! Stack-frame bookkeeping for one machine function.
//!
//! Three disjoint regions are laid out bottom-up from the post-prologue
//! stack pointer:
//!
//! ```text
//!   sp + frame_size ─────────────────────── (callee-saved area, appended
//!                                            by stack lowering)
//!                    spill slots            (created by the allocator)
//!                    local objects          (one per alloca)
//!   sp + 0 ───────── outgoing argument area (max over call sites)
//! ```
//!
//! Incoming stack arguments live in the caller's frame; they are tracked
//! under negative frame indices and resolved against `sp + frame_size +
//! offset` once the final frame size is known.

use indexmap::IndexMap;

fn align_to(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameObject {
    size: u32,
    align: u32,
    offset: Option<u32>,
}

/// Frame layout state. Offsets become available after
/// [`FrameInfo::calculate_offsets`]; re-running it keeps earlier
/// assignments stable because objects are laid out in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    outgoing_args_size: u32,
    objects: IndexMap<i32, FrameObject>,
    spill_slots: IndexMap<i32, FrameObject>,
    incoming_args: IndexMap<i32, u32>,
    next_spill_index: i32,
}

impl FrameInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the outgoing argument area to at least `size` bytes.
    pub fn update_outgoing_args_size(&mut self, size: u32) {
        self.outgoing_args_size = self.outgoing_args_size.max(size);
    }

    pub fn outgoing_args_size(&self) -> u32 {
        self.outgoing_args_size
    }

    /// Register a local object (alloca) under its IR register id.
    pub fn add_object(&mut self, frame_index: i32, size: u32, align: u32) {
        debug_assert!(frame_index >= 0);
        self.objects.insert(
            frame_index,
            FrameObject {
                size,
                align: align.max(1),
                offset: None,
            },
        );
        self.next_spill_index = self.next_spill_index.max(frame_index + 1);
    }

    /// Create a fresh spill slot and return its frame index. Spill indices
    /// share the non-negative index space with objects but never collide.
    pub fn create_spill_slot(&mut self, size: u32, align: u32) -> i32 {
        let fi = self.next_spill_index;
        self.next_spill_index += 1;
        self.spill_slots.insert(
            fi,
            FrameObject {
                size,
                align: align.max(1),
                offset: None,
            },
        );
        fi
    }

    /// Record an incoming stack argument. `frame_index` must be negative;
    /// `offset` is the argument's offset inside the caller's outgoing area.
    pub fn add_incoming_arg(&mut self, frame_index: i32, offset: u32) {
        debug_assert!(frame_index < 0);
        self.incoming_args.insert(frame_index, offset);
    }

    /// Assign sp-relative offsets to every object and spill slot and return
    /// the local frame size (outgoing area + locals + spills, 16-aligned).
    pub fn calculate_offsets(&mut self) -> u32 {
        let mut cursor = self.outgoing_args_size;
        for obj in self.objects.values_mut() {
            cursor = align_to(cursor, obj.align);
            obj.offset = Some(cursor);
            cursor += obj.size;
        }
        for slot in self.spill_slots.values_mut() {
            cursor = align_to(cursor, slot.align);
            slot.offset = Some(cursor);
            cursor += slot.size;
        }
        align_to(cursor, 16)
    }

    /// Offset of a local object. Undefined (None) for negative indices and
    /// for spill slots.
    pub fn object_offset(&self, frame_index: i32) -> Option<u32> {
        self.objects.get(&frame_index).and_then(|o| o.offset)
    }

    pub fn spill_slot_offset(&self, frame_index: i32) -> Option<u32> {
        self.spill_slots.get(&frame_index).and_then(|o| o.offset)
    }

    /// Caller-frame offset of an incoming stack argument (negative index).
    pub fn incoming_arg_offset(&self, frame_index: i32) -> Option<u32> {
        self.incoming_args.get(&frame_index).copied()
    }

    pub fn spill_slot_count(&self) -> usize {
        self.spill_slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_regions_in_order() {
        let mut frame = FrameInfo::new();
        frame.update_outgoing_args_size(8);
        frame.add_object(10, 4, 4);
        frame.add_object(11, 16, 8);
        let spill = frame.create_spill_slot(8, 8);

        let size = frame.calculate_offsets();

        assert_eq!(frame.object_offset(10), Some(8));
        assert_eq!(frame.object_offset(11), Some(16));
        assert_eq!(frame.spill_slot_offset(spill), Some(32));
        assert_eq!(size % 16, 0);
        assert_eq!(size, 48);
    }

    #[test]
    fn test_spill_indices_do_not_collide_with_objects() {
        let mut frame = FrameInfo::new();
        frame.add_object(7, 4, 4);
        let s0 = frame.create_spill_slot(8, 8);
        let s1 = frame.create_spill_slot(8, 8);
        assert!(s0 > 7);
        assert_eq!(s1, s0 + 1);
        assert!(frame.object_offset(s0).is_none());
    }

    #[test]
    fn test_offsets_stable_across_recalculation() {
        let mut frame = FrameInfo::new();
        frame.add_object(0, 4, 4);
        frame.calculate_offsets();
        let before = frame.object_offset(0);

        // RA adds spill slots afterwards; locals must not move.
        frame.create_spill_slot(8, 8);
        frame.calculate_offsets();
        assert_eq!(frame.object_offset(0), before);
    }

    #[test]
    fn test_incoming_args_are_separate() {
        let mut frame = FrameInfo::new();
        frame.add_incoming_arg(-1, 0);
        frame.add_incoming_arg(-2, 8);
        assert_eq!(frame.incoming_arg_offset(-1), Some(0));
        assert_eq!(frame.incoming_arg_offset(-2), Some(8));
        assert_eq!(frame.object_offset(-1), None);
    }

    #[test]
    fn test_outgoing_area_only_grows() {
        let mut frame = FrameInfo::new();
        frame.update_outgoing_args_size(16);
        frame.update_outgoing_args_size(8);
        assert_eq!(frame.outgoing_args_size(), 16);
    }
}
