//! Machine-IR functions and modules.

use super::block::MBlock;
use super::frame::FrameInfo;
use super::register::VregAllocator;
use crate::ir::{BlockId, GlobalVar};
use indexmap::IndexMap;

/// One function in machine form. Blocks stay in the input IR's order; the
/// first block is the entry.
#[derive(Debug, Clone)]
pub struct MFunction<I> {
    pub name: String,
    pub blocks: IndexMap<BlockId, MBlock<I>>,
    pub frame: FrameInfo,
    /// Final frame size in bytes, set by stack lowering.
    pub stack_size: u32,
    pub vregs: VregAllocator,
    /// True once any call instruction was selected into the body.
    pub has_call: bool,
}

impl<I> MFunction<I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: IndexMap::new(),
            frame: FrameInfo::new(),
            stack_size: 0,
            vregs: VregAllocator::new(),
            has_call: false,
        }
    }

    pub fn add_block(&mut self, block: MBlock<I>) {
        self.blocks.insert(block.id, block);
    }

    pub fn block(&self, id: BlockId) -> Option<&MBlock<I>> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut MBlock<I>> {
        self.blocks.get_mut(&id)
    }

    pub fn entry_block_id(&self) -> Option<BlockId> {
        self.blocks.keys().next().copied()
    }

    /// A block id larger than any in use, for pass-created blocks.
    pub fn next_block_id(&self) -> BlockId {
        self.blocks.keys().max().map_or(0, |id| id + 1)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.len()).sum()
    }
}

/// A lowered module: the globals pass through from the IR, the functions
/// are machine form.
#[derive(Debug, Clone, Default)]
pub struct MModule<I> {
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<MFunction<I>>,
}

impl<I> MModule<I> {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ids() {
        let mut func: MFunction<()> = MFunction::new("f");
        func.add_block(MBlock::new(0));
        func.add_block(MBlock::new(4));
        assert_eq!(func.entry_block_id(), Some(0));
        assert_eq!(func.next_block_id(), 5);
    }
}
