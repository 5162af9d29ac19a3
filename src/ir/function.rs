//! Functions and basic blocks of the input IR.

use super::instruction::Inst;
use super::types::DataType;
use super::BlockId;
use indexmap::IndexMap;
use std::fmt;

/// Basic block: an ordered run of instructions ending in a terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Inst>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            insts: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|i| i.is_terminator())
    }

    pub fn has_terminator(&self) -> bool {
        self.terminator().is_some()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "b{}:", self.id)?;
        for inst in &self.insts {
            writeln!(f, "  {:?}", inst)?;
        }
        Ok(())
    }
}

/// IR function: an ordered map of blocks, the first being the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Parameters as `(virtual register id, type)`, in declaration order.
    pub params: Vec<(usize, DataType)>,
    pub ret_ty: Option<DataType>,
    pub blocks: IndexMap<BlockId, Block>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret_ty: None,
            blocks: IndexMap::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<(usize, DataType)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_return(mut self, ty: DataType) -> Self {
        self.ret_ty = Some(ty);
        self
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    pub fn entry_block(&self) -> Option<&Block> {
        self.blocks.values().next()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.insts.len()).sum()
    }

    /// Check that the function is well formed: non-empty, every block has a
    /// terminator, block ids are keyed consistently.
    pub fn validate(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err(format!("function '{}' has no blocks", self.name));
        }
        for (id, block) in &self.blocks {
            if *id != block.id {
                return Err(format!("block key {} does not match block id {}", id, block.id));
            }
            if !block.has_terminator() {
                return Err(format!("block b{} has no terminator", id));
            }
        }
        Ok(())
    }
}

/// Builder for IR functions, used mainly by tests and external front ends.
pub struct FunctionBuilder {
    function: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            function: Function::new(name),
            current: None,
        }
    }

    pub fn param(mut self, reg: usize, ty: DataType) -> Self {
        self.function.params.push((reg, ty));
        self
    }

    pub fn returns(mut self, ty: DataType) -> Self {
        self.function.ret_ty = Some(ty);
        self
    }

    /// Start a new block and make it current.
    pub fn block(mut self, id: BlockId) -> Self {
        self.function.add_block(Block::new(id));
        self.current = Some(id);
        self
    }

    pub fn inst(mut self, inst: Inst) -> Self {
        if let Some(id) = self.current {
            if let Some(block) = self.function.blocks.get_mut(&id) {
                block.push(inst);
            }
        }
        self
    }

    pub fn build(self) -> Function {
        self.function
    }
}
