//! Basic block partitioning of one method's bytecode.

use std::collections::{BTreeMap, BTreeSet};

use cranelift_codegen::ir::Block;

use crate::classfile::CodeIterator;
use crate::error::{CompileError, CompileResult};

/// A contiguous bytecode range `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: u32,
    pub end: u32,
    block: Option<Block>,
}

impl BasicBlock {
    /// The backend block, once bound.
    pub fn block(&self) -> Option<Block> {
        self.block
    }
}

/// Blocks keyed by start offset.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    blocks: BTreeMap<u32, BasicBlock>,
    code_length: u32,
}

impl ControlFlowGraph {
    /// Partition the code behind `code` at offset 0 and at the target and
    /// fall-through of every branch. Leaves the cursor at the start.
    pub fn build(code: &mut CodeIterator) -> CompileResult<Self> {
        let code_length = code.code_length();
        if code_length == 0 {
            return Err(CompileError::bad_bytecode("method has no code"));
        }

        let mut leaders = BTreeSet::new();
        leaders.insert(0u32);
        code.reset();
        while let Some((address, instruction)) = code.next() {
            let Some(offset) = instruction.branch_offset() else {
                continue;
            };
            let target = i64::from(address) + i64::from(offset);
            if target < 0 {
                return Err(CompileError::bad_bytecode(format!(
                    "branch at offset {address} jumps before the start of the code"
                )));
            }
            leaders.insert(target as u32);
            leaders.insert(code.offset());
        }
        code.reset();

        let leaders: Vec<u32> = leaders.into_iter().filter(|&l| l < code_length).collect();
        let mut blocks = BTreeMap::new();
        for (i, &start) in leaders.iter().enumerate() {
            let end = leaders.get(i + 1).copied().unwrap_or(code_length);
            blocks.insert(start, BasicBlock { start, end, block: None });
        }
        log::trace!("partitioned {code_length} bytes of code into {} blocks", blocks.len());
        Ok(ControlFlowGraph { blocks, code_length })
    }

    pub fn code_length(&self) -> u32 {
        self.code_length
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[&0]
    }

    /// The block starting exactly at `offset`.
    pub fn get_block(&self, offset: u32) -> CompileResult<&BasicBlock> {
        self.blocks.get(&offset).ok_or_else(|| {
            CompileError::bad_bytecode(format!("no basic block starts at offset {offset}"))
        })
    }

    /// The backend block for the block starting at `offset`.
    pub fn backend_block(&self, offset: u32) -> CompileResult<Block> {
        self.get_block(offset)?.block.ok_or_else(|| {
            CompileError::bad_bytecode(format!("block at offset {offset} is not bound"))
        })
    }

    pub(crate) fn bind(&mut self, offset: u32, block: Block) -> CompileResult<()> {
        let entry = self.blocks.get_mut(&offset).ok_or_else(|| {
            CompileError::bad_bytecode(format!("no basic block starts at offset {offset}"))
        })?;
        entry.block = Some(block);
        Ok(())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block start offsets in ascending order.
    pub fn starts(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }
}
