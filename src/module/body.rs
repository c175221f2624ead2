use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::instruction::Instruction;
use super::types::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u16);

impl LocalId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub ty: TypeRef,
}

/// A straight-line run of instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block {
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn falls_through(&self) -> bool {
        self.instructions
            .last()
            .is_none_or(|instruction| !instruction.is_terminator())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("method body has no blocks")]
    Empty,
    #[error("block {block} branches to unknown block {target}")]
    UnknownBranchTarget { block: u32, target: u32 },
    #[error("control falls off the end of block {block}")]
    FallsOffEnd { block: u32 },
    #[error("layout names unknown block {block}")]
    UnknownLayoutBlock { block: u32 },
    #[error("block {block} appears {count} times in layout")]
    DuplicateLayout { block: u32, count: usize },
}

/// A method body as a graph of basic blocks.
///
/// Blocks live in an arena and are never renumbered; `layout` gives their
/// emission order. Branches name blocks, so inserting code anywhere keeps
/// every existing branch target valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    #[serde(default)]
    pub locals: Vec<LocalDef>,
    blocks: Vec<Block>,
    layout: Vec<BlockId>,
}

impl MethodBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// A body made of a single block.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let mut body = Self::new();
        body.push_block(Block::new(instructions));
        body
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// # Panics
    ///
    /// Panics if `id` was not allocated by this body.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.layout.iter().map(|id| (*id, self.block(*id)))
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks().map(|(_, block)| block.instructions.len()).sum()
    }

    pub fn add_local(&mut self, name: Option<String>, ty: TypeRef) -> LocalId {
        let id = LocalId(self.locals.len() as u16);
        self.locals.push(LocalDef { name, ty });
        id
    }

    pub fn local_named(&self, name: &str) -> Option<LocalId> {
        self.locals
            .iter()
            .position(|local| local.name.as_deref() == Some(name))
            .map(|index| LocalId(index as u16))
    }

    fn allocate(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn push_block(&mut self, block: Block) -> BlockId {
        let id = self.allocate(block);
        self.layout.push(id);
        id
    }

    /// Insert a block that becomes the new entry.
    pub fn insert_block_front(&mut self, block: Block) -> BlockId {
        let id = self.allocate(block);
        self.layout.insert(0, id);
        id
    }

    /// Insert a block directly after `after` in layout order.
    pub fn insert_block_after(&mut self, after: BlockId, block: Block) -> BlockId {
        let position = self
            .layout
            .iter()
            .position(|id| *id == after)
            .map_or(self.layout.len(), |index| index + 1);
        let id = self.allocate(block);
        self.layout.insert(position, id);
        id
    }

    /// Move the instructions of `block` from index `at` onwards into a new
    /// block placed right after it. The head falls through to the tail.
    pub fn split_block(&mut self, block: BlockId, at: usize) -> BlockId {
        let tail = self.block_mut(block).instructions.split_off(at);
        self.insert_block_after(block, Block::new(tail))
    }

    /// Every `ret` as `(block, index)`, in layout order.
    pub fn return_sites(&self) -> Vec<(BlockId, usize)> {
        self.blocks()
            .flat_map(|(id, block)| {
                block
                    .instructions
                    .iter()
                    .enumerate()
                    .filter(|(_, instruction)| instruction.is_return())
                    .map(move |(index, _)| (id, index))
            })
            .collect()
    }

    pub fn fallthrough(&self, block: BlockId) -> Option<BlockId> {
        let position = self.layout.iter().position(|id| *id == block)?;
        self.layout.get(position + 1).copied()
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let current = self.block(block);
        let mut successors: Vec<BlockId> = current
            .instructions
            .iter()
            .filter_map(Instruction::branch_target)
            .collect();
        if current.falls_through() {
            if let Some(next) = self.fallthrough(block) {
                successors.push(next);
            }
        }
        successors.dedup();
        successors
    }

    /// Every layout entry names an allocated block.
    pub fn check_layout(&self) -> Result<(), BodyError> {
        match self.layout.iter().find(|id| !self.contains_block(**id)) {
            Some(id) => Err(BodyError::UnknownLayoutBlock { block: id.0 }),
            None => Ok(()),
        }
    }

    pub fn validate(&self) -> Result<(), BodyError> {
        if self.layout.is_empty() {
            return Err(BodyError::Empty);
        }
        self.check_layout()?;
        let mut seen = vec![0usize; self.blocks.len()];
        for id in &self.layout {
            seen[id.0 as usize] += 1;
        }
        if let Some((index, count)) = seen.iter().enumerate().find(|(_, count)| **count > 1) {
            return Err(BodyError::DuplicateLayout {
                block: index as u32,
                count: *count,
            });
        }
        for (id, block) in self.blocks() {
            for target in block.instructions.iter().filter_map(Instruction::branch_target) {
                if !self.contains_block(target) || seen[target.0 as usize] == 0 {
                    return Err(BodyError::UnknownBranchTarget {
                        block: id.0,
                        target: target.0,
                    });
                }
            }
        }
        if let Some(last) = self.layout.last() {
            if self.block(*last).falls_through() {
                return Err(BodyError::FallsOffEnd { block: last.0 });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_exit_body() -> MethodBody {
        // if (arg0) return 1; return 2;
        let mut body = MethodBody::new();
        let entry = body.push_block(Block::default());
        let second = body.push_block(Block::new(vec![Instruction::LdcI4(2), Instruction::Ret]));
        body.block_mut(entry).instructions = vec![
            Instruction::Ldarg(0),
            Instruction::BrFalse(second),
            Instruction::LdcI4(1),
            Instruction::Ret,
        ];
        body
    }

    #[test]
    fn return_sites_follow_layout_order() {
        let body = two_exit_body();
        assert_eq!(body.return_sites(), vec![(BlockId(0), 3), (BlockId(1), 1)]);
        assert!(body.validate().is_ok());
    }

    #[test]
    fn inserting_front_keeps_branch_targets() {
        let mut body = two_exit_body();
        let prologue = body.insert_block_front(Block::new(vec![Instruction::Nop]));

        assert_eq!(body.entry(), Some(prologue));
        assert_eq!(body.successors(prologue), vec![BlockId(0)]);
        assert_eq!(body.successors(BlockId(0)), vec![BlockId(1)]);
        assert!(body.validate().is_ok());
    }

    #[test]
    fn split_block_moves_tail_after_head() {
        let mut body = two_exit_body();
        let tail = body.split_block(BlockId(0), 2);

        assert_eq!(body.layout(), &[BlockId(0), tail, BlockId(1)]);
        assert_eq!(body.block(tail).instructions, vec![Instruction::LdcI4(1), Instruction::Ret]);
        assert_eq!(body.successors(BlockId(0)), vec![BlockId(1), tail]);
        assert!(body.validate().is_ok());
    }

    #[test]
    fn validate_rejects_falling_off_the_end() {
        let body = MethodBody::from_instructions(vec![Instruction::LdcI4(1)]);
        assert_eq!(body.validate(), Err(BodyError::FallsOffEnd { block: 0 }));
    }

    #[test]
    fn validate_rejects_unknown_layout_entries() {
        let mut body = two_exit_body();
        body.layout.push(BlockId(5));
        assert_eq!(body.check_layout(), Err(BodyError::UnknownLayoutBlock { block: 5 }));
        assert_eq!(body.validate(), Err(BodyError::UnknownLayoutBlock { block: 5 }));
    }

    #[test]
    fn validate_rejects_unknown_targets() {
        let body = MethodBody::from_instructions(vec![Instruction::Br(BlockId(9))]);
        assert_eq!(
            body.validate(),
            Err(BodyError::UnknownBranchTarget { block: 0, target: 9 })
        );
    }
}
