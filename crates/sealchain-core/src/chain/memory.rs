use super::{check_extends, ChainStore};
use crate::{
    error::{LedgerError, Result},
    Block,
};
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
struct State {
    blocks: Vec<Block>,
    difficulty: Option<u32>,
}

/// Non-durable store for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an existing chain as-is, without validating it.
    pub fn with_blocks(blocks: Vec<Block>, difficulty: u32) -> Self {
        Self {
            state: RwLock::new(State {
                blocks,
                difficulty: Some(difficulty),
            }),
        }
    }
}

impl ChainStore for MemoryStore {
    fn put_genesis(&self, block: &Block, difficulty: u32) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.blocks.is_empty() {
            return Err(LedgerError::GenesisExists);
        }
        if block.index != 0 {
            return Err(LedgerError::OutOfOrder {
                expected: 0,
                got: block.index,
            });
        }
        state.blocks.push(block.clone());
        state.difficulty = Some(difficulty);
        Ok(())
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let tip = state.blocks.last().map(|b| (b.index, b.hash.as_str()));
        check_extends(tip, block)?;
        state.blocks.push(block.clone());
        Ok(())
    }

    fn get_block(&self, index: u64) -> Result<Option<Block>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| state.blocks.get(i))
            .cloned())
    }

    fn tip(&self) -> Result<Option<Block>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.blocks.last().cloned())
    }

    fn block_count(&self) -> Result<u64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.blocks.len() as u64)
    }

    fn blocks(&self) -> Result<Vec<Block>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.blocks.clone())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Block>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.blocks.iter().rev().take(limit).cloned().collect())
    }

    fn difficulty(&self) -> Result<Option<u32>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.difficulty)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
