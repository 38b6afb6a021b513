//! Full-history integrity check.
//!
//! Every block, genesis included, is checked for position, linkage to its
//! predecessor, a hash that matches its stored fields, and the difficulty
//! predicate. The first failing block is reported.

use crate::{
    chain::StoredBlock,
    constants::GENESIS_PREVIOUS_HASH,
    error::{ChainFault, LedgerError, Result},
    pow::hex_meets_difficulty,
    Block,
};
use serde::{Deserialize, Serialize};

pub fn validate_chain(blocks: &[Block], difficulty: u32) -> Result<()> {
    let mut previous_hash = GENESIS_PREVIOUS_HASH;
    for (position, block) in blocks.iter().enumerate() {
        if let Some(fault) = check_block(block, position as u64, previous_hash, difficulty) {
            return Err(LedgerError::InvalidAt {
                index: position as u64,
                fault,
            });
        }
        previous_hash = &block.hash;
    }
    Ok(())
}

/// `validate_chain` over entries read back from a store. An entry that no
/// longer decodes fails at its position with `Undecodable`.
pub fn validate_stored(entries: &[StoredBlock], difficulty: u32) -> Result<()> {
    let mut previous_hash = GENESIS_PREVIOUS_HASH;
    for (position, entry) in entries.iter().enumerate() {
        let index = position as u64;
        let block = match entry {
            StoredBlock::Decoded(block) => block,
            StoredBlock::Undecodable(_) => {
                return Err(LedgerError::InvalidAt {
                    index,
                    fault: ChainFault::Undecodable,
                });
            }
        };
        if let Some(fault) = check_block(block, index, previous_hash, difficulty) {
            return Err(LedgerError::InvalidAt { index, fault });
        }
        previous_hash = &block.hash;
    }
    Ok(())
}

/// Checks one block against the hash it must link to.
pub fn check_block(
    block: &Block,
    expected_index: u64,
    expected_previous: &str,
    difficulty: u32,
) -> Option<ChainFault> {
    if block.index != expected_index {
        return Some(ChainFault::IndexGap);
    }
    if block.previous_hash != expected_previous {
        return Some(ChainFault::BrokenLink);
    }
    if block.compute_hash() != block.hash {
        return Some(ChainFault::HashMismatch);
    }
    if !hex_meets_difficulty(&block.hash, difficulty) {
        return Some(ChainFault::DifficultyNotMet);
    }
    None
}

/// Caller-facing outcome of a validation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ChainFault>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            invalid_at: None,
            reason: None,
        }
    }

    /// Folds a validator result into a report. Non-integrity errors are
    /// passed back to the caller.
    pub fn from_result(result: Result<()>) -> Result<Self> {
        match result {
            Ok(()) => Ok(Self::ok()),
            Err(LedgerError::InvalidAt { index, fault }) => Ok(Self {
                valid: false,
                invalid_at: Some(index),
                reason: Some(fault),
            }),
            Err(other) => Err(other),
        }
    }
}
