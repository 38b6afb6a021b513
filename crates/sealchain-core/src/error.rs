use std::fmt;
use thiserror::Error;

/// Which check a block failed during chain validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFault {
    /// Stored index does not match the block's position in the chain.
    IndexGap,
    /// `previous_hash` does not equal the hash of the block before it
    /// (or the sentinel for genesis).
    BrokenLink,
    /// Recomputing the hash from the stored fields gives a different digest.
    HashMismatch,
    /// The stored hash does not carry enough leading zeros.
    DifficultyNotMet,
    /// The stored bytes no longer decode as a block.
    Undecodable,
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainFault::IndexGap => "index out of sequence",
            ChainFault::BrokenLink => "previous_hash does not link to prior block",
            ChainFault::HashMismatch => "stored hash does not match block contents",
            ChainFault::DifficultyNotMet => "hash does not satisfy difficulty",
            ChainFault::Undecodable => "stored bytes do not decode as a block",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    StorageIo(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("block {0} not found")]
    NotFound(u64),

    #[error("chain is empty; genesis has not been created")]
    EmptyChain,

    #[error("chain invalid at block {index}: {fault}")]
    InvalidAt { index: u64, fault: ChainFault },

    #[error("out-of-order write: expected block {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("ledger was sealed at difficulty {persisted}, configured difficulty is {configured}")]
    DifficultyMismatch { persisted: u32, configured: u32 },

    #[error("difficulty {0} is out of range (0..=64)")]
    InvalidDifficulty(u32),

    #[error("genesis block already exists")]
    GenesisExists,

    #[error("mining cancelled")]
    Cancelled,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl LedgerError {
    /// Wrap any backend error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LedgerError::StorageIo(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
