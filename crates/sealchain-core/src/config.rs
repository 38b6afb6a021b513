use crate::constants::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Per-ledger settings. The difficulty is written next to genesis the first
/// time a ledger is initialized and must match on every later open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub difficulty: u32,
    /// Search nonces on the rayon pool instead of the calling thread.
    pub parallel_mining: bool,
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::InvalidDifficulty(self.difficulty));
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            parallel_mining: true,
        }
    }
}
