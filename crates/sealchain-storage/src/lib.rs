pub mod sled_store;

use sealchain_core::LedgerError;
use thiserror::Error;

pub use sled_store::SledStore;

/// Backend-level failures. Surfaced to ledger callers as `LedgerError::StorageIo`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("block encoding: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt metadata under key `{0}`")]
    CorruptMeta(&'static str),

    #[error("block key is not an 8-byte index")]
    BadBlockKey,
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::storage(err)
    }
}
