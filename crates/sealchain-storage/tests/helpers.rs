use std::path::Path;
use std::sync::Arc;

use sealchain_core::{chain::Ledger, Block, LedgerConfig};
use sealchain_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const TEST_DIFFICULTY: u32 = 2;

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn open_ledger(path: &Path) -> anyhow::Result<Ledger<SledStore>> {
    let store = Arc::new(SledStore::open(path)?);
    Ok(Ledger::open(store, LedgerConfig::with_difficulty(TEST_DIFFICULTY))?)
}

/// Rewrite a stored block behind the ledger's back. The store must be closed.
pub fn tamper_block<F>(path: &Path, index: u64, edit: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Block),
{
    let db = sled::open(path)?;
    let blocks = db.open_tree("blocks")?;
    let key = index.to_be_bytes();
    let raw = blocks.get(key)?.expect("block to tamper with should exist");
    let mut block: Block = serde_json::from_slice(&raw)?;
    edit(&mut block);
    blocks.insert(key, serde_json::to_vec(&block)?)?;
    db.flush()?;
    Ok(())
}

/// Rewrite the raw stored bytes of a block. The store must be closed.
pub fn edit_block_bytes<F>(path: &Path, index: u64, edit: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Vec<u8>),
{
    let db = sled::open(path)?;
    let blocks = db.open_tree("blocks")?;
    let key = index.to_be_bytes();
    let mut raw = blocks.get(key)?.expect("block to corrupt should exist").to_vec();
    edit(&mut raw);
    blocks.insert(key, raw)?;
    db.flush()?;
    Ok(())
}
