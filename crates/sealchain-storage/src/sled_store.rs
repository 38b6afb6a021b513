use crate::StoreError;
use sealchain_core::{
    chain::{check_extends, ChainStore, StoredBlock},
    Block, LedgerError, Result,
};
use sled::{
    transaction::{ConflictableTransactionError, TransactionError},
    Db, IVec, Transactional, Tree,
};
use std::path::Path;
use tracing::{debug, info, warn};

const TREE_BLOCKS: &str = "blocks";
const TREE_META: &str = "meta";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";
const KEY_DIFFICULTY: &[u8] = b"difficulty";

/// Durable chain store. Blocks are kept as JSON under their big-endian index
/// so iteration order is chain order; the tail pointer and difficulty live in
/// a separate `meta` tree and are only ever written in the same transaction
/// as a block.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    blocks: Tree,
    meta: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> std::result::Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let store = Self::from_db(db)?;
        info!(path = %path.as_ref().display(), "sled store opened");
        Ok(store)
    }

    /// Store backed by a temporary directory removed on drop.
    pub fn open_temporary() -> std::result::Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> std::result::Result<Self, StoreError> {
        let blocks = db.open_tree(TREE_BLOCKS)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self { db, blocks, meta })
    }

    fn tip_height(&self) -> std::result::Result<Option<u64>, StoreError> {
        self.meta
            .get(KEY_TIP_HEIGHT)?
            .map(|v| decode_u64(&v, "tip_height"))
            .transpose()
    }

    /// Write block + tail pointer (+ difficulty for genesis) in one transaction.
    /// `check` runs inside the transaction against the current tail.
    fn commit<F>(&self, block: &Block, difficulty: Option<u32>, check: F) -> Result<()>
    where
        F: Fn(Option<(u64, &str)>) -> Result<()>,
    {
        let key = block.index.to_be_bytes();
        let bytes = serde_json::to_vec(block).map_err(StoreError::from)?;
        let height = block.index.to_be_bytes();

        let outcome = (&self.blocks, &self.meta).transaction(|(blocks, meta)| {
            let tip_height = meta.get(KEY_TIP_HEIGHT)?;
            let tip_hash = meta.get(KEY_TIP_HASH)?;
            let tip = match (&tip_height, &tip_hash) {
                (Some(h), Some(hash)) => {
                    let h = decode_u64(h, "tip_height")
                        .map_err(|e| ConflictableTransactionError::Abort(LedgerError::from(e)))?;
                    let hash = std::str::from_utf8(hash).map_err(|_| {
                        ConflictableTransactionError::Abort(LedgerError::from(
                            StoreError::CorruptMeta("tip_hash"),
                        ))
                    })?;
                    Some((h, hash))
                }
                _ => None,
            };
            check(tip).map_err(ConflictableTransactionError::Abort)?;

            blocks.insert(&key[..], bytes.as_slice())?;
            meta.insert(KEY_TIP_HEIGHT, &height[..])?;
            meta.insert(KEY_TIP_HASH, block.hash.as_bytes())?;
            if let Some(d) = difficulty {
                meta.insert(KEY_DIFFICULTY, &d.to_be_bytes()[..])?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(err)) => return Err(err),
            Err(TransactionError::Storage(err)) => return Err(StoreError::from(err).into()),
        }
        self.db.flush().map_err(StoreError::from)?;
        debug!(index = block.index, "block committed");
        Ok(())
    }
}

impl ChainStore for SledStore {
    fn put_genesis(&self, block: &Block, difficulty: u32) -> Result<()> {
        if block.index != 0 {
            return Err(LedgerError::OutOfOrder {
                expected: 0,
                got: block.index,
            });
        }
        self.commit(block, Some(difficulty), |tip| match tip {
            Some(_) => Err(LedgerError::GenesisExists),
            None => Ok(()),
        })
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        self.commit(block, None, |tip| check_extends(tip, block))
    }

    fn get_block(&self, index: u64) -> Result<Option<Block>> {
        let key = index.to_be_bytes();
        let opt = self.blocks.get(key).map_err(StoreError::from)?;
        opt.map(|ivec: IVec| decode_block(&ivec)).transpose()
    }

    fn tip(&self) -> Result<Option<Block>> {
        match self.tip_height()? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    fn block_count(&self) -> Result<u64> {
        Ok(self.tip_height()?.map(|h| h + 1).unwrap_or(0))
    }

    fn blocks(&self) -> Result<Vec<Block>> {
        self.blocks
            .iter()
            .values()
            .map(|v| decode_block(&v.map_err(StoreError::from)?))
            .collect()
    }

    fn stored_blocks(&self) -> Result<Vec<StoredBlock>> {
        self.blocks
            .iter()
            .map(|entry| -> Result<StoredBlock> {
                let (key, value) = entry.map_err(StoreError::from)?;
                let key: [u8; 8] = key.as_ref().try_into().map_err(|_| StoreError::BadBlockKey)?;
                let index = u64::from_be_bytes(key);
                Ok(match serde_json::from_slice(&value) {
                    Ok(block) => StoredBlock::Decoded(block),
                    Err(err) => {
                        warn!(index, %err, "stored block does not decode");
                        StoredBlock::Undecodable(index)
                    }
                })
            })
            .collect()
    }

    fn recent(&self, limit: usize) -> Result<Vec<Block>> {
        self.blocks
            .iter()
            .values()
            .rev()
            .take(limit)
            .map(|v| decode_block(&v.map_err(StoreError::from)?))
            .collect()
    }

    fn difficulty(&self) -> Result<Option<u32>> {
        let raw = self.meta.get(KEY_DIFFICULTY).map_err(StoreError::from)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let arr: [u8; 4] = raw
            .as_ref()
            .try_into()
            .map_err(|_| StoreError::CorruptMeta("difficulty"))?;
        Ok(Some(u32::from_be_bytes(arr)))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(StoreError::from)?;
        Ok(())
    }
}

fn decode_block(bytes: &[u8]) -> Result<Block> {
    Ok(serde_json::from_slice(bytes).map_err(StoreError::from)?)
}

fn decode_u64(bytes: &[u8], key: &'static str) -> std::result::Result<u64, StoreError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptMeta(key))?;
    Ok(u64::from_be_bytes(arr))
}
