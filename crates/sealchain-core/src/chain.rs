pub mod memory;

use crate::{
    config::LedgerConfig,
    constants::{COMPLAINT_PAYLOAD_TYPE, GENESIS_MESSAGE, GENESIS_PREVIOUS_HASH, GENESIS_VERSION},
    error::{ChainFault, LedgerError, Result},
    mine::seal_parallel,
    pow::{self, CancelToken, Seal},
    validate::{validate_chain, validate_stored, ValidationReport},
    Block, Candidate,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{info, warn};

/// Persistence backend for the ledger.
/// This lives in `sealchain-core` to avoid a circular dependency.
///
/// Implementations must make `put_genesis` and `put_block` atomic: either the
/// block, the tail pointer (and for genesis the difficulty) are all written,
/// or nothing is.
pub trait ChainStore: Send + Sync {
    /// Write block 0 together with the difficulty the chain is sealed at.
    fn put_genesis(&self, block: &Block, difficulty: u32) -> Result<()>;
    /// Append a block on top of the current tail. Rejects anything that does
    /// not extend the tail by exactly one.
    fn put_block(&self, block: &Block) -> Result<()>;
    fn get_block(&self, index: u64) -> Result<Option<Block>>;
    fn tip(&self) -> Result<Option<Block>>;
    fn block_count(&self) -> Result<u64>;
    /// Every block, ascending by index.
    fn blocks(&self) -> Result<Vec<Block>>;
    /// Like `blocks`, but an entry whose bytes no longer decode is returned
    /// as `Undecodable` instead of failing the whole read.
    fn stored_blocks(&self) -> Result<Vec<StoredBlock>> {
        Ok(self.blocks()?.into_iter().map(StoredBlock::Decoded).collect())
    }
    /// Up to `limit` blocks, highest index first.
    fn recent(&self, limit: usize) -> Result<Vec<Block>>;
    fn difficulty(&self) -> Result<Option<u32>>;
    fn flush(&self) -> Result<()>;
}

/// One entry as read back from a store.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredBlock {
    Decoded(Block),
    /// Key of an entry that is present but unreadable.
    Undecodable(u64),
}

impl StoredBlock {
    pub fn into_block(self) -> Option<Block> {
        match self {
            StoredBlock::Decoded(block) => Some(block),
            StoredBlock::Undecodable(_) => None,
        }
    }
}

/// Does `block` extend the tail `(index, hash)` by exactly one? Backends
/// call this inside their write before touching anything.
pub fn check_extends(tip: Option<(u64, &str)>, block: &Block) -> Result<()> {
    let (tip_index, tip_hash) = tip.ok_or(LedgerError::EmptyChain)?;
    let expected = tip_index + 1;
    if block.index != expected {
        return Err(LedgerError::OutOfOrder {
            expected,
            got: block.index,
        });
    }
    if block.previous_hash != tip_hash {
        return Err(LedgerError::InvalidAt {
            index: block.index,
            fault: ChainFault::BrokenLink,
        });
    }
    Ok(())
}

/// Summary used by dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub total_blocks: u64,
    pub last_hash: String,
    pub last_index: u64,
    pub difficulty: u32,
    pub valid: bool,
}

/// Portable copy of a chain, used for backups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainExport {
    pub difficulty: u32,
    pub blocks: Vec<Block>,
}

/// Single-writer ledger over a `ChainStore`.
///
/// Appends are serialized by an exclusive lock held from reading the tail
/// until the sealed block is persisted. The store write itself happens under
/// a commit lock that whole-chain reads share, so validation never sees a
/// half-written tail while mining does not block readers.
pub struct Ledger<S: ChainStore> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    store: Arc<S>,
    config: LedgerConfig,
    append_lock: Mutex<()>,
    commit: RwLock<()>,
    validity: Mutex<Option<bool>>,
}

impl<S: ChainStore> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ChainStore> Ledger<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config,
                append_lock: Mutex::new(()),
                commit: RwLock::new(()),
                validity: Mutex::new(None),
            }),
        })
    }

    /// Build a ledger and make sure genesis exists.
    pub fn open(store: Arc<S>, config: LedgerConfig) -> Result<Self> {
        let ledger = Self::new(store, config)?;
        ledger.initialize()?;
        Ok(ledger)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    pub fn difficulty(&self) -> u32 {
        self.inner.config.difficulty
    }

    /// Ensure a genesis block exists. Idempotent.
    ///
    /// On an existing chain the persisted difficulty must equal the configured
    /// one; a chain is never re-sealed or re-interpreted at another difficulty.
    pub fn initialize(&self) -> Result<Block> {
        let _append = lock(&self.inner.append_lock);
        let difficulty = self.difficulty();

        // existence comes from the tail pointer so a chain whose genesis bytes
        // are unreadable is never sealed over
        if self.inner.store.block_count()? > 0 {
            match self.inner.store.difficulty()? {
                Some(persisted) if persisted != difficulty => {
                    return Err(LedgerError::DifficultyMismatch {
                        persisted,
                        configured: difficulty,
                    });
                }
                Some(_) => {}
                None => warn!(difficulty, "store has no recorded difficulty; using configured value"),
            }
            return self.get_block(0);
        }

        let candidate = genesis_candidate();
        let seal = self.seal(&candidate, &CancelToken::new())?;
        let genesis = candidate.into_block(seal);
        {
            let _commit = write(&self.inner.commit);
            self.inner.store.put_genesis(&genesis, difficulty)?;
            *lock(&self.inner.validity) = None;
        }
        info!(difficulty, hash = %genesis.hash, "genesis block created");
        Ok(genesis)
    }

    pub fn get_last_block(&self) -> Result<Block> {
        self.inner.store.tip()?.ok_or(LedgerError::EmptyChain)
    }

    /// Seal `payload` onto the tail and persist it.
    ///
    /// This runs the proof-of-work search and blocks the calling thread until
    /// a nonce is found; expected cost grows as 16^difficulty. Async callers
    /// should run it on a blocking worker.
    pub fn append(&self, payload: Value) -> Result<Block> {
        self.append_with_cancel(payload, &CancelToken::new())
    }

    /// As `append`, but gives up with `Cancelled` once `cancel` fires. Nothing
    /// is written for a cancelled append.
    pub fn append_with_cancel(&self, payload: Value, cancel: &CancelToken) -> Result<Block> {
        let _append = lock(&self.inner.append_lock);

        let tail = self.get_last_block()?;
        let candidate = Candidate::new(tail.index + 1, tail.hash, payload);
        let seal = self.seal(&candidate, cancel)?;
        let block = candidate.into_block(seal);

        {
            let _commit = write(&self.inner.commit);
            self.inner.store.put_block(&block)?;
            *lock(&self.inner.validity) = None;
        }
        info!(index = block.index, nonce = block.nonce, hash = %block.hash, "block sealed");
        Ok(block)
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        self.inner
            .store
            .get_block(index)?
            .ok_or(LedgerError::NotFound(index))
    }

    /// Most recent first.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<Block>> {
        self.inner.store.recent(limit)
    }

    /// Consistent copy of the whole chain, ascending.
    pub fn snapshot(&self) -> Result<Vec<Block>> {
        let _commit = read(&self.inner.commit);
        self.inner.store.blocks()
    }

    /// Complaint anchors in chain order.
    pub fn complaints(&self) -> Result<Vec<Block>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|b| is_complaint(b))
            .collect())
    }

    /// Re-verify the full history. O(n) in chain length.
    ///
    /// A stored block that no longer decodes is an integrity failure at its
    /// position, not a storage error.
    pub fn validate(&self) -> Result<ValidationReport> {
        let _commit = read(&self.inner.commit);
        let entries = self.inner.store.stored_blocks()?;
        if entries.is_empty() {
            return Err(LedgerError::EmptyChain);
        }
        self.run_validation(&entries)
    }

    /// Totals plus a fresh full validation. O(n) in chain length; see
    /// `cached_chain_info` for the cheap variant.
    pub fn chain_info(&self) -> Result<ChainInfo> {
        Ok(self.inspect()?.0)
    }

    /// `chain_info` together with every block that still decodes, taken from
    /// a single read of the store.
    ///
    /// `last_hash` is empty when the tail block itself is unreadable.
    pub fn inspect(&self) -> Result<(ChainInfo, Vec<Block>)> {
        let _commit = read(&self.inner.commit);
        let entries = self.inner.store.stored_blocks()?;
        let (last_hash, last_index) = match entries.last() {
            None => return Err(LedgerError::EmptyChain),
            Some(StoredBlock::Decoded(block)) => (block.hash.clone(), block.index),
            Some(StoredBlock::Undecodable(index)) => (String::new(), *index),
        };
        let report = self.run_validation(&entries)?;
        let info = ChainInfo {
            total_blocks: entries.len() as u64,
            last_hash,
            last_index,
            difficulty: self.difficulty(),
            valid: report.valid,
        };
        let blocks = entries.into_iter().filter_map(StoredBlock::into_block).collect();
        Ok((info, blocks))
    }

    /// Like `chain_info`, but reuses the last validation result unless a
    /// block has been appended since.
    pub fn cached_chain_info(&self) -> Result<ChainInfo> {
        {
            let _commit = read(&self.inner.commit);
            let cached = *lock(&self.inner.validity);
            if let Some(valid) = cached {
                let tail = self.get_last_block()?;
                return Ok(ChainInfo {
                    total_blocks: self.inner.store.block_count()?,
                    last_hash: tail.hash,
                    last_index: tail.index,
                    difficulty: self.difficulty(),
                    valid,
                });
            }
        }
        self.chain_info()
    }

    pub fn export(&self) -> Result<ChainExport> {
        Ok(ChainExport {
            difficulty: self.difficulty(),
            blocks: self.snapshot()?,
        })
    }

    /// Rebuild a ledger from a backup into an empty store.
    ///
    /// The export is validated in full before anything is written, and its
    /// difficulty must equal the configured one.
    pub fn restore(store: Arc<S>, export: &ChainExport, config: LedgerConfig) -> Result<Self> {
        if export.difficulty != config.difficulty {
            return Err(LedgerError::DifficultyMismatch {
                persisted: export.difficulty,
                configured: config.difficulty,
            });
        }
        let ledger = Self::new(store, config)?;
        let (genesis, rest) = export.blocks.split_first().ok_or(LedgerError::EmptyChain)?;
        validate_chain(&export.blocks, export.difficulty)?;
        {
            let _append = lock(&ledger.inner.append_lock);
            let _commit = write(&ledger.inner.commit);
            if ledger.inner.store.block_count()? > 0 {
                return Err(LedgerError::GenesisExists);
            }
            ledger.inner.store.put_genesis(genesis, export.difficulty)?;
            for block in rest {
                ledger.inner.store.put_block(block)?;
            }
        }
        info!(
            blocks = export.blocks.len(),
            difficulty = export.difficulty,
            "chain restored"
        );
        Ok(ledger)
    }

    /// Caller must hold the commit read lock.
    fn run_validation(&self, entries: &[StoredBlock]) -> Result<ValidationReport> {
        let report = ValidationReport::from_result(validate_stored(entries, self.difficulty()))?;
        if let (Some(index), Some(reason)) = (report.invalid_at, report.reason) {
            warn!(index, %reason, "chain integrity check failed");
        }
        *lock(&self.inner.validity) = Some(report.valid);
        Ok(report)
    }

    fn seal(&self, candidate: &Candidate, cancel: &CancelToken) -> Result<Seal> {
        let difficulty = self.difficulty();
        if self.inner.config.parallel_mining {
            seal_parallel(candidate, difficulty, cancel)
        } else {
            pow::seal(candidate, difficulty, cancel)
        }
    }
}

/// Non-genesis block whose payload declares itself a complaint.
pub fn is_complaint(block: &Block) -> bool {
    block.index > 0
        && block.payload.get("type").and_then(Value::as_str) == Some(COMPLAINT_PAYLOAD_TYPE)
}

pub fn genesis_payload() -> Value {
    json!({
        "type": "genesis",
        "message": GENESIS_MESSAGE,
        "version": GENESIS_VERSION,
    })
}

/// Unsealed block 0, stamped now.
pub fn genesis_candidate() -> Candidate {
    Candidate::new(0, GENESIS_PREVIOUS_HASH, genesis_payload())
}

/// A genesis block sealed on the calling thread.
pub fn genesis_block(difficulty: u32, cancel: &CancelToken) -> Result<Block> {
    let candidate = genesis_candidate();
    let seal = pow::seal(&candidate, difficulty, cancel)?;
    Ok(candidate.into_block(seal))
}

// Guards protect `()` or a plain flag, so a poisoned lock carries no broken state.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
