pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod mine;
pub mod validate;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use config::LedgerConfig;
pub use error::{ChainFault, LedgerError, Result};

pub type Hash = [u8; 32];

/// A sealed, immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub payload: Value,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    pub fn preimage(&self) -> Preimage {
        Preimage::new(self.index, &self.timestamp, &self.payload, &self.previous_hash)
    }

    /// Recompute the digest from the stored fields, ignoring the stored `hash`.
    pub fn compute_hash(&self) -> String {
        hex::encode(self.preimage().digest(self.nonce))
    }
}

/// A block that has not been sealed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub index: u64,
    pub timestamp: String,
    pub payload: Value,
    pub previous_hash: String,
}

impl Candidate {
    /// Stamps the candidate with the current UTC time.
    pub fn new(index: u64, previous_hash: impl Into<String>, payload: Value) -> Self {
        Self {
            index,
            timestamp: now_timestamp(),
            payload,
            previous_hash: previous_hash.into(),
        }
    }

    pub fn preimage(&self) -> Preimage {
        Preimage::new(self.index, &self.timestamp, &self.payload, &self.previous_hash)
    }

    pub fn into_block(self, seal: pow::Seal) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            payload: self.payload,
            previous_hash: self.previous_hash,
            hash: seal.hash,
            nonce: seal.nonce,
        }
    }
}

/// RFC 3339 UTC timestamp with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serialize a JSON value with object keys sorted at every level and no
/// whitespace. Independent of serde_json's map ordering features.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&json_string(key));
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn json_string(s: &str) -> String {
    Value::from(s).to_string()
}

/// The hashed byte string of a block, split around the nonce so the miner
/// only re-renders the nonce on each attempt.
///
/// The full preimage is the canonical JSON object
/// `{"index":I,"nonce":N,"payload":P,"previous_hash":H,"timestamp":T}`.
#[derive(Clone, Debug)]
pub struct Preimage {
    head: String,
    tail: String,
}

impl Preimage {
    pub fn new(index: u64, timestamp: &str, payload: &Value, previous_hash: &str) -> Self {
        let head = format!("{{\"index\":{index},\"nonce\":");
        let tail = format!(
            ",\"payload\":{},\"previous_hash\":{},\"timestamp\":{}}}",
            canonical_json(payload),
            json_string(previous_hash),
            json_string(timestamp)
        );
        Self { head, tail }
    }

    pub fn render(&self, nonce: u64) -> String {
        format!("{}{}{}", self.head, nonce, self.tail)
    }

    pub fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.head.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.tail.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }
}

/// Hex SHA-256 over the canonical block fields.
pub fn block_hash(
    index: u64,
    timestamp: &str,
    payload: &Value,
    previous_hash: &str,
    nonce: u64,
) -> String {
    hex::encode(Preimage::new(index, timestamp, payload, previous_hash).digest(nonce))
}

pub mod pow {
    use super::{Candidate, Hash};
    use crate::error::{LedgerError, Result};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const CANCEL_CHECK_INTERVAL: u64 = 1024;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Seal {
        pub hash: String,
        pub nonce: u64,
    }

    /// Shared flag for aborting an in-flight search.
    #[derive(Clone, Debug, Default)]
    pub struct CancelToken(Arc<AtomicBool>);

    impl CancelToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::Relaxed);
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    /// Search nonces 0, 1, 2, ... on the calling thread until the hex digest
    /// starts with `difficulty` zeros. Blocks until found or cancelled.
    pub fn seal(candidate: &Candidate, difficulty: u32, cancel: &CancelToken) -> Result<Seal> {
        let preimage = candidate.preimage();
        let mut nonce = 0u64;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(LedgerError::Cancelled);
            }
            let digest = preimage.digest(nonce);
            if meets_difficulty(&digest, difficulty) {
                return Ok(Seal {
                    hash: hex::encode(digest),
                    nonce,
                });
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Number of leading `0` hex characters of the digest.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 2;
            } else {
                if *b < 0x10 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_nibbles(hash) >= difficulty
    }

    /// Same predicate applied to a stored hex string.
    pub fn hex_meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let d = difficulty as usize;
        hash.len() >= d && hash.bytes().take(d).all(|b| b == b'0')
    }
}
