pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const DEFAULT_DIFFICULTY: u32 = 4;
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
/// Nonces handed to the thread pool per parallel search round.
pub const NONCES_PER_WINDOW: u64 = 1 << 14;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MESSAGE: &str = "Sealchain Genesis Block";
pub const GENESIS_VERSION: &str = "1.0.0";
/// `payload.type` marking a complaint anchor.
pub const COMPLAINT_PAYLOAD_TYPE: &str = "complaint";
