pub(crate) const BLOCKS_PER_BATCH: usize = 25;
pub const MAX_BLOCKS_PER_REQUEST: usize = BLOCKS_PER_BATCH * 10;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
