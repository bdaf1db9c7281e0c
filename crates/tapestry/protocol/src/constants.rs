//! Protocol constants for the Tapestry network.
//!
//! These are wire-compatibility constants; every one of them must match the
//! reference network or blocks will not validate across nodes.

/// Width in bytes of the big-endian timestamp field inside the solution
/// preimage.
pub const TIMESTAMP_FIELD_SIZE_LIMIT: usize = 12;

/// Number of equal partitions of the SPoRA search space.
pub const SPORA_SEARCH_SPACE_SUBSPACES_COUNT: u64 = 1024;

/// Denominator of the weave share eligible for search: the search space is
/// one tenth of the weave below the upper bound.
pub const SPORA_SEARCH_SPACE_SHARE: u64 = 10;

/// How many blocks behind the tip the search-space upper bound lives.
pub const SEARCH_SPACE_UPPER_BOUND_DEPTH: u64 = 50;

/// Blocks kept fully on disk behind the current tip.
pub const STORE_BLOCKS_BEHIND_CURRENT: u64 = 50;

/// Seconds between candidate timestamp refreshes while mining.
pub const MINING_TIMESTAMP_REFRESH_INTERVAL: u64 = 10;

/// Difficulty retarget period, in blocks.
pub const RETARGET_BLOCKS: u64 = 10;

/// Target seconds between blocks.
pub const TARGET_BLOCK_TIME: u64 = 120;

/// Retargets whose actual time is within this fraction of the target time
/// leave the difficulty unchanged.
pub const RETARGET_TOLERANCE: f64 = 0.1;

/// Difficulty shift applied when converting a legacy leading-zeros
/// difficulty at the RandomX activation fork.
pub const RANDOMX_DIFF_ADJUSTMENT: i64 = -14;

/// Fixed chunk size of the weave, in bytes.
pub const DATA_CHUNK_SIZE: usize = 256 * 1024;

/// Seconds a worker message's timestamp may lag the session timestamp
/// before the message is dropped as stale.
pub const MINING_SOLUTION_WINDOW: u64 = 19;

/// Seconds a candidate stays in the history after its timestamp; solutions
/// referencing older timestamps can no longer be sealed.
pub const CANDIDATE_HISTORY_WINDOW: u64 = 20;

/// Maximum number of transactions in a block.
pub const BLOCK_TX_COUNT_LIMIT: usize = 1000;

/// Base block reward in winstons before halving.
pub const BLOCK_REWARD_BASE: u64 = 50_000_000_000;

/// Blocks between block-reward halvings.
pub const REWARD_HALVING_INTERVAL: u64 = 105_120;

/// Divisor of transaction fees diverted into the reward pool.
pub const REWARD_POOL_FEE_SHARE: u64 = 5;

/// Denominator of the reward-pool fraction released per target block time.
pub const REWARD_POOL_RELEASE_PERIODS: u64 = 100;

/// The number of weave bytes below `upper_bound` that are eligible for
/// recall.
pub const fn spora_search_space(upper_bound: u64) -> u64 {
    upper_bound / SPORA_SEARCH_SPACE_SHARE
}
