//! Linear 256-bit difficulty arithmetic.
//!
//! A solution hash wins iff its big-endian value strictly exceeds the
//! difficulty. The legacy leading-zero-bits form predates the linear
//! activation height and is only kept as a conversion for genesis
//! parameters; validation implements the linear form exclusively.

use alloy_primitives::{B256, U256, U512};

use crate::constants::{RETARGET_BLOCKS, RETARGET_TOLERANCE, TARGET_BLOCK_TIME};

/// Whether `hash` clears the linear difficulty `diff`.
pub fn passes_difficulty(hash: &B256, diff: U256) -> bool {
    U256::from_be_bytes(hash.0) > diff
}

/// Floor the retarget never goes below: one leading zero bit.
pub fn min_diff() -> U256 {
    from_legacy_diff(1)
}

/// Ceiling the retarget never exceeds.
pub fn max_diff() -> U256 {
    U256::MAX - U256::from(1u8)
}

/// Whether blocks at `height` recompute the difficulty.
pub fn is_retarget_height(height: u64) -> bool {
    height > 0 && height % RETARGET_BLOCKS == 0
}

/// The difficulty of the block at `height`, given the tip difficulty and
/// the candidate timestamp. Off retarget heights the difficulty passes
/// through unchanged.
pub fn maybe_retarget(height: u64, diff: U256, ts: u64, last_retarget: u64) -> U256 {
    if !is_retarget_height(height) {
        return diff;
    }
    calculate_difficulty(diff, ts, last_retarget)
}

/// Linear retarget: scale the difficulty inverse by the actual time the
/// last retarget period took versus the scheduled time.
fn calculate_difficulty(old: U256, ts: u64, last_retarget: u64) -> U256 {
    let target = RETARGET_BLOCKS * TARGET_BLOCK_TIME;
    let actual = ts.saturating_sub(last_retarget).max(1);
    if actual.abs_diff(target) < (target as f64 * RETARGET_TOLERANCE) as u64 {
        return old;
    }
    // bound the swing to one octave per retarget
    let actual = actual.clamp(target / 2, target * 2);
    let inverse = widen(U256::MAX - old) * U512::from(actual) / U512::from(target);
    let inverse = narrow(inverse.min(widen(U256::MAX)));
    (U256::MAX - inverse).clamp(min_diff(), max_diff())
}

/// `cdiff + 2^256 / (2^256 - diff)`: the expected number of hashes the
/// block at `diff` adds on top of `cdiff`.
pub fn next_cumulative_diff(cdiff: U256, diff: U256) -> U256 {
    let max = U512::from(1u8) << 256usize;
    let delta = max / (max - widen(diff));
    let delta = narrow(delta.min(widen(U256::MAX)));
    cdiff.saturating_add(delta)
}

fn widen(value: U256) -> U512 {
    U512::from_be_slice(&value.to_be_bytes::<32>())
}

/// Truncating narrow; callers clamp below `2^256` first.
fn narrow(value: U512) -> U256 {
    U256::from_be_slice(&value.to_be_bytes::<64>()[32..])
}

/// Convert a legacy leading-zero-bits difficulty into the linear threshold
/// with the same success probability.
pub fn from_legacy_diff(zero_bits: u32) -> U256 {
    let zero_bits = zero_bits.clamp(1, 255) as usize;
    U256::ZERO.wrapping_sub(U256::from(1u8) << (256 - zero_bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_is_a_strict_bound() {
        let diff = U256::from(1_000_000u64);
        let exactly = B256::from(diff.to_be_bytes::<32>());
        let above = B256::from((diff + U256::from(1u8)).to_be_bytes::<32>());
        assert!(!passes_difficulty(&exactly, diff));
        assert!(passes_difficulty(&above, diff));
    }

    #[test]
    fn legacy_conversion_halves_per_bit() {
        // one zero bit leaves the top half of the hash space winning
        assert_eq!(from_legacy_diff(1), U256::from(1u8) << 255usize);
        // each extra bit shrinks the winning region by half
        let d8 = U256::MAX - from_legacy_diff(8);
        let d9 = U256::MAX - from_legacy_diff(9);
        assert_eq!(d8 / U256::from(2u8), d9);
    }

    #[test]
    fn retarget_only_at_retarget_heights() {
        let diff = from_legacy_diff(20);
        assert_eq!(maybe_retarget(7, diff, 10_000, 0), diff);
        assert!(is_retarget_height(RETARGET_BLOCKS));
        assert!(!is_retarget_height(0));
    }

    #[test]
    fn slow_blocks_lower_the_difficulty() {
        let diff = from_legacy_diff(20);
        let target = RETARGET_BLOCKS * TARGET_BLOCK_TIME;
        let new = maybe_retarget(RETARGET_BLOCKS, diff, 10_000 + target * 2, 10_000);
        assert!(new < diff);
    }

    #[test]
    fn fast_blocks_raise_the_difficulty() {
        let diff = from_legacy_diff(20);
        let target = RETARGET_BLOCKS * TARGET_BLOCK_TIME;
        let new = maybe_retarget(RETARGET_BLOCKS, diff, 10_000 + target / 2, 10_000);
        assert!(new > diff);
    }

    #[test]
    fn on_schedule_blocks_keep_the_difficulty() {
        let diff = from_legacy_diff(20);
        let target = RETARGET_BLOCKS * TARGET_BLOCK_TIME;
        assert_eq!(
            maybe_retarget(RETARGET_BLOCKS, diff, 10_000 + target, 10_000),
            diff
        );
    }

    #[test]
    fn cumulative_diff_grows_with_difficulty() {
        let cdiff = U256::from(100u64);
        let easy = next_cumulative_diff(cdiff, U256::from(1u8));
        let hard = next_cumulative_diff(cdiff, from_legacy_diff(10));
        assert!(easy > cdiff);
        assert!(hard > easy);
        // ten zero bits cost about 2^10 expected hashes
        assert_eq!(hard - cdiff, U256::from(1024u64));
    }
}
