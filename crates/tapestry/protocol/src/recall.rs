//! SPoRA recall-byte derivation.
//!
//! Maps `(H0, prevH, upper_bound)` to the byte offset of the weave whose
//! chunk a miner must prove access to. The weave below the upper bound is
//! split into a fixed number of subspaces; `H0` selects the subspace, the
//! previous block hash seeds where the searchable window starts inside it,
//! and a second hash of `H0` picks the byte within the window.

use alloy_primitives::{B256, U256};
use sha2::{Digest, Sha256};

use crate::constants::{spora_search_space, SPORA_SEARCH_SPACE_SUBSPACES_COUNT};

/// The weave is too small to support recall. The small-weave mining path
/// applies and the empty proof of access is the valid one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("weave is too small for recall")]
pub struct WeaveTooSmall;

/// Whether `upper_bound` leaves no searchable window per subspace.
pub fn weave_is_too_small(upper_bound: u64) -> bool {
    spora_search_space(upper_bound) / SPORA_SEARCH_SPACE_SUBSPACES_COUNT == 0
}

/// Derive the recall byte for `h0` against the weave below `upper_bound`.
///
/// The result lies in `[0, upper_bound)` and is re-derived bit-for-bit by
/// the verifier.
pub fn pick_recall_byte(
    h0: &B256,
    prev_h: &B256,
    upper_bound: u64,
) -> Result<u64, WeaveTooSmall> {
    let subspaces = SPORA_SEARCH_SPACE_SUBSPACES_COUNT;
    let search_subspace_size = spora_search_space(upper_bound) / subspaces;
    if search_subspace_size == 0 {
        return Err(WeaveTooSmall);
    }

    let subspace_number = reduce(h0.as_slice(), subspaces);
    let even_subspace_size = upper_bound / subspaces;
    let subspace_start = subspace_number * even_subspace_size;
    let subspace_size = (upper_bound - subspace_start).min(even_subspace_size);

    let seed = Sha256::new()
        .chain_update(prev_h.as_slice())
        .chain_update(encode_unsigned(subspace_number))
        .finalize();
    let search_subspace_start = reduce(&seed, subspace_size);
    let search_subspace_byte = reduce(&Sha256::digest(h0.as_slice()), search_subspace_size);

    let offset = (u128::from(search_subspace_start) + u128::from(search_subspace_byte))
        % u128::from(subspace_size);
    Ok(subspace_start + offset as u64)
}

/// Big-endian value of `bytes` reduced modulo `divisor`.
fn reduce(bytes: &[u8], divisor: u64) -> u64 {
    let mut wide = [0u8; 32];
    wide[32 - bytes.len()..].copy_from_slice(bytes);
    (U256::from_be_bytes(wide) % U256::from(divisor)).to::<u64>()
}

/// Minimal big-endian encoding; zero encodes as a single zero byte.
fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}
