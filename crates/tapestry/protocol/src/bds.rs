//! Block data segment construction.
//!
//! The BDS is the canonical serialization of a candidate block fed to the
//! hashing engine. It is built in two phases: an expensive base over the
//! transaction-dependent fields and a cheap finalization appending the
//! timestamp-dependent tail. The split keeps timestamp refreshes from
//! re-running the base while hashing continues.

use alloy_primitives::{Bytes, B256};

use crate::block::CandidateBlock;
use crate::constants::TIMESTAMP_FIELD_SIZE_LIMIT;

/// Transaction-dependent prefix of the block data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdsBase(Bytes);

impl BdsBase {
    /// Serialize the transaction-dependent fields of `candidate`.
    pub fn build(candidate: &CandidateBlock) -> Self {
        let mut out = Vec::with_capacity(256 + candidate.tx_ids.len() * 36);
        push_field(&mut out, candidate.previous_block_hash.as_slice());
        push_field(&mut out, &candidate.height.to_be_bytes());
        push_field(&mut out, candidate.hash_list_merkle.as_slice());
        push_field(&mut out, candidate.reward_address.as_slice());
        for (name, value) in &candidate.tags {
            push_field(&mut out, name);
            push_field(&mut out, value);
        }
        push_field(&mut out, candidate.tx_root.as_slice());
        for id in &candidate.tx_ids {
            push_field(&mut out, id.as_slice());
        }
        push_field(&mut out, &candidate.block_size.to_be_bytes());
        push_field(&mut out, &candidate.weave_size.to_be_bytes());
        Self(out.into())
    }

    /// Append the timestamp-dependent tail, yielding the full segment.
    pub fn finalize(&self, candidate: &CandidateBlock) -> Bytes {
        let mut out = Vec::with_capacity(self.0.len() + 160);
        out.extend_from_slice(&self.0);
        push_field(&mut out, &be_fixed_ts(candidate.timestamp));
        push_field(&mut out, &candidate.last_retarget.to_be_bytes());
        push_field(&mut out, &candidate.diff.to_be_bytes::<32>());
        push_field(&mut out, &candidate.cumulative_diff.to_be_bytes::<32>());
        push_field(&mut out, &candidate.reward_pool.to_be_bytes());
        push_field(&mut out, candidate.wallet_list_root.as_slice());
        out.into()
    }

    /// Length of the base in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

/// The timestamp as a fixed-width big-endian field.
pub fn be_fixed_ts(ts: u64) -> [u8; TIMESTAMP_FIELD_SIZE_LIMIT] {
    let mut out = [0u8; TIMESTAMP_FIELD_SIZE_LIMIT];
    out[TIMESTAMP_FIELD_SIZE_LIMIT - 8..].copy_from_slice(&ts.to_be_bytes());
    out
}

/// Preimage of the solution hash: `H0 ‖ prevH ‖ be_fixed(ts) ‖ chunk`.
///
/// The small-weave path passes an empty chunk.
pub fn solution_preimage(h0: &B256, prev_h: &B256, ts: u64, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + TIMESTAMP_FIELD_SIZE_LIMIT + chunk.len());
    out.extend_from_slice(h0.as_slice());
    out.extend_from_slice(prev_h.as_slice());
    out.extend_from_slice(&be_fixed_ts(ts));
    out.extend_from_slice(chunk);
    out
}
