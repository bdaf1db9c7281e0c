//! Proofs of access.
//!
//! A PoA demonstrates the miner held the chunk containing the recall byte.
//! The full node's Merkle-path machinery sits behind the [`BlockIndex`]
//! seam; the mining core checks the chunk commitment the index records.

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Proof that the recall byte's chunk was available when the block was
/// mined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poa {
    /// Which recall option produced the proof.
    pub option: u64,
    /// Merkle path from the block's tx root to the owning transaction.
    pub tx_path: Bytes,
    /// Merkle path from the transaction's data root to the chunk.
    pub data_path: Bytes,
    /// The chunk itself.
    pub chunk: Bytes,
}

impl Poa {
    /// The proof used when the weave is too small for recall.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty() && self.tx_path.is_empty() && self.data_path.is_empty()
    }

    /// Digest committing to the chunk contents.
    pub fn chunk_digest(&self) -> B256 {
        B256::from_slice(&Sha256::digest(&self.chunk))
    }
}

/// Maps weave intervals to the digest of the chunk stored there. Entries
/// are keyed by the exclusive end offset of the chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    entries: Vec<(u64, B256)>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk ending at `end_offset`. Offsets must be appended in
    /// increasing order.
    pub fn push(&mut self, end_offset: u64, digest: B256) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |(end, _)| *end < end_offset));
        self.entries.push((end_offset, digest));
    }

    /// Digest of the chunk covering `byte`, if indexed.
    pub fn digest_covering(&self, byte: u64) -> Option<B256> {
        let at = self.entries.partition_point(|(end, _)| *end <= byte);
        self.entries.get(at).map(|(_, digest)| *digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check `poa` against the block index at `recall_byte`.
pub fn validate_poa(recall_byte: u64, index: &BlockIndex, poa: &Poa) -> bool {
    match index.digest_covering(recall_byte) {
        Some(digest) => !poa.chunk.is_empty() && poa.chunk_digest() == digest,
        None => false,
    }
}
