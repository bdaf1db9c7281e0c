//! Candidate and sealed block types.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::poa::Poa;

/// (name, value) tag pairs carried in the block header.
pub type Tags = Vec<(Bytes, Bytes)>;

/// A transaction as the mining core sees it: enough metadata to pick,
/// price, and commit it into a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub id: B256,
    pub owner: Address,
    pub target: Option<Address>,
    /// Winstons transferred to the target.
    pub quantity: u64,
    /// Winstons paid for inclusion.
    pub fee: u64,
    pub data_size: u64,
    pub data_root: B256,
    /// Anchor: a recent block hash or the owner's previous tx id.
    pub last_tx: B256,
}

/// Block under construction during a mining round.
///
/// Every field is a function of `(tip block, included txs, timestamp)`;
/// changing the timestamp or the tx set forces a recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBlock {
    pub height: u64,
    pub previous_block_hash: B256,
    /// Merkle root of the hash list up to the previous block.
    pub hash_list_merkle: B256,
    pub reward_address: Address,
    pub tags: Tags,
    /// Included transactions, in commitment order.
    pub tx_ids: Vec<B256>,
    pub tx_root: B256,
    /// Bytes this block adds to the weave.
    pub block_size: u64,
    /// Weave size after this block.
    pub weave_size: u64,
    pub wallet_list_root: B256,
    /// Seconds since the epoch.
    pub timestamp: u64,
    pub last_retarget: u64,
    /// Linear difficulty; the solution hash must exceed it numerically.
    pub diff: U256,
    pub cumulative_diff: U256,
    pub reward_pool: u64,
}

/// A candidate sealed by a winning solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedBlock {
    pub candidate: CandidateBlock,
    /// The nonce whose `H0` produced the solution.
    pub nonce: B256,
    /// The solution hash.
    pub hash: B256,
    pub poa: Poa,
    /// Hash identifying the block on the network.
    pub indep_hash: B256,
}

impl MinedBlock {
    /// Seal `candidate` with a validated solution.
    pub fn seal(candidate: CandidateBlock, nonce: B256, hash: B256, poa: Poa, bds: &[u8]) -> Self {
        let indep_hash = compute_indep_hash(bds, &hash, &nonce, &poa);
        Self {
            candidate,
            nonce,
            hash,
            poa,
            indep_hash,
        }
    }
}

/// The block's independent hash, committing to the data segment, the
/// solution, and the proof of access.
pub fn compute_indep_hash(bds: &[u8], hash: &B256, nonce: &B256, poa: &Poa) -> B256 {
    let digest = Sha256::new()
        .chain_update(bds)
        .chain_update(hash.as_slice())
        .chain_update(nonce.as_slice())
        .chain_update(&poa.option.to_be_bytes())
        .chain_update(&poa.tx_path)
        .chain_update(&poa.data_path)
        .chain_update(&poa.chunk)
        .finalize();
    B256::from_slice(&digest)
}

/// SHA-256 binary Merkle root over the ordered transaction ids; an odd
/// leaf is paired with itself.
pub fn tx_root(tx_ids: &[B256]) -> B256 {
    if tx_ids.is_empty() {
        return B256::ZERO;
    }
    let mut layer = tx_ids.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let digest = Sha256::new()
                    .chain_update(pair[0].as_slice())
                    .chain_update(right.as_slice())
                    .finalize();
                B256::from_slice(&digest)
            })
            .collect();
    }
    layer[0]
}
