//! Solution validation.
//!
//! Re-derives a claimed solution from first principles: `H0` from the
//! nonce and the data segment, the solution hash from the canonical
//! preimage, then the recall byte and the proof of access against the
//! block index. Used by the controller before sealing and by nodes
//! receiving the block.

use alloy_primitives::{B256, U256};
use tapestry_protocol::bds::solution_preimage;
use tapestry_protocol::difficulty::passes_difficulty;
use tapestry_protocol::poa::{validate_poa, BlockIndex, Poa};
use tapestry_protocol::recall::{pick_recall_byte, WeaveTooSmall};
use tapestry_randomx::RandomxEngine;
use thiserror::Error;

/// Why a claimed solution was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSolution {
    #[error("solution hash {hash} does not exceed difficulty {diff}")]
    BelowDifficulty { hash: B256, diff: U256 },
    #[error("weave is too small for recall but the proof of access is not empty")]
    UnexpectedPoa,
    #[error("proof of access rejected at recall byte {byte}")]
    PoaRejected { byte: u64 },
}

/// Re-derive and check a claimed solution; returns the re-derived
/// solution hash on success so callers can cross-check the claim.
#[allow(clippy::too_many_arguments)]
pub fn validate_solution(
    engine: &dyn RandomxEngine,
    bds: &[u8],
    nonce: &B256,
    ts: u64,
    diff: U256,
    prev_h: &B256,
    upper_bound: u64,
    poa: &Poa,
    block_index: &BlockIndex,
) -> Result<B256, InvalidSolution> {
    let mut h0_preimage = Vec::with_capacity(32 + bds.len());
    h0_preimage.extend_from_slice(nonce.as_slice());
    h0_preimage.extend_from_slice(bds);
    let h0 = engine.hash(&h0_preimage);

    let solution_hash = engine.hash(&solution_preimage(&h0, prev_h, ts, &poa.chunk));
    if !passes_difficulty(&solution_hash, diff) {
        return Err(InvalidSolution::BelowDifficulty {
            hash: solution_hash,
            diff,
        });
    }

    match pick_recall_byte(&h0, prev_h, upper_bound) {
        Err(WeaveTooSmall) => {
            if poa.is_empty() {
                Ok(solution_hash)
            } else {
                Err(InvalidSolution::UnexpectedPoa)
            }
        }
        Ok(byte) => {
            if validate_poa(byte, block_index, poa) {
                Ok(solution_hash)
            } else {
                Err(InvalidSolution::PoaRejected { byte })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use tapestry_randomx::SoftwareEngine;

    /// Hash nonces until one clears `diff` for the given segment, the way
    /// the small-weave worker would.
    fn mine_small_weave(
        engine: &SoftwareEngine,
        bds: &[u8],
        prev_h: &B256,
        ts: u64,
        diff: U256,
    ) -> B256 {
        for counter in 0u64..1_000_000 {
            let mut bytes = [0u8; 32];
            bytes[24..].copy_from_slice(&counter.to_be_bytes());
            let nonce = B256::from(bytes);
            let mut h0_preimage = nonce.to_vec();
            h0_preimage.extend_from_slice(bds);
            let h0 = engine.hash(&h0_preimage);
            let hash = engine.hash(&solution_preimage(&h0, prev_h, ts, &[]));
            if passes_difficulty(&hash, diff) {
                return nonce;
            }
        }
        panic!("no solution within a million nonces");
    }

    #[test]
    fn small_weave_round_trip() {
        let engine = SoftwareEngine::fast();
        let bds = b"data segment";
        let prev_h = B256::repeat_byte(2);
        let diff = U256::from(1u8) << 254usize;
        let nonce = mine_small_weave(&engine, bds, &prev_h, 99, diff);

        let derived = validate_solution(
            &engine,
            bds,
            &nonce,
            99,
            diff,
            &prev_h,
            // too small for recall
            1024,
            &Poa::empty(),
            &BlockIndex::new(),
        )
        .unwrap();
        assert!(passes_difficulty(&derived, diff));
    }

    #[test]
    fn small_weave_rejects_a_nonempty_poa() {
        let engine = SoftwareEngine::fast();
        let bds = b"data segment";
        let prev_h = B256::repeat_byte(2);
        let nonce = mine_small_weave(&engine, bds, &prev_h, 99, U256::ZERO);

        let poa = Poa {
            option: 1,
            chunk: Bytes::from_static(b"unexpected"),
            ..Poa::default()
        };
        // the chunk changes the preimage, so either the difficulty or the
        // PoA check fires; both reject
        assert!(validate_solution(
            &engine, bds, &nonce, 99, U256::ZERO, &prev_h, 1024, &poa,
            &BlockIndex::new(),
        )
        .is_err());
    }

    #[test]
    fn below_difficulty_is_rejected() {
        let engine = SoftwareEngine::fast();
        let err = validate_solution(
            &engine,
            b"segment",
            &B256::repeat_byte(1),
            99,
            U256::MAX,
            &B256::repeat_byte(2),
            1024,
            &Poa::empty(),
            &BlockIndex::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidSolution::BelowDifficulty { .. }));
    }
}
