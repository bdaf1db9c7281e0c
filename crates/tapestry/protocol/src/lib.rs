//! Tapestry Protocol Rules
//!
//! Wire-compatibility layer for the Tapestry permaweb network:
//! - SPoRA recall-byte derivation and search-space partitioning
//! - Linear 256-bit difficulty arithmetic and retargeting
//! - Candidate blocks and their canonical block data segment
//! - Proofs of access against the block index
//!
//! Everything in this crate is deterministic and must stay bit-for-bit
//! identical between miners and verifiers.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod bds;
pub mod block;
pub mod constants;
pub mod difficulty;
pub mod poa;
pub mod recall;

pub use bds::{solution_preimage, BdsBase};
pub use block::{CandidateBlock, MinedBlock, Tags, Tx};
pub use difficulty::passes_difficulty;
pub use poa::{validate_poa, BlockIndex, Poa};
pub use recall::{pick_recall_byte, weave_is_too_small, WeaveTooSmall};
