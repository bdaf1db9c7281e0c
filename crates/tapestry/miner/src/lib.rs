//! Tapestry SPoRA Miner
//!
//! Searches for the next block by pumping nonces through the hashing
//! engine, probing a deterministically chosen byte of the historical
//! weave, and testing the resulting hash against the linear difficulty.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   UpdateState    ┌─────────────┐
//!  │ controller │ ───────────────► │ stage one × │  bulk-hash nonces,
//!  │            │                  │     S1      │  derive recall bytes
//!  └────────────┘                  └─────────────┘
//!        ▲                               │ IoRequest (shuffled)
//!        │ Solution                      ▼
//!  ┌─────┴──────┐   chunk jobs     ┌─────────────┐
//!  │ stage two ×│ ◄─────────────── │  I/O pool   │  chunk store lookup
//!  │     S2     │                  └─────────────┘
//!  └────────────┘
//! ```
//!
//! The controller owns the candidate block, refreshes its timestamp while
//! hashing continues, and validates any claimed solution before sealing
//! the block. A per-round session token fences stale work: every message
//! in the pipeline carries the token of the round that scheduled it.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod candidate;
pub mod controller;
pub mod io_worker;
pub mod metrics;
pub mod node;
pub mod session;
pub mod small_weave;
pub mod stage_one;
pub mod stage_two;
pub mod validate;

pub use candidate::TipBlock;
pub use controller::{start, ControllerMessage, MinerDeps, MinerProcess, Solution, WorkComplete};
pub use metrics::{BestHash, MiningMetrics};
pub use node::{spawn_miner, MinerHandle};
pub use session::{Session, SessionId, SessionTracker};
pub use validate::{validate_solution, InvalidSolution};

use std::time::Duration;

use alloy_primitives::Address;
use tapestry_protocol::block::Tags;
use tapestry_protocol::constants::MINING_TIMESTAMP_REFRESH_INTERVAL;
use thiserror::Error;

/// How long idle workers wait on their inbox before ticking.
pub(crate) const IDLE_TICK: Duration = Duration::from_millis(200);

/// Depth of each I/O worker inbox; overflow drops the nonce.
pub(crate) const IO_QUEUE_DEPTH: usize = 1024;

/// Depth of each stage-two inbox; overflow drops the fetched chunk.
pub(crate) const HASH_QUEUE_DEPTH: usize = 1024;

/// Seconds between attempts to start mining against a light-mode engine.
pub(crate) const ENGINE_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Mining errors surfaced to the embedding node.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("hashing engine holds no fast-mode dataset")]
    EngineNotReady,
    #[error("mining controller is gone")]
    ControllerGone,
}

/// Thread layout and behaviour knobs for a mining session.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Address the block reward is credited to.
    pub reward_address: Address,
    /// Stage-one (bulk hashing) workers.
    pub stage_one_threads: usize,
    /// Stage-two (solution hashing) workers.
    pub stage_two_threads: usize,
    /// I/O workers; typically one per storage spindle.
    pub io_threads: usize,
    /// Hashing-engine iterations per stage-one batch.
    pub batch_size: usize,
    /// Consult the secondary data index on a chunk-store miss.
    pub lookup_data_index: bool,
    /// Time between candidate timestamp refreshes.
    pub refresh_interval: Duration,
    /// Tags attached to mined blocks.
    pub tags: Tags,
}

impl MinerConfig {
    /// Defaults: reserve one core for the controller and I/O dispatch,
    /// split the rest two-to-one between stage one and stage two.
    pub fn new(reward_address: Address) -> Self {
        let available = num_cpus::get().saturating_sub(1).max(2);
        let stage_two_threads = (available / 3).max(1);
        let stage_one_threads = available.saturating_sub(stage_two_threads).max(1);
        Self {
            reward_address,
            stage_one_threads,
            stage_two_threads,
            io_threads: 2,
            batch_size: 256,
            lookup_data_index: false,
            refresh_interval: Duration::from_secs(MINING_TIMESTAMP_REFRESH_INTERVAL),
            tags: Tags::default(),
        }
    }

    pub fn with_threads(mut self, stage_one: usize, stage_two: usize, io: usize) -> Self {
        self.stage_one_threads = stage_one.max(1);
        self.stage_two_threads = stage_two.max(1);
        self.io_threads = io.max(1);
        self
    }
}
