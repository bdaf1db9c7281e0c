//! Mining command.
//!
//! Seeds an in-memory weave, then mines blocks with the full SPoRA
//! pipeline until the requested number is found. Useful for development
//! networks and for benchmarking thread layouts.

use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::Address;
use clap::Parser;
use eyre::eyre;
use rand::RngCore;
use tapestry_miner::{start, MinerConfig, MinerDeps, TipBlock};
use tapestry_protocol::constants::{DATA_CHUNK_SIZE, RANDOMX_DIFF_ADJUSTMENT};
use tapestry_protocol::difficulty::from_legacy_diff;
use tapestry_randomx::SoftwareEngine;
use tapestry_storage::{MemoryChunkStore, WalletStore, WeaveReader};
use tracing::info;

/// Legacy difficulty of the development genesis, before the RandomX
/// adjustment.
const GENESIS_LEGACY_DIFF: i64 = 28;

/// Mining command arguments.
#[derive(Debug, Parser)]
pub struct MineArgs {
    /// Address block rewards are credited to.
    #[arg(long, default_value = "0x0000000000000000000000000000000000000001")]
    pub reward_address: Address,

    /// Stage-one hashing threads (0 = derive from the core count).
    #[arg(long, default_value = "0")]
    pub stage_one_threads: usize,

    /// Stage-two hashing threads (0 = derive from the core count).
    #[arg(long, default_value = "0")]
    pub stage_two_threads: usize,

    /// I/O worker threads.
    #[arg(long, default_value = "2")]
    pub io_threads: usize,

    /// Leading zero bits of the development difficulty (0 = network
    /// default).
    #[arg(long, default_value = "0")]
    pub difficulty: u32,

    /// Blocks to mine before exiting.
    #[arg(long, default_value = "1")]
    pub blocks: u64,

    /// Size of the seeded development weave, in chunks.
    #[arg(long, default_value = "16")]
    pub weave_chunks: u64,

    /// Consult the secondary data index on chunk-store misses.
    #[arg(long)]
    pub lookup_data_index: bool,
}

impl MineArgs {
    pub fn run(&self) -> eyre::Result<()> {
        let diff = if self.difficulty == 0 {
            let bits = (GENESIS_LEGACY_DIFF + RANDOMX_DIFF_ADJUSTMENT).max(1) as u32;
            from_legacy_diff(bits)
        } else {
            from_legacy_diff(self.difficulty)
        };

        let mut config = MinerConfig::new(self.reward_address);
        if self.stage_one_threads > 0 || self.stage_two_threads > 0 {
            let available = num_cpus::get().saturating_sub(1).max(2);
            let stage_two = if self.stage_two_threads > 0 {
                self.stage_two_threads
            } else {
                (available / 3).max(1)
            };
            let stage_one = if self.stage_one_threads > 0 {
                self.stage_one_threads
            } else {
                available.saturating_sub(stage_two).max(1)
            };
            config = config.with_threads(stage_one, stage_two, self.io_threads);
        } else {
            config.io_threads = self.io_threads.max(1);
        }
        config.lookup_data_index = self.lookup_data_index;

        // seed a deterministic-size development weave
        let mut store = MemoryChunkStore::new();
        let mut rng = rand::thread_rng();
        let mut chunk = vec![0u8; DATA_CHUNK_SIZE];
        for _ in 0..self.weave_chunks {
            rng.fill_bytes(&mut chunk);
            store.append(&chunk);
        }
        let weave_size = store.weave_size();
        let block_index = store.block_index();
        let weave = WeaveReader::new(Arc::new(store));
        let engine = Arc::new(SoftwareEngine::fast());

        info!(
            target: "tapestry::mine",
            reward_address = %self.reward_address,
            stage_one = config.stage_one_threads,
            stage_two = config.stage_two_threads,
            io = config.io_threads,
            weave_size,
            "starting the development miner"
        );

        let mut tip = TipBlock {
            indep_hash: Default::default(),
            height: 0,
            hash_list_merkle: Default::default(),
            weave_size,
            diff,
            cumulative_diff: Default::default(),
            last_retarget: 0,
            timestamp: 0,
            reward_pool: 0,
        };
        // wallet state accumulates across rounds: each block's reward is
        // credited on top of the previous block's balances
        let mut wallets = WalletStore::new();

        for _ in 0..self.blocks {
            let process = start(
                config.clone(),
                MinerDeps {
                    engine: engine.clone(),
                    weave: weave.clone(),
                    block_index: block_index.clone(),
                    tip: tip.clone(),
                    search_space_upper_bound: weave_size,
                    wallets: wallets.clone(),
                    anchors: HashSet::new(),
                    recent_txs: HashSet::new(),
                    pending_txs: Vec::new(),
                },
            );
            let work = process
                .completed
                .recv()
                .map_err(|_| eyre!("mining controller exited without a block"))?;
            process
                .handle
                .join()
                .map_err(|_| eyre!("mining controller panicked"))?;

            info!(
                target: "tapestry::mine",
                height = work.block.candidate.height,
                indep_hash = %work.indep_hash,
                hash = %work.block.hash,
                sporas = process.metrics.sporas(),
                hashrate = format!("{:.0} h/s", process.metrics.hashrate()),
                "block mined"
            );

            let sealed = &work.block.candidate;
            tip = TipBlock {
                indep_hash: work.indep_hash,
                height: sealed.height,
                hash_list_merkle: sealed.hash_list_merkle,
                weave_size: sealed.weave_size,
                diff: sealed.diff,
                cumulative_diff: sealed.cumulative_diff,
                last_retarget: sealed.last_retarget,
                timestamp: sealed.timestamp,
                reward_pool: sealed.reward_pool,
            };
            wallets = work.wallets;
        }

        info!(target: "tapestry::mine", blocks = self.blocks, "mining complete");
        Ok(())
    }
}
