//! Mining metrics and the best-hash register.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use alloy_primitives::{B256, U256};

/// Counters for one mining process, shared read-only with the workers.
#[derive(Debug)]
pub struct MiningMetrics {
    /// Solution hashes attempted.
    sporas: AtomicU64,
    /// KiB of chunks fetched for hashing.
    kibs: AtomicU64,
    /// Recall bytes derived by stage-one workers.
    recall_bytes_computed: AtomicU64,
    started_at: Instant,
}

impl MiningMetrics {
    pub fn new() -> Self {
        Self {
            sporas: AtomicU64::new(0),
            kibs: AtomicU64::new(0),
            recall_bytes_computed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn add_sporas(&self, n: u64) {
        self.sporas.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_kibs(&self, n: u64) {
        self.kibs.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_recall_bytes(&self, n: u64) {
        self.recall_bytes_computed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sporas(&self) -> u64 {
        self.sporas.load(Ordering::Relaxed)
    }

    pub fn kibs(&self) -> u64 {
        self.kibs.load(Ordering::Relaxed)
    }

    pub fn recall_bytes_computed(&self) -> u64 {
        self.recall_bytes_computed.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Solution hashes per second since the process started.
    pub fn hashrate(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.sporas() as f64 / elapsed
    }
}

impl Default for MiningMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The round's best near-miss, updated monotonically in closer-to-solution
/// order (numerically greater under the linear difficulty).
#[derive(Debug, Default)]
pub struct BestHash(Mutex<B256>);

impl BestHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `candidate` if it beats the current best; returns whether
    /// it did.
    pub fn offer(&self, candidate: &B256) -> bool {
        let mut best = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if U256::from_be_bytes(candidate.0) > U256::from_be_bytes(best.0) {
            *best = *candidate;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> B256 {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
