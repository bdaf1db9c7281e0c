//! Candidate refresh.
//!
//! The refresher owns the block under construction. A **full refresh**
//! rebuilds everything the transaction set touches (tx root, sizes,
//! wallet delta, the expensive BDS base); a **partial refresh** re-stamps
//! only the timestamp-dependent tail so the base survives timestamp
//! churn. Recent candidates are kept in a bounded history so a solution
//! found against an older timestamp can still be sealed.

use std::collections::{BTreeMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, Bytes, B256, U256};
use tapestry_protocol::bds::BdsBase;
use tapestry_protocol::block::{tx_root, CandidateBlock, Tags, Tx};
use tapestry_protocol::constants::{
    BLOCK_REWARD_BASE, CANDIDATE_HISTORY_WINDOW, REWARD_HALVING_INTERVAL,
    REWARD_POOL_FEE_SHARE, REWARD_POOL_RELEASE_PERIODS, TARGET_BLOCK_TIME,
};
use tapestry_protocol::difficulty::{is_retarget_height, maybe_retarget, next_cumulative_diff};
use tapestry_storage::{PickContext, TxReplayPool, WalletStore};
use tracing::warn;

/// Fields of the chain tip the next candidate builds on.
#[derive(Debug, Clone)]
pub struct TipBlock {
    /// Independent hash of the tip; `prevH` in every preimage.
    pub indep_hash: B256,
    pub height: u64,
    pub hash_list_merkle: B256,
    pub weave_size: u64,
    pub diff: U256,
    pub cumulative_diff: U256,
    pub last_retarget: u64,
    pub timestamp: u64,
    pub reward_pool: u64,
}

/// One remembered candidate: everything needed to seal a block if a
/// solution arrives for its timestamp. The tx set and the wallet snapshot
/// are captured per entry because a full refresh may change them
/// mid-round.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub candidate: CandidateBlock,
    pub bds: Bytes,
    pub txs: Vec<Tx>,
    /// Wallets after the entry's txs and mining reward; its root is the
    /// candidate's `wallet_list_root`.
    pub wallets: WalletStore,
}

/// What the workers mine against after a refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub candidate: CandidateBlock,
    pub bds: Bytes,
}

/// Per-round state a full refresh rebuilds and a partial refresh
/// re-stamps.
struct RoundBase {
    /// Candidate with the tx-dependent fields filled in.
    skeleton: CandidateBlock,
    base: BdsBase,
    /// Wallets after the included txs, before the mining reward.
    wallets_after_txs: WalletStore,
    fees: u64,
}

pub struct CandidateRefresher {
    tip: TipBlock,
    reward_address: Address,
    tags: Tags,
    /// Wallet snapshot at the tip.
    wallets: WalletStore,
    pool: TxReplayPool,
    anchors: HashSet<B256>,
    recent_txs: HashSet<B256>,
    included: Vec<Tx>,
    round: Option<RoundBase>,
    history: BTreeMap<u64, HistoryEntry>,
    last_finalize_secs: u64,
}

impl CandidateRefresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tip: TipBlock,
        reward_address: Address,
        tags: Tags,
        wallets: WalletStore,
        pool: TxReplayPool,
        anchors: HashSet<B256>,
        recent_txs: HashSet<B256>,
    ) -> Self {
        Self {
            tip,
            reward_address,
            tags,
            wallets,
            pool,
            anchors,
            recent_txs,
            included: Vec::new(),
            round: None,
            history: BTreeMap::new(),
            last_finalize_secs: 0,
        }
    }

    /// Rebuild the candidate from scratch; the tx set may have changed.
    pub fn full_refresh(&mut self) -> RefreshOutcome {
        let ts = self.next_timestamp();
        let height = self.tip.height + 1;
        let diff = maybe_retarget(height, self.tip.diff, ts, self.tip.last_retarget);

        let picked = self.pool.pick(&PickContext {
            anchors: &self.anchors,
            recent_txs: &self.recent_txs,
            height,
            diff,
            timestamp: ts,
            wallets: &self.wallets,
        });

        let mut wallets = self.wallets.clone();
        let mut included = Vec::with_capacity(picked.len());
        for tx in picked {
            match wallets.apply_txs(std::slice::from_ref(&tx)) {
                Ok(()) => included.push(tx),
                Err(err) => warn!(
                    target: "tapestry::refresh",
                    %err,
                    id = %tx.id,
                    "dropping tx from candidate"
                ),
            }
        }

        let block_size = included
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.data_size));
        let fees = included
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.fee));
        let tx_ids: Vec<B256> = included.iter().map(|tx| tx.id).collect();

        let skeleton = CandidateBlock {
            height,
            previous_block_hash: self.tip.indep_hash,
            hash_list_merkle: self.tip.hash_list_merkle,
            reward_address: self.reward_address,
            tags: self.tags.clone(),
            tx_root: tx_root(&tx_ids),
            tx_ids,
            block_size,
            weave_size: self.tip.weave_size + block_size,
            // stamped by the partial refresh below
            wallet_list_root: B256::ZERO,
            timestamp: 0,
            last_retarget: 0,
            diff,
            cumulative_diff: U256::ZERO,
            reward_pool: 0,
        };
        let base = BdsBase::build(&skeleton);

        self.included = included;
        self.round = Some(RoundBase {
            skeleton,
            base,
            wallets_after_txs: wallets,
            fees,
        });
        self.partial_refresh()
    }

    /// Re-stamp the timestamp-dependent tail on the existing base.
    pub fn partial_refresh(&mut self) -> RefreshOutcome {
        let (fees, base, mut candidate, mut wallets) = match &self.round {
            Some(round) => (
                round.fees,
                round.base.clone(),
                round.skeleton.clone(),
                round.wallets_after_txs.clone(),
            ),
            None => return self.full_refresh(),
        };

        let ts = self.next_timestamp();
        let height = self.tip.height + 1;
        let diff = maybe_retarget(height, self.tip.diff, ts, self.tip.last_retarget);
        let (reward, reward_pool) = calculate_reward(
            height,
            fees,
            self.tip.reward_pool,
            ts.saturating_sub(self.tip.timestamp),
        );
        wallets.apply_mining_reward(self.reward_address, reward);

        candidate.timestamp = ts;
        candidate.last_retarget = if is_retarget_height(height) {
            ts
        } else {
            self.tip.last_retarget
        };
        candidate.diff = diff;
        candidate.cumulative_diff = next_cumulative_diff(self.tip.cumulative_diff, diff);
        candidate.reward_pool = reward_pool;
        candidate.wallet_list_root = wallets.root();

        let started = Instant::now();
        let bds = base.finalize(&candidate);
        let micros = started.elapsed().as_micros() as u64;
        self.last_finalize_secs = (micros as f64 / 1_000_000.0).round() as u64;

        self.history.insert(
            ts,
            HistoryEntry {
                candidate: candidate.clone(),
                bds: bds.clone(),
                txs: self.included.clone(),
                wallets,
            },
        );
        self.history
            .retain(|&entry_ts, _| entry_ts + CANDIDATE_HISTORY_WINDOW > ts);

        RefreshOutcome { candidate, bds }
    }

    /// `max(wall clock + last finalize time, last used + 1)` — a timestamp
    /// already in the history is never reused.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let floor = now + self.last_finalize_secs;
        match self.history.keys().next_back() {
            Some(last_used) => floor.max(last_used + 1),
            None => floor,
        }
    }

    /// Replace the pending tx set; the caller follows up with a full
    /// refresh.
    pub fn set_pending(&mut self, txs: Vec<Tx>) {
        self.pool.replace(txs);
    }

    /// The candidate mined against timestamp `ts`, if still remembered.
    pub fn entry(&self, ts: u64) -> Option<&HistoryEntry> {
        self.history.get(&ts)
    }

    /// Transactions committed into the current candidate.
    pub fn included_txs(&self) -> &[Tx] {
        &self.included
    }

    /// How long the last BDS finalization took, rounded to seconds.
    pub fn last_finalize_secs(&self) -> u64 {
        self.last_finalize_secs
    }

    pub fn tip(&self) -> &TipBlock {
        &self.tip
    }

    #[cfg(test)]
    fn history_timestamps(&self) -> Vec<u64> {
        self.history.keys().copied().collect()
    }
}

/// Finder reward and updated reward pool.
///
/// The finder collects the height-decayed inflation, the fee share not
/// diverted into the pool, and the pool release for the elapsed time.
pub fn calculate_reward(height: u64, fees: u64, pool: u64, elapsed: u64) -> (u64, u64) {
    let halvings = (height / REWARD_HALVING_INTERVAL).min(63) as u32;
    let inflation = (BLOCK_REWARD_BASE >> halvings).max(1);
    let to_pool = fees / REWARD_POOL_FEE_SHARE;
    let elapsed = elapsed.min(TARGET_BLOCK_TIME * 2);
    let release = ((pool as u128 * elapsed as u128)
        / (REWARD_POOL_RELEASE_PERIODS as u128 * TARGET_BLOCK_TIME as u128))
        as u64;
    let reward = inflation
        .saturating_add(fees - to_pool)
        .saturating_add(release);
    (reward, pool.saturating_add(to_pool) - release)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_storage::Wallet;

    fn tip() -> TipBlock {
        TipBlock {
            indep_hash: B256::repeat_byte(1),
            height: 0,
            hash_list_merkle: B256::ZERO,
            weave_size: 0,
            diff: U256::from(1u8),
            cumulative_diff: U256::ZERO,
            last_retarget: 0,
            timestamp: 0,
            reward_pool: 0,
        }
    }

    fn refresher_with_tx() -> CandidateRefresher {
        let owner = Address::repeat_byte(0x0a);
        let anchor = B256::repeat_byte(0xaa);
        let mut wallets = WalletStore::new();
        wallets.add_wallet(
            owner,
            Wallet {
                balance: 1_000,
                last_tx: B256::ZERO,
            },
        );
        let tx = Tx {
            id: B256::repeat_byte(0x0b),
            owner,
            target: None,
            quantity: 0,
            fee: 100,
            data_size: 512,
            data_root: B256::repeat_byte(0x0c),
            last_tx: anchor,
        };
        CandidateRefresher::new(
            tip(),
            Address::repeat_byte(0xee),
            Tags::default(),
            wallets,
            TxReplayPool::from_txs(vec![tx]),
            HashSet::from([anchor]),
            HashSet::new(),
        )
    }

    #[test]
    fn full_refresh_commits_the_picked_txs() {
        let mut refresher = refresher_with_tx();
        let outcome = refresher.full_refresh();

        assert_eq!(outcome.candidate.height, 1);
        assert_eq!(outcome.candidate.tx_ids, vec![B256::repeat_byte(0x0b)]);
        assert_eq!(outcome.candidate.tx_root, tx_root(&outcome.candidate.tx_ids));
        assert_eq!(outcome.candidate.block_size, 512);
        assert_eq!(outcome.candidate.weave_size, 512);
        assert_ne!(outcome.candidate.wallet_list_root, B256::ZERO);
        assert_eq!(refresher.included_txs().len(), 1);
    }

    #[test]
    fn partial_refresh_keeps_the_tx_set_and_bumps_the_timestamp() {
        let mut refresher = refresher_with_tx();
        let first = refresher.full_refresh();
        let second = refresher.partial_refresh();

        assert_eq!(first.candidate.tx_ids, second.candidate.tx_ids);
        assert_eq!(first.candidate.block_size, second.candidate.block_size);
        assert!(second.candidate.timestamp > first.candidate.timestamp);
        assert_ne!(first.bds, second.bds);
    }

    #[test]
    fn timestamps_are_strictly_increasing() {
        let mut refresher = refresher_with_tx();
        refresher.full_refresh();
        let mut previous = 0;
        for _ in 0..10 {
            let outcome = refresher.partial_refresh();
            assert!(outcome.candidate.timestamp > previous);
            previous = outcome.candidate.timestamp;
        }
    }

    #[test]
    fn history_window_is_bounded() {
        let mut refresher = refresher_with_tx();
        refresher.full_refresh();
        let mut newest = 0;
        for _ in 0..(CANDIDATE_HISTORY_WINDOW as usize + 10) {
            newest = refresher.partial_refresh().candidate.timestamp;
        }
        for ts in refresher.history_timestamps() {
            assert!(ts + CANDIDATE_HISTORY_WINDOW > newest);
        }
    }

    #[test]
    fn solutions_look_up_their_candidate_by_timestamp() {
        let mut refresher = refresher_with_tx();
        let first = refresher.full_refresh();
        let second = refresher.partial_refresh();

        let entry = refresher.entry(first.candidate.timestamp).unwrap();
        assert_eq!(entry.candidate, first.candidate);
        assert_eq!(entry.bds, first.bds);
        // the snapshot carries the committed wallet state, reward included
        assert_eq!(entry.wallets.root(), first.candidate.wallet_list_root);
        assert!(entry.wallets.get(&Address::repeat_byte(0xee)).is_some());
        assert!(refresher.entry(second.candidate.timestamp).is_some());
        assert!(refresher.entry(second.candidate.timestamp + 1).is_none());
    }

    #[test]
    fn reward_splits_fees_with_the_pool() {
        let (reward, pool) = calculate_reward(1, 1_000, 0, TARGET_BLOCK_TIME);
        assert_eq!(pool, 200);
        assert_eq!(reward, BLOCK_REWARD_BASE + 800);

        // the pool releases a slice proportional to elapsed time
        let (reward2, pool2) = calculate_reward(1, 0, 10_000, TARGET_BLOCK_TIME);
        assert_eq!(reward2, BLOCK_REWARD_BASE + 100);
        assert_eq!(pool2, 9_900);
    }

    #[test]
    fn inflation_halves_on_schedule() {
        let (early, _) = calculate_reward(1, 0, 0, 0);
        let (late, _) = calculate_reward(REWARD_HALVING_INTERVAL, 0, 0, 0);
        assert_eq!(early, BLOCK_REWARD_BASE);
        assert_eq!(late, BLOCK_REWARD_BASE / 2);
    }
}
