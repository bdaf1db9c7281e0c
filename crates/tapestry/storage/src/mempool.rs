//! Transaction replay pool.
//!
//! Pending transactions are re-validated against the candidate every time
//! the tx set is rebuilt: a tx stays eligible only while its anchor is
//! recent, it has not already been mined, and its owner can still fund it.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use tapestry_protocol::block::Tx;
use tapestry_protocol::constants::BLOCK_TX_COUNT_LIMIT;
use tracing::trace;

use crate::wallets::WalletStore;

/// Everything the pool needs to decide which pending txs may replay on
/// top of the tip.
pub struct PickContext<'a> {
    /// Acceptable anchors: recent block hashes and wallet last-tx ids.
    pub anchors: &'a HashSet<B256>,
    /// Ids already included in recent blocks.
    pub recent_txs: &'a HashSet<B256>,
    pub height: u64,
    pub diff: U256,
    pub timestamp: u64,
    pub wallets: &'a WalletStore,
}

/// Pending transactions waiting for a block.
#[derive(Debug, Clone, Default)]
pub struct TxReplayPool {
    pending: Vec<Tx>,
}

impl TxReplayPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_txs(pending: Vec<Tx>) -> Self {
        Self { pending }
    }

    pub fn submit(&mut self, tx: Tx) {
        self.pending.push(tx);
    }

    /// Replace the pending set wholesale.
    pub fn replace(&mut self, pending: Vec<Tx>) {
        self.pending = pending;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Choose the transactions to include: anchored, not yet mined, and
    /// funded after every earlier pick from the same owner; ordered
    /// fee-descending and capped at the block tx limit.
    pub fn pick(&self, ctx: &PickContext<'_>) -> Vec<Tx> {
        let mut candidates: Vec<&Tx> = self
            .pending
            .iter()
            .filter(|tx| ctx.anchors.contains(&tx.last_tx))
            .filter(|tx| !ctx.recent_txs.contains(&tx.id))
            .collect();
        candidates.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.id.cmp(&b.id)));

        let mut remaining: HashMap<Address, u64> = HashMap::new();
        let mut picked = Vec::new();
        for tx in candidates {
            if picked.len() == BLOCK_TX_COUNT_LIMIT {
                break;
            }
            let balance = remaining.entry(tx.owner).or_insert_with(|| {
                ctx.wallets
                    .get(&tx.owner)
                    .map(|wallet| wallet.balance)
                    .unwrap_or_default()
            });
            let required = tx.quantity.saturating_add(tx.fee);
            if *balance < required {
                trace!(id = %tx.id, owner = %tx.owner, "tx dropped: underfunded");
                continue;
            }
            *balance -= required;
            picked.push(tx.clone());
        }
        picked
    }

    /// Drop transactions mined into a block.
    pub fn remove_mined(&mut self, ids: &[B256]) {
        let mined: HashSet<&B256> = ids.iter().collect();
        self.pending.retain(|tx| !mined.contains(&tx.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallets::Wallet;

    fn tx(id: u8, owner: Address, fee: u64, anchor: B256) -> Tx {
        Tx {
            id: B256::repeat_byte(id),
            owner,
            target: None,
            quantity: 0,
            fee,
            data_size: 0,
            data_root: B256::ZERO,
            last_tx: anchor,
        }
    }

    fn context<'a>(
        anchors: &'a HashSet<B256>,
        recent: &'a HashSet<B256>,
        wallets: &'a WalletStore,
    ) -> PickContext<'a> {
        PickContext {
            anchors,
            recent_txs: recent,
            height: 1,
            diff: U256::from(1u8),
            timestamp: 1000,
            wallets,
        }
    }

    #[test]
    fn picks_anchored_funded_txs_by_descending_fee() {
        let anchor = B256::repeat_byte(0xaa);
        let anchors = HashSet::from([anchor]);
        let recent = HashSet::new();
        let owner = Address::repeat_byte(1);

        let mut wallets = WalletStore::new();
        wallets.add_wallet(
            owner,
            Wallet {
                balance: 100,
                last_tx: B256::ZERO,
            },
        );

        let mut pool = TxReplayPool::new();
        pool.submit(tx(1, owner, 10, anchor));
        pool.submit(tx(2, owner, 30, anchor));
        pool.submit(tx(3, owner, 20, B256::repeat_byte(0xbb))); // unanchored

        let picked = pool.pick(&context(&anchors, &recent, &wallets));
        let fees: Vec<u64> = picked.iter().map(|tx| tx.fee).collect();
        assert_eq!(fees, vec![30, 10]);
    }

    #[test]
    fn replayed_txs_are_excluded() {
        let anchor = B256::repeat_byte(0xaa);
        let anchors = HashSet::from([anchor]);
        let recent = HashSet::from([B256::repeat_byte(1)]);
        let owner = Address::repeat_byte(1);

        let mut wallets = WalletStore::new();
        wallets.add_wallet(
            owner,
            Wallet {
                balance: 100,
                last_tx: B256::ZERO,
            },
        );

        let mut pool = TxReplayPool::new();
        pool.submit(tx(1, owner, 10, anchor));
        assert!(pool.pick(&context(&anchors, &recent, &wallets)).is_empty());
    }

    #[test]
    fn owner_balance_bounds_the_pick() {
        let anchor = B256::repeat_byte(0xaa);
        let anchors = HashSet::from([anchor]);
        let recent = HashSet::new();
        let owner = Address::repeat_byte(1);

        let mut wallets = WalletStore::new();
        wallets.add_wallet(
            owner,
            Wallet {
                balance: 35,
                last_tx: B256::ZERO,
            },
        );

        let mut pool = TxReplayPool::new();
        pool.submit(tx(1, owner, 30, anchor));
        pool.submit(tx(2, owner, 30, anchor));

        // only one of the two fits the owner's balance
        assert_eq!(pool.pick(&context(&anchors, &recent, &wallets)).len(), 1);
    }

    #[test]
    fn remove_mined_drops_by_id() {
        let mut pool = TxReplayPool::new();
        pool.submit(tx(1, Address::ZERO, 1, B256::ZERO));
        pool.submit(tx(2, Address::ZERO, 1, B256::ZERO));
        pool.remove_mined(&[B256::repeat_byte(1)]);
        assert_eq!(pool.len(), 1);
    }
}
