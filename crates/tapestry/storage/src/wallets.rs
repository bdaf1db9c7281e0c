//! Wallet-list storage.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use sha2::{Digest, Sha256};
use tapestry_protocol::block::Tx;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("unknown wallet {0}")]
    UnknownWallet(Address),
    #[error("insufficient balance in {owner}: {balance} < {required}")]
    InsufficientBalance {
        owner: Address,
        balance: u64,
        required: u64,
    },
}

/// A single wallet: spendable balance plus the owner's last tx anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wallet {
    pub balance: u64,
    pub last_tx: B256,
}

/// In-memory wallet list, ordered by address so the root is canonical.
#[derive(Debug, Clone, Default)]
pub struct WalletStore {
    wallets: BTreeMap<Address, Wallet>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<Wallet> {
        self.wallets.get(address).copied()
    }

    pub fn add_wallet(&mut self, address: Address, wallet: Wallet) {
        self.wallets.insert(address, wallet);
    }

    /// Snapshot of the named wallets.
    pub fn get_many(&self, addresses: &[Address]) -> BTreeMap<Address, Wallet> {
        addresses
            .iter()
            .filter_map(|address| self.get(address).map(|wallet| (*address, wallet)))
            .collect()
    }

    /// Whether `tx` is spendable against this snapshot.
    pub fn can_afford(&self, tx: &Tx) -> bool {
        self.get(&tx.owner)
            .is_some_and(|wallet| wallet.balance >= tx.quantity.saturating_add(tx.fee))
    }

    /// Apply `txs` in order: debit `quantity + fee` from the owner, move
    /// the owner's anchor forward, credit the target.
    pub fn apply_txs(&mut self, txs: &[Tx]) -> Result<(), WalletError> {
        for tx in txs {
            let required = tx.quantity.saturating_add(tx.fee);
            let owner = self
                .wallets
                .get_mut(&tx.owner)
                .ok_or(WalletError::UnknownWallet(tx.owner))?;
            if owner.balance < required {
                return Err(WalletError::InsufficientBalance {
                    owner: tx.owner,
                    balance: owner.balance,
                    required,
                });
            }
            owner.balance -= required;
            owner.last_tx = tx.id;
            if let Some(target) = tx.target {
                self.wallets.entry(target).or_default().balance += tx.quantity;
            }
        }
        Ok(())
    }

    /// Credit the mining reward to `address`, creating the wallet if
    /// needed.
    pub fn apply_mining_reward(&mut self, address: Address, reward: u64) {
        self.wallets.entry(address).or_default().balance += reward;
    }

    /// SHA-256 over the ordered wallet list.
    pub fn root(&self) -> B256 {
        let mut hasher = Sha256::new();
        for (address, wallet) in &self.wallets {
            hasher.update(address.as_slice());
            hasher.update(wallet.balance.to_be_bytes());
            hasher.update(wallet.last_tx.as_slice());
        }
        B256::from_slice(&hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(owner: Address, target: Option<Address>, quantity: u64, fee: u64) -> Tx {
        Tx {
            id: B256::repeat_byte(0x11),
            owner,
            target,
            quantity,
            fee,
            data_size: 0,
            data_root: B256::ZERO,
            last_tx: B256::ZERO,
        }
    }

    #[test]
    fn transfers_move_quantity_and_burn_the_fee() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let mut store = WalletStore::new();
        store.add_wallet(
            alice,
            Wallet {
                balance: 100,
                last_tx: B256::ZERO,
            },
        );

        store.apply_txs(&[tx(alice, Some(bob), 60, 10)]).unwrap();
        assert_eq!(store.get(&alice).unwrap().balance, 30);
        assert_eq!(store.get(&alice).unwrap().last_tx, B256::repeat_byte(0x11));
        assert_eq!(store.get(&bob).unwrap().balance, 60);
    }

    #[test]
    fn overspend_is_rejected() {
        let alice = Address::repeat_byte(1);
        let mut store = WalletStore::new();
        store.add_wallet(
            alice,
            Wallet {
                balance: 50,
                last_tx: B256::ZERO,
            },
        );
        let err = store.apply_txs(&[tx(alice, None, 60, 10)]).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientBalance {
                owner: alice,
                balance: 50,
                required: 70,
            }
        );
    }

    #[test]
    fn root_is_order_independent_and_content_sensitive() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let wallet = Wallet {
            balance: 5,
            last_tx: B256::ZERO,
        };

        let mut forward = WalletStore::new();
        forward.add_wallet(alice, wallet);
        forward.add_wallet(bob, wallet);

        let mut backward = WalletStore::new();
        backward.add_wallet(bob, wallet);
        backward.add_wallet(alice, wallet);

        assert_eq!(forward.root(), backward.root());

        backward.apply_mining_reward(alice, 1);
        assert_ne!(forward.root(), backward.root());
    }
}
