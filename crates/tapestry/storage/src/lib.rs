//! Tapestry Storage
//!
//! The storage collaborators the mining core runs against: the chunked
//! weave (primary store plus optional secondary data index), the wallet
//! list, and the transaction replay pool.
//!
//! Production nodes put RocksDB behind [`ChunkStore`]; the in-memory
//! implementations here back development networks and tests.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod chunks;
pub mod mempool;
pub mod wallets;

pub use chunks::{ChunkStore, MemoryChunkStore, WeaveReader};
pub use mempool::{PickContext, TxReplayPool};
pub use wallets::{Wallet, WalletError, WalletStore};
