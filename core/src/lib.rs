pub mod block;
pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod resolver;
pub mod store;
pub mod transaction;

// Explicit re-exports to avoid ambiguous glob re-exports
pub use block::{Block, BlockHeader, HeaderSummary, compute_header_hash, compute_merkle_root};
pub use blockchain::Blockchain;
pub use crypto::WalletKeypair;
pub use error::{LedgerError, Result};
pub use mempool::Mempool;
pub use resolver::{HttpPeerClient, PeerClient, Resolution, find_longest_valid_chain};
pub use store::{ChainStore, JsonFileStore, MemoryStore};
pub use transaction::Transaction;
