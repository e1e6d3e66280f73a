//! Ledger core library
//!
//! A single node's view of a proof-of-work ledger: an append-only block
//! store, the unspent-output index, signed UTXO transactions, a cancellable
//! miner and orphan-block reconciliation.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mining;
pub mod storage;
pub mod validation;
pub mod wallet;

/// Protocol constants
pub mod constants {
    /// Coinbase reward paid by every block (in base units)
    pub const BLOCK_REWARD: u64 = 10;

    /// Leading zero bits a block hash must carry
    pub const DEFAULT_DIFFICULTY: u32 = 20;

    /// Current block header version
    pub const BLOCK_VERSION: u32 = 1;

    /// Current transaction version
    pub const TX_VERSION: u32 = 1;

    /// Output index marking the null outpoint of a coinbase input
    pub const COINBASE_OUTPUT_INDEX: u32 = 0xFFFF_FFFF;

    /// Prefix of every encoded address
    pub const ADDRESS_PREFIX: &str = "LC";

    /// Upper bound on orphan blocks held in memory
    pub const DEFAULT_MAX_ORPHANS: usize = 100;

    /// Upper bound on hashes returned for a single peer request
    pub const MAX_BLOCK_HASHES: usize = 500;
}
