//! Storage module - block store, UTXO set and chain state management

pub mod db;
mod chain;
mod error;
mod iter;
mod orphan;
mod utxo;

pub use chain::*;
pub use db::{BlockChainDB, InsertOutcome};
pub use error::*;
pub use iter::ChainIter;
pub use orphan::OrphanPool;
pub use utxo::*;
