//! Chain store errors
//!
//! Not-found kinds are expected absences the caller may recover from;
//! storage, codec and corruption errors mean a broken invariant.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::Hash;
use crate::validation::TransactionError;
use crate::wallet::AddressError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("No blockchain found at {0}")]
    ChainNotFound(PathBuf),
    #[error("Blockchain already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("Chain has no blocks")]
    NoBlocks,
    #[error("Block {0} not found")]
    BlockNotFound(Hash),
    #[error("Transaction {0} not found")]
    TransactionNotFound(Hash),
    #[error("Invalid transaction {0}")]
    InvalidTransaction(Hash),
    #[error("Invalid block {hash}: {reason}")]
    InvalidBlock { hash: Hash, reason: String },
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("Corrupted store: {0}")]
    Corrupted(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Expected absence rather than a broken invariant
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChainError::ChainNotFound(_)
                | ChainError::NoBlocks
                | ChainError::BlockNotFound(_)
                | ChainError::TransactionNotFound(_)
        )
    }

    pub(crate) fn invalid_block(hash: Hash, reason: impl Into<String>) -> Self {
        ChainError::InvalidBlock {
            hash,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
