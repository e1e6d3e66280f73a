//! Block structure
//!
//! A block is a header, the transactions it commits to, and the header hash
//! fixed once the proof-of-work search succeeds.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::pow::{self, MiningResult};
use crate::constants::{BLOCK_REWARD, BLOCK_VERSION};
use crate::crypto::{compute_merkle_root, Hash};
use crate::mining::CancelToken;
use crate::validation::Transaction;

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block (zero for genesis)
    pub prev_hash: Hash,
    /// Merkle root of all transaction ids
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Distance from genesis
    pub height: u64,
    /// Required leading zero bits of the block hash
    pub difficulty: u32,
    /// Nonce used for PoW
    pub nonce: u64,
}

impl BlockHeader {
    /// Serialize the header for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(96);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        crate::crypto::hash_bytes(&self.to_bytes())
    }
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Header hash; valid only once the nonce search has finished
    pub hash: Hash,
    /// Block header
    pub header: BlockHeader,
    /// List of transactions in this block
    pub transactions: Vec<Transaction>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Block {
    /// Unsolved candidate at nonce 0
    pub fn candidate(
        transactions: Vec<Transaction>,
        prev_hash: Hash,
        height: u64,
        difficulty: u32,
    ) -> Self {
        let tx_ids: Vec<Hash> = transactions.iter().map(|tx| tx.id).collect();
        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_hash,
            merkle_root: compute_merkle_root(&tx_ids),
            timestamp: unix_now(),
            height,
            difficulty,
            nonce: 0,
        };

        Self {
            hash: header.hash(),
            header,
            transactions,
        }
    }

    /// Assemble a block on `prev_hash` and search for a valid nonce
    ///
    /// Returns [`MiningResult::Cancelled`] with the partial candidate as soon
    /// as `cancel` is raised.
    pub fn mine(
        transactions: Vec<Transaction>,
        prev_hash: Hash,
        height: u64,
        difficulty: u32,
        cancel: &CancelToken,
    ) -> MiningResult {
        pow::solve(Self::candidate(transactions, prev_hash, height, difficulty), cancel)
    }

    /// Height-0 block paying the fixed reward to `reward_pubkey_hash`
    ///
    /// Genesis goes through the same nonce search as every other block.
    pub fn genesis(reward_pubkey_hash: Hash, difficulty: u32) -> Self {
        let coinbase = Transaction::coinbase(BLOCK_REWARD, reward_pubkey_hash, 0);
        match Self::mine(vec![coinbase], Hash::zero(), 0, difficulty, &CancelToken::new()) {
            MiningResult::Solved(block) | MiningResult::Cancelled(block) => block,
        }
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_zero()
    }

    /// Stored hash matches the header and meets the header's difficulty
    pub fn has_valid_pow(&self) -> bool {
        self.hash == self.header.hash() && pow::meets_difficulty(&self.hash, self.header.difficulty)
    }

    /// Header commits to exactly these transactions, in this order
    pub fn has_valid_merkle_root(&self) -> bool {
        let tx_ids: Vec<Hash> = self.transactions.iter().map(|tx| tx.id).collect();
        compute_merkle_root(&tx_ids) == self.header.merkle_root
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
