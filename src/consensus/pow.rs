//! Proof-of-work search
//!
//! A hash is valid when, read as a big-endian 256-bit integer, it is below
//! `2^(256 - difficulty)`: i.e. it starts with `difficulty` zero bits. The
//! difficulty is fixed per chain; there is no retargeting.

use super::block::{unix_now, Block};
use crate::crypto::Hash;
use crate::mining::CancelToken;

/// Outcome of a nonce search
#[derive(Debug, Clone)]
pub enum MiningResult {
    /// A nonce satisfying the difficulty was found
    Solved(Block),
    /// The search was cancelled; the block is the last candidate tried
    Cancelled(Block),
}

impl MiningResult {
    pub fn is_solved(&self) -> bool {
        matches!(self, MiningResult::Solved(_))
    }

    pub fn block(&self) -> &Block {
        match self {
            MiningResult::Solved(block) | MiningResult::Cancelled(block) => block,
        }
    }

    pub fn into_block(self) -> Block {
        match self {
            MiningResult::Solved(block) | MiningResult::Cancelled(block) => block,
        }
    }
}

/// Hash, as an integer, is below 2^(256 - difficulty)
pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
    hash.leading_zero_bits() >= difficulty
}

/// Iterate nonces upward from the candidate's nonce until the hash meets the
/// header difficulty or `cancel` is raised
///
/// The token is checked before every attempt.
pub fn solve(mut block: Block, cancel: &CancelToken) -> MiningResult {
    loop {
        if cancel.is_cancelled() {
            return MiningResult::Cancelled(block);
        }

        let hash = block.header.hash();
        if meets_difficulty(&hash, block.header.difficulty) {
            block.hash = hash;
            return MiningResult::Solved(block);
        }

        block.header.nonce = block.header.nonce.wrapping_add(1);

        // Nonce space exhausted: refresh the timestamp to get a new search space
        if block.header.nonce == 0 {
            block.header.timestamp = unix_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    #[test]
    fn test_meets_difficulty() {
        let mut bytes = [0xFFu8; 32];
        bytes[0] = 0x00;
        bytes[1] = 0x0F;
        let hash = Hash(bytes);

        assert!(meets_difficulty(&hash, 12));
        assert!(!meets_difficulty(&hash, 13));
    }

    #[test]
    fn test_solve_finds_valid_nonce() {
        let candidate = Block::candidate(vec![], hash_bytes(b"parent"), 1, 8);
        let result = solve(candidate, &CancelToken::new());

        assert!(result.is_solved());
        let block = result.into_block();
        assert!(meets_difficulty(&block.hash, 8));
        assert_eq!(block.hash, block.header.hash());
    }

    #[test]
    fn test_solve_stops_when_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let candidate = Block::candidate(vec![], hash_bytes(b"parent"), 1, 200);
        assert!(!solve(candidate, &cancel).is_solved());
    }
}
