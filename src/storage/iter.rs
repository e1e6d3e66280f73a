use super::db::BlockChainDB;
use super::error::{ChainError, Result};
use crate::consensus::Block;
use crate::crypto::Hash;

/// Iterator over the blockchain from a starting hash back to genesis.
///
/// The position is captured when the iterator is built; blocks are immutable
/// once stored, so traversal needs no chain lock. A fresh iterator restarts
/// from the tip.
#[derive(Debug, Clone)]
pub struct ChainIter {
    db: BlockChainDB,
    current: Option<Hash>,
}

impl ChainIter {
    pub(crate) fn new(db: BlockChainDB, start: Option<Hash>) -> Self {
        Self { db, current: start }
    }

    /// Move the cursor to `hash` instead of the tip.
    pub fn location_hash(&mut self, hash: &Hash) -> Result<()> {
        if !self.db.contains_block(hash)? {
            return Err(ChainError::BlockNotFound(*hash));
        }
        self.current = Some(*hash);
        Ok(())
    }

    /// Hash of the block the next call to `next` will return.
    pub fn position(&self) -> Option<Hash> {
        self.current
    }
}

impl Iterator for ChainIter {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.db.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.current = Some(block.header.prev_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(ChainError::BlockNotFound(hash))),
            Err(err) => Some(Err(err)),
        }
    }
}
