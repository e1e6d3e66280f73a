//! Database persistence layer using Sled
//!
//! The `blocks` tree maps block hashes to encoded blocks and holds the tip
//! under a reserved key, so a block and the tip move in one transaction.
//! The `utxos` tree persists the cached unspent-output set.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Tree};
use std::path::Path;

use super::error::{ChainError, Result};
use super::{UTXOKey, UTXOSet};
use crate::config::ChainConfig;
use crate::consensus::Block;
use crate::crypto::Hash;
use crate::validation::TxOutput;

/// Reserved key holding the tip hash; block keys are always 32 bytes
const TIP_KEY: &[u8] = b"l";

/// Result of writing a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block was already stored; nothing changed
    Duplicate,
    /// Stored, but below the current best height
    Stored,
    /// Stored and now the tip; `previous` is the replaced tip
    TipAdvanced { previous: Option<Hash> },
}

/// Database wrapper
#[derive(Debug, Clone)]
pub struct BlockChainDB {
    db: Db,
    blocks_tree: Tree,
    utxos_tree: Tree,
}

fn utxo_key((tx_hash, index): &UTXOKey) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&tx_hash.0);
    key[32..].copy_from_slice(&index.to_le_bytes());
    key
}

fn abort(err: ChainError) -> ConflictableTransactionError<ChainError> {
    ConflictableTransactionError::Abort(err)
}

impl BlockChainDB {
    /// Whether a database already lives at `path`
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join("db").exists() || path.as_ref().join("conf").exists()
    }

    /// Open or create the database described by `config`
    pub fn open(config: &ChainConfig) -> Result<Self> {
        let db = if config.temporary {
            sled::Config::new().temporary(true).open()?
        } else {
            sled::open(&config.data_dir)?
        };
        let blocks_tree = db.open_tree("blocks")?;
        let utxos_tree = db.open_tree("utxos")?;

        Ok(Self {
            db,
            blocks_tree,
            utxos_tree,
        })
    }

    /// Store `block` and, if it is at least as high as the current tip,
    /// make it the tip; both writes commit together
    pub fn insert_block(&self, block: &Block) -> Result<InsertOutcome> {
        let key = block.hash;
        let value = block.serialize()?;
        let height = block.height();

        let outcome = self
            .blocks_tree
            .transaction(|tree| {
                if tree.get(&key.0[..])?.is_some() {
                    return Ok(InsertOutcome::Duplicate);
                }
                tree.insert(&key.0[..], value.as_slice())?;

                let previous = match tree.get(TIP_KEY)? {
                    Some(raw) => Some(
                        Hash::from_slice(&raw)
                            .ok_or_else(|| abort(ChainError::Corrupted("tip key is not a hash".into())))?,
                    ),
                    None => None,
                };

                let best_height = match previous {
                    Some(tip) => {
                        let raw = tree.get(&tip.0[..])?.ok_or_else(|| {
                            abort(ChainError::Corrupted(format!("tip block {tip} is missing")))
                        })?;
                        Some(Block::deserialize(&raw).map_err(|e| abort(e.into()))?.height())
                    }
                    None => None,
                };

                if best_height.map_or(true, |best| height >= best) {
                    tree.insert(TIP_KEY, &key.0[..])?;
                    Ok(InsertOutcome::TipAdvanced { previous })
                } else {
                    Ok(InsertOutcome::Stored)
                }
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => ChainError::Storage(err),
            })?;

        if outcome != InsertOutcome::Duplicate {
            self.db.flush()?;
        }
        Ok(outcome)
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.blocks_tree.get(hash.0)? {
            Some(bytes) => Ok(Some(Block::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.blocks_tree.contains_key(hash.0)?)
    }

    /// Hash of the persisted tip
    pub fn tip(&self) -> Result<Option<Hash>> {
        match self.blocks_tree.get(TIP_KEY)? {
            Some(raw) => Hash::from_slice(&raw)
                .map(Some)
                .ok_or_else(|| ChainError::Corrupted("tip key is not a hash".into())),
            None => Ok(None),
        }
    }

    /// The persisted tip block
    pub fn tip_block(&self) -> Result<Option<Block>> {
        match self.tip()? {
            Some(tip) => self
                .get_block(&tip)?
                .map(Some)
                .ok_or_else(|| ChainError::Corrupted(format!("tip block {tip} is missing"))),
            None => Ok(None),
        }
    }

    /// Point the tip at `tip`, or clear it
    pub fn set_tip(&self, tip: Option<Hash>) -> Result<()> {
        match tip {
            Some(hash) => self.blocks_tree.insert(TIP_KEY, &hash.0[..])?,
            None => self.blocks_tree.remove(TIP_KEY)?,
        };
        self.db.flush()?;
        Ok(())
    }

    /// Persist a differential UTXO update
    pub fn update_utxos(&self, spent: &[UTXOKey], created: &[(UTXOKey, TxOutput)]) -> Result<()> {
        let mut batch = Batch::default();
        for key in spent {
            batch.remove(&utxo_key(key)[..]);
        }
        for (key, output) in created {
            batch.insert(&utxo_key(key)[..], bincode::serialize(output)?);
        }
        self.utxos_tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Replace the persisted UTXO set wholesale
    pub fn replace_utxos(&self, set: &UTXOSet) -> Result<()> {
        let mut batch = Batch::default();
        for item in self.utxos_tree.iter() {
            let (key, _) = item?;
            batch.remove(key);
        }
        for (key, output) in set.iter() {
            batch.insert(&utxo_key(key)[..], bincode::serialize(output)?);
        }
        self.utxos_tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Load the entire UTXO set
    pub fn load_utxo_set(&self) -> Result<UTXOSet> {
        let mut set = UTXOSet::new();

        for item in self.utxos_tree.iter() {
            let (key, value) = item?;
            if key.len() != 36 {
                return Err(ChainError::Corrupted(format!("utxo key of {} bytes", key.len())));
            }

            let tx_hash = Hash::from_slice(&key[..32])
                .ok_or_else(|| ChainError::Corrupted("utxo key prefix".into()))?;
            let mut idx_bytes = [0u8; 4];
            idx_bytes.copy_from_slice(&key[32..]);
            let output: TxOutput = bincode::deserialize(&value)?;

            set.add(tx_hash, u32::from_le_bytes(idx_bytes), output);
        }

        Ok(set)
    }
}
