//! Pending transactions waiting to be mined

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::crypto::Hash;
use crate::validation::Transaction;

/// Transactions announced to this node but not yet in a block
///
/// Admission does no verification; the miner checks every transaction
/// against the chain when it assembles a candidate.
#[derive(Debug, Default)]
pub struct Mempool {
    pending: Mutex<HashMap<Hash, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tx`; returns false if it was already pending
    pub fn insert(&self, tx: Transaction) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&tx.id) {
            return false;
        }
        pending.insert(tx.id, tx);
        true
    }

    pub fn remove(&self, id: &Hash) -> Option<Transaction> {
        self.pending.lock().remove(id)
    }

    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a Hash>) {
        let mut pending = self.pending.lock();
        for id in ids {
            pending.remove(id);
        }
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Copy of the pending transactions, ordered by id
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.pending.lock().values().cloned().collect();
        txs.sort_by_key(|tx| tx.id);
        txs
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
