//! UTXO set implementation
//!
//! In-memory index of unspent transaction outputs. It is a materialized view
//! of the canonical chain: updated block by block while the chain extends,
//! rebuilt from a full scan whenever the tip is replaced.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::validation::{Transaction, TransactionError, TxOutput};

/// Key for UTXO lookup: (tx_hash, output_index)
pub type UTXOKey = (Hash, u32);

/// Unspent outputs grouped by transaction id
pub type UnspentOutputs = HashMap<Hash, BTreeMap<u32, TxOutput>>;

/// Set of all unspent transaction outputs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UTXOSet {
    utxos: HashMap<UTXOKey, TxOutput>,
}

/// Changes a block made to the set, for persisting
#[derive(Debug, Default)]
pub struct UTXODiff {
    pub spent: Vec<UTXOKey>,
    pub created: Vec<(UTXOKey, TxOutput)>,
}

impl UTXOSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the set from the result of a full chain scan
    pub fn from_unspent(unspent: UnspentOutputs) -> Self {
        let utxos = unspent
            .into_iter()
            .flat_map(|(tx_hash, outputs)| {
                outputs
                    .into_iter()
                    .map(move |(index, output)| ((tx_hash, index), output))
            })
            .collect();
        Self { utxos }
    }

    pub fn contains(&self, tx_hash: &Hash, output_index: u32) -> bool {
        self.utxos.contains_key(&(*tx_hash, output_index))
    }

    pub fn get(&self, tx_hash: &Hash, output_index: u32) -> Option<&TxOutput> {
        self.utxos.get(&(*tx_hash, output_index))
    }

    pub fn add(&mut self, tx_hash: Hash, output_index: u32, output: TxOutput) {
        self.utxos.insert((tx_hash, output_index), output);
    }

    /// Remove a UTXO (when spent)
    pub fn remove(&mut self, tx_hash: &Hash, output_index: u32) -> Option<TxOutput> {
        self.utxos.remove(&(*tx_hash, output_index))
    }

    /// Apply a block that extends the chain the set currently reflects
    ///
    /// Transactions are applied in block order, so a later transaction may
    /// spend an output created earlier in the same block.
    pub fn apply_block(&mut self, block: &Block) -> UTXODiff {
        let mut diff = UTXODiff::default();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = (input.prev_tx_hash, input.output_index);
                    if self.utxos.remove(&key).is_some() {
                        diff.created.retain(|(created, _)| *created != key);
                        diff.spent.push(key);
                    }
                }
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                let key = (tx.id, index as u32);
                self.utxos.insert(key, output.clone());
                diff.created.push((key, output.clone()));
            }
        }

        diff
    }

    /// Unspent outputs locked to `pubkey_hash`, with their keys
    pub fn get_by_pubkey_hash(&self, pubkey_hash: &Hash) -> Vec<(UTXOKey, &TxOutput)> {
        self.utxos
            .iter()
            .filter(|(_, output)| output.is_locked_with(pubkey_hash))
            .map(|(key, output)| (*key, output))
            .collect()
    }

    /// All unspent outputs addressed to `pubkey_hash`
    pub fn find_utxo(&self, pubkey_hash: &Hash) -> Vec<TxOutput> {
        self.utxos
            .values()
            .filter(|output| output.is_locked_with(pubkey_hash))
            .cloned()
            .collect()
    }

    /// Collect outputs of `pubkey_hash` until `amount` is covered
    ///
    /// Returns the accumulated value and the chosen keys; the value is below
    /// `amount` when the owner cannot afford it. Keys are taken in a stable
    /// order so repeated calls pick the same coins.
    pub fn find_spendable(&self, pubkey_hash: &Hash, amount: u64) -> (u64, Vec<UTXOKey>) {
        let mut owned = self.get_by_pubkey_hash(pubkey_hash);
        owned.sort_by_key(|(key, _)| *key);

        let mut accumulated = 0u64;
        let mut keys = Vec::new();
        for (key, output) in owned {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(output.amount);
            keys.push(key);
        }
        (accumulated, keys)
    }

    /// Value locked to `pubkey_hash`; `None` on overflow
    pub fn get_balance(&self, pubkey_hash: &Hash) -> Option<u64> {
        sum_amounts(self.utxos.values().filter(|output| output.is_locked_with(pubkey_hash)))
    }

    /// Sum of every unspent output; `None` on overflow
    pub fn total_value(&self) -> Option<u64> {
        sum_amounts(self.utxos.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UTXOKey, &TxOutput)> {
        self.utxos.iter()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

fn sum_amounts<'a>(mut outputs: impl Iterator<Item = &'a TxOutput>) -> Option<u64> {
    outputs.try_fold(0u64, |total, output| total.checked_add(output.amount))
}

/// Spends and new outputs of pending transactions layered over a [`UTXOSet`]
///
/// Transactions are checked and applied in order: an output spent by an
/// earlier transaction is gone for the later ones, and an output created
/// earlier may be spent later.
pub struct UTXOView<'a> {
    base: &'a UTXOSet,
    spent: HashSet<UTXOKey>,
    created: HashMap<UTXOKey, TxOutput>,
}

impl<'a> UTXOView<'a> {
    pub fn new(base: &'a UTXOSet) -> Self {
        Self {
            base,
            spent: HashSet::new(),
            created: HashMap::new(),
        }
    }

    pub fn get(&self, tx_hash: &Hash, output_index: u32) -> Option<&TxOutput> {
        let key = (*tx_hash, output_index);
        if self.spent.contains(&key) {
            return None;
        }
        self.created.get(&key).or_else(|| self.base.get(tx_hash, output_index))
    }

    /// Check `tx` against the view, then record its spends and outputs
    ///
    /// Every input must name a distinct unspent output, carry a valid
    /// signature for it, and the inputs must cover the outputs. A rejected
    /// transaction leaves the view untouched.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), TransactionError> {
        let outputs = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow(tx.id))?;

        if !tx.is_coinbase() {
            if tx.inputs.is_empty() {
                return Err(TransactionError::NoInputs);
            }

            let mut consumed = HashSet::new();
            let mut inputs = 0u64;
            for input in &tx.inputs {
                let key = (input.prev_tx_hash, input.output_index);
                let output = self
                    .get(&key.0, key.1)
                    .filter(|_| consumed.insert(key))
                    .ok_or(TransactionError::OutputNotUnspent { tx: key.0, index: key.1 })?;
                inputs = inputs
                    .checked_add(output.amount)
                    .ok_or(TransactionError::ValueOverflow(tx.id))?;
            }

            if !tx.verify_inputs(|input| self.get(&input.prev_tx_hash, input.output_index)) {
                return Err(TransactionError::InvalidSignature);
            }
            if inputs < outputs {
                return Err(TransactionError::InsufficientInputs { inputs, outputs });
            }

            for key in consumed {
                if self.created.remove(&key).is_none() {
                    self.spent.insert(key);
                }
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            self.created.insert((tx.id, index as u32), output.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use crate::validation::{Transaction, TxInput};

    fn make_hash(s: &str) -> Hash {
        hash_bytes(s.as_bytes())
    }

    #[test]
    fn test_utxo_add_and_get() {
        let mut set = UTXOSet::new();
        let tx_hash = make_hash("tx1");
        set.add(tx_hash, 0, TxOutput::new(100, make_hash("owner")));

        assert!(set.contains(&tx_hash, 0));
        assert!(!set.contains(&tx_hash, 1));
        assert_eq!(set.get(&tx_hash, 0).unwrap().amount, 100);
    }

    #[test]
    fn test_utxo_remove() {
        let mut set = UTXOSet::new();
        let tx_hash = make_hash("tx1");
        set.add(tx_hash, 0, TxOutput::new(100, make_hash("owner")));

        assert!(set.remove(&tx_hash, 0).is_some());
        assert!(!set.contains(&tx_hash, 0));
    }

    #[test]
    fn test_get_balance() {
        let mut set = UTXOSet::new();
        let owner = make_hash("owner");
        set.add(make_hash("tx1"), 0, TxOutput::new(100, owner));
        set.add(make_hash("tx2"), 0, TxOutput::new(200, owner));
        set.add(make_hash("tx3"), 0, TxOutput::new(50, make_hash("other")));

        assert_eq!(set.get_balance(&owner), Some(300));
        assert_eq!(set.find_utxo(&owner).len(), 2);
        assert_eq!(set.total_value(), Some(350));
    }

    #[test]
    fn test_totals_report_overflow() {
        let mut set = UTXOSet::new();
        let owner = make_hash("owner");
        set.add(make_hash("tx1"), 0, TxOutput::new(u64::MAX, owner));
        set.add(make_hash("tx2"), 0, TxOutput::new(11, owner));

        assert_eq!(set.get_balance(&owner), None);
        assert_eq!(set.total_value(), None);
    }

    #[test]
    fn test_find_spendable_stops_when_covered() {
        let mut set = UTXOSet::new();
        let owner = make_hash("owner");
        for i in 0..5u32 {
            set.add(make_hash("tx"), i, TxOutput::new(10, owner));
        }

        let (value, keys) = set.find_spendable(&owner, 25);
        assert_eq!(value, 30);
        assert_eq!(keys.len(), 3);

        let (value, _) = set.find_spendable(&owner, 500);
        assert_eq!(value, 50);
    }

    #[test]
    fn test_apply_block_spends_within_block() {
        let miner = make_hash("miner");
        let coinbase = Transaction::coinbase(10, miner, 1);
        let spend = Transaction::new(
            vec![TxInput::new(coinbase.id, 0)],
            vec![TxOutput::new(10, make_hash("bob"))],
        );
        let block = Block::candidate(vec![coinbase.clone(), spend.clone()], Hash::zero(), 0, 8);

        let mut set = UTXOSet::new();
        let diff = set.apply_block(&block);

        assert!(!set.contains(&coinbase.id, 0));
        assert!(set.contains(&spend.id, 0));
        assert_eq!(set.get_balance(&miner), Some(0));
        assert_eq!(diff.created, vec![((spend.id, 0), TxOutput::new(10, make_hash("bob")))]);
        assert_eq!(diff.spent, vec![(coinbase.id, 0)]);
    }

    #[test]
    fn test_from_unspent() {
        let owner = make_hash("owner");
        let mut unspent = UnspentOutputs::new();
        unspent
            .entry(make_hash("tx1"))
            .or_default()
            .insert(1, TxOutput::new(7, owner));

        let set = UTXOSet::from_unspent(unspent);
        assert!(set.contains(&make_hash("tx1"), 1));
        assert_eq!(set.get_balance(&owner), Some(7));
    }

    mod view {
        use super::super::{UTXOSet, UTXOView};
        use super::make_hash;
        use crate::crypto::PrivateKey;
        use crate::validation::{Transaction, TransactionError, TxInput, TxOutput};
        use std::collections::HashMap;

        struct Funded {
            key: PrivateKey,
            set: UTXOSet,
            coinbase: Transaction,
        }

        fn funded(amount: u64) -> Funded {
            let key = PrivateKey::generate();
            let coinbase = Transaction::coinbase(amount, key.public_key().pubkey_hash(), 0);
            let mut set = UTXOSet::new();
            set.add(coinbase.id, 0, coinbase.outputs[0].clone());
            Funded { key, set, coinbase }
        }

        fn signed_spend(funded: &Funded, prev: &Transaction, amount: u64, to: &str) -> Transaction {
            let mut tx = Transaction::new(
                vec![TxInput::new(prev.id, 0)],
                vec![TxOutput::new(amount, make_hash(to))],
            );
            tx.sign(&funded.key, &HashMap::from([(prev.id, prev.clone())])).unwrap();
            tx
        }

        #[test]
        fn test_spend_within_inputs() {
            let f = funded(10);
            let tx = signed_spend(&f, &f.coinbase, 7, "bob");

            let mut view = UTXOView::new(&f.set);
            view.apply_transaction(&tx).unwrap();
            assert!(view.get(&f.coinbase.id, 0).is_none());
            assert_eq!(view.get(&tx.id, 0).unwrap().amount, 7);
            assert!(f.set.contains(&f.coinbase.id, 0));
        }

        #[test]
        fn test_overspend_rejected() {
            let f = funded(10);
            let tx = signed_spend(&f, &f.coinbase, 1_000_000, "bob");

            let mut view = UTXOView::new(&f.set);
            assert_eq!(
                view.apply_transaction(&tx),
                Err(TransactionError::InsufficientInputs {
                    inputs: 10,
                    outputs: 1_000_000
                })
            );
            assert!(view.get(&f.coinbase.id, 0).is_some());
        }

        #[test]
        fn test_second_spend_of_outpoint_rejected() {
            let f = funded(10);
            let to_bob = signed_spend(&f, &f.coinbase, 10, "bob");
            let to_eve = signed_spend(&f, &f.coinbase, 10, "eve");

            let mut view = UTXOView::new(&f.set);
            view.apply_transaction(&to_bob).unwrap();
            assert_eq!(
                view.apply_transaction(&to_eve),
                Err(TransactionError::OutputNotUnspent {
                    tx: f.coinbase.id,
                    index: 0
                })
            );
        }

        #[test]
        fn test_repeated_input_rejected() {
            let f = funded(10);
            let mut tx = Transaction::new(
                vec![TxInput::new(f.coinbase.id, 0), TxInput::new(f.coinbase.id, 0)],
                vec![TxOutput::new(20, make_hash("bob"))],
            );
            tx.sign(&f.key, &HashMap::from([(f.coinbase.id, f.coinbase.clone())])).unwrap();

            let mut view = UTXOView::new(&f.set);
            assert!(matches!(
                view.apply_transaction(&tx),
                Err(TransactionError::OutputNotUnspent { .. })
            ));
        }

        #[test]
        fn test_chained_spend_in_same_batch() {
            let f = funded(10);
            let mut first = Transaction::new(
                vec![TxInput::new(f.coinbase.id, 0)],
                vec![TxOutput::new(10, f.key.public_key().pubkey_hash())],
            );
            first.sign(&f.key, &HashMap::from([(f.coinbase.id, f.coinbase.clone())])).unwrap();
            let second = signed_spend(&f, &first, 10, "carol");

            let mut view = UTXOView::new(&f.set);
            view.apply_transaction(&first).unwrap();
            view.apply_transaction(&second).unwrap();
            assert!(view.get(&first.id, 0).is_none());
            assert_eq!(view.get(&second.id, 0).unwrap().amount, 10);
        }

        #[test]
        fn test_bad_signature_rejected() {
            let f = funded(10);
            let mut tx = signed_spend(&f, &f.coinbase, 10, "bob");
            tx.outputs[0].pubkey_hash = make_hash("mallory");

            let mut view = UTXOView::new(&f.set);
            assert_eq!(view.apply_transaction(&tx), Err(TransactionError::InvalidSignature));
        }

        #[test]
        fn test_coinbase_overflow_rejected() {
            let set = UTXOSet::new();
            let mut coinbase = Transaction::coinbase(u64::MAX, make_hash("miner"), 1);
            coinbase.outputs.push(TxOutput::new(11, make_hash("miner")));
            coinbase.finalize();

            let mut view = UTXOView::new(&set);
            assert_eq!(
                view.apply_transaction(&coinbase),
                Err(TransactionError::ValueOverflow(coinbase.id))
            );
        }
    }
}
