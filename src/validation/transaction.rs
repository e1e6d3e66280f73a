//! Transaction structure, signing and verification
//!
//! UTXO-based transactions with Schnorr signatures. A transaction id covers
//! outpoints and outputs but never the unlock fields, so signing does not
//! change it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::constants::{COINBASE_OUTPUT_INDEX, TX_VERSION};
use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature};

/// Transaction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Prior transaction {0} is missing")]
    PriorTransactionMissing(Hash),
    #[error("Transaction {tx} has no output {index}")]
    OutputIndexOutOfRange { tx: Hash, index: u32 },
    #[error("Output {index} of {tx} is missing or already spent")]
    OutputNotUnspent { tx: Hash, index: u32 },
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Input signature does not match the spent output")]
    InvalidSignature,
    #[error("Amounts in transaction {0} overflow")]
    ValueOverflow(Hash),
    #[error("Outputs worth {outputs} exceed inputs worth {inputs}")]
    InsufficientInputs { inputs: u64, outputs: u64 },
}

/// A transaction input referencing a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction containing the output
    pub prev_tx_hash: Hash,
    /// Index of the output in that transaction
    pub output_index: u32,
    /// Signature proving ownership
    pub signature: SchnorrSignature,
    /// Public key of the signer
    pub public_key: PublicKey,
}

impl TxInput {
    /// Unsigned input spending `(prev_tx_hash, output_index)`
    pub fn new(prev_tx_hash: Hash, output_index: u32) -> Self {
        Self {
            prev_tx_hash,
            output_index,
            signature: SchnorrSignature::empty(),
            public_key: PublicKey::empty(),
        }
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units
    pub amount: u64,
    /// Locking key: hash of the owner's public key
    pub pubkey_hash: Hash,
}

impl TxOutput {
    pub fn new(amount: u64, pubkey_hash: Hash) -> Self {
        Self { amount, pubkey_hash }
    }

    pub fn is_locked_with(&self, pubkey_hash: &Hash) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content-addressed id, fixed by [`Transaction::finalize`]
    pub id: Hash,
    /// Transaction version
    pub version: u32,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
    /// Distinguishes otherwise identical transactions; coinbases carry the block height
    pub nonce: u64,
}

impl Transaction {
    /// Create a finalized, unsigned transaction
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash::zero(),
            version: TX_VERSION,
            inputs,
            outputs,
            nonce: 0,
        };
        tx.finalize();
        tx
    }

    /// Create a coinbase transaction paying `reward` to `pubkey_hash`
    pub fn coinbase(reward: u64, pubkey_hash: Hash, height: u64) -> Self {
        let mut tx = Self {
            id: Hash::zero(),
            version: TX_VERSION,
            inputs: vec![TxInput::new(Hash::zero(), COINBASE_OUTPUT_INDEX)],
            outputs: vec![TxOutput::new(reward, pubkey_hash)],
            nonce: height,
        };
        tx.finalize();
        tx
    }

    /// Exactly one input, pointing at the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_hash.is_zero()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// Digest of the content this transaction commits to
    pub fn compute_id(&self) -> Hash {
        hash_bytes(&self.content_bytes())
    }

    /// Recompute and fix the id; call after any change to inputs or outputs
    pub fn finalize(&mut self) {
        self.id = self.compute_id();
    }

    /// Serialized content with every unlock field left out
    fn content_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.inputs.len() * 36 + self.outputs.len() * 40);

        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prev_tx_hash.0);
            bytes.extend_from_slice(&input.output_index.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&output.pubkey_hash.0);
        }

        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Digest signed by input `index`
    ///
    /// Covers the redacted transaction (no signatures or public keys on any
    /// input), the input position and the locking key of the spent output.
    pub fn signing_digest(&self, index: usize, locking_key: &Hash) -> Hash {
        let mut bytes = self.content_bytes();
        bytes.extend_from_slice(&(index as u32).to_le_bytes());
        bytes.extend_from_slice(&locking_key.0);
        hash_bytes(&bytes)
    }

    fn referenced_output<'a>(
        input: &TxInput,
        prior: &'a HashMap<Hash, Transaction>,
    ) -> Result<&'a TxOutput, TransactionError> {
        let prev_tx = prior
            .get(&input.prev_tx_hash)
            .ok_or(TransactionError::PriorTransactionMissing(input.prev_tx_hash))?;
        prev_tx
            .outputs
            .get(input.output_index as usize)
            .ok_or(TransactionError::OutputIndexOutOfRange {
                tx: input.prev_tx_hash,
                index: input.output_index,
            })
    }

    /// Sign every input with `key`
    ///
    /// `prior` maps ids to the transactions whose outputs are being spent.
    pub fn sign(
        &mut self,
        key: &PrivateKey,
        prior: &HashMap<Hash, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut signatures = Vec::with_capacity(self.inputs.len());
        for (index, input) in self.inputs.iter().enumerate() {
            let spent = Self::referenced_output(input, prior)?;
            signatures.push(key.sign(&self.signing_digest(index, &spent.pubkey_hash)));
        }

        let public_key = key.public_key();
        for (input, signature) in self.inputs.iter_mut().zip(signatures) {
            input.signature = signature;
            input.public_key = public_key.clone();
        }

        Ok(())
    }

    /// Check every input signature against the output it spends
    pub fn verify(&self, prior: &HashMap<Hash, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }
        self.verify_inputs(|input| Self::referenced_output(input, prior).ok())
    }

    /// Check every input signature; `spent_output` resolves the output an
    /// input spends, `None` failing the check
    pub fn verify_inputs<'a, F>(&self, spent_output: F) -> bool
    where
        F: Fn(&TxInput) -> Option<&'a TxOutput>,
    {
        if self.inputs.is_empty() {
            return false;
        }

        self.inputs.iter().enumerate().all(|(index, input)| {
            let Some(spent) = spent_output(input) else {
                return false;
            };
            if input.public_key.pubkey_hash() != spent.pubkey_hash {
                return false;
            }
            let digest = self.signing_digest(index, &spent.pubkey_hash);
            input.public_key.verify(&digest, &input.signature)
        })
    }

    /// Sum of the outputs; `None` if it does not fit in a `u64`
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funding(owner: &PrivateKey, amount: u64) -> Transaction {
        Transaction::coinbase(amount, owner.public_key().pubkey_hash(), 1)
    }

    fn spend(prev: &Transaction, to: Hash, amount: u64) -> Transaction {
        Transaction::new(vec![TxInput::new(prev.id, 0)], vec![TxOutput::new(amount, to)])
    }

    #[test]
    fn test_coinbase_detection() {
        let coinbase = Transaction::coinbase(10, Hash::zero(), 0);
        assert!(coinbase.is_coinbase());

        let regular = Transaction::new(vec![], vec![]);
        assert!(!regular.is_coinbase());
    }

    #[test]
    fn test_coinbase_ids_differ_by_height() {
        let owner = hash_bytes(b"miner");
        assert_ne!(
            Transaction::coinbase(10, owner, 1).id,
            Transaction::coinbase(10, owner, 2).id
        );
    }

    #[test]
    fn test_id_excludes_unlock_fields() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = spend(&prev, hash_bytes(b"bob"), 50);
        let unsigned_id = tx.id;

        let prior = HashMap::from([(prev.id, prev.clone())]);
        tx.sign(&key, &prior).unwrap();

        assert_eq!(tx.compute_id(), unsigned_id);
    }

    #[test]
    fn test_sign_and_verify() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = spend(&prev, hash_bytes(b"bob"), 50);
        let prior = HashMap::from([(prev.id, prev.clone())]);

        tx.sign(&key, &prior).unwrap();
        assert!(tx.verify(&prior));
    }

    #[test]
    fn test_mutated_output_fails_verification() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = spend(&prev, hash_bytes(b"bob"), 50);
        let prior = HashMap::from([(prev.id, prev.clone())]);
        tx.sign(&key, &prior).unwrap();

        tx.outputs[0].amount = 49;
        assert!(!tx.verify(&prior));
    }

    #[test]
    fn test_wrong_owner_fails_verification() {
        let owner = PrivateKey::generate();
        let thief = PrivateKey::generate();
        let prev = funding(&owner, 50);
        let mut tx = spend(&prev, thief.public_key().pubkey_hash(), 50);
        let prior = HashMap::from([(prev.id, prev.clone())]);

        tx.sign(&thief, &prior).unwrap();
        assert!(!tx.verify(&prior));
    }

    #[test]
    fn test_sign_missing_prior_fails() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = spend(&prev, hash_bytes(b"bob"), 50);

        let err = tx.sign(&key, &HashMap::new()).unwrap_err();
        assert_eq!(err, TransactionError::PriorTransactionMissing(prev.id));
    }

    #[test]
    fn test_verify_missing_prior_is_false() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = spend(&prev, hash_bytes(b"bob"), 50);
        let prior = HashMap::from([(prev.id, prev.clone())]);
        tx.sign(&key, &prior).unwrap();

        assert!(!tx.verify(&HashMap::new()));
    }

    #[test]
    fn test_bad_output_index_fails() {
        let key = PrivateKey::generate();
        let prev = funding(&key, 50);
        let mut tx = Transaction::new(
            vec![TxInput::new(prev.id, 3)],
            vec![TxOutput::new(50, Hash::zero())],
        );
        let prior = HashMap::from([(prev.id, prev.clone())]);

        assert_eq!(
            tx.sign(&key, &prior).unwrap_err(),
            TransactionError::OutputIndexOutOfRange { tx: prev.id, index: 3 }
        );
        assert!(!tx.verify(&prior));
    }

    #[test]
    fn test_output_value_calculation() {
        let tx = Transaction::new(
            vec![],
            vec![TxOutput::new(100, Hash::zero()), TxOutput::new(200, Hash::zero())],
        );
        assert_eq!(tx.total_output_value(), Some(300));
    }

    #[test]
    fn test_output_value_overflow() {
        let tx = Transaction::new(
            vec![],
            vec![TxOutput::new(u64::MAX, Hash::zero()), TxOutput::new(11, Hash::zero())],
        );
        assert_eq!(tx.total_output_value(), None);
    }
}
