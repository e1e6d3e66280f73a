//! Chain store
//!
//! [`Blockchain`] is the single authority over the tip. It persists blocks,
//! keeps the cached UTXO set in step with the canonical chain, parks blocks
//! whose parent is unknown and mediates mining against the live tip.
//!
//! Locking: the tip is guarded by one reader/writer lock, writers hold it
//! for the whole of a block insertion including the UTXO refresh. The orphan
//! pool and the mining slot have their own locks.

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::db::{BlockChainDB, InsertOutcome};
use super::error::{ChainError, Result};
use super::iter::ChainIter;
use super::orphan::OrphanPool;
use super::utxo::{UTXOSet, UTXOView, UnspentOutputs};
use crate::config::ChainConfig;
use crate::constants::{BLOCK_REWARD, MAX_BLOCK_HASHES};
use crate::consensus::{Block, MiningResult};
use crate::crypto::{Hash, PrivateKey};
use crate::mining::{CancelToken, MiningSlot};
use crate::validation::{Transaction, TxInput, TxOutput};
use crate::wallet::{address_to_pubkey_hash, KeyPair};

/// What happened to a block handed to [`Blockchain::process_block`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Already stored or already waiting in the orphan pool
    Duplicate,
    /// Parent unknown; parked until it arrives
    Orphaned,
    /// Stored; `connected_orphans` lists orphans that could now be connected
    Accepted {
        tip_changed: bool,
        connected_orphans: Vec<Hash>,
    },
}

pub struct Blockchain {
    config: ChainConfig,
    db: BlockChainDB,
    tip: RwLock<Option<Hash>>,
    utxo_set: RwLock<UTXOSet>,
    orphans: Mutex<OrphanPool>,
    mining: MiningSlot,
}

impl Blockchain {
    /// Create a new chain store
    ///
    /// With a reward address the genesis block is mined and stored;
    /// without one the store starts empty and waits for blocks from peers.
    pub fn create(config: ChainConfig, genesis_address: Option<&str>) -> Result<Self> {
        config.validate()?;
        if !config.temporary && BlockChainDB::exists(&config.data_dir) {
            return Err(ChainError::AlreadyExists(config.data_dir.clone()));
        }

        let reward_pubkey_hash = genesis_address.map(address_to_pubkey_hash).transpose()?;
        let db = BlockChainDB::open(&config)?;
        let chain = Self::with_db(config, db, None, UTXOSet::new());

        if let Some(pubkey_hash) = reward_pubkey_hash {
            let genesis = Block::genesis(pubkey_hash, chain.config.difficulty);
            chain.add_block(&genesis)?;
            info!("Created blockchain with genesis {}", genesis.hash);
        } else {
            info!("Created empty blockchain at {}", chain.config.data_dir.display());
        }

        Ok(chain)
    }

    /// Load an existing chain store
    pub fn open(config: ChainConfig) -> Result<Self> {
        config.validate()?;
        if !config.temporary && !BlockChainDB::exists(&config.data_dir) {
            return Err(ChainError::ChainNotFound(config.data_dir.clone()));
        }

        let db = BlockChainDB::open(&config)?;
        let tip = db.tip()?;
        let utxo_set = db.load_utxo_set()?;
        let chain = Self::with_db(config, db, tip, utxo_set);

        if tip.is_some() && chain.utxo_set.read().is_empty() {
            chain.rebuild_utxo_set()?;
        }

        debug!("Opened blockchain, tip {:?}", tip);
        Ok(chain)
    }

    fn with_db(config: ChainConfig, db: BlockChainDB, tip: Option<Hash>, utxo_set: UTXOSet) -> Self {
        Self {
            orphans: Mutex::new(OrphanPool::new(config.max_orphans)),
            config,
            db,
            tip: RwLock::new(tip),
            utxo_set: RwLock::new(utxo_set),
            mining: MiningSlot::new(),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Hash of the current tip, if any block is stored
    pub fn tip(&self) -> Option<Hash> {
        *self.tip.read()
    }

    /// Iterator from the current tip back to genesis
    pub fn iter(&self) -> ChainIter {
        ChainIter::new(self.db.clone(), *self.tip.read())
    }

    // ------------------------------------------------------------------
    // Block storage
    // ------------------------------------------------------------------

    /// Store `block`; move the tip to it when its height is at least the
    /// persisted best height
    ///
    /// Idempotent: a block that is already stored changes nothing. Returns
    /// whether the tip moved. On equal heights the later block wins. A
    /// non-genesis block whose parent is not stored is refused with
    /// [`ChainError::BlockNotFound`] naming the parent.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let mut tip = self.tip.write();

        if !block.is_genesis() && !self.db.contains_block(block.prev_hash())? {
            return Err(ChainError::BlockNotFound(*block.prev_hash()));
        }

        match self.db.insert_block(block)? {
            InsertOutcome::Duplicate => Ok(false),
            InsertOutcome::Stored => {
                debug!("Stored side block {} at height {}", block.hash, block.height());
                Ok(false)
            }
            InsertOutcome::TipAdvanced { previous } => {
                if let Err(err) = self.refresh_utxo_set(block, previous) {
                    warn!("UTXO refresh for {} failed, restoring tip: {}", block.hash, err);
                    self.db.set_tip(previous)?;
                    self.rebuild_utxo_set_from(previous)?;
                    return Err(err);
                }
                *tip = Some(block.hash);
                info!("New tip {} at height {}", block.hash, block.height());
                Ok(true)
            }
        }
    }

    /// Bring the cached UTXO set in line with a new tip; caller holds the
    /// tip write lock
    fn refresh_utxo_set(&self, block: &Block, previous: Option<Hash>) -> Result<()> {
        let extends_tip = match previous {
            Some(prev) => prev == block.header.prev_hash,
            None => block.is_genesis(),
        };

        if extends_tip {
            let diff = self.utxo_set.write().apply_block(block);
            self.db.update_utxos(&diff.spent, &diff.created)
        } else {
            info!("Tip replaced by {}; rebuilding UTXO set", block.hash);
            self.rebuild_utxo_set_from(Some(block.hash))
        }
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block> {
        self.db.get_block(hash)?.ok_or(ChainError::BlockNotFound(*hash))
    }

    pub fn have_block(&self, hash: &Hash) -> Result<bool> {
        match self.get_block(hash) {
            Ok(_) => Ok(true),
            Err(ChainError::BlockNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn get_last_block(&self) -> Result<Block> {
        let _guard = self.tip.read();
        self.db.tip_block()?.ok_or(ChainError::NoBlocks)
    }

    /// Height of the persisted tip, 0 for an empty chain
    pub fn get_best_height(&self) -> Result<u64> {
        let _guard = self.tip.read();
        Ok(self.db.tip_block()?.map_or(0, |block| block.height()))
    }

    /// Walk from `begin` toward genesis collecting hashes, stopping before
    /// `stop`, after genesis, or once `max` hashes are collected
    ///
    /// At most [`MAX_BLOCK_HASHES`] hashes are returned per call whatever
    /// `max` asks for; callers page through longer ranges by passing the
    /// last hash received as the next `begin`.
    pub fn get_block_hashes(&self, begin: &Hash, stop: &Hash, max: usize) -> Result<Vec<Hash>> {
        let max = max.min(MAX_BLOCK_HASHES);
        let mut iter = self.iter();
        iter.location_hash(begin)?;

        let mut hashes = Vec::new();
        if max == 0 {
            return Ok(hashes);
        }
        for block in iter {
            let block = block?;
            if block.hash == *stop {
                break;
            }
            hashes.push(block.hash);
            if hashes.len() >= max {
                break;
            }
        }
        Ok(hashes)
    }

    /// `(prev_hash, hash)` of every canonical block, tip first
    pub fn list_block_hashes(&self) -> Result<Vec<(Hash, Hash)>> {
        let mut pairs = Vec::new();
        for block in self.iter() {
            let block = block?;
            debug!("prev: {} hash: {} height: {}", block.header.prev_hash, block.hash, block.height());
            pairs.push((block.header.prev_hash, block.hash));
        }
        Ok(pairs)
    }

    // ------------------------------------------------------------------
    // Transactions and outputs
    // ------------------------------------------------------------------

    /// Scan the canonical chain for a transaction
    pub fn find_transaction(&self, id: &Hash) -> Result<Transaction> {
        for block in self.iter() {
            let block = block?;
            if let Some(tx) = block.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(ChainError::TransactionNotFound(*id))
    }

    fn prior_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash, Transaction>> {
        let mut prior = HashMap::new();
        for input in &tx.inputs {
            if !prior.contains_key(&input.prev_tx_hash) {
                let prev = self.find_transaction(&input.prev_tx_hash)?;
                prior.insert(prev.id, prev);
            }
        }
        Ok(prior)
    }

    /// Sign every input of `tx` with `key`
    pub fn sign_transaction(&self, tx: &mut Transaction, key: &PrivateKey) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prior = self.prior_transactions(tx)?;
        tx.sign(key, &prior)?;
        Ok(())
    }

    /// Verify the signatures of `tx` against the canonical chain
    ///
    /// A bad signature is `Ok(false)`; a spent transaction that cannot be
    /// found is an error.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prior = self.prior_transactions(tx)?;
        Ok(tx.verify(&prior))
    }

    /// Recompute the unspent outputs of the whole canonical chain
    pub fn find_utxo(&self) -> Result<UnspentOutputs> {
        let tip = self.tip.read();
        self.scan_unspent(*tip)
    }

    fn scan_unspent(&self, tip: Option<Hash>) -> Result<UnspentOutputs> {
        let mut unspent: UnspentOutputs = HashMap::new();
        let mut spent: HashMap<Hash, HashSet<u32>> = HashMap::new();

        for block in ChainIter::new(self.db.clone(), tip) {
            let block = block?;
            // Later transactions first: spends are seen before the outputs they consume
            for tx in block.transactions.iter().rev() {
                let spent_here = spent.get(&tx.id);
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent_here.is_some_and(|s| s.contains(&index)) {
                        continue;
                    }
                    unspent.entry(tx.id).or_insert_with(BTreeMap::new).insert(index, output.clone());
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.prev_tx_hash).or_default().insert(input.output_index);
                    }
                }
            }
        }

        Ok(unspent)
    }

    /// Rebuild the cached UTXO set from a full chain scan
    pub fn rebuild_utxo_set(&self) -> Result<()> {
        let tip = self.tip.read();
        self.rebuild_utxo_set_from(*tip)
    }

    fn rebuild_utxo_set_from(&self, tip: Option<Hash>) -> Result<()> {
        let set = UTXOSet::from_unspent(self.scan_unspent(tip)?);
        self.db.replace_utxos(&set)?;
        debug!("UTXO set rebuilt with {} outputs", set.len());
        *self.utxo_set.write() = set;
        Ok(())
    }

    /// Snapshot of the cached UTXO set
    pub fn utxo_set(&self) -> UTXOSet {
        self.utxo_set.read().clone()
    }

    /// Unspent outputs locked to `pubkey_hash`
    pub fn find_utxo_for(&self, pubkey_hash: &Hash) -> Vec<TxOutput> {
        self.utxo_set.read().find_utxo(pubkey_hash)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        let pubkey_hash = address_to_pubkey_hash(address)?;
        self.utxo_set
            .read()
            .get_balance(&pubkey_hash)
            .ok_or_else(|| ChainError::Corrupted(format!("balance of {address} overflows")))
    }

    /// Run `f` over a view of the unspent outputs as of `parent`
    ///
    /// The cached set serves when `parent` is the tip; any other parent is
    /// scanned from the store.
    fn with_utxo_view<R>(&self, parent: Option<Hash>, f: impl FnOnce(&mut UTXOView<'_>) -> R) -> Result<R> {
        {
            let tip = self.tip.read();
            if parent == *tip {
                let cached = self.utxo_set.read();
                return Ok(f(&mut UTXOView::new(&cached)));
            }
        }

        let scanned = UTXOSet::from_unspent(self.scan_unspent(parent)?);
        Ok(f(&mut UTXOView::new(&scanned)))
    }

    /// Check `transactions` in order on top of `parent`
    ///
    /// The first one that spends a missing or already spent output, carries
    /// a bad signature or creates more than it consumes fails the batch.
    fn check_spends(&self, parent: Option<Hash>, transactions: &[Transaction]) -> Result<()> {
        self.with_utxo_view(parent, |view| {
            for tx in transactions {
                if let Err(err) = view.apply_transaction(tx) {
                    debug!("Transaction {} rejected: {}", tx.id, err);
                    return Err(ChainError::InvalidTransaction(tx.id));
                }
            }
            Ok(())
        })?
    }

    /// Split pending `candidates` into those that apply in order on the
    /// current tip and those that do not
    ///
    /// A candidate spending an output already taken by an earlier one is
    /// rejected, so the accepted list never spends an output twice.
    pub fn select_transactions(
        &self,
        candidates: Vec<Transaction>,
    ) -> Result<(Vec<Transaction>, Vec<Transaction>)> {
        self.with_utxo_view(self.tip(), |view| {
            let mut accepted = Vec::new();
            let mut rejected = Vec::new();
            for tx in candidates {
                if tx.is_coinbase() {
                    rejected.push(tx);
                    continue;
                }
                match view.apply_transaction(&tx) {
                    Ok(()) => accepted.push(tx),
                    Err(err) => {
                        debug!("Transaction {} not selected: {}", tx.id, err);
                        rejected.push(tx);
                    }
                }
            }
            (accepted, rejected)
        })
    }

    /// Build and sign a transfer of `amount` from `from` to `to`
    ///
    /// Change goes back to the sender.
    pub fn new_transfer(&self, from: &KeyPair, to: &Hash, amount: u64) -> Result<Transaction> {
        let owner = from.pubkey_hash();
        let (accumulated, keys) = self.utxo_set.read().find_spendable(&owner, amount);
        if accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                have: accumulated,
                need: amount,
            });
        }

        let inputs = keys
            .into_iter()
            .map(|(tx_hash, index)| TxInput::new(tx_hash, index))
            .collect();
        let mut outputs = vec![TxOutput::new(amount, *to)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, owner));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.sign_transaction(&mut tx, from.private_key())?;
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Mining
    // ------------------------------------------------------------------

    /// Mine a block with `transactions` on the current tip
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<MiningResult> {
        self.mine_block_with(transactions, &CancelToken::new())
    }

    /// Mine with a caller-supplied token
    ///
    /// The batch must apply in order on the tip's unspent outputs: inputs
    /// unspent and spent once, signatures valid, outputs covered by inputs.
    /// Otherwise it is rejected before any work starts. The token is
    /// registered so [`Blockchain::terminate_mining`] reaches it; a cancelled
    /// search persists nothing.
    pub fn mine_block_with(&self, transactions: Vec<Transaction>, cancel: &CancelToken) -> Result<MiningResult> {
        let parent = self.get_last_block()?;
        self.check_spends(Some(parent.hash), &transactions)?;

        self.mining.arm(cancel);
        let result = Block::mine(
            transactions,
            parent.hash,
            parent.height() + 1,
            self.config.difficulty,
            cancel,
        );
        self.mining.disarm(cancel);

        match &result {
            MiningResult::Solved(block) => {
                self.add_block(block)?;
                info!("Mined block {} at height {}", block.hash, block.height());
            }
            MiningResult::Cancelled(block) => {
                info!("Mining on {} at height {} cancelled", block.header.prev_hash, block.height());
            }
        }
        Ok(result)
    }

    /// Cancel the mining search in flight; returns whether one was running
    pub fn terminate_mining(&self) -> bool {
        let fired = self.mining.fire();
        if fired {
            debug!("Signalled in-flight mining to stop");
        }
        fired
    }

    // ------------------------------------------------------------------
    // Block acceptance and orphans
    // ------------------------------------------------------------------

    /// Checks that need nothing but the block itself
    fn check_block(&self, block: &Block) -> Result<()> {
        if block.header.difficulty != self.config.difficulty {
            return Err(ChainError::invalid_block(block.hash, "unexpected difficulty"));
        }
        if !block.has_valid_pow() {
            return Err(ChainError::invalid_block(block.hash, "proof of work not satisfied"));
        }
        if !block.has_valid_merkle_root() {
            return Err(ChainError::invalid_block(block.hash, "merkle root mismatch"));
        }
        if block.is_genesis() != (block.height() == 0) {
            return Err(ChainError::invalid_block(block.hash, "genesis must have height 0"));
        }

        match block.transactions.first() {
            Some(coinbase) if coinbase.is_coinbase() => match coinbase.total_output_value() {
                Some(value) if value <= BLOCK_REWARD => {}
                _ => return Err(ChainError::invalid_block(block.hash, "coinbase exceeds reward")),
            },
            _ => return Err(ChainError::invalid_block(block.hash, "first transaction is not a coinbase")),
        }
        if block.transactions.iter().skip(1).any(Transaction::is_coinbase) {
            return Err(ChainError::invalid_block(block.hash, "more than one coinbase"));
        }
        Ok(())
    }

    /// Validate against the stored parent and its unspent outputs, then store
    fn connect_block(&self, block: &Block) -> Result<bool> {
        let parent = if block.is_genesis() {
            None
        } else {
            let parent = self.get_block(block.prev_hash())?;
            if block.height() != parent.height() + 1 {
                return Err(ChainError::invalid_block(block.hash, "height does not follow parent"));
            }
            Some(parent.hash)
        };

        match self.check_spends(parent, &block.transactions) {
            Ok(()) => {}
            Err(ChainError::InvalidTransaction(id)) => {
                return Err(ChainError::invalid_block(block.hash, format!("invalid transaction {id}")));
            }
            Err(err) => return Err(err),
        }

        self.add_block(block)
    }

    /// Park a block whose parent is not stored yet
    pub fn add_orphan_block(&self, block: Block) {
        let hash = block.hash;
        let evicted = self.orphans.lock().insert(block);
        debug!("Orphan block {} parked", hash);
        for old in evicted {
            warn!("Orphan pool full, dropped {}", old);
        }
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.orphans.lock().contains(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }

    /// Connect every orphan descending from the newly accepted `accepted`
    ///
    /// Children of each connected block are tried in turn until none are
    /// left. Orphans that fail validation are dropped. Returns the hashes
    /// that were connected.
    pub fn reconcile_orphans(&self, accepted: &Hash) -> Result<Vec<Hash>> {
        self.reconcile_with(accepted, |block| self.connect_block(block))
    }

    /// On an error other than an invalid block, the failed orphan and its
    /// untried siblings go back to the pool
    fn reconcile_with<F>(&self, accepted: &Hash, mut connect: F) -> Result<Vec<Hash>>
    where
        F: FnMut(&Block) -> Result<bool>,
    {
        let mut connected = Vec::new();
        let mut queue = VecDeque::from([*accepted]);

        while let Some(parent) = queue.pop_front() {
            let mut children = self.orphans.lock().take_children(&parent).into_iter();
            while let Some(child) = children.next() {
                match connect(&child) {
                    Ok(_) => {
                        debug!("Orphan {} connected to {}", child.hash, parent);
                        connected.push(child.hash);
                        queue.push_back(child.hash);
                    }
                    Err(err @ ChainError::InvalidBlock { .. }) => {
                        warn!("Dropping orphan: {}", err);
                    }
                    Err(err) => {
                        self.add_orphan_block(child);
                        children.for_each(|rest| self.add_orphan_block(rest));
                        return Err(err);
                    }
                }
            }
        }

        Ok(connected)
    }

    /// Entry point for blocks received from peers
    ///
    /// Stores or parks the block, stops local mining when the tip moves and
    /// connects any orphans waiting on it.
    pub fn process_block(&self, block: Block) -> Result<BlockStatus> {
        if self.have_block(&block.hash)? || self.is_orphan(&block.hash) {
            return Ok(BlockStatus::Duplicate);
        }

        self.check_block(&block)?;

        if !block.is_genesis() && !self.have_block(block.prev_hash())? {
            self.add_orphan_block(block);
            return Ok(BlockStatus::Orphaned);
        }

        let hash = block.hash;
        let tip_before = self.tip();
        self.connect_block(&block)?;
        let connected_orphans = self.reconcile_orphans(&hash)?;

        let tip_changed = self.tip() != tip_before;
        if tip_changed {
            self.terminate_mining();
        }

        Ok(BlockStatus::Accepted {
            tip_changed,
            connected_orphans,
        })
    }
}
