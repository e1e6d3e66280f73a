//! Block miner implementation
//!
//! Assembles candidate blocks from the mempool and races them against
//! blocks arriving from peers. A block accepted through
//! [`Blockchain::process_block`] cancels the search in flight and the miner
//! starts again on the new tip.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{CancelToken, Mempool, MiningSlot};
use crate::constants::BLOCK_REWARD;
use crate::consensus::MiningResult;
use crate::crypto::Hash;
use crate::storage::{Blockchain, ChainError, Result};
use crate::validation::Transaction;

/// Block miner
#[derive(Clone)]
pub struct Miner {
    chain: Arc<Blockchain>,
    /// Receives the coinbase of every mined block
    reward_pubkey_hash: Hash,
    mempool: Arc<Mempool>,
}

impl Miner {
    pub fn new(chain: Arc<Blockchain>, reward_pubkey_hash: Hash, mempool: Arc<Mempool>) -> Self {
        Self {
            chain,
            reward_pubkey_hash,
            mempool,
        }
    }

    /// Coinbase for the next height followed by the pending transactions
    /// that apply on the tip
    ///
    /// Invalid transactions, and those spending an output an earlier one
    /// already took, are evicted from the mempool so one bad transaction
    /// never stalls the miner.
    pub fn assemble_transactions(&self) -> Result<Vec<Transaction>> {
        let height = self.chain.get_last_block()?.height() + 1;
        let mut transactions = vec![Transaction::coinbase(BLOCK_REWARD, self.reward_pubkey_hash, height)];

        let (accepted, rejected) = self.chain.select_transactions(self.mempool.snapshot())?;
        for tx in rejected {
            warn!("Dropping invalid transaction {}", tx.id);
            self.mempool.remove(&tx.id);
        }
        transactions.extend(accepted);

        Ok(transactions)
    }

    /// Assemble and mine one block on the current tip
    pub fn mine_once(&self, cancel: &CancelToken) -> Result<MiningResult> {
        let transactions = self.assemble_transactions()?;
        let result = self.chain.mine_block_with(transactions, cancel)?;

        if let MiningResult::Solved(block) = &result {
            self.mempool
                .remove_all(block.transactions.iter().skip(1).map(|tx| &tx.id));
        }
        Ok(result)
    }

    /// Mine continuously on a dedicated thread until the handle is stopped
    pub fn spawn(self) -> Result<MinerHandle> {
        let stop = CancelToken::new();
        let attempt = Arc::new(MiningSlot::new());

        let thread = {
            let stop = stop.clone();
            let attempt = Arc::clone(&attempt);
            thread::Builder::new()
                .name("miner".into())
                .spawn(move || self.run(&stop, &attempt))?
        };

        info!("Miner started");
        Ok(MinerHandle {
            stop,
            attempt,
            thread: Some(thread),
        })
    }

    fn run(&self, stop: &CancelToken, attempt: &MiningSlot) -> Result<()> {
        loop {
            // Arm before checking the stop flag so a concurrent stop either
            // sees this token or is seen here
            let cancel = CancelToken::new();
            attempt.arm(&cancel);
            if stop.is_cancelled() {
                break;
            }

            match self.mine_once(&cancel) {
                Ok(MiningResult::Solved(block)) => {
                    debug!("Miner extended chain to height {}", block.height());
                }
                Ok(MiningResult::Cancelled(_)) => {}
                Err(ChainError::InvalidTransaction(id)) => {
                    warn!("Transaction {} became invalid while mining", id);
                    self.mempool.remove(&id);
                }
                Err(err) => {
                    error!("Miner stopped: {}", err);
                    attempt.disarm(&cancel);
                    return Err(err);
                }
            }
            attempt.disarm(&cancel);
        }

        info!("Miner stopped");
        Ok(())
    }
}

/// Handle to a running miner thread
pub struct MinerHandle {
    stop: CancelToken,
    attempt: Arc<MiningSlot>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl MinerHandle {
    /// Stop mining and wait for the thread to exit
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.cancel();
        self.attempt.fire();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                error!("Miner thread panicked");
                Ok(())
            }),
            None => Ok(()),
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!("Miner exited with error: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::crypto::hash_bytes;
    use crate::wallet::KeyPair;
    use std::time::{Duration, Instant};

    fn setup() -> (Arc<Blockchain>, KeyPair, Arc<Mempool>) {
        let owner = KeyPair::generate();
        let chain = Blockchain::create(ChainConfig::temporary(8), Some(owner.address.as_str())).unwrap();
        (Arc::new(chain), owner, Arc::new(Mempool::new()))
    }

    #[test]
    fn test_assemble_drops_invalid_transactions() {
        let (chain, owner, mempool) = setup();
        let good = chain.new_transfer(&owner, &hash_bytes(b"bob"), 3).unwrap();
        let mut bad = chain.new_transfer(&owner, &hash_bytes(b"eve"), 2).unwrap();
        bad.outputs[0].amount = 7;
        bad.finalize();
        mempool.insert(good.clone());
        mempool.insert(bad.clone());

        let miner = Miner::new(Arc::clone(&chain), hash_bytes(b"miner"), Arc::clone(&mempool));
        let txs = miner.assemble_transactions().unwrap();

        assert_eq!(txs.len(), 2);
        assert!(txs[0].is_coinbase());
        assert_eq!(txs[1], good);
        assert!(!mempool.contains(&bad.id));
    }

    #[test]
    fn test_assemble_keeps_one_of_two_conflicting_spends() {
        let (chain, owner, mempool) = setup();
        let to_bob = chain.new_transfer(&owner, &hash_bytes(b"bob"), BLOCK_REWARD).unwrap();
        let to_eve = chain.new_transfer(&owner, &hash_bytes(b"eve"), BLOCK_REWARD).unwrap();
        mempool.insert(to_bob.clone());
        mempool.insert(to_eve.clone());

        let miner = Miner::new(Arc::clone(&chain), hash_bytes(b"miner"), Arc::clone(&mempool));
        let txs = miner.assemble_transactions().unwrap();

        assert_eq!(txs.len(), 2);
        assert!(txs[1] == to_bob || txs[1] == to_eve);
        assert_eq!(mempool.len(), 1);

        assert!(miner.mine_once(&CancelToken::new()).unwrap().is_solved());
        assert!(mempool.is_empty());
        assert_eq!(chain.utxo_set().total_value(), Some(2 * BLOCK_REWARD));
    }

    #[test]
    fn test_mine_once_clears_included_transactions() {
        let (chain, owner, mempool) = setup();
        let tx = chain.new_transfer(&owner, &hash_bytes(b"bob"), 3).unwrap();
        mempool.insert(tx);

        let miner = Miner::new(Arc::clone(&chain), hash_bytes(b"miner"), Arc::clone(&mempool));
        let result = miner.mine_once(&CancelToken::new()).unwrap();

        assert!(result.is_solved());
        assert!(mempool.is_empty());
        assert_eq!(chain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_spawned_miner_extends_chain_until_stopped() {
        let (chain, _, mempool) = setup();
        let handle = Miner::new(Arc::clone(&chain), hash_bytes(b"miner"), mempool).spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(30);
        while chain.get_best_height().unwrap() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop().unwrap();

        let height = chain.get_best_height().unwrap();
        assert!(height >= 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(chain.get_best_height().unwrap(), height);
    }
}
