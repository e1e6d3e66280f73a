//! Orphan block pool
//!
//! Blocks whose parent is not stored yet, indexed by their own hash and by
//! their parent's hash. Every block listed under a parent is also present in
//! the hash index.

use std::collections::{HashMap, VecDeque};

use crate::consensus::Block;
use crate::crypto::Hash;

#[derive(Debug, Default)]
pub struct OrphanPool {
    by_hash: HashMap<Hash, Block>,
    by_prev: HashMap<Hash, Vec<Block>>,
    /// Insertion order, oldest first
    order: VecDeque<Hash>,
    capacity: usize,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Add `block`; returns the hashes evicted to stay within capacity
    pub fn insert(&mut self, block: Block) -> Vec<Hash> {
        if self.by_hash.contains_key(&block.hash) {
            return Vec::new();
        }

        self.order.push_back(block.hash);
        self.by_prev
            .entry(block.header.prev_hash)
            .or_default()
            .push(block.clone());
        self.by_hash.insert(block.hash, block);

        self.prune()
    }

    fn prune(&mut self) -> Vec<Hash> {
        let mut evicted = Vec::new();
        while self.by_hash.len() > self.capacity {
            let Some(oldest) = self.order.front().copied() else {
                break;
            };
            self.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
        let block = self.by_hash.remove(hash)?;
        self.order.retain(|h| h != hash);

        let prev = block.header.prev_hash;
        if let Some(siblings) = self.by_prev.get_mut(&prev) {
            siblings.retain(|b| b.hash != *hash);
            if siblings.is_empty() {
                self.by_prev.remove(&prev);
            }
        }
        Some(block)
    }

    /// Remove and return every orphan whose parent is `parent`
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let children = self.by_prev.remove(parent).unwrap_or_default();
        for child in &children {
            self.by_hash.remove(&child.hash);
            self.order.retain(|h| *h != child.hash);
        }
        children
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_prev.values().map(Vec::len).sum();
        indexed == self.by_hash.len()
            && self.order.len() == self.by_hash.len()
            && self.by_prev.iter().all(|(prev, blocks)| {
                blocks
                    .iter()
                    .all(|b| b.header.prev_hash == *prev && self.by_hash.contains_key(&b.hash))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn orphan(parent: &str, height: u64) -> Block {
        Block::candidate(vec![], hash_bytes(parent.as_bytes()), height, 8)
    }

    #[test]
    fn test_insert_indexes_both_ways() {
        let mut pool = OrphanPool::new(10);
        let block = orphan("p", 3);
        pool.insert(block.clone());
        pool.insert(block.clone());

        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&block.hash));
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_take_children() {
        let mut pool = OrphanPool::new(10);
        let a = orphan("p", 3);
        let b = orphan("p", 4);
        let c = orphan("q", 3);
        pool.insert(a.clone());
        pool.insert(b.clone());
        pool.insert(c.clone());

        let children = pool.take_children(&hash_bytes(b"p"));
        assert_eq!(children, vec![a, b]);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&c.hash));
        assert!(pool.is_consistent());
        assert!(pool.take_children(&hash_bytes(b"p")).is_empty());
    }

    #[test]
    fn test_prune_evicts_oldest() {
        let mut pool = OrphanPool::new(2);
        let first = orphan("p", 1);
        pool.insert(first.clone());
        pool.insert(orphan("p", 2));

        let evicted = pool.insert(orphan("q", 3));
        assert_eq!(evicted, vec![first.hash]);
        assert_eq!(pool.len(), 2);
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_remove() {
        let mut pool = OrphanPool::new(4);
        let block = orphan("p", 1);
        pool.insert(block.clone());

        assert_eq!(pool.remove(&block.hash), Some(block));
        assert!(pool.is_empty());
        assert!(pool.is_consistent());
    }
}
