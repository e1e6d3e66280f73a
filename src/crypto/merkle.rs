//! Transaction content digest
//!
//! Block headers commit to their transaction list through a merkle root so
//! the block hash covers every transaction id in order.

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of hashes
///
/// Empty input yields the zero hash; an odd level duplicates its last entry.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    let mut level: Vec<Hash> = hashes.to_vec();
    if level.is_empty() {
        return Hash::zero();
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash_bytes(&i.to_le_bytes())).collect()
    }

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(compute_merkle_root(&[]), Hash::zero());
    }

    #[test]
    fn test_single_element() {
        let hashes = make_hashes(1);
        assert_eq!(compute_merkle_root(&hashes), hashes[0]);
    }

    #[test]
    fn test_two_elements() {
        let hashes = make_hashes(2);
        assert_eq!(compute_merkle_root(&hashes), hash_pair(&hashes[0], &hashes[1]));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let hashes = make_hashes(3);
        let expected = hash_pair(
            &hash_pair(&hashes[0], &hashes[1]),
            &hash_pair(&hashes[2], &hashes[2]),
        );
        assert_eq!(compute_merkle_root(&hashes), expected);
    }

    #[test]
    fn test_order_changes_root() {
        let hashes = make_hashes(4);
        let mut swapped = hashes.clone();
        swapped.swap(0, 1);
        assert_ne!(compute_merkle_root(&hashes), compute_merkle_root(&swapped));
    }
}
