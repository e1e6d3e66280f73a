//! Wallet collaborator - key pairs and address encoding
//!
//! Address format: prefix + Base58(pubkey_hash[0..32] ‖ checksum[0..4]),
//! where the checksum is the first four bytes of SHA-256(SHA-256(pubkey_hash)).

mod wallet;

pub use wallet::*;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::constants::ADDRESS_PREFIX;
use crate::crypto::Hash;

/// Address decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address prefix")]
    InvalidPrefix,
    #[error("Invalid base58 encoding")]
    InvalidEncoding,
    #[error("Invalid address length {0}")]
    InvalidLength(usize),
    #[error("Invalid checksum")]
    InvalidChecksum,
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Encode a locking key as an address
pub fn pubkey_hash_to_address(pubkey_hash: &Hash) -> String {
    let mut payload = Vec::with_capacity(36);
    payload.extend_from_slice(&pubkey_hash.0);
    payload.extend_from_slice(&checksum(&pubkey_hash.0));
    format!("{}{}", ADDRESS_PREFIX, bs58::encode(payload).into_string())
}

/// Decode an address back to its pubkey hash
pub fn address_to_pubkey_hash(address: &str) -> Result<Hash, AddressError> {
    let encoded = address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or(AddressError::InvalidPrefix)?;
    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| AddressError::InvalidEncoding)?;

    if decoded.len() != 36 {
        return Err(AddressError::InvalidLength(decoded.len()));
    }

    let (payload, check) = decoded.split_at(32);
    if checksum(payload) != check {
        return Err(AddressError::InvalidChecksum);
    }

    Hash::from_slice(payload).ok_or(AddressError::InvalidLength(payload.len()))
}

pub fn validate_address(address: &str) -> bool {
    address_to_pubkey_hash(address).is_ok()
}
