//! Key pairs
//!
//! A key pair owns outputs locked to the BLAKE3 hash of its public key.

use crate::crypto::{Hash, PrivateKey, PublicKey, SignatureError};

use super::pubkey_hash_to_address;

/// A wallet key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Private key (for signing)
    private_key: PrivateKey,
    /// Public key
    pub public_key: PublicKey,
    /// Address (derived from public key)
    pub address: String,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_private_key(PrivateKey::generate())
    }

    /// Import from private key bytes
    pub fn from_private_key_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        PrivateKey::from_bytes(bytes).map(Self::from_private_key)
    }

    fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        let address = pubkey_hash_to_address(&public_key.pubkey_hash());
        Self {
            private_key,
            public_key,
            address,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Export private key bytes
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.private_key.to_bytes()
    }

    /// Locking key of outputs this pair can spend
    pub fn pubkey_hash(&self) -> Hash {
        self.public_key.pubkey_hash()
    }
}
