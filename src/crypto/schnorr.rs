//! Schnorr signatures over secp256k1
//!
//! Used as a black box: sign a 32-byte digest, verify a digest against an
//! x-only public key. Outputs are locked to `BLAKE3(public key)`.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{hash_bytes, Hash};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
}

/// Length-checked serde for fixed byte arrays
mod fixed_bytes {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"a key or signature of fixed length"))
    }
}

/// Signing key; never printed
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

/// x-only public key carried by a signed input
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "fixed_bytes")] pub [u8; 32]);

/// 64-byte signature over an input's signing digest
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature(#[serde(with = "fixed_bytes")] pub [u8; 64]);

impl PrivateKey {
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_bytes(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes().into())
    }

    pub fn sign(&self, digest: &Hash) -> SchnorrSignature {
        let signature: Signature = self.0.sign(digest.as_bytes());
        SchnorrSignature(signature.to_bytes())
    }
}

impl PublicKey {
    /// Placeholder on unsigned and coinbase inputs; verifies nothing
    pub const fn empty() -> Self {
        PublicKey([0u8; 32])
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        VerifyingKey::from_bytes(bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(PublicKey(*bytes))
    }

    /// Locking key of the outputs this key can spend
    pub fn pubkey_hash(&self) -> Hash {
        hash_bytes(&self.0)
    }

    /// False for malformed keys or signatures as well as bad ones
    pub fn verify(&self, digest: &Hash, signature: &SchnorrSignature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(&signature.0[..]) else {
            return false;
        };
        key.verify(digest.as_bytes(), &signature).is_ok()
    }
}

impl SchnorrSignature {
    /// Placeholder on unsigned and coinbase inputs
    pub const fn empty() -> Self {
        SchnorrSignature([0u8; 64])
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Debug for SchnorrSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchnorrSignature({})", hex::encode(self.0))
    }
}
