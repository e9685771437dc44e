//! Cryptographic primitives for Emberchain

use crate::error::{NodeError, Result};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
/// This prevents repeated, unnecessary context creation.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// A wallet address: the SHA-256 hash of the compressed public key.
pub type Address = [u8; 32];

/// Derives the address for a raw compressed public key.
pub fn pub_key_address(public_key_bytes: &[u8]) -> Address {
    Sha256::digest(public_key_bytes).into()
}

/// Convert an address to its hex string form used in wallet-facing messages.
pub fn address_to_hex(addr: &Address) -> String {
    hex::encode(addr)
}

/// Convert a hex string back to an address.
pub fn address_from_hex(hex_str: &str) -> Result<Address> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| NodeError::CryptoError(format!("Invalid hex address: {}", e)))?;
    if bytes.len() != 32 {
        return Err(NodeError::CryptoError(format!(
            "Address must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    bytes
        .try_into()
        .map_err(|_| NodeError::CryptoError("Failed to convert bytes into address".to_string()))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| NodeError::CryptoError(format!("Invalid secret key bytes: {}", e)))?;
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        Ok(KeyPair {
            secret_key,
            public_key,
        })
    }

    /// Returns the compressed public key bytes carried in transaction inputs.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// The address funds to this key are sent to.
    pub fn address(&self) -> Address {
        pub_key_address(&self.public_key.serialize())
    }

    /// Signs a precomputed digest and returns the compact signature bytes.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let hashed = Sha256::digest(digest);
        let message = Message::from_digest_slice(&hashed)
            .map_err(|e| NodeError::CryptoError(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, the signed
/// digest, and the compact signature bytes.
pub fn verify_digest(
    public_key_bytes: &[u8],
    digest: &[u8],
    signature_bytes: &[u8],
) -> Result<()> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(NodeError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(NodeError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| NodeError::CryptoError(format!("Invalid public key: {}", e)))?;

    let hashed = Sha256::digest(digest);
    let message = Message::from_digest_slice(&hashed)
        .map_err(|e| NodeError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| NodeError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| NodeError::CryptoError("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_digest() {
        let keypair = KeyPair::generate();
        let digest = b"some digest bytes";

        let signature = keypair.sign_digest(digest).unwrap();
        assert!(verify_digest(&keypair.public_key_bytes(), digest, &signature).is_ok());
    }

    #[test]
    fn test_wrong_digest_fails_verification() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign_digest(b"original").unwrap();

        assert!(verify_digest(&keypair.public_key_bytes(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let signature = alice.sign_digest(b"payment").unwrap();

        assert!(verify_digest(&mallory.public_key_bytes(), b"payment", &signature).is_err());
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let keypair = KeyPair::generate();
        let addr = keypair.address();
        assert_eq!(address_from_hex(&address_to_hex(&addr)).unwrap(), addr);
    }

    #[test]
    fn test_address_from_bad_hex_fails() {
        assert!(address_from_hex("zz").is_err());
        assert!(address_from_hex("abcd").is_err());
    }
}
