//! Cryptographic primitives for peerlink
//!
//! This module provides:
//! - Ed25519 identity keypairs and their X25519 (Diffie-Hellman) forms
//! - Per-connection X25519 ephemeral keypairs
//! - XSalsa20-Poly1305 secretbox with detached tags and nonce counters
//! - BLAKE2b-256 hashing, HMAC-SHA-512-256 network tags and channel key derivation
//! - Secure random number generation

mod aead;
mod kdf;
mod keys;

pub use aead::{NonceCounter, SecretBox, ZERO_NONCE};
pub use kdf::{auth_tag, derive_channel_keys, hash, verify_auth_tag, ChannelKeys, SharedSecrets};
pub use keys::{agree, EphemeralKeypair, Keypair, PublicKey};

use thiserror::Error;

/// Length of symmetric keys, hashes and shared secrets in bytes
pub const KEY_LEN: usize = 32;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Non-contributory Diffie-Hellman result")]
    WeakKey,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf)
        .map_err(|_| CryptoError::KeyGeneration("system randomness unavailable".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        random_bytes(&mut buf1).unwrap();
        random_bytes(&mut buf2).unwrap();
        assert_ne!(buf1, buf2);
    }
}
