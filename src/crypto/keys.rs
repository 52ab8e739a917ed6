//! Key management for peerlink
//!
//! Identities are Ed25519 signing keys. The handshake also needs them in
//! X25519 form, so both halves of a [`Keypair`] can be converted: the secret
//! through the low half of `SHA-512(seed)`, the public key through the
//! Edwards to Montgomery birational map.

use super::{random_bytes, CryptoError, KEY_LEN};
use crate::protocol::SIGNATURE_LEN;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::digest::generic_array::GenericArray;
use sha2::{Digest, Sha512};
use std::fmt;
use x25519_dalek::{PublicKey as DhPublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Long-term Ed25519 identity keypair
#[derive(Clone)]
pub struct Keypair {
    pub public: PublicKey,
    secret: SigningKey,
}

impl Keypair {
    /// Generate a new random identity
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        random_bytes(&mut seed[..])?;
        Ok(Self::from_seed(&seed))
    }

    /// Create from a 32-byte secret seed (derives the public key)
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        let secret = SigningKey::from_bytes(seed);
        let public = PublicKey(secret.verifying_key().to_bytes());
        Self { public, secret }
    }

    /// Create from secret seed bytes of any slice type
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength)?,
        );
        Ok(Self::from_seed(&seed))
    }

    /// Encode the secret seed as base64 (be careful with this!)
    pub fn secret_to_base64(&self) -> String {
        use base64::Engine;
        let seed = Zeroizing::new(self.secret.to_bytes());
        base64::engine::general_purpose::STANDARD.encode(&seed[..])
    }

    /// Decode a secret seed from base64
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        use base64::Engine;
        let bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        Self::from_secret_bytes(&bytes)
    }

    /// Produce a detached signature over `message`
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.secret.sign(message).to_bytes()
    }

    /// The identity secret in X25519 form
    pub(crate) fn dh_secret(&self) -> StaticSecret {
        let mut expanded = Zeroizing::new([0u8; 64]);
        let mut hasher = Sha512::new();
        hasher.update(self.secret.as_bytes());
        hasher.finalize_into(GenericArray::from_mut_slice(&mut expanded[..]));

        let mut scalar = Zeroizing::new([0u8; KEY_LEN]);
        scalar.copy_from_slice(&expanded[..KEY_LEN]);
        StaticSecret::from(*scalar)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Ed25519 identity public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; KEY_LEN]);

impl PublicKey {
    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self(arr))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decode from base64
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Verify a detached signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<(), CryptoError> {
        let signature = Signature::from_bytes(signature);
        self.verifying_key()?
            .verify_strict(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// The identity public key in X25519 form
    pub(crate) fn to_dh(&self) -> Result<DhPublicKey, CryptoError> {
        let montgomery = self.verifying_key()?.to_montgomery();
        Ok(DhPublicKey::from(montgomery.to_bytes()))
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_base64()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// Per-connection X25519 keypair
///
/// The secret half is zeroized when the keypair is dropped.
pub struct EphemeralKeypair {
    public: DhPublicKey,
    secret: StaticSecret,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        random_bytes(&mut bytes[..])?;
        let secret = StaticSecret::from(*bytes);
        let public = DhPublicKey::from(&secret);
        Ok(Self { public, secret })
    }

    /// Public half as raw bytes
    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// Diffie-Hellman with a remote X25519 public key
    pub fn agree(&self, remote: &DhPublicKey) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        agree(&self.secret, remote)
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// X25519 agreement that rejects low-order remote points
pub fn agree(secret: &StaticSecret, remote: &DhPublicKey) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let shared = secret.diffie_hellman(remote);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }
    Ok(Zeroizing::new(shared.to_bytes()))
}
