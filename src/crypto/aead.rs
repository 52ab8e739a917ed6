//! Secretbox encryption/decryption utilities
//!
//! XSalsa20-Poly1305 (NaCl secretbox) with a 24-byte nonce. Boxes are laid out as
//! `tag(16) ‖ ciphertext`; the detached variants let the frame layer move a
//! body's tag into its header.

use super::{CryptoError, KEY_LEN};
use crate::protocol::{MAC_LEN, NONCE_LEN};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use zeroize::Zeroize;

/// All-zero nonce, used only with single-use handshake keys
pub const ZERO_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

/// Symmetric authenticated cipher keyed once per direction or per handshake box
pub struct SecretBox {
    cipher: XSalsa20Poly1305,
}

impl SecretBox {
    /// Create a new box from a 32-byte key
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(GenericArray::from_slice(key)),
        }
    }

    /// Encrypt `buffer` in place, returning the detached tag
    pub fn seal_detached(
        &self,
        nonce: &[u8; NONCE_LEN],
        buffer: &mut [u8],
    ) -> Result<[u8; MAC_LEN], CryptoError> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
            .map_err(|_| CryptoError::Encryption("seal failed".to_string()))?;

        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt `buffer` in place against a detached tag
    pub fn open_detached(
        &self,
        nonce: &[u8; NONCE_LEN],
        buffer: &mut [u8],
        tag: &[u8; MAC_LEN],
    ) -> Result<(), CryptoError> {
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                b"",
                buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CryptoError::Decryption("open failed".to_string()))
    }

    /// Encrypt, returning `tag ‖ ciphertext`
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut boxed = vec![0u8; MAC_LEN + plaintext.len()];
        boxed[MAC_LEN..].copy_from_slice(plaintext);

        let tag = self.seal_detached(nonce, &mut boxed[MAC_LEN..])?;
        boxed[..MAC_LEN].copy_from_slice(&tag);

        Ok(boxed)
    }

    /// Decrypt a `tag ‖ ciphertext` box
    pub fn open(&self, nonce: &[u8; NONCE_LEN], boxed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if boxed.len() < MAC_LEN {
            return Err(CryptoError::Decryption("box shorter than tag".to_string()));
        }

        let (tag, ciphertext) = boxed.split_at(MAC_LEN);
        let mut tag_arr = [0u8; MAC_LEN];
        tag_arr.copy_from_slice(tag);

        let mut buffer = ciphertext.to_vec();
        self.open_detached(nonce, &mut buffer, &tag_arr)?;

        Ok(buffer)
    }
}

/// 24-byte big-endian nonce counter
///
/// Each call to [`NonceCounter::next`] yields the current value and then
/// increments it, carrying across all 24 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct NonceCounter([u8; NONCE_LEN]);

impl NonceCounter {
    /// Start counting from `initial`
    pub fn new(initial: [u8; NONCE_LEN]) -> Self {
        Self(initial)
    }

    /// Value the next encryption will use
    pub fn current(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Take the current nonce and advance the counter
    pub fn next(&mut self) -> [u8; NONCE_LEN] {
        let nonce = self.0;
        self.increment();
        nonce
    }

    fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (value, overflow) = byte.overflowing_add(1);
            *byte = value;
            if !overflow {
                break;
            }
        }
    }
}
