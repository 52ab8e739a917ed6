//! Hashing and key derivation
//!
//! - `hash`: BLAKE2b-256 (libsodium `crypto_generichash`) over the
//!   concatenation of its parts
//! - `auth_tag`: HMAC-SHA-512 truncated to 32 bytes, keyed by the network id
//! - `derive_channel_keys`: per-direction keys and starting nonces for the
//!   box stream, bound to the recipient's identity and to session-unique
//!   ephemeral keys

use super::{CryptoError, NonceCounter, PublicKey, KEY_LEN};
use crate::protocol::{NetworkId, AUTH_TAG_LEN, NONCE_LEN};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha512 = Hmac<Sha512>;
type Blake2b256 = Blake2b<U32>;

/// BLAKE2b-256 over `parts[0] ‖ parts[1] ‖ ...`
pub fn hash(parts: &[&[u8]]) -> [u8; KEY_LEN] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn network_mac(network_id: &NetworkId, message: &[u8]) -> Result<HmacSha512, CryptoError> {
    let mut mac = HmacSha512::new_from_slice(network_id.as_bytes())
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(message);
    Ok(mac)
}

/// Network-scoped authentication tag over `message`
pub fn auth_tag(message: &[u8], network_id: &NetworkId) -> Result<[u8; AUTH_TAG_LEN], CryptoError> {
    let full = network_mac(network_id, message)?.finalize().into_bytes();

    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&full[..AUTH_TAG_LEN]);
    Ok(tag)
}

/// Constant-time check of a tag produced by [`auth_tag`]
pub fn verify_auth_tag(tag: &[u8], message: &[u8], network_id: &NetworkId) -> Result<(), CryptoError> {
    if tag.len() != AUTH_TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    network_mac(network_id, message)?
        .verify_truncated_left(tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// The three Diffie-Hellman results of a completed handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecrets {
    /// ephemeral x ephemeral
    pub ss0: [u8; KEY_LEN],
    /// initiator ephemeral x responder identity
    pub ss1: [u8; KEY_LEN],
    /// initiator identity x responder ephemeral
    pub ss2: [u8; KEY_LEN],
}

/// Symmetric state for one authenticated connection
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeys {
    send_key: [u8; KEY_LEN],
    receive_key: [u8; KEY_LEN],
    send_nonce: NonceCounter,
    receive_nonce: NonceCounter,
}

impl ChannelKeys {
    pub fn send_key(&self) -> &[u8; KEY_LEN] {
        &self.send_key
    }

    pub fn receive_key(&self) -> &[u8; KEY_LEN] {
        &self.receive_key
    }

    pub fn send_nonce(&self) -> &NonceCounter {
        &self.send_nonce
    }

    pub fn receive_nonce(&self) -> &NonceCounter {
        &self.receive_nonce
    }
}

/// Derive both directions' keys and starting nonces
///
/// ```text
/// base        = H(H(networkId ‖ ss0 ‖ ss1 ‖ ss2))
/// sendKey     = H(base ‖ remoteIdentity)
/// receiveKey  = H(base ‖ localIdentity)
/// sendNonce   = authTag(remoteEphemeral)[..24]
/// receiveNonce= authTag(localEphemeral)[..24]
/// ```
pub fn derive_channel_keys(
    network_id: &NetworkId,
    secrets: &SharedSecrets,
    local_identity: &PublicKey,
    remote_identity: &PublicKey,
    local_ephemeral: &[u8; KEY_LEN],
    remote_ephemeral: &[u8; KEY_LEN],
) -> Result<ChannelKeys, CryptoError> {
    let mut shared = hash(&[
        network_id.as_bytes(),
        &secrets.ss0,
        &secrets.ss1,
        &secrets.ss2,
    ]);
    let mut base = hash(&[&shared]);
    shared.zeroize();

    let send_key = hash(&[&base, remote_identity.as_bytes()]);
    let receive_key = hash(&[&base, local_identity.as_bytes()]);
    base.zeroize();

    Ok(ChannelKeys {
        send_key,
        receive_key,
        send_nonce: NonceCounter::new(nonce_start(remote_ephemeral, network_id)?),
        receive_nonce: NonceCounter::new(nonce_start(local_ephemeral, network_id)?),
    })
}

fn nonce_start(ephemeral: &[u8; KEY_LEN], network_id: &NetworkId) -> Result<[u8; NONCE_LEN], CryptoError> {
    let tag = auth_tag(ephemeral, network_id)?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&tag[..NONCE_LEN]);
    Ok(nonce)
}
