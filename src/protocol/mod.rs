//! Protocol definitions and constants

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid network identifier length: expected {expected}, got {actual}")]
    InvalidNetworkId { expected: usize, actual: usize },

    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

/// Length of the network identifier
pub const NETWORK_ID_LEN: usize = 32;

/// Length of the network-scoped authentication tag on hello messages
pub const AUTH_TAG_LEN: usize = 32;

/// Length of Ed25519 and X25519 public keys
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// Length of a secretbox authentication tag
pub const MAC_LEN: usize = 16;

/// Length of a secretbox nonce
pub const NONCE_LEN: usize = 24;

/// Hello and hello reply: `authTag ‖ ephemeralPublicKey`
pub const HELLO_LEN: usize = AUTH_TAG_LEN + PUBLIC_KEY_LEN;

/// Initiator auth: `box(signature ‖ identityPublicKey)`
pub const AUTH_LEN: usize = MAC_LEN + SIGNATURE_LEN + PUBLIC_KEY_LEN;

/// Responder accept: `box(signature)`
pub const ACCEPT_LEN: usize = MAC_LEN + SIGNATURE_LEN;

/// Frame header plaintext: `bodyLength(2) ‖ bodyAuthTag(16)`
pub const HEADER_PLAINTEXT_LEN: usize = 2 + MAC_LEN;

/// Encrypted frame header
pub const FRAME_HEADER_LEN: usize = MAC_LEN + HEADER_PLAINTEXT_LEN;

/// Maximum body of a single frame
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Number of handshake steps each side processes
pub const HANDSHAKE_STEPS: usize = 2;

/// Handshake timeout in seconds
pub const HANDSHAKE_TIMEOUT: u64 = 10;

/// Network identifier used when none is configured
pub const DEFAULT_NETWORK_ID: NetworkId = NetworkId([7u8; NETWORK_ID_LEN]);

/// Non-secret constant scoping peers to a compatible protocol instance.
///
/// Hello messages carry an HMAC keyed by this value, so peers on a different
/// network identifier fail the very first handshake step.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkId(pub [u8; NETWORK_ID_LEN]);

impl NetworkId {
    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let arr: [u8; NETWORK_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidNetworkId {
                    expected: NETWORK_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; NETWORK_ID_LEN] {
        &self.0
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decode from base64
    pub fn from_base64(s: &str) -> Result<Self, ProtocolError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        DEFAULT_NETWORK_ID
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({})", self.to_base64())
    }
}
