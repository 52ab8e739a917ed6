//! # peerlink
//!
//! Mutually authenticated, end-to-end encrypted duplex channels between two
//! peers over any transport that delivers bytes in arbitrary fragments.
//!
//! ## Features
//!
//! - **Secret handshake**: two-step Diffie-Hellman exchange that proves both
//!   long-term Ed25519 identities and yields forward-secret session keys
//! - **Network scoping**: peers only talk to peers sharing a network identifier
//! - **Box stream framing**: length-concealing, per-direction authenticated
//!   encryption of application messages with strictly incrementing nonces
//! - **Chunk tolerant**: every protocol phase reassembles its input from
//!   arbitrarily split chunks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Application Layer                   │
//! │          (gossip / replication, opaque bytes)        │
//! ├─────────────────────────────────────────────────────┤
//! │                   Channel Layer                      │
//! │   Handshaking(HandshakeSession) → Established(Framer)│
//! ├─────────────────────────────────────────────────────┤
//! │                 Reassembly Layer                     │
//! │        (exact byte counts from arbitrary chunks)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │                (TCP, any byte stream)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod crypto;
pub mod handshake;
pub mod protocol;
pub mod transport;

pub use channel::{Channel, ChannelError, ChannelOutput};
pub use config::Config;
pub use crypto::{Keypair, PublicKey};
pub use handshake::{Initiator, Responder};
pub use protocol::NetworkId;
pub use transport::{SecureConnection, TcpTransport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port for peerlink servers
pub const DEFAULT_PORT: u16 = 8008;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] handshake::HandshakeError),

    #[error("Channel error: {0}")]
    Channel(#[from] channel::ChannelError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
