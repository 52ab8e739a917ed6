//! Transport layer
//!
//! The channel itself never touches a socket. This module supplies the
//! async side: a [`Transport`] trait for anything that moves byte chunks,
//! a TCP implementation, and [`SecureConnection`], which drives a channel
//! over a transport.

mod connection;
mod tcp;

pub use connection::{ConnectionState, SecureConnection};
pub use tcp::TcpTransport;

use crate::channel::{ChannelError, FrameError};
use async_trait::async_trait;
use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        TransportError::Channel(ChannelError::Frame(err))
    }
}

/// Trait for transport implementations
///
/// `recv` may return any number of bytes per call; the channel reassembles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote endpoint
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError>;

    /// Send data
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive data; `Closed` on end of stream
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Read timeout in seconds
    pub read_timeout: u64,
    /// Write timeout in seconds
    pub write_timeout: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 300,
            write_timeout: 60,
        }
    }
}
