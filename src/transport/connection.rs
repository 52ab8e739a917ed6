//! Secure connections over a transport
//!
//! Handles the lifecycle of one peer connection:
//! - secret handshake under a deadline
//! - box stream encryption/decryption
//! - goodbye on close

use super::{Transport, TransportError};
use crate::channel::{Channel, FrameOpener, FrameSealer};
use crate::config::HandshakeConfig;
use crate::crypto::{Keypair, PublicKey};
use crate::handshake::{HandshakeRole, Initiator, Responder};
use crate::protocol::NetworkId;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Both directions open
    Open,
    /// Peer said goodbye or hung up; buffered messages may remain
    PeerClosed,
    /// We said goodbye
    Closed,
}

/// An authenticated, encrypted connection to one peer
pub struct SecureConnection<T: Transport> {
    transport: T,
    state: ConnectionState,
    sealer: FrameSealer,
    opener: FrameOpener,
    remote_identity: PublicKey,
    pending: VecDeque<Bytes>,
    read_buf: Vec<u8>,
}

/// Messages and goodbye seen during the handshake
type Carried = (VecDeque<Bytes>, bool);

impl<T: Transport> SecureConnection<T> {
    /// Dial: run the initiator handshake on an already connected transport
    pub async fn connect(
        transport: T,
        identity: Arc<Keypair>,
        network_id: NetworkId,
        remote_identity: PublicKey,
        config: &HandshakeConfig,
    ) -> Result<Self, TransportError> {
        let (channel, hello) = Channel::<Initiator>::initiator(identity, network_id, remote_identity)?;
        Self::establish(transport, channel, Some(hello), config).await
    }

    /// Listen: run the responder handshake on an accepted transport
    pub async fn accept(
        transport: T,
        identity: Arc<Keypair>,
        network_id: NetworkId,
        config: &HandshakeConfig,
    ) -> Result<Self, TransportError> {
        let channel = Channel::<Responder>::responder(identity, network_id)?;
        Self::establish(transport, channel, None, config).await
    }

    async fn establish<R: HandshakeRole>(
        mut transport: T,
        mut channel: Channel<R>,
        hello: Option<Bytes>,
        config: &HandshakeConfig,
    ) -> Result<Self, TransportError> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        let result = tokio::time::timeout(
            config.timeout(),
            Self::handshake(&mut transport, &mut channel, hello, &mut read_buf),
        )
        .await;

        let (pending, peer_closed) = match result {
            Ok(Ok(carried)) => carried,
            Ok(Err(e)) => {
                warn!(role = ?R::ROLE, error = %e, "Handshake failed");
                transport.close().await.ok();
                return Err(e);
            }
            Err(_) => {
                warn!(role = ?R::ROLE, timeout = ?config.timeout(), "Handshake timed out");
                transport.close().await.ok();
                return Err(TransportError::Timeout);
            }
        };

        let (framer, remote_identity) = channel.into_framer()?;
        let (sealer, opener) = framer.split();
        info!(remote = %remote_identity, "Secure connection established");

        Ok(Self {
            transport,
            state: if peer_closed {
                ConnectionState::PeerClosed
            } else {
                ConnectionState::Open
            },
            sealer,
            opener,
            remote_identity,
            pending,
            read_buf,
        })
    }

    async fn handshake<R: HandshakeRole>(
        transport: &mut T,
        channel: &mut Channel<R>,
        hello: Option<Bytes>,
        buf: &mut [u8],
    ) -> Result<Carried, TransportError> {
        if let Some(hello) = hello {
            transport.send(&hello).await?;
        }

        let mut pending = VecDeque::new();
        let mut peer_closed = false;

        while !channel.is_established() {
            let n = transport.recv(buf).await?;
            let output = channel.receive(&buf[..n])?;

            for chunk in &output.outbound {
                transport.send(chunk).await?;
            }
            pending.extend(output.messages);
            peer_closed |= output.closed;
        }

        Ok((pending, peer_closed))
    }

    /// Verified identity of the peer
    pub fn remote_identity(&self) -> &PublicKey {
        &self.remote_identity
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Encrypt and send one message
    pub async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        let frame = self.sealer.seal(message)?;
        self.transport.send(&frame).await
    }

    /// Receive the next message
    ///
    /// Returns `None` once the peer has said goodbye or closed the stream
    /// and every buffered message has been returned.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if self.state != ConnectionState::Open {
                return Ok(None);
            }

            let n = match self.transport.recv(&mut self.read_buf).await {
                Ok(n) => n,
                Err(TransportError::Closed) => {
                    debug!(remote = ?self.remote_identity, "Peer closed without goodbye");
                    self.state = ConnectionState::PeerClosed;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let messages = self.opener.open(&self.read_buf[..n])?;
            self.pending.extend(messages);

            if self.opener.is_closed() {
                debug!(remote = ?self.remote_identity, "Peer said goodbye");
                self.state = ConnectionState::PeerClosed;
            }
        }
    }

    /// Send goodbye and close the transport
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if !self.sealer.is_closed() {
            let goodbye = self.sealer.goodbye()?;
            // the peer may already be gone
            self.transport.send(&goodbye).await.ok();
        }
        self.state = ConnectionState::Closed;
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// In-memory transport that hands out at most `max_chunk` bytes per recv
    struct PipeTransport {
        tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        pending: Vec<u8>,
        max_chunk: usize,
    }

    fn pipe(max_chunk: usize) -> (PipeTransport, PipeTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let end = |tx, rx| PipeTransport {
            tx: Some(tx),
            rx,
            pending: Vec::new(),
            max_chunk,
        };
        (end(a_tx, b_rx), end(b_tx, a_rx))
    }

    #[async_trait]
    impl Transport for PipeTransport {
        async fn connect(&mut self, _addr: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
            let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
            tx.send(data.to_vec()).map_err(|_| TransportError::Closed)
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            while self.pending.is_empty() {
                self.pending = self.rx.recv().await.ok_or(TransportError::Closed)?;
            }
            let n = self.pending.len().min(buf.len()).min(self.max_chunk);
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.tx = None;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.tx.is_some()
        }
    }

    fn identities() -> (Arc<Keypair>, Arc<Keypair>) {
        (
            Arc::new(Keypair::generate().unwrap()),
            Arc::new(Keypair::generate().unwrap()),
        )
    }

    async fn connected(
        max_chunk: usize,
    ) -> (SecureConnection<PipeTransport>, SecureConnection<PipeTransport>) {
        let (client_id, server_id) = identities();
        let (client_end, server_end) = pipe(max_chunk);
        let config = HandshakeConfig::default();
        let network = NetworkId::default();

        let (client, server) = tokio::join!(
            SecureConnection::connect(client_end, Arc::clone(&client_id), network, server_id.public, &config),
            SecureConnection::accept(server_end, Arc::clone(&server_id), network, &config),
        );
        let (client, server) = (client.unwrap(), server.unwrap());

        assert_eq!(client.remote_identity(), &server_id.public);
        assert_eq!(server.remote_identity(), &client_id.public);
        (client, server)
    }

    #[tokio::test]
    async fn test_exchange_whole_chunks() {
        let (mut client, mut server) = connected(usize::MAX).await;

        client.send(b"ping").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), Bytes::from_static(b"ping"));

        server.send(b"pong").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn test_exchange_tiny_chunks() {
        for max_chunk in [1, 7, 33] {
            let (mut client, mut server) = connected(max_chunk).await;

            let big = vec![0x5Au8; 5000];
            client.send(&big).await.unwrap();
            client.send(b"").await.unwrap();

            assert_eq!(&server.recv().await.unwrap().unwrap()[..], &big[..]);
            assert!(server.recv().await.unwrap().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_close_sends_goodbye() {
        let (mut client, mut server) = connected(usize::MAX).await;

        client.send(b"bye soon").await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(client.send(b"late").await, Err(TransportError::Closed)));

        assert_eq!(server.recv().await.unwrap().unwrap(), Bytes::from_static(b"bye soon"));
        assert!(server.recv().await.unwrap().is_none());
        assert_eq!(server.state(), ConnectionState::PeerClosed);
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let (mut client, _server) = connected(usize::MAX).await;

        let result = client.send(&vec![0u8; 70_000]).await;
        assert!(matches!(
            result,
            Err(TransportError::Channel(crate::channel::ChannelError::Frame(
                crate::channel::FrameError::MessageTooLarge(70_000, _)
            )))
        ));
    }

    #[tokio::test]
    async fn test_wrong_server_identity_fails() {
        let (client_id, server_id) = identities();
        let impostor = Arc::new(Keypair::generate().unwrap());
        let (client_end, server_end) = pipe(usize::MAX);
        let config = HandshakeConfig::default();
        let network = NetworkId::default();

        let (client, server) = tokio::join!(
            SecureConnection::connect(client_end, client_id, network, impostor.public, &config),
            SecureConnection::accept(server_end, server_id, network, &config),
        );

        assert!(server.is_err());
        assert!(client.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (_, server_id) = identities();
        let (_silent_peer, server_end) = pipe(usize::MAX);
        let config = HandshakeConfig { timeout_secs: 2 };

        let result =
            SecureConnection::accept(server_end, server_id, NetworkId::default(), &config).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
