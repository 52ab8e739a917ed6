//! Authenticated channel
//!
//! A [`Channel`] runs the secret handshake and then switches to the box
//! stream on the same byte stream. It performs no I/O: the caller feeds it
//! whatever arrived and writes out whatever it returns.

mod frame;
mod reassembler;

pub use frame::{Frame, FrameError, FrameHeader, FrameOpener, FrameSealer, Framer};
pub use reassembler::Reassembler;

use crate::crypto::{CryptoError, Keypair, PublicKey};
use crate::handshake::{HandshakeError, HandshakeRole, HandshakeSession, Initiator, Responder};
use crate::protocol::NetworkId;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Channel not established")]
    NotEstablished,

    #[error("Channel closed")]
    Closed,
}

enum ChannelState<R: HandshakeRole> {
    Handshaking(HandshakeSession<R>),
    Established(Framer),
    Closed,
}

/// What one call to [`Channel::receive`] produced
#[derive(Debug, Default)]
pub struct ChannelOutput {
    /// Bytes to write to the peer, in order
    pub outbound: Vec<Bytes>,
    /// Decrypted application messages, in order
    pub messages: Vec<Bytes>,
    /// Set on the call that completed the handshake
    pub established: Option<PublicKey>,
    /// The peer sent a goodbye
    pub closed: bool,
}

/// Handshake followed by box stream, for one connection
pub struct Channel<R: HandshakeRole> {
    state: ChannelState<R>,
    remote_identity: Option<PublicKey>,
}

impl Channel<Initiator> {
    /// Dial `remote_identity`; the returned hello must be written first
    pub fn initiator(
        identity: Arc<Keypair>,
        network_id: NetworkId,
        remote_identity: PublicKey,
    ) -> Result<(Self, Bytes), ChannelError> {
        let (session, hello) = HandshakeSession::<Initiator>::initiate(identity, network_id, remote_identity)?;
        Ok((Self::with_session(session), hello))
    }
}

impl Channel<Responder> {
    /// Wait for an initiator
    pub fn responder(identity: Arc<Keypair>, network_id: NetworkId) -> Result<Self, ChannelError> {
        let session = HandshakeSession::<Responder>::respond(identity, network_id)?;
        Ok(Self::with_session(session))
    }
}

impl<R: HandshakeRole> Channel<R> {
    fn with_session(session: HandshakeSession<R>) -> Self {
        Self {
            state: ChannelState::Handshaking(session),
            remote_identity: None,
        }
    }

    /// Feed bytes received from the peer
    ///
    /// Bytes that follow the final handshake message in the same chunk go
    /// straight to the box stream. Any error closes the channel.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<ChannelOutput, ChannelError> {
        let mut output = ChannelOutput::default();
        match self.receive_inner(chunk, &mut output) {
            Ok(()) => Ok(output),
            Err(e) => {
                debug!(error = %e, "channel closed on error");
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }

    fn receive_inner(&mut self, chunk: &[u8], output: &mut ChannelOutput) -> Result<(), ChannelError> {
        match &mut self.state {
            ChannelState::Handshaking(session) => {
                let progress = session.receive(chunk)?;
                output.outbound = progress.outbound;

                if let Some(outcome) = progress.outcome {
                    let keys = outcome.channel_keys()?;
                    let mut framer = Framer::new(&keys);

                    output.messages = framer.receive(progress.rest)?;
                    output.closed = framer.is_closed();
                    output.established = Some(outcome.remote_identity);

                    info!(remote = %outcome.remote_identity, role = ?R::ROLE, "Channel established");
                    self.remote_identity = Some(outcome.remote_identity);
                    self.state = ChannelState::Established(framer);
                }
                Ok(())
            }
            ChannelState::Established(framer) => {
                output.messages = framer.receive(chunk)?;
                output.closed = framer.is_closed();
                Ok(())
            }
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    /// Encrypt one application message
    pub fn send(&mut self, message: &[u8]) -> Result<Bytes, ChannelError> {
        Ok(self.framer_mut()?.send(message)?)
    }

    /// Encrypt the goodbye marker; nothing can be sent afterwards
    pub fn goodbye(&mut self) -> Result<Bytes, ChannelError> {
        Ok(self.framer_mut()?.goodbye()?)
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, ChannelState::Established(_))
    }

    pub fn is_closed(&self) -> bool {
        match &self.state {
            ChannelState::Established(framer) => framer.is_closed(),
            ChannelState::Closed => true,
            ChannelState::Handshaking(_) => false,
        }
    }

    /// Verified identity of the peer, once established
    pub fn remote_identity(&self) -> Option<&PublicKey> {
        self.remote_identity.as_ref()
    }

    /// Take the box stream out of an established channel
    pub fn into_framer(self) -> Result<(Framer, PublicKey), ChannelError> {
        match (self.state, self.remote_identity) {
            (ChannelState::Established(framer), Some(remote)) => Ok((framer, remote)),
            (ChannelState::Closed, _) => Err(ChannelError::Closed),
            _ => Err(ChannelError::NotEstablished),
        }
    }

    fn framer_mut(&mut self) -> Result<&mut Framer, ChannelError> {
        match &mut self.state {
            ChannelState::Established(framer) => Ok(framer),
            ChannelState::Handshaking(_) => Err(ChannelError::NotEstablished),
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> Arc<Keypair> {
        Arc::new(Keypair::generate().unwrap())
    }

    /// Run the handshake to completion with whole-message delivery
    fn establish(network: NetworkId) -> (Channel<Initiator>, Channel<Responder>, Arc<Keypair>, Arc<Keypair>) {
        let alice = keypair();
        let bob = keypair();
        let (mut a, hello) = Channel::<Initiator>::initiator(Arc::clone(&alice), network, bob.public).unwrap();
        let mut b = Channel::<Responder>::responder(Arc::clone(&bob), network).unwrap();

        let mut to_b = vec![hello];
        let mut to_a = Vec::new();
        while !(a.is_established() && b.is_established()) {
            for chunk in to_b.drain(..) {
                to_a.extend(b.receive(&chunk).unwrap().outbound);
            }
            for chunk in to_a.drain(..) {
                to_b.extend(a.receive(&chunk).unwrap().outbound);
            }
        }

        (a, b, alice, bob)
    }

    #[test]
    fn test_ping_pong() {
        let (mut a, mut b, alice, bob) = establish(NetworkId([0u8; 32]));
        assert_eq!(a.remote_identity(), Some(&bob.public));
        assert_eq!(b.remote_identity(), Some(&alice.public));

        let ping = a.send(b"ping").unwrap();
        let out = b.receive(&ping).unwrap();
        assert_eq!(out.messages, vec![Bytes::from_static(b"ping")]);

        let pong = b.send(b"pong").unwrap();
        let out = a.receive(&pong).unwrap();
        assert_eq!(out.messages, vec![Bytes::from_static(b"pong")]);
    }

    #[test]
    fn test_send_before_established() {
        let bob = keypair();
        let (mut a, _) = Channel::<Initiator>::initiator(keypair(), NetworkId::default(), bob.public).unwrap();

        assert!(matches!(a.send(b"early"), Err(ChannelError::NotEstablished)));
        assert!(matches!(a.goodbye(), Err(ChannelError::NotEstablished)));
        assert!(a.remote_identity().is_none());
    }

    #[test]
    fn test_bytes_after_accept_delivered_immediately() {
        let alice = keypair();
        let bob = keypair();
        let network = NetworkId::default();
        let (mut a, hello) = Channel::<Initiator>::initiator(Arc::clone(&alice), network, bob.public).unwrap();
        let mut b = Channel::<Responder>::responder(Arc::clone(&bob), network).unwrap();

        let reply = b.receive(&hello).unwrap().outbound;
        let auth = a.receive(&reply[0]).unwrap().outbound;

        let out = b.receive(&auth[0]).unwrap();
        assert_eq!(out.established, Some(alice.public));

        // the responder writes its accept and a first message back to back
        let mut chunk = out.outbound[0].to_vec();
        chunk.extend_from_slice(&b.send(b"welcome").unwrap());
        chunk.extend_from_slice(&b.send(b"").unwrap());

        let out = a.receive(&chunk).unwrap();
        assert_eq!(out.established, Some(bob.public));
        assert_eq!(
            out.messages,
            vec![Bytes::from_static(b"welcome"), Bytes::new()]
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let alice = keypair();
        let bob = keypair();
        let network = NetworkId::default();
        let (mut a, hello) = Channel::<Initiator>::initiator(Arc::clone(&alice), network, bob.public).unwrap();
        let mut b = Channel::<Responder>::responder(Arc::clone(&bob), network).unwrap();

        let mut wire_to_b: Vec<u8> = hello.to_vec();
        let mut wire_to_a: Vec<u8> = Vec::new();
        let mut received = Vec::new();

        for _ in 0..4 {
            for byte in std::mem::take(&mut wire_to_b) {
                for out in b.receive(&[byte]).unwrap().outbound {
                    wire_to_a.extend_from_slice(&out);
                }
            }
            if b.is_established() && received.is_empty() {
                wire_to_a.extend_from_slice(&b.send(b"hello alice").unwrap());
            }
            for byte in std::mem::take(&mut wire_to_a) {
                let out = a.receive(&[byte]).unwrap();
                for chunk in out.outbound {
                    wire_to_b.extend_from_slice(&chunk);
                }
                received.extend(out.messages);
            }
        }

        assert!(a.is_established());
        assert_eq!(received, vec![Bytes::from_static(b"hello alice")]);
    }

    #[test]
    fn test_failure_closes_channel() {
        let alice = keypair();
        let bob = keypair();
        let (_, hello) = Channel::<Initiator>::initiator(alice, NetworkId([1u8; 32]), bob.public).unwrap();
        let mut b = Channel::<Responder>::responder(bob, NetworkId([2u8; 32])).unwrap();

        assert!(matches!(
            b.receive(&hello),
            Err(ChannelError::Handshake(HandshakeError::BadNetworkTag))
        ));
        assert!(b.is_closed());
        assert!(matches!(b.receive(&hello), Err(ChannelError::Closed)));
        assert!(matches!(b.send(b"x"), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_tampered_frame_closes_channel() {
        let (mut a, mut b, _, _) = establish(NetworkId::default());

        let mut frame = a.send(b"payload").unwrap().to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;

        assert!(matches!(
            b.receive(&frame),
            Err(ChannelError::Frame(FrameError::Authentication("body")))
        ));
        assert!(matches!(b.receive(&[]), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_goodbye() {
        let (mut a, mut b, _, _) = establish(NetworkId::default());

        let mut chunk = a.send(b"last words").unwrap().to_vec();
        chunk.extend_from_slice(&a.goodbye().unwrap());
        assert!(matches!(a.send(b"more"), Err(ChannelError::Frame(FrameError::Closed))));

        let out = b.receive(&chunk).unwrap();
        assert_eq!(out.messages, vec![Bytes::from_static(b"last words")]);
        assert!(out.closed);
        assert!(b.is_closed());
    }

    #[test]
    fn test_into_framer() {
        let bob = keypair();
        let (a, _) = Channel::<Initiator>::initiator(keypair(), NetworkId::default(), bob.public).unwrap();
        assert!(matches!(a.into_framer(), Err(ChannelError::NotEstablished)));

        let (a, _, _, bob) = establish(NetworkId::default());
        let (_, remote) = a.into_framer().unwrap();
        assert_eq!(remote, bob.public);
    }
}
