//! Secret handshake
//!
//! Two-step mutual authentication over a fresh X25519 exchange:
//!
//! ```text
//! Initiator                                   Responder
//!   hello:   tag(eA) ‖ eA               ──►
//!                                       ◄──   hello:  tag(eB) ‖ eB
//!   auth:    box[ss0,ss1](sigA ‖ A)     ──►
//!                                       ◄──   accept: box[ss0,ss1,ss2](sigB)
//! ```
//!
//! The initiator must already know the responder's identity `B`; the
//! responder learns `A` from the auth message. Each side drives the same
//! [`HandshakeSession`] with its [`HandshakeRole`] implementation supplying
//! the per-step logic.

mod initiator;
mod responder;

pub use initiator::Initiator;
pub use responder::Responder;

use crate::channel::Reassembler;
use crate::crypto::{
    derive_channel_keys, hash, ChannelKeys, CryptoError, EphemeralKeypair, Keypair, PublicKey,
    SharedSecrets, KEY_LEN,
};
use crate::protocol::{NetworkId, HANDSHAKE_STEPS, SIGNATURE_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Handshake failures; every one of them is fatal for the connection
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("hello carries an invalid network tag")]
    BadNetworkTag,

    #[error("could not decrypt {0}")]
    Decryption(&'static str),

    #[error("{0} signature did not verify")]
    BadSignature(&'static str),

    #[error("remote identity is not a valid public key")]
    InvalidIdentity,

    #[error("key agreement produced a weak shared secret")]
    WeakKey,

    #[error("handshake step {0} ran before its inputs were known")]
    OutOfOrder(usize),

    #[error("handshake already failed")]
    Aborted,

    #[error("handshake already complete")]
    Complete,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl HandshakeError {
    fn from_agreement(err: CryptoError) -> Self {
        match err {
            CryptoError::WeakKey => HandshakeError::WeakKey,
            CryptoError::InvalidPublicKey => HandshakeError::InvalidIdentity,
            other => HandshakeError::Crypto(other),
        }
    }
}

/// Which side of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialer; knows the responder's identity up front
    Initiator,
    /// Listener; learns the initiator's identity during the handshake
    Responder,
}

/// Per-role step logic plugged into [`HandshakeSession`]
pub trait HandshakeRole: Send + 'static {
    const ROLE: Role;

    /// Bytes expected before each step
    const STEP_SIZES: [usize; HANDSHAKE_STEPS];

    /// Process the complete input for `step`, returning any reply to send
    fn step(
        state: &mut SessionState,
        step: usize,
        segment: &[u8],
    ) -> Result<Option<Bytes>, HandshakeError>;
}

/// Material accumulated over the handshake, shared by both roles
pub struct SessionState {
    network_id: NetworkId,
    identity: Arc<Keypair>,
    ephemeral: Option<EphemeralKeypair>,
    ephemeral_public: [u8; KEY_LEN],
    ss0: Zeroizing<[u8; KEY_LEN]>,
    ss0_hash: [u8; KEY_LEN],
    ss1: Zeroizing<[u8; KEY_LEN]>,
    ss2: Zeroizing<[u8; KEY_LEN]>,
    local_signature: Option<[u8; SIGNATURE_LEN]>,
    remote_identity: Option<PublicKey>,
    remote_ephemeral: Option<[u8; KEY_LEN]>,
    remote_signature: Option<[u8; SIGNATURE_LEN]>,
}

impl SessionState {
    fn new(
        identity: Arc<Keypair>,
        network_id: NetworkId,
        remote_identity: Option<PublicKey>,
    ) -> Result<Self, HandshakeError> {
        let ephemeral = EphemeralKeypair::generate()?;
        Ok(Self {
            network_id,
            identity,
            ephemeral_public: ephemeral.public_bytes(),
            ephemeral: Some(ephemeral),
            ss0: Zeroizing::new([0u8; KEY_LEN]),
            ss0_hash: [0u8; KEY_LEN],
            ss1: Zeroizing::new([0u8; KEY_LEN]),
            ss2: Zeroizing::new([0u8; KEY_LEN]),
            local_signature: None,
            remote_identity,
            remote_ephemeral: None,
            remote_signature: None,
        })
    }

    /// `authTag(ephemeralPublic) ‖ ephemeralPublic`
    fn hello(&self) -> Result<Bytes, HandshakeError> {
        let tag = crate::crypto::auth_tag(&self.ephemeral_public, &self.network_id)?;
        let mut buf = BytesMut::with_capacity(tag.len() + KEY_LEN);
        buf.put_slice(&tag);
        buf.put_slice(&self.ephemeral_public);
        Ok(buf.freeze())
    }

    /// Check the remote hello's network tag and remember its ephemeral key
    fn read_hello(&mut self, segment: &[u8]) -> Result<(), HandshakeError> {
        let (tag, ephemeral) = segment.split_at(segment.len() - KEY_LEN);
        crate::crypto::verify_auth_tag(tag, ephemeral, &self.network_id)
            .map_err(|_| HandshakeError::BadNetworkTag)?;

        let mut remote = [0u8; KEY_LEN];
        remote.copy_from_slice(ephemeral);
        self.remote_ephemeral = Some(remote);
        Ok(())
    }

    fn ephemeral(&self, step: usize) -> Result<&EphemeralKeypair, HandshakeError> {
        self.ephemeral.as_ref().ok_or(HandshakeError::OutOfOrder(step))
    }

    fn remote_ephemeral(&self, step: usize) -> Result<x25519_dalek::PublicKey, HandshakeError> {
        self.remote_ephemeral
            .map(x25519_dalek::PublicKey::from)
            .ok_or(HandshakeError::OutOfOrder(step))
    }

    fn remote_identity(&self, step: usize) -> Result<PublicKey, HandshakeError> {
        self.remote_identity.ok_or(HandshakeError::OutOfOrder(step))
    }

    /// ss0 = ephemeral x remote ephemeral, plus its hash
    fn agree_ephemeral(&mut self, step: usize) -> Result<(), HandshakeError> {
        let remote = self.remote_ephemeral(step)?;
        self.ss0 = self
            .ephemeral(step)?
            .agree(&remote)
            .map_err(HandshakeError::from_agreement)?;
        self.ss0_hash = hash(&[&self.ss0[..]]);
        Ok(())
    }

    /// Key for the initiator's auth box
    fn auth_key(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(hash(&[
            self.network_id.as_bytes(),
            &self.ss0[..],
            &self.ss1[..],
        ]))
    }

    /// Key for the responder's accept box
    fn accept_key(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(hash(&[
            self.network_id.as_bytes(),
            &self.ss0[..],
            &self.ss1[..],
            &self.ss2[..],
        ]))
    }

    /// What the initiator signs: `networkId ‖ responderIdentity ‖ H(ss0)`
    fn auth_message(&self, responder: &PublicKey) -> Vec<u8> {
        [
            &self.network_id.as_bytes()[..],
            &responder.as_bytes()[..],
            &self.ss0_hash[..],
        ]
        .concat()
    }

    /// What the responder signs:
    /// `networkId ‖ initiatorSignature ‖ initiatorIdentity ‖ H(ss0)`
    fn accept_message(&self, initiator_sig: &[u8; SIGNATURE_LEN], initiator: &PublicKey) -> Vec<u8> {
        [
            &self.network_id.as_bytes()[..],
            &initiator_sig[..],
            &initiator.as_bytes()[..],
            &self.ss0_hash[..],
        ]
        .concat()
    }

    /// Package the secrets once both sides are authenticated; the ephemeral
    /// secret is dropped here
    fn finish(&mut self, step: usize) -> Result<HandshakeOutcome, HandshakeError> {
        let outcome = HandshakeOutcome {
            network_id: self.network_id,
            local_identity: self.identity.public,
            remote_identity: self.remote_identity(step)?,
            local_ephemeral: self.ephemeral_public,
            remote_ephemeral: self.remote_ephemeral.ok_or(HandshakeError::OutOfOrder(step))?,
            secrets: SharedSecrets {
                ss0: *self.ss0,
                ss1: *self.ss1,
                ss2: *self.ss2,
            },
        };
        self.ephemeral = None;
        Ok(outcome)
    }

    pub fn remote_signature(&self) -> Option<&[u8; SIGNATURE_LEN]> {
        self.remote_signature.as_ref()
    }
}

/// Everything a successful handshake established
pub struct HandshakeOutcome {
    pub network_id: NetworkId,
    pub local_identity: PublicKey,
    pub remote_identity: PublicKey,
    pub local_ephemeral: [u8; KEY_LEN],
    pub remote_ephemeral: [u8; KEY_LEN],
    secrets: SharedSecrets,
}

impl HandshakeOutcome {
    /// Derive the box stream keys for this connection
    pub fn channel_keys(&self) -> Result<ChannelKeys, CryptoError> {
        derive_channel_keys(
            &self.network_id,
            &self.secrets,
            &self.local_identity,
            &self.remote_identity,
            &self.local_ephemeral,
            &self.remote_ephemeral,
        )
    }

    pub fn secrets(&self) -> &SharedSecrets {
        &self.secrets
    }
}

impl std::fmt::Debug for HandshakeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeOutcome")
            .field("local_identity", &self.local_identity)
            .field("remote_identity", &self.remote_identity)
            .finish_non_exhaustive()
    }
}

/// Result of feeding one chunk to a session
#[derive(Debug)]
pub struct HandshakeProgress<'a> {
    /// Handshake messages to write, in order
    pub outbound: Vec<Bytes>,
    /// Present once the final step verified
    pub outcome: Option<HandshakeOutcome>,
    /// Bytes of the chunk after the final handshake message
    pub rest: &'a [u8],
}

/// Per-connection handshake state machine
pub struct HandshakeSession<R: HandshakeRole> {
    state: SessionState,
    step: usize,
    reassembler: Reassembler,
    authenticated: bool,
    failed: bool,
    _role: PhantomData<R>,
}

impl<R: HandshakeRole> HandshakeSession<R> {
    fn with_state(state: SessionState) -> Self {
        Self {
            state,
            step: 0,
            reassembler: Reassembler::new(R::STEP_SIZES[0]),
            authenticated: false,
            failed: false,
            _role: PhantomData,
        }
    }

    pub fn role(&self) -> Role {
        R::ROLE
    }

    /// Index of the step currently collecting input
    pub fn step(&self) -> usize {
        self.step
    }

    /// Bytes still needed to complete the current step
    pub fn expected_bytes(&self) -> usize {
        if self.authenticated {
            0
        } else {
            self.reassembler.remaining()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Feed a chunk from the transport
    ///
    /// Completes as many steps as the chunk allows. On the final step the
    /// outcome is returned together with any bytes that followed it. Any
    /// error aborts the session permanently.
    pub fn receive<'a>(&mut self, chunk: &'a [u8]) -> Result<HandshakeProgress<'a>, HandshakeError> {
        if self.failed {
            return Err(HandshakeError::Aborted);
        }
        if self.authenticated {
            return Err(HandshakeError::Complete);
        }

        let mut outbound = Vec::new();
        let mut input = chunk;

        while let Some((segment, rest)) = self.reassembler.push(input) {
            input = rest;
            let step = self.step;

            let reply = R::step(&mut self.state, step, &segment).map_err(|e| self.abort(e))?;
            outbound.extend(reply);
            debug!(role = ?R::ROLE, step, "handshake step complete");

            self.step += 1;
            if self.step == HANDSHAKE_STEPS {
                let outcome = self.state.finish(step).map_err(|e| self.abort(e))?;
                self.authenticated = true;
                debug!(role = ?R::ROLE, remote = ?outcome.remote_identity, "peer authenticated");
                return Ok(HandshakeProgress {
                    outbound,
                    outcome: Some(outcome),
                    rest: input,
                });
            }
            self.reassembler.expect(R::STEP_SIZES[self.step]);
        }

        Ok(HandshakeProgress {
            outbound,
            outcome: None,
            rest: &[],
        })
    }

    fn abort(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(role = ?R::ROLE, step = self.step, error = %err, "handshake aborted");
        self.failed = true;
        self.state.ephemeral = None;
        err
    }
}

impl HandshakeSession<Initiator> {
    /// Start dialing `remote_identity`, returning the session and the hello
    /// to send before anything is received
    pub fn initiate(
        identity: Arc<Keypair>,
        network_id: NetworkId,
        remote_identity: PublicKey,
    ) -> Result<(Self, Bytes), HandshakeError> {
        let state = SessionState::new(identity, network_id, Some(remote_identity))?;
        let hello = state.hello()?;
        Ok((Self::with_state(state), hello))
    }
}

impl HandshakeSession<Responder> {
    /// Wait for an initiator's hello
    pub fn respond(identity: Arc<Keypair>, network_id: NetworkId) -> Result<Self, HandshakeError> {
        let state = SessionState::new(identity, network_id, None)?;
        Ok(Self::with_state(state))
    }
}
