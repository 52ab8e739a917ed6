//! Listening side of the secret handshake

use super::{HandshakeError, HandshakeRole, Role, SessionState};
use crate::crypto::{agree, PublicKey, SecretBox, ZERO_NONCE};
use crate::protocol::{AUTH_LEN, HANDSHAKE_STEPS, HELLO_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use bytes::Bytes;

/// Responder: waits for a hello, expects `[hello, auth]`
#[derive(Debug, Clone, Copy)]
pub struct Responder;

impl HandshakeRole for Responder {
    const ROLE: Role = Role::Responder;
    const STEP_SIZES: [usize; HANDSHAKE_STEPS] = [HELLO_LEN, AUTH_LEN];

    fn step(
        state: &mut SessionState,
        step: usize,
        segment: &[u8],
    ) -> Result<Option<Bytes>, HandshakeError> {
        match step {
            0 => read_hello_and_reply(state, step, segment).map(Some),
            1 => read_auth_and_accept(state, step, segment).map(Some),
            _ => Err(HandshakeError::Complete),
        }
    }
}

/// Verify the initiator's hello, answer with ours, derive ss0 and ss1
fn read_hello_and_reply(
    state: &mut SessionState,
    step: usize,
    segment: &[u8],
) -> Result<Bytes, HandshakeError> {
    state.read_hello(segment)?;
    let reply = state.hello()?;

    state.agree_ephemeral(step)?;
    let remote_ephemeral = state.remote_ephemeral(step)?;
    state.ss1 = agree(&state.identity.dh_secret(), &remote_ephemeral)
        .map_err(HandshakeError::from_agreement)?;

    Ok(reply)
}

/// Learn and verify the initiator's identity, derive ss2, sign the accept
fn read_auth_and_accept(
    state: &mut SessionState,
    step: usize,
    segment: &[u8],
) -> Result<Bytes, HandshakeError> {
    let plaintext = SecretBox::new(&state.auth_key())
        .open(&ZERO_NONCE, segment)
        .map_err(|_| HandshakeError::Decryption("auth"))?;

    if plaintext.len() != SIGNATURE_LEN + PUBLIC_KEY_LEN {
        return Err(HandshakeError::Decryption("auth"));
    }
    let (sig_bytes, identity_bytes) = plaintext.split_at(SIGNATURE_LEN);

    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(sig_bytes);
    let initiator =
        PublicKey::from_bytes(identity_bytes).map_err(|_| HandshakeError::InvalidIdentity)?;

    let expected = state.auth_message(&state.identity.public);
    initiator
        .verify(&expected, &signature)
        .map_err(|_| HandshakeError::BadSignature("auth"))?;

    let initiator_dh = initiator
        .to_dh()
        .map_err(HandshakeError::from_agreement)?;
    state.ss2 = state
        .ephemeral(step)?
        .agree(&initiator_dh)
        .map_err(HandshakeError::from_agreement)?;

    state.remote_identity = Some(initiator);
    state.remote_signature = Some(signature);

    let accept = state.identity.sign(&state.accept_message(&signature, &initiator));
    state.local_signature = Some(accept);

    let boxed = SecretBox::new(&state.accept_key()).seal(&ZERO_NONCE, &accept)?;
    Ok(Bytes::from(boxed))
}
