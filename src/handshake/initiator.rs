//! Dialing side of the secret handshake

use super::{HandshakeError, HandshakeRole, Role, SessionState};
use crate::crypto::{agree, SecretBox, ZERO_NONCE};
use crate::protocol::{ACCEPT_LEN, HANDSHAKE_STEPS, HELLO_LEN, SIGNATURE_LEN};
use bytes::Bytes;

/// Initiator: sends the first hello, expects `[hello reply, accept]`
#[derive(Debug, Clone, Copy)]
pub struct Initiator;

impl HandshakeRole for Initiator {
    const ROLE: Role = Role::Initiator;
    const STEP_SIZES: [usize; HANDSHAKE_STEPS] = [HELLO_LEN, ACCEPT_LEN];

    fn step(
        state: &mut SessionState,
        step: usize,
        segment: &[u8],
    ) -> Result<Option<Bytes>, HandshakeError> {
        match step {
            0 => read_hello_and_send_auth(state, step, segment).map(Some),
            1 => read_accept(state, step, segment).map(|()| None),
            _ => Err(HandshakeError::Complete),
        }
    }
}

/// Verify the responder's hello, derive ss0..ss2 and prove our identity
fn read_hello_and_send_auth(
    state: &mut SessionState,
    step: usize,
    segment: &[u8],
) -> Result<Bytes, HandshakeError> {
    state.read_hello(segment)?;
    state.agree_ephemeral(step)?;

    let responder = state.remote_identity(step)?;
    let responder_dh = responder
        .to_dh()
        .map_err(HandshakeError::from_agreement)?;
    let remote_ephemeral = state.remote_ephemeral(step)?;

    state.ss1 = state
        .ephemeral(step)?
        .agree(&responder_dh)
        .map_err(HandshakeError::from_agreement)?;
    state.ss2 = agree(&state.identity.dh_secret(), &remote_ephemeral)
        .map_err(HandshakeError::from_agreement)?;

    let signature = state.identity.sign(&state.auth_message(&responder));
    state.local_signature = Some(signature);

    let payload = [&signature[..], &state.identity.public.as_bytes()[..]].concat();
    let boxed = SecretBox::new(&state.auth_key()).seal(&ZERO_NONCE, &payload)?;

    Ok(Bytes::from(boxed))
}

/// Open the responder's accept box and check it signed our proof
fn read_accept(state: &mut SessionState, step: usize, segment: &[u8]) -> Result<(), HandshakeError> {
    let plaintext = SecretBox::new(&state.accept_key())
        .open(&ZERO_NONCE, segment)
        .map_err(|_| HandshakeError::Decryption("accept"))?;

    let signature: [u8; SIGNATURE_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| HandshakeError::Decryption("accept"))?;

    let local_signature = state
        .local_signature
        .ok_or(HandshakeError::OutOfOrder(step))?;
    let responder = state.remote_identity(step)?;
    let expected = state.accept_message(&local_signature, &state.identity.public);

    responder
        .verify(&expected, &signature)
        .map_err(|_| HandshakeError::BadSignature("accept"))?;

    state.remote_signature = Some(signature);
    Ok(())
}
