//! Box stream framing for established channels
//!
//! Frame format:
//! ```text
//! +-------------------------------------------+
//! |  Header box (34B)                         |
//! |    tag(16) ‖ enc( len(2) ‖ body tag(16) ) |
//! +-------------------------------------------+
//! |  Body ciphertext (len bytes, no tag)      |
//! +-------------------------------------------+
//! ```
//!
//! The header and the body each take one nonce from the direction's counter,
//! header first. A header whose plaintext is all zeros is a goodbye and ends
//! the stream.

use super::Reassembler;
use crate::crypto::{ChannelKeys, CryptoError, NonceCounter, SecretBox, KEY_LEN};
use crate::protocol::{
    FRAME_HEADER_LEN, HEADER_PLAINTEXT_LEN, MAC_LEN, MAX_MESSAGE_SIZE, NONCE_LEN,
};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

/// Frame layer errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Message too large: {0} > {1}")]
    MessageTooLarge(usize, usize),

    #[error("Frame {0} failed authentication")]
    Authentication(&'static str),

    #[error("Data received after goodbye")]
    TrailingData,

    #[error("Stream closed")]
    Closed,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Decrypted frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the body ciphertext that follows
    pub body_len: u16,
    /// Poly1305 tag detached from the body
    pub body_tag: [u8; MAC_LEN],
}

impl FrameHeader {
    /// The end-of-stream marker
    pub const GOODBYE: FrameHeader = FrameHeader {
        body_len: 0,
        body_tag: [0u8; MAC_LEN],
    };

    /// Encode header plaintext
    pub fn encode(&self) -> [u8; HEADER_PLAINTEXT_LEN] {
        let mut buf = [0u8; HEADER_PLAINTEXT_LEN];
        buf[..2].copy_from_slice(&self.body_len.to_be_bytes());
        buf[2..].copy_from_slice(&self.body_tag);
        buf
    }

    /// Decode header plaintext
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != HEADER_PLAINTEXT_LEN {
            return Err(FrameError::Authentication("header"));
        }
        let mut body_tag = [0u8; MAC_LEN];
        body_tag.copy_from_slice(&buf[2..]);
        Ok(Self {
            body_len: u16::from_be_bytes([buf[0], buf[1]]),
            body_tag,
        })
    }

    pub fn is_goodbye(&self) -> bool {
        *self == Self::GOODBYE
    }
}

/// One encrypted message on the wire
#[derive(Debug, Clone)]
pub struct Frame {
    /// Boxed header
    pub header: [u8; FRAME_HEADER_LEN],
    /// Body ciphertext without its tag
    pub body: Bytes,
}

impl Frame {
    /// Encode frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        buf.put_slice(&self.header);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_LEN + self.body.len()
    }
}

/// Sending half of a box stream
pub struct FrameSealer {
    cipher: SecretBox,
    nonce: NonceCounter,
    closed: bool,
}

impl FrameSealer {
    pub fn new(key: &[u8; KEY_LEN], nonce: NonceCounter) -> Self {
        Self {
            cipher: SecretBox::new(key),
            nonce,
            closed: false,
        }
    }

    /// Encrypt one message into a frame
    pub fn seal_frame(&mut self, message: &[u8]) -> Result<Frame, FrameError> {
        if self.closed {
            return Err(FrameError::Closed);
        }
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge(message.len(), MAX_MESSAGE_SIZE));
        }

        let header_nonce = self.nonce.next();
        let body_nonce = self.nonce.next();

        let mut body = message.to_vec();
        let body_tag = self.cipher.seal_detached(&body_nonce, &mut body)?;

        let header = FrameHeader {
            body_len: message.len() as u16,
            body_tag,
        };
        let header = self.seal_header(&header_nonce, &header)?;

        trace!(len = message.len(), "sealed frame");
        Ok(Frame {
            header,
            body: Bytes::from(body),
        })
    }

    /// Encrypt one message to wire bytes
    pub fn seal(&mut self, message: &[u8]) -> Result<Bytes, FrameError> {
        Ok(self.seal_frame(message)?.encode())
    }

    /// Produce the goodbye header; no frames can be sealed afterwards
    pub fn goodbye(&mut self) -> Result<Bytes, FrameError> {
        if self.closed {
            return Err(FrameError::Closed);
        }
        let nonce = self.nonce.next();
        let header = self.seal_header(&nonce, &FrameHeader::GOODBYE)?;
        self.closed = true;
        Ok(Bytes::copy_from_slice(&header))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Nonce the next frame header will use
    pub fn nonce(&self) -> &NonceCounter {
        &self.nonce
    }

    fn seal_header(
        &self,
        nonce: &[u8; NONCE_LEN],
        header: &FrameHeader,
    ) -> Result<[u8; FRAME_HEADER_LEN], FrameError> {
        let boxed = self.cipher.seal(nonce, &header.encode())?;
        let mut out = [0u8; FRAME_HEADER_LEN];
        out.copy_from_slice(&boxed);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Header,
    Body { tag: [u8; MAC_LEN] },
    Closed,
    Failed,
}

/// Receiving half of a box stream
pub struct FrameOpener {
    cipher: SecretBox,
    nonce: NonceCounter,
    reassembler: Reassembler,
    state: ReadState,
}

impl FrameOpener {
    pub fn new(key: &[u8; KEY_LEN], nonce: NonceCounter) -> Self {
        Self {
            cipher: SecretBox::new(key),
            nonce,
            reassembler: Reassembler::new(FRAME_HEADER_LEN),
            state: ReadState::Header,
        }
    }

    /// Feed a chunk, returning every message it completes in order
    ///
    /// Any authentication failure poisons the opener: this call and every
    /// later one return an error.
    pub fn open(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        match self.open_inner(chunk) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                self.state = ReadState::Failed;
                Err(e)
            }
        }
    }

    /// Whether a goodbye has been received
    pub fn is_closed(&self) -> bool {
        self.state == ReadState::Closed
    }

    /// Nonce the next frame header is expected under
    pub fn nonce(&self) -> &NonceCounter {
        &self.nonce
    }

    fn open_inner(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        let mut messages = Vec::new();
        let mut input = chunk;

        loop {
            match self.state {
                ReadState::Failed => return Err(FrameError::Closed),
                ReadState::Closed if input.is_empty() => break,
                ReadState::Closed => return Err(FrameError::TrailingData),
                _ => {}
            }

            let Some((segment, rest)) = self.reassembler.push(input) else {
                break;
            };
            input = rest;

            match self.state {
                ReadState::Header => {
                    let nonce = self.nonce.next();
                    let plaintext = self
                        .cipher
                        .open(&nonce, &segment)
                        .map_err(|_| FrameError::Authentication("header"))?;
                    let header = FrameHeader::decode(&plaintext)?;

                    if header.is_goodbye() {
                        trace!("received goodbye");
                        self.state = ReadState::Closed;
                        continue;
                    }

                    self.state = ReadState::Body {
                        tag: header.body_tag,
                    };
                    self.reassembler.expect(header.body_len as usize);
                }
                ReadState::Body { tag } => {
                    let nonce = self.nonce.next();
                    let mut body = segment.to_vec();
                    self.cipher
                        .open_detached(&nonce, &mut body, &tag)
                        .map_err(|_| FrameError::Authentication("body"))?;

                    trace!(len = body.len(), "opened frame");
                    messages.push(Bytes::from(body));

                    self.state = ReadState::Header;
                    self.reassembler.expect(FRAME_HEADER_LEN);
                }
                ReadState::Closed | ReadState::Failed => return Err(FrameError::Closed),
            }
        }

        Ok(messages)
    }
}

/// Both directions of an established box stream
pub struct Framer {
    sealer: FrameSealer,
    opener: FrameOpener,
}

impl Framer {
    /// Initialise from freshly derived channel keys
    pub fn new(keys: &ChannelKeys) -> Self {
        Self {
            sealer: FrameSealer::new(keys.send_key(), keys.send_nonce().clone()),
            opener: FrameOpener::new(keys.receive_key(), keys.receive_nonce().clone()),
        }
    }

    /// Encrypt one message to wire bytes
    pub fn send(&mut self, message: &[u8]) -> Result<Bytes, FrameError> {
        self.sealer.seal(message)
    }

    /// Feed received bytes, returning completed messages
    pub fn receive(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        self.opener.open(chunk)
    }

    /// Produce the goodbye header
    pub fn goodbye(&mut self) -> Result<Bytes, FrameError> {
        self.sealer.goodbye()
    }

    /// Whether the peer has said goodbye
    pub fn is_closed(&self) -> bool {
        self.opener.is_closed()
    }

    /// Split into independently owned send and receive halves
    pub fn split(self) -> (FrameSealer, FrameOpener) {
        (self.sealer, self.opener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (FrameSealer, FrameOpener) {
        let key = [0x42u8; KEY_LEN];
        let nonce = NonceCounter::new([0x10u8; NONCE_LEN]);
        (
            FrameSealer::new(&key, nonce.clone()),
            FrameOpener::new(&key, nonce),
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let (mut sealer, mut opener) = pair();
        let wire = sealer.seal(b"Hello, World!").unwrap();
        assert_eq!(wire.len(), FRAME_HEADER_LEN + 13);

        let messages = opener.open(&wire).unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"Hello, World!")]);
    }

    #[test]
    fn test_zero_length_message() {
        let (mut sealer, mut opener) = pair();
        let wire = sealer.seal(b"").unwrap();
        assert_eq!(wire.len(), FRAME_HEADER_LEN);

        let messages = opener.open(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_empty());
        assert!(!opener.is_closed());
    }

    #[test]
    fn test_nonce_advances_by_two_per_frame() {
        let (mut sealer, mut opener) = pair();
        let mut expected = sealer.nonce().clone();

        for msg in [&b"one"[..], &b"two"[..], &b""[..]] {
            let wire = sealer.seal(msg).unwrap();
            expected.next();
            expected.next();
            assert_eq!(sealer.nonce(), &expected);

            opener.open(&wire).unwrap();
            assert_eq!(opener.nonce(), &expected);
        }
    }

    #[test]
    fn test_split_mid_header_and_mid_body() {
        let (mut sealer, mut opener) = pair();
        let mut wire = Vec::new();
        wire.extend_from_slice(&sealer.seal(b"first message").unwrap());
        wire.extend_from_slice(&sealer.seal(b"").unwrap());
        wire.extend_from_slice(&sealer.seal(b"third").unwrap());

        let mut received = Vec::new();
        for chunk in [&wire[..10], &wire[10..40], &wire[40..41], &wire[41..]] {
            received.extend(opener.open(chunk).unwrap());
        }

        assert_eq!(
            received,
            vec![
                Bytes::from_static(b"first message"),
                Bytes::new(),
                Bytes::from_static(b"third"),
            ]
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let (mut sealer, mut opener) = pair();
        let wire = sealer.seal(b"dribble").unwrap();

        let mut received = Vec::new();
        for byte in wire.iter() {
            received.extend(opener.open(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(received, vec![Bytes::from_static(b"dribble")]);
    }

    #[test]
    fn test_tampered_body_fails() {
        let (mut sealer, mut opener) = pair();
        let mut wire = sealer.seal(b"integrity").unwrap().to_vec();
        wire[FRAME_HEADER_LEN] ^= 0x01;

        assert!(matches!(
            opener.open(&wire),
            Err(FrameError::Authentication("body"))
        ));
        // poisoned
        assert!(opener.open(&[]).is_err());
    }

    #[test]
    fn test_tampered_header_fails() {
        let (mut sealer, mut opener) = pair();
        let mut wire = sealer.seal(b"integrity").unwrap().to_vec();
        wire[3] ^= 0x80;

        assert!(matches!(
            opener.open(&wire),
            Err(FrameError::Authentication("header"))
        ));
    }

    #[test]
    fn test_replayed_frame_fails() {
        let (mut sealer, mut opener) = pair();
        let first = sealer.seal(b"once").unwrap();
        opener.open(&first).unwrap();

        assert!(opener.open(&first).is_err());
    }

    #[test]
    fn test_reordered_frames_fail() {
        let (mut sealer, mut opener) = pair();
        let _first = sealer.seal(b"first").unwrap();
        let second = sealer.seal(b"second").unwrap();

        assert!(opener.open(&second).is_err());
    }

    #[test]
    fn test_goodbye_closes_stream() {
        let (mut sealer, mut opener) = pair();
        let mut wire = sealer.seal(b"last words").unwrap().to_vec();
        wire.extend_from_slice(&sealer.goodbye().unwrap());

        let messages = opener.open(&wire).unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"last words")]);
        assert!(opener.is_closed());

        assert!(matches!(sealer.seal(b"more"), Err(FrameError::Closed)));
        assert!(matches!(opener.open(b"x"), Err(FrameError::TrailingData)));
    }

    #[test]
    fn test_message_too_large() {
        let (mut sealer, _) = pair();
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            sealer.seal(&big),
            Err(FrameError::MessageTooLarge(_, MAX_MESSAGE_SIZE))
        ));

        let max = vec![7u8; MAX_MESSAGE_SIZE];
        assert_eq!(sealer.seal(&max).unwrap().len(), FRAME_HEADER_LEN + MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_header_codec() {
        let header = FrameHeader {
            body_len: 0x1234,
            body_tag: [9u8; MAC_LEN],
        };
        let encoded = header.encode();
        assert_eq!(&encoded[..2], &[0x12, 0x34]);
        assert_eq!(FrameHeader::decode(&encoded).unwrap(), header);
        assert!(FrameHeader::GOODBYE.is_goodbye());
    }
}
