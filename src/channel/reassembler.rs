//! Exact-length reassembly of arbitrarily chunked input
//!
//! Every protocol phase knows how many bytes it needs next: 64 for a hello,
//! 34 for a frame header, the decrypted length for a frame body. The
//! reassembler collects exactly that many bytes across chunks and hands back
//! whatever part of the final chunk it did not need.

use bytes::{Bytes, BytesMut};

/// Incremental buffer that fills up to a fixed target
#[derive(Debug)]
pub struct Reassembler {
    target: usize,
    buf: BytesMut,
}

impl Reassembler {
    /// Create a reassembler waiting for `target` bytes
    pub fn new(target: usize) -> Self {
        Self {
            target,
            buf: BytesMut::with_capacity(target),
        }
    }

    /// Re-arm for a new target
    ///
    /// Only valid between segments; any partially collected bytes would
    /// belong to the previous target.
    pub fn expect(&mut self, target: usize) {
        debug_assert!(self.buf.is_empty(), "re-armed with bytes pending");
        self.target = target;
        self.buf.reserve(target);
    }

    /// Bytes collected towards the current segment
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still missing from the current segment
    pub fn remaining(&self) -> usize {
        self.target - self.buf.len()
    }

    /// Feed a chunk
    ///
    /// Returns `None` if the whole chunk was absorbed without completing the
    /// segment. Otherwise returns the completed segment and the unconsumed
    /// tail of `chunk`; the reassembler is then empty and keeps its target
    /// until [`Reassembler::expect`] changes it.
    pub fn push<'a>(&mut self, chunk: &'a [u8]) -> Option<(Bytes, &'a [u8])> {
        let take = self.remaining().min(chunk.len());
        let (head, rest) = chunk.split_at(take);
        self.buf.extend_from_slice(head);

        if self.buf.len() == self.target {
            Some((self.buf.split().freeze(), rest))
        } else {
            None
        }
    }
}
