//! Chunked message framing.
//!
//! A Bolt message is one or more big-endian `u16`-length-prefixed chunks,
//! terminated by a zero-length chunk. [`Chunker`] turns a complete
//! message into wire bytes; [`Dechunker`] is fed raw bytes as they arrive
//! off the socket and yields complete messages as soon as their
//! terminator is seen — a partially buffered chunk is never handed back.

use bytes::{Bytes, BytesMut};

use crate::error::PackstreamError;

/// Chunks within one message are never split below this size unless the
/// message itself is smaller; 16-bit length prefixes cap a single chunk
/// at `u16::MAX` bytes.
const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Splits one logical message into length-prefixed chunks plus the
/// zero-length terminator.
#[derive(Debug, Default)]
pub struct Chunker {
    max_chunk_size: usize,
}

impl Chunker {
    pub fn new() -> Self {
        Chunker {
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        Chunker { max_chunk_size }
    }

    /// Append `message`'s chunked wire representation to `out`.
    pub fn chunk_into(&self, message: &[u8], out: &mut BytesMut) {
        if message.is_empty() {
            out.extend_from_slice(&[0x00, 0x00]);
            return;
        }
        for piece in message.chunks(self.max_chunk_size.max(1)) {
            out.extend_from_slice(&(piece.len() as u16).to_be_bytes());
            out.extend_from_slice(piece);
        }
        out.extend_from_slice(&[0x00, 0x00]);
    }

    /// Convenience wrapper returning a fresh buffer.
    pub fn chunk(&self, message: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(message.len() + 4);
        self.chunk_into(message, &mut out);
        out
    }
}

#[derive(Debug)]
enum State {
    /// Accumulating the 2-byte chunk length header; `have` bytes of it
    /// have arrived so far.
    Header { have: u8, byte: u8 },
    /// Consuming `remaining` more body bytes of the current chunk.
    Body { remaining: u16 },
}

/// Incrementally reassembles chunked messages from a raw byte stream.
///
/// Bytes arrive from the channel read loop in arbitrary-sized pieces that
/// need not align with chunk or message boundaries; [`feed`] buffers
/// whatever is incomplete and returns every message that became complete
/// as a result of this call.
pub struct Dechunker {
    state: State,
    message: BytesMut,
    completed: Vec<Bytes>,
}

impl Default for Dechunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Dechunker {
    pub fn new() -> Self {
        Dechunker {
            state: State::Header { have: 0, byte: 0 },
            message: BytesMut::new(),
            completed: Vec::new(),
        }
    }

    /// Feed newly-received bytes; returns every message completed as a
    /// result (usually zero or one, but a single `read()` can surface
    /// more than one fully-buffered message).
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Bytes>, PackstreamError> {
        self.completed.clear();
        while !data.is_empty() {
            match &mut self.state {
                State::Header { have, byte } => {
                    if *have == 0 {
                        *byte = data[0];
                        *have = 1;
                        data = &data[1..];
                    } else {
                        let low = data[0];
                        let len = u16::from_be_bytes([*byte, low]);
                        data = &data[1..];
                        if len == 0 {
                            // Terminator: the message buffered so far is complete.
                            let finished = self.message.split().freeze();
                            self.completed.push(finished);
                        } else {
                            self.state = State::Body { remaining: len };
                            continue;
                        }
                        self.state = State::Header { have: 0, byte: 0 };
                    }
                }
                State::Body { remaining } => {
                    let take = (*remaining as usize).min(data.len());
                    self.message.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    *remaining -= take as u16;
                    if *remaining == 0 {
                        self.state = State::Header { have: 0, byte: 0 };
                    }
                }
            }
        }
        Ok(std::mem::take(&mut self.completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_then_dechunk_round_trips() {
        let chunker = Chunker::new();
        let message = b"hello, bolt";
        let wire = chunker.chunk(message);

        let mut dechunker = Dechunker::new();
        let messages = dechunker.feed(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], message);
    }

    #[test]
    fn empty_message_chunks_to_bare_terminator() {
        let chunker = Chunker::new();
        let wire = chunker.chunk(b"");
        assert_eq!(&wire[..], &[0x00, 0x00]);
    }

    #[test]
    fn message_larger_than_chunk_size_splits_into_multiple_chunks() {
        let chunker = Chunker::with_max_chunk_size(4);
        let message = b"0123456789";
        let wire = chunker.chunk(message);
        // 4 + 4 + 2 bytes of payload across 3 chunks, plus 2-byte header
        // each, plus the 2-byte terminator.
        assert_eq!(wire.len(), (2 + 4) + (2 + 4) + (2 + 2) + 2);

        let mut dechunker = Dechunker::new();
        let messages = dechunker.feed(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], message);
    }

    #[test]
    fn partial_chunk_is_never_delivered() {
        let chunker = Chunker::new();
        let wire = chunker.chunk(b"hello");

        let mut dechunker = Dechunker::new();
        // Feed everything except the last byte (half of the terminator).
        let messages = dechunker.feed(&wire[..wire.len() - 1]).unwrap();
        assert!(messages.is_empty());

        let messages = dechunker.feed(&wire[wire.len() - 1..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"hello");
    }

    #[test]
    fn byte_at_a_time_feed_still_reassembles() {
        let chunker = Chunker::new();
        let wire = chunker.chunk(b"abc");

        let mut dechunker = Dechunker::new();
        let mut all = Vec::new();
        for byte in wire.iter() {
            all.extend(dechunker.feed(&[*byte]).unwrap());
        }
        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"abc");
    }

    #[test]
    fn two_messages_in_one_feed_both_surface() {
        let chunker = Chunker::new();
        let mut wire = BytesMut::new();
        chunker.chunk_into(b"first", &mut wire);
        chunker.chunk_into(b"second", &mut wire);

        let mut dechunker = Dechunker::new();
        let messages = dechunker.feed(&wire).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0][..], b"first");
        assert_eq!(&messages[1][..], b"second");
    }
}
